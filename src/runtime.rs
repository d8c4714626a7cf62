// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Caller-facing warmup runtime.
//!
//! Wires the analyzer, engine, scheduler, queue and workers together and owns
//! their background tasks. `predict_and_warm` never blocks on a model load:
//! usage recording is fire-and-forget and accepted tasks are handed to the
//! queue.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigurationSource, SharedConfig, WarmupConfig};
use crate::error::{Result, WarmupError};
use crate::feedback::{spawn_feedback_loop, MetricsCollector, WarmupMetricsSnapshot};
use crate::models::{ModelCatalog, ModelLoader, WarmPool};
use crate::performance::PerformancePredictor;
use crate::prediction::PredictionEngine;
use crate::resources::ResourceManager;
use crate::scheduler::{
    spawn_priority_booster, spawn_worker_pool, ConflictStrategy, WarmupQueue, WarmupScheduler, WorkerContext,
};
use crate::types::{
    clamp_unit, ModelId, ModelPrediction, PerformanceImpact, TaskId, TaskState, WarmupPrediction, WarmupRequest,
    WarmupSchedule,
};
use crate::usage::{UsageHistory, UsagePatternAnalyzer};

pub struct WarmupRuntime {
    config: SharedConfig,
    catalog: Arc<ModelCatalog>,
    analyzer: Arc<UsagePatternAnalyzer>,
    engine: Arc<PredictionEngine>,
    resources: Arc<ResourceManager>,
    performance: Arc<PerformancePredictor>,
    scheduler: WarmupScheduler,
    queue: Arc<WarmupQueue>,
    warm_pool: Arc<WarmPool>,
    metrics: Arc<MetricsCollector>,
    loader: Arc<dyn ModelLoader>,
    shutdown: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl WarmupRuntime {
    /// Validate `config`, build every component and spawn the worker pool,
    /// priority booster and feedback loop. Must be called inside a Tokio
    /// runtime.
    pub fn start(config: WarmupConfig, catalog: Arc<ModelCatalog>, loader: Arc<dyn ModelLoader>) -> Result<Self> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(WarmupError::Internal("WarmupRuntime::start requires a Tokio runtime".into()));
        }
        let config = SharedConfig::new(config)?;

        let history = Arc::new(UsageHistory::new(config.clone()));
        let analyzer = Arc::new(UsagePatternAnalyzer::new(config.clone(), catalog.clone(), history));
        let engine = Arc::new(PredictionEngine::new(config.clone(), analyzer.clone(), catalog.clone()));
        let resources = Arc::new(ResourceManager::new(config.clone()));
        let performance = Arc::new(PerformancePredictor::new(config.clone()));
        let scheduler =
            WarmupScheduler::new(config.clone(), catalog.clone(), resources.clone(), performance.clone());
        let queue = Arc::new(WarmupQueue::new(config.clone()));
        let warm_pool = Arc::new(WarmPool::new(config.clone()));
        let (metrics, feedback_rx) = MetricsCollector::new(config.clone());
        let metrics = Arc::new(metrics);
        let shutdown = CancellationToken::new();

        let ctx = WorkerContext {
            queue: queue.clone(),
            resources: resources.clone(),
            loader: loader.clone(),
            warm_pool: warm_pool.clone(),
            metrics: metrics.clone(),
            config: config.clone(),
        };
        let mut background = spawn_worker_pool(ctx, shutdown.clone());
        background.push(spawn_priority_booster(queue.clone(), shutdown.clone()));
        background.push(spawn_feedback_loop(
            feedback_rx,
            analyzer.clone(),
            engine.clone(),
            metrics.clone(),
            shutdown.clone(),
        ));

        tracing::info!(
            background_warmup = config.current().background_warmup_enabled,
            "Warmup runtime started"
        );

        Ok(Self {
            config,
            catalog,
            analyzer,
            engine,
            resources,
            performance,
            scheduler,
            queue,
            warm_pool,
            metrics,
            loader,
            shutdown,
            background: Mutex::new(background),
        })
    }

    /// Start from a configuration source.
    pub fn from_source(
        source: &dyn ConfigurationSource,
        catalog: Arc<ModelCatalog>,
        loader: Arc<dyn ModelLoader>,
    ) -> Result<Self> {
        let config = source.load()?;
        tracing::info!(source = %source.describe(), "Loaded warmup configuration");
        Self::start(config, catalog, loader)
    }

    /// Replace the conflict strategy selected by `conflict_resolution`.
    pub fn with_conflict_strategy(mut self, strategy: Arc<dyn ConflictStrategy>) -> Self {
        self.scheduler = WarmupScheduler::new(
            self.config.clone(),
            self.catalog.clone(),
            self.resources.clone(),
            self.performance.clone(),
        )
        .with_strategy(strategy);
        self
    }

    /// Predict the models `request` will lead to, schedule their warmup and
    /// queue it in the background.
    ///
    /// Invalid requests and internal faults are returned as errors. Every other
    /// component failure degrades to a best-effort prediction.
    pub async fn predict_and_warm(&self, request: WarmupRequest) -> Result<WarmupPrediction> {
        if self.shutdown.is_cancelled() {
            return Err(WarmupError::Shutdown);
        }
        let started = Instant::now();
        request.validate()?;

        let analyzer = self.analyzer.clone();
        let recorded = request.clone();
        tokio::spawn(async move {
            if let Err(e) = analyzer.record_usage(&recorded).await {
                tracing::warn!(error = %e, "Failed to record usage");
            }
        });

        let used = self.catalog.resolve_request(&request).await;
        self.metrics.record_model_used(used, Utc::now());
        self.warm_pool.touch(&used).await;

        let predictions = match self.engine.predict_models(&request).await {
            Ok(predictions) => predictions,
            Err(e) if e.is_fatal_to_request() => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "Prediction failed; returning empty prediction");
                Vec::new()
            }
        };

        let (schedule, performance_impact) = match self.plan(&predictions).await {
            Ok(planned) => planned,
            Err(e) if e.is_fatal_to_request() => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "Scheduling failed; nothing will be warmed");
                (WarmupSchedule::empty(), PerformanceImpact { is_acceptable: false, ..PerformanceImpact::none() })
            }
        };

        if performance_impact.is_acceptable && self.config.current().background_warmup_enabled {
            self.enqueue(&schedule).await;
        }

        let prediction = WarmupPrediction {
            confidence_score: aggregate_confidence(&predictions),
            predicted_models: predictions,
            schedule,
            performance_impact,
            generated_at: Utc::now(),
            prediction_latency: started.elapsed(),
        };
        if let Err(e) = self.metrics.record_prediction(&prediction) {
            tracing::warn!(error = %e, "Failed to record prediction metrics");
        }

        tracing::debug!(
            task = %request.task,
            predicted = prediction.predicted_models.len(),
            scheduled = prediction.schedule.tasks.len(),
            confidence = prediction.confidence_score,
            latency_ms = prediction.prediction_latency.as_millis() as u64,
            "predict_and_warm complete"
        );
        Ok(prediction)
    }

    async fn plan(&self, predictions: &[ModelPrediction]) -> Result<(WarmupSchedule, PerformanceImpact)> {
        if predictions.is_empty() {
            return Ok((WarmupSchedule::empty(), PerformanceImpact::none()));
        }
        let snapshot = self.resources.get_available_resources()?;
        self.scheduler.schedule_with_assessment(predictions, &snapshot).await
    }

    async fn enqueue(&self, schedule: &WarmupSchedule) {
        for task in &schedule.tasks {
            if self.warm_pool.contains(&task.model_id).await {
                continue;
            }
            match self.queue.enqueue_unique(task.clone()) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(task_id = %task.id, model_id = %task.model_id, "Warmup already pending")
                }
                Err(e) => {
                    tracing::debug!(task_id = %task.id, model_id = %task.model_id, error = %e, "Warmup not queued")
                }
            }
        }
    }

    pub fn get_metrics(&self) -> WarmupMetricsSnapshot {
        WarmupMetricsSnapshot { warmups_evicted: self.queue.stats().evicted, ..self.metrics.snapshot() }
    }

    /// Validate and swap the configuration. Readers see either the old or the
    /// new value, never a mix. The worker pool keeps its start-up size.
    pub fn update_config(&self, config: WarmupConfig) -> Result<()> {
        let previous = self.config.replace(config)?;
        self.analyzer.invalidate_cache();
        let current = self.config.current();
        if previous.max_concurrent_warmups != current.max_concurrent_warmups {
            tracing::warn!(
                workers = previous.max_concurrent_warmups,
                requested = current.max_concurrent_warmups,
                "Worker pool size is fixed until restart"
            );
        }
        tracing::info!("Warmup configuration updated");
        Ok(())
    }

    pub fn reload_from(&self, source: &dyn ConfigurationSource) -> Result<()> {
        let config = source.load()?;
        self.update_config(config)?;
        tracing::info!(source = %source.describe(), "Reloaded warmup configuration");
        Ok(())
    }

    pub fn cancel_task(&self, task_id: TaskId) -> bool {
        self.queue.cancel(task_id)
    }

    pub fn task_state(&self, task_id: TaskId) -> Option<TaskState> {
        self.queue.task_state(task_id)
    }

    /// Report that `model_id` was just used, outside of `predict_and_warm`.
    pub fn record_model_used(&self, model_id: ModelId) {
        self.metrics.record_model_used(model_id, Utc::now());
    }

    pub fn config(&self) -> Arc<WarmupConfig> {
        self.config.current()
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    pub fn analyzer(&self) -> &Arc<UsagePatternAnalyzer> {
        &self.analyzer
    }

    pub fn engine(&self) -> &Arc<PredictionEngine> {
        &self.engine
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    pub fn queue(&self) -> &Arc<WarmupQueue> {
        &self.queue
    }

    pub fn warm_pool(&self) -> &Arc<WarmPool> {
        &self.warm_pool
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop accepting work, cancel queued and in-flight warmups, wait for the
    /// background tasks and unload every warm model.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        tracing::info!(queued = self.queue.depth(), "Warmup runtime shutting down");
        self.shutdown.cancel();
        self.queue.close();

        let handles = std::mem::take(&mut *self.background.lock());
        for result in join_all(handles).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }

        self.warm_pool.drain(self.loader.as_ref()).await;
        let repaired = self.resources.check_consistency();
        if repaired > 0 {
            tracing::warn!(repaired, "Resource ledger repaired at shutdown");
        }
        tracing::info!("Warmup runtime stopped");
    }
}

impl Drop for WarmupRuntime {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.queue.close();
    }
}

/// Probability-weighted mean confidence; zero with nothing predicted.
fn aggregate_confidence(predictions: &[ModelPrediction]) -> f64 {
    let weight: f64 = predictions.iter().map(|p| p.usage_probability).sum();
    if weight <= 0.0 {
        return 0.0;
    }
    let weighted: f64 = predictions.iter().map(|p| p.confidence_score * p.usage_probability).sum();
    clamp_unit(weighted / weight)
}
