// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Prediction engine.
//!
//! Scores the analyzer's candidates with the heuristic scorer and, once it is
//! trained and healthy, blends in the learned model. Heuristic-only
//! confidence never exceeds `heuristic_confidence_ceiling`.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::features::FeatureVector;
use super::scorer::{heuristic_score, LearnedModel, Scorer};
use crate::config::{SharedConfig, WarmupConfig};
use crate::error::{Result, WarmupError};
use crate::models::ModelCatalog;
use crate::types::{ModelId, ModelPrediction, WarmupRequest};
use crate::usage::{CandidateScore, UsagePatternAnalyzer, UsageTrend};

const MIN_TIME_UNTIL_NEEDED: Duration = Duration::from_secs(1);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub requests: u64,
    pub heuristic_predictions: u64,
    pub learned_predictions: u64,
    pub training_samples: u64,
    pub load_failures: u64,
}

pub struct PredictionEngine {
    config: SharedConfig,
    analyzer: Arc<UsagePatternAnalyzer>,
    catalog: Arc<ModelCatalog>,
    /// Published learned model; `None` means heuristic-only.
    learned: RwLock<Option<Arc<LearnedModel>>>,
    trainer: Mutex<LearnedModel>,
    requests: AtomicU64,
    heuristic_predictions: AtomicU64,
    learned_predictions: AtomicU64,
    load_failures: AtomicU64,
}

impl PredictionEngine {
    pub fn new(config: SharedConfig, analyzer: Arc<UsagePatternAnalyzer>, catalog: Arc<ModelCatalog>) -> Self {
        Self {
            config,
            analyzer,
            catalog,
            learned: RwLock::new(None),
            trainer: Mutex::new(LearnedModel::new()),
            requests: AtomicU64::new(0),
            heuristic_predictions: AtomicU64::new(0),
            learned_predictions: AtomicU64::new(0),
            load_failures: AtomicU64::new(0),
        }
    }

    /// Scorer for the next prediction.
    pub fn active_scorer(&self) -> Scorer {
        let min_samples = self.config.current().min_training_samples;
        match self.learned.read().as_ref() {
            Some(model) if model.is_healthy(min_samples) => Scorer::Learned(model.clone()),
            _ => Scorer::Heuristic,
        }
    }

    /// Confidence-scored predictions for `request`, best first.
    pub async fn predict_models(&self, request: &WarmupRequest) -> Result<Vec<ModelPrediction>> {
        request.validate()?;
        self.requests.fetch_add(1, Ordering::Relaxed);
        let config = self.config.current();

        let ranking = self
            .analyzer
            .analyze_patterns(request)
            .await
            .map_err(|e| WarmupError::Prediction(format!("pattern analysis failed: {e}")))?;

        let mut candidates: Vec<(ModelId, Option<CandidateScore>)> = Vec::with_capacity(ranking.len());
        if ranking.is_empty() {
            for model_id in self.catalog.supporting(&request.task).await {
                candidates.push((model_id, None));
            }
        } else {
            for model_id in ranking {
                let score = self.analyzer.score_model(&model_id, request).await;
                candidates.push((model_id, score));
            }
        }

        let scorer = self.active_scorer();
        let counter = match scorer {
            Scorer::Heuristic => &self.heuristic_predictions,
            Scorer::Learned(_) => &self.learned_predictions,
        };

        let mut predictions: Vec<ModelPrediction> = candidates
            .into_iter()
            .map(|(model_id, candidate)| self.score_candidate(request, model_id, candidate.as_ref(), &scorer, &config))
            .filter(|p| p.confidence_score >= config.prediction_threshold)
            .collect();

        predictions.sort_by(|a, b| {
            b.confidence_score
                .total_cmp(&a.confidence_score)
                .then_with(|| a.time_until_needed.cmp(&b.time_until_needed))
                .then_with(|| a.model_id.cmp(&b.model_id))
        });
        predictions.truncate(config.max_warm_models);
        counter.fetch_add(predictions.len() as u64, Ordering::Relaxed);

        tracing::debug!(
            task = %request.task,
            scorer = scorer.name(),
            predictions = predictions.len(),
            "Predicted models"
        );
        Ok(predictions)
    }

    fn score_candidate(
        &self,
        request: &WarmupRequest,
        model_id: ModelId,
        candidate: Option<&CandidateScore>,
        scorer: &Scorer,
        config: &WarmupConfig,
    ) -> ModelPrediction {
        let features = FeatureVector::extract(request, candidate);
        let heuristic = heuristic_score(candidate);

        let (confidence, probability) = match scorer {
            Scorer::Heuristic => (
                heuristic.confidence.min(config.heuristic_confidence_ceiling),
                heuristic.usage_probability,
            ),
            Scorer::Learned(model) => {
                let learned = model.predict(&features);
                let w = config.learned_model_weight;
                (
                    (1.0 - w) * heuristic.confidence + w * learned,
                    (1.0 - w) * heuristic.usage_probability + w * learned,
                )
            }
        };

        let time_until_needed = estimate_time_until_needed(candidate, probability, config);
        let mut prediction = ModelPrediction::new(model_id, confidence, probability, time_until_needed)
            .with_features(features);

        match candidate {
            Some(c) => {
                prediction = prediction
                    .with_reasoning(format!("task match {:.2}", c.task_match))
                    .with_reasoning(format!("time-of-day match {:.2}", c.time_of_day))
                    .with_reasoning(format!("recency {:.2} over {} observations", c.recency, c.observations));
                if c.trend != UsageTrend::Insufficient {
                    prediction = prediction.with_reasoning(c.trend.as_str());
                }
            }
            None => {
                prediction = prediction.with_reasoning("no usage history; catalogued for this task");
            }
        }
        prediction.with_reasoning(format!("scored by {}", scorer.name()))
    }

    /// Feed one labelled outcome to the online learner.
    pub fn train(&self, features: &FeatureVector, was_used: bool) {
        let config = self.config.current();
        let mut trainer = self.trainer.lock();
        trainer.train(features, was_used, config.learning_rate);
        if trainer.is_healthy(config.min_training_samples) {
            let snapshot = Arc::new(trainer.clone());
            drop(trainer);
            let became_active = self.learned.write().replace(snapshot).is_none();
            if became_active {
                tracing::info!("Learned model is healthy; blending into predictions");
            }
        }
    }

    /// Install serialized learned-model weights. On failure the engine falls
    /// back to heuristic-only scoring.
    pub fn load_learned_model(&self, json: &str) -> Result<()> {
        let parsed = serde_json::from_str::<LearnedModel>(json)
            .map_err(|e| e.to_string())
            .and_then(|model| model.validate().map(|_| model));

        match parsed {
            Ok(model) => {
                tracing::info!(samples = model.samples, "Loaded learned model");
                *self.trainer.lock() = model.clone();
                *self.learned.write() = Some(Arc::new(model));
                Ok(())
            }
            Err(reason) => {
                self.load_failures.fetch_add(1, Ordering::Relaxed);
                *self.learned.write() = None;
                tracing::warn!(%reason, "Learned model rejected; using heuristic scoring only");
                Err(WarmupError::Prediction(format!("learned model rejected: {reason}")))
            }
        }
    }

    pub fn load_learned_model_from(&self, path: &Path) -> Result<()> {
        match std::fs::read_to_string(path) {
            Ok(json) => self.load_learned_model(&json),
            Err(e) => {
                self.load_failures.fetch_add(1, Ordering::Relaxed);
                *self.learned.write() = None;
                tracing::warn!(path = %path.display(), error = %e, "Learned model unreadable; using heuristic scoring only");
                Err(WarmupError::Prediction(format!("cannot read {}: {e}", path.display())))
            }
        }
    }

    /// Serialize the current training state.
    pub fn export_learned_model(&self) -> Result<String> {
        serde_json::to_string(&*self.trainer.lock())
            .map_err(|e| WarmupError::Internal(format!("learned model serialization failed: {e}")))
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            requests: self.requests.load(Ordering::Relaxed),
            heuristic_predictions: self.heuristic_predictions.load(Ordering::Relaxed),
            learned_predictions: self.learned_predictions.load(Ordering::Relaxed),
            training_samples: self.trainer.lock().samples,
            load_failures: self.load_failures.load(Ordering::Relaxed),
        }
    }
}

/// Mean inter-arrival gap scaled by how unlikely the model is, within
/// [1s, usage window]. Models without history are assumed mid-window.
fn estimate_time_until_needed(
    candidate: Option<&CandidateScore>,
    usage_probability: f64,
    config: &WarmupConfig,
) -> Duration {
    let window = config.usage_window();
    let base = candidate.and_then(|c| c.mean_interarrival).unwrap_or(window / 2);
    base.mul_f64((1.0 - usage_probability).clamp(0.0, 1.0))
        .clamp(MIN_TIME_UNTIL_NEEDED, window.max(MIN_TIME_UNTIL_NEEDED))
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
