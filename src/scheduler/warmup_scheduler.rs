// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Warmup scheduler.
//!
//! Turns predictions into an ordered, resource-feasible `WarmupSchedule`.
//! Placement is simulated on a tentative timeline seeded from the caller's
//! resource snapshot; nothing is reserved here. Reservations are taken when
//! a worker admits the task.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::conflict::{for_resolution, ConflictDecision, ConflictStrategy, ResourceConflict};
use crate::config::{SharedConfig, WarmupConfig};
use crate::error::{ResourceDimension, Result};
use crate::models::ModelCatalog;
use crate::performance::{is_running, peak_concurrent, PerformancePredictor};
use crate::resources::ResourceManager;
use crate::types::{
    ModelPrediction, PerformanceImpact, RejectedCandidate, RejectionReason, RequestPriority,
    ResourceAvailability, ResourceRequirements, WarmupSchedule, WarmupTask,
};

const BASE_LOAD_TIME_MS: f64 = 1000.0;

pub struct WarmupScheduler {
    config: SharedConfig,
    catalog: Arc<ModelCatalog>,
    resources: Arc<ResourceManager>,
    performance: Arc<PerformancePredictor>,
    /// Overrides `conflict_resolution` when set.
    strategy: Option<Arc<dyn ConflictStrategy>>,
}

struct Candidate {
    task: WarmupTask,
    time_until_needed: Duration,
}

impl WarmupScheduler {
    pub fn new(
        config: SharedConfig,
        catalog: Arc<ModelCatalog>,
        resources: Arc<ResourceManager>,
        performance: Arc<PerformancePredictor>,
    ) -> Self {
        Self { config, catalog, resources, performance, strategy: None }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn ConflictStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    fn strategy(&self, config: &WarmupConfig) -> Arc<dyn ConflictStrategy> {
        match &self.strategy {
            Some(strategy) => strategy.clone(),
            None => for_resolution(config.conflict_resolution),
        }
    }

    /// Build a schedule for `predictions` against the `resources` snapshot.
    /// Identical inputs yield identical task order and offsets.
    pub async fn schedule_warmup(
        &self,
        predictions: &[ModelPrediction],
        resources: &ResourceAvailability,
    ) -> Result<WarmupSchedule> {
        let config = self.config.current();
        let mut rejected = Vec::new();

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for prediction in predictions {
            if prediction.confidence_score < config.prediction_threshold {
                rejected.push(RejectedCandidate { model_id: prediction.model_id, reason: RejectionReason::BelowThreshold });
                continue;
            }
            if !seen.insert(prediction.model_id) {
                continue;
            }
            candidates.push(self.candidate(prediction, &config).await);
        }

        candidates.sort_by(|a, b| {
            b.task
                .priority
                .cmp(&a.task.priority)
                .then_with(|| b.task.confidence.total_cmp(&a.task.confidence))
                .then_with(|| a.time_until_needed.cmp(&b.time_until_needed))
                .then_with(|| a.task.model_id.cmp(&b.task.model_id))
        });
        let candidates = order_dependencies(candidates);

        let strategy = self.strategy(&config);
        let mut placed: Vec<WarmupTask> = Vec::new();
        for candidate in candidates {
            let model_id = candidate.task.model_id;
            match self.place(candidate, &placed, resources, &config, strategy.as_ref()) {
                Ok(task) => placed.push(task),
                Err(reason) => {
                    tracing::debug!(model_id = %model_id, ?reason, "Warmup candidate rejected");
                    rejected.push(RejectedCandidate { model_id, reason });
                }
            }
        }

        let schedule = build_schedule(placed, rejected);
        tracing::debug!(
            tasks = schedule.tasks.len(),
            rejected = schedule.rejected.len(),
            total_ms = schedule.total_estimated_time.as_millis() as u64,
            strategy = strategy.name(),
            "Built warmup schedule"
        );
        Ok(schedule)
    }

    /// Schedule, then drop the lowest-confidence task while the forecast
    /// impact is unacceptable, at most `max_shrink_passes` times.
    pub async fn schedule_with_assessment(
        &self,
        predictions: &[ModelPrediction],
        resources: &ResourceAvailability,
    ) -> Result<(WarmupSchedule, PerformanceImpact)> {
        let max_passes = self.config.current().max_shrink_passes;
        let mut schedule = self.schedule_warmup(predictions, resources).await?;
        let mut impact = self.performance.assess_impact(&schedule)?;

        let mut passes = 0;
        while !impact.is_acceptable && passes < max_passes && !schedule.tasks.is_empty() {
            let weakest = schedule
                .tasks
                .iter()
                .enumerate()
                .min_by(|(ia, a), (ib, b)| a.confidence.total_cmp(&b.confidence).then(ib.cmp(ia)))
                .map(|(i, _)| i);
            let Some(index) = weakest else { break };

            let mut tasks = std::mem::take(&mut schedule.tasks);
            let dropped = tasks.remove(index);
            let mut rejected = std::mem::take(&mut schedule.rejected);
            rejected.push(RejectedCandidate { model_id: dropped.model_id, reason: RejectionReason::ImpactShrink });
            schedule = build_schedule(tasks, rejected);

            passes += 1;
            impact = self.performance.assess_impact(&schedule)?;
            tracing::debug!(pass = passes, model_id = %dropped.model_id, acceptable = impact.is_acceptable, "Shrunk warmup schedule");
        }

        if !impact.is_acceptable {
            tracing::warn!(
                tasks = schedule.tasks.len(),
                responsiveness = impact.responsiveness_impact,
                "Warmup schedule still unacceptable after shrinking"
            );
        }
        Ok((schedule, impact))
    }

    async fn candidate(&self, prediction: &ModelPrediction, config: &WarmupConfig) -> Candidate {
        let priority = priority_for(prediction);
        let (requirements, estimated_time, dependencies) = match self.catalog.get(&prediction.model_id).await {
            Some(profile) => (profile.requirements, profile.estimated_load_time, profile.dependencies),
            None => (estimate_requirements(prediction, config), estimate_load_time(prediction), Vec::new()),
        };

        let mut task = WarmupTask::new(prediction.model_id, priority, requirements);
        task.estimated_time = estimated_time;
        task.confidence = prediction.confidence_score;
        task.dependencies = dependencies;
        Candidate { task, time_until_needed: prediction.time_until_needed }
    }

    fn place(
        &self,
        candidate: Candidate,
        placed: &[WarmupTask],
        snapshot: &ResourceAvailability,
        config: &WarmupConfig,
        strategy: &dyn ConflictStrategy,
    ) -> std::result::Result<WarmupTask, RejectionReason> {
        let Candidate { mut task, time_until_needed } = candidate;

        if placed.len() >= config.max_warm_models {
            return Err(RejectionReason::CapacityLimit);
        }
        if self.resources.exceeds_ceiling(&task.requirements).is_some() {
            return Err(RejectionReason::ExceedsCeiling);
        }
        if snapshot.shortfall(&task.requirements).is_some() {
            return Err(RejectionReason::ResourceExhausted);
        }

        let lead = task.estimated_time.saturating_add(config.lead_time());
        let mut earliest = time_until_needed.saturating_sub(lead);
        for dependency in placed.iter().filter(|p| task.dependencies.contains(&p.model_id)) {
            earliest = earliest.max(dependency.end_offset());
        }

        let mut starts: Vec<Duration> = placed
            .iter()
            .map(WarmupTask::end_offset)
            .filter(|end| *end > earliest)
            .collect();
        starts.push(earliest);
        starts.sort();
        starts.dedup();

        let duration = task.estimated_time;
        let concurrency_start = starts
            .iter()
            .copied()
            .find(|start| concurrency_fits(placed, *start, duration, config.max_concurrent_warmups));
        let resource_start = starts.iter().copied().find(|start| {
            concurrency_fits(placed, *start, duration, config.max_concurrent_warmups)
                && headroom_shortfall(placed, *start, duration, &task.requirements, snapshot).is_none()
        });

        let (Some(requested), Some(feasible)) = (concurrency_start, resource_start) else {
            return Err(RejectionReason::ResourceExhausted);
        };

        if feasible > requested {
            let dimension = headroom_shortfall(placed, requested, duration, &task.requirements, snapshot);
            let conflict = ResourceConflict {
                candidate: &task,
                blocking: placed.iter().filter(|p| is_running(p, requested)).collect(),
                dimension: dimension.unwrap_or(ResourceDimension::Memory),
                requested_start: requested,
                delayed_start: feasible,
            };
            if strategy.resolve(&conflict) == ConflictDecision::Drop {
                return Err(RejectionReason::ResourceConflict);
            }
        }

        task.start_offset = feasible;
        Ok(task)
    }
}

/// Priority tier from how sure and how likely the prediction is.
pub(crate) fn priority_for(prediction: &ModelPrediction) -> RequestPriority {
    let (conf, prob) = (prediction.confidence_score, prediction.usage_probability);
    if conf > 0.9 && prob > 0.8 {
        RequestPriority::Critical
    } else if conf > 0.7 && prob > 0.6 {
        RequestPriority::High
    } else if conf > 0.5 && prob > 0.4 {
        RequestPriority::Medium
    } else {
        RequestPriority::Low
    }
}

/// Requirements for a model the catalog does not describe, each dimension
/// capped at a quarter of its ceiling.
fn estimate_requirements(prediction: &ModelPrediction, config: &WarmupConfig) -> ResourceRequirements {
    let conf = prediction.confidence_score;
    ResourceRequirements {
        memory_mb: ((conf * 200.0) as u64).min(config.max_memory_mb / 4),
        cpu_percent: (conf * 10.0).min(config.max_cpu_percent / 4.0),
        network_mbps: if conf > 0.7 { 5.0_f64.min(config.max_network_mbps / 4.0) } else { 0.0 },
        storage_mb: ((prediction.usage_probability * 50.0) as u64).min(config.max_storage_mb / 4),
    }
}

fn estimate_load_time(prediction: &ModelPrediction) -> Duration {
    let factor = match prediction.confidence_score {
        c if c > 0.8 => 1.5,
        c if c > 0.6 => 1.0,
        _ => 0.7,
    };
    Duration::from_millis((BASE_LOAD_TIME_MS * factor) as u64)
}

/// Stable topological order: the earliest candidate with no pending
/// in-batch dependency goes next. Cycles fall back to input order.
fn order_dependencies(mut remaining: Vec<Candidate>) -> Vec<Candidate> {
    let mut ordered = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let pending: HashSet<_> = remaining.iter().map(|c| c.task.model_id).collect();
        let ready = remaining
            .iter()
            .position(|c| c.task.dependencies.iter().all(|d| !pending.contains(d)));
        let index = match ready {
            Some(index) => index,
            None => {
                tracing::warn!(
                    model_id = %remaining[0].task.model_id,
                    "Dependency cycle among warmup candidates; keeping priority order"
                );
                0
            }
        };
        ordered.push(remaining.remove(index));
    }
    ordered
}

/// Instants in `[start, start + duration)` at which the running set can grow.
fn candidate_starts(placed: &[WarmupTask], start: Duration, duration: Duration) -> Vec<Duration> {
    let end = start.saturating_add(duration);
    let mut points = vec![start];
    points.extend(
        placed
            .iter()
            .map(|p| p.start_offset)
            .filter(|s| *s > start && *s < end),
    );
    points
}

fn concurrency_fits(placed: &[WarmupTask], start: Duration, duration: Duration, limit: usize) -> bool {
    candidate_starts(placed, start, duration)
        .into_iter()
        .all(|at| placed.iter().filter(|p| is_running(p, at)).count() < limit)
}

fn headroom_shortfall(
    placed: &[WarmupTask],
    start: Duration,
    duration: Duration,
    requirements: &ResourceRequirements,
    snapshot: &ResourceAvailability,
) -> Option<ResourceDimension> {
    candidate_starts(placed, start, duration).into_iter().find_map(|at| {
        let load = placed
            .iter()
            .filter(|p| is_running(p, at))
            .fold(*requirements, |acc, p| acc.plus(&p.requirements));
        snapshot.shortfall(&load)
    })
}

fn build_schedule(tasks: Vec<WarmupTask>, rejected: Vec<RejectedCandidate>) -> WarmupSchedule {
    let total_estimated_time = tasks.iter().map(WarmupTask::end_offset).max().unwrap_or(Duration::ZERO);
    let priority = tasks.iter().map(|t| t.priority).max().unwrap_or(RequestPriority::Low);
    let (resource_requirements, _) = peak_concurrent(&tasks);
    WarmupSchedule { tasks, total_estimated_time, resource_requirements, priority, rejected }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
