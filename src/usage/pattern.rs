//! Per-model usage aggregate.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::types::{ModelId, ModelTask, WarmupRequest};

/// Observations between histogram decays.
const DECAY_EVERY: u64 = 100;
const HISTOGRAM_DECAY: f64 = 0.9;
/// Task weights below this are dropped before renormalizing.
const MIN_TASK_WEIGHT: f64 = 1e-9;

/// Observations required before a request can be judged unusual.
pub const MIN_ANOMALY_OBSERVATIONS: u64 = 20;
const ANOMALY_HOUR_WEIGHT: f64 = 0.5;
const ANOMALY_TASK_WEIGHT: f64 = 0.5;

/// Point-in-time summary of a pattern, kept to follow how it drifts.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternSnapshot {
    pub at: DateTime<Utc>,
    pub total_observations: u64,
    pub peak_hour: Option<usize>,
    pub dominant_task: Option<ModelTask>,
    pub dominant_share: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UsagePattern {
    pub model_id: ModelId,
    pub hourly: [f64; 24],
    pub daily: [f64; 7],
    pub mean_session_secs: f64,
    /// Normalized; sums to 1.0 once any observation was recorded.
    pub task_distribution: HashMap<ModelTask, f64>,
    pub success_rate: f64,
    pub total_observations: u64,
    pub last_updated: DateTime<Utc>,
}

impl UsagePattern {
    pub fn new(model_id: ModelId, at: DateTime<Utc>) -> Self {
        Self {
            model_id,
            hourly: [0.0; 24],
            daily: [0.0; 7],
            mean_session_secs: 0.0,
            task_distribution: HashMap::new(),
            success_rate: 1.0,
            total_observations: 0,
            last_updated: at,
        }
    }

    pub(crate) fn observe(&mut self, request: &WarmupRequest, learning_rate: f64) {
        self.total_observations += 1;
        let n = self.total_observations as f64;

        self.hourly[request.hour_of_day()] += 1.0;
        self.daily[request.day_of_week()] += 1.0;
        if self.total_observations % DECAY_EVERY == 0 {
            self.hourly.iter_mut().for_each(|c| *c *= HISTOGRAM_DECAY);
            self.daily.iter_mut().for_each(|c| *c *= HISTOGRAM_DECAY);
        }

        let session = request.user_context.session_duration.as_secs_f64();
        self.mean_session_secs += (session - self.mean_session_secs) / n;

        self.update_task_distribution(&request.task, learning_rate);

        if request.timestamp > self.last_updated {
            self.last_updated = request.timestamp;
        }
    }

    /// new = α·event + (1-α)·old, renormalized.
    fn update_task_distribution(&mut self, task: &ModelTask, alpha: f64) {
        if self.task_distribution.is_empty() {
            self.task_distribution.insert(task.clone(), 1.0);
            return;
        }
        for weight in self.task_distribution.values_mut() {
            *weight *= 1.0 - alpha;
        }
        *self.task_distribution.entry(task.clone()).or_insert(0.0) += alpha;

        self.task_distribution.retain(|_, w| *w >= MIN_TASK_WEIGHT);
        let sum: f64 = self.task_distribution.values().sum();
        if sum > 0.0 {
            for weight in self.task_distribution.values_mut() {
                *weight /= sum;
            }
        }
    }

    pub(crate) fn apply_outcome(&mut self, was_used: bool, learning_rate: f64) {
        let target = if was_used { 1.0 } else { 0.0 };
        self.success_rate += learning_rate * (target - self.success_rate);
        self.success_rate = self.success_rate.clamp(0.0, 1.0);
    }

    pub fn task_probability(&self, task: &ModelTask) -> f64 {
        self.task_distribution.get(task).copied().unwrap_or(0.0)
    }

    pub fn distribution_sum(&self) -> f64 {
        self.task_distribution.values().sum()
    }

    /// Bucket weight relative to the busiest hour.
    pub fn hour_share(&self, hour: usize) -> f64 {
        relative_share(&self.hourly, hour)
    }

    pub fn day_share(&self, day: usize) -> f64 {
        relative_share(&self.daily, day)
    }

    pub fn peak_hour(&self) -> Option<usize> {
        self.hourly
            .iter()
            .enumerate()
            .filter(|(_, c)| **c > 0.0)
            .max_by(|a, b| a.1.total_cmp(b.1).then(b.0.cmp(&a.0)))
            .map(|(h, _)| h)
    }

    /// Most likely task and its share, ties broken by task name.
    pub fn dominant_task(&self) -> Option<(ModelTask, f64)> {
        self.task_distribution
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1).then_with(|| b.0.as_str().cmp(a.0.as_str())))
            .map(|(task, share)| (task.clone(), *share))
    }

    pub fn snapshot(&self) -> PatternSnapshot {
        let dominant = self.dominant_task();
        PatternSnapshot {
            at: self.last_updated,
            total_observations: self.total_observations,
            peak_hour: self.peak_hour(),
            dominant_share: dominant.as_ref().map_or(0.0, |(_, share)| *share),
            dominant_task: dominant.map(|(task, _)| task),
            success_rate: self.success_rate,
        }
    }

    /// How far `request` falls outside this pattern's usual hours and tasks,
    /// in [0, 1]. Zero until enough observations exist to judge.
    pub fn anomaly_score(&self, request: &WarmupRequest) -> f64 {
        if self.total_observations < MIN_ANOMALY_OBSERVATIONS {
            return 0.0;
        }
        let hour_fit = self.hour_share(request.hour_of_day());
        let task_fit = match self.dominant_task() {
            Some((_, top)) if top > 0.0 => self.task_probability(&request.task) / top,
            _ => 0.0,
        };
        (1.0 - (ANOMALY_HOUR_WEIGHT * hour_fit + ANOMALY_TASK_WEIGHT * task_fit)).clamp(0.0, 1.0)
    }

    pub fn mean_session_duration(&self) -> Duration {
        Duration::from_secs_f64(self.mean_session_secs.max(0.0))
    }
}

fn relative_share(buckets: &[f64], index: usize) -> f64 {
    let max = buckets.iter().copied().fold(0.0_f64, f64::max);
    if max <= 0.0 {
        return 0.0;
    }
    buckets.get(index).map_or(0.0, |c| c / max)
}
