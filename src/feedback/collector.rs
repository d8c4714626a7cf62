// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Prediction accuracy and warmup outcome accounting.
//!
//! Every recorded prediction stays pending until each of its models is either
//! used inside its window or the window closes. Resolutions are counted here
//! and forwarded to the learning loop as feedback signals.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::config::SharedConfig;
use crate::error::{Result, WarmupError};
use crate::prediction::FeatureVector;
use crate::telemetry;
use crate::types::{ModelId, WarmupPrediction};

/// Oldest pending predictions are resolved as misses beyond this many.
pub const MAX_PENDING_PREDICTIONS: usize = 4096;

/// Terminal result of one warmup task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupOutcome {
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl WarmupOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarmupOutcome::Completed => "completed",
            WarmupOutcome::Failed => "failed",
            WarmupOutcome::TimedOut => "timed_out",
            WarmupOutcome::Cancelled => "cancelled",
        }
    }
}

/// Labelled outcome for one predicted model.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackSignal {
    pub model_id: ModelId,
    pub was_used: bool,
    /// Features the engine scored the model with, when known.
    pub features: Option<FeatureVector>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct WarmupMetricsSnapshot {
    pub total_predictions: u64,
    pub prediction_accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub average_prediction_latency_ms: f64,
    pub pending_predictions: usize,
    pub hits: u64,
    pub misses: u64,
    pub warmups_completed: u64,
    pub warmups_failed: u64,
    pub warmups_timed_out: u64,
    pub warmups_cancelled: u64,
    pub warmups_evicted: u64,
    pub average_load_latency_ms: f64,
}

#[derive(Debug)]
struct PendingModel {
    model_id: ModelId,
    deadline: DateTime<Utc>,
    features: Option<FeatureVector>,
    resolved: bool,
}

#[derive(Debug)]
struct PendingPrediction {
    predicted_at: DateTime<Utc>,
    top: ModelId,
    top_resolved: bool,
    models: Vec<PendingModel>,
}

impl PendingPrediction {
    fn is_resolved(&self) -> bool {
        self.models.iter().all(|m| m.resolved)
    }
}

#[derive(Debug, Default)]
struct Counters {
    predictions: AtomicU64,
    latency_micros: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    true_positives: AtomicU64,
    false_positives: AtomicU64,
    false_negatives: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    load_latency_micros: AtomicU64,
}

pub struct MetricsCollector {
    config: SharedConfig,
    pending: Mutex<VecDeque<PendingPrediction>>,
    feedback: UnboundedSender<FeedbackSignal>,
    counters: Counters,
}

impl MetricsCollector {
    /// The receiver carries a signal for every resolved predicted model.
    pub fn new(config: SharedConfig) -> (Self, UnboundedReceiver<FeedbackSignal>) {
        let (feedback, rx) = mpsc::unbounded_channel();
        let collector = Self {
            config,
            pending: Mutex::new(VecDeque::new()),
            feedback,
            counters: Counters::default(),
        };
        (collector, rx)
    }

    pub fn record_prediction(&self, prediction: &WarmupPrediction) -> Result<()> {
        let confidence = prediction.confidence_score;
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(WarmupError::InvalidInput(format!(
                "prediction confidence must be within [0, 1], got {confidence}"
            )));
        }

        self.counters.predictions.fetch_add(1, Ordering::Relaxed);
        let latency_ms = prediction.prediction_latency.as_secs_f64() * 1000.0;
        self.counters
            .latency_micros
            .fetch_add(prediction.prediction_latency.as_micros() as u64, Ordering::Relaxed);
        metrics::counter!(telemetry::PREDICTIONS_TOTAL).increment(1);
        metrics::histogram!(telemetry::PREDICTION_LATENCY_MS).record(latency_ms);

        let Some(top) = prediction.predicted_models.first() else {
            return Ok(());
        };
        let tolerance = self.config.current().prediction_tolerance();
        let predicted_at = prediction.generated_at;
        let models = prediction
            .predicted_models
            .iter()
            .map(|m| PendingModel {
                model_id: m.model_id,
                deadline: window_end(predicted_at, m.time_until_needed.saturating_add(tolerance)),
                features: m.features,
                resolved: false,
            })
            .collect();

        let overflow = {
            let mut pending = self.pending.lock();
            pending.push_back(PendingPrediction {
                predicted_at,
                top: top.model_id,
                top_resolved: false,
                models,
            });
            let excess = pending.len().saturating_sub(MAX_PENDING_PREDICTIONS);
            pending.drain(..excess).collect::<Vec<_>>()
        };
        for mut record in overflow {
            tracing::debug!(predicted_at = %record.predicted_at, "Pending prediction dropped at capacity");
            self.expire(&mut record, None);
        }
        Ok(())
    }

    /// Ground truth: `model_id` was actually used at `at`.
    pub fn record_model_used(&self, model_id: ModelId, at: DateTime<Utc>) {
        let mut matched = false;
        let mut signals = Vec::new();
        {
            let mut pending = self.pending.lock();
            for record in pending.iter_mut() {
                if at < record.predicted_at {
                    continue;
                }
                let Some(model) = record
                    .models
                    .iter_mut()
                    .find(|m| m.model_id == model_id && !m.resolved && at <= m.deadline)
                else {
                    continue;
                };
                model.resolved = true;
                matched = true;
                self.counters.true_positives.fetch_add(1, Ordering::Relaxed);
                signals.push(FeedbackSignal { model_id, was_used: true, features: model.features });

                if record.top == model_id && !record.top_resolved {
                    record.top_resolved = true;
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!(telemetry::PREDICTION_HITS).increment(1);
                }
            }
            pending.retain(|r| !r.is_resolved());
        }

        if !matched {
            self.counters.false_negatives.fetch_add(1, Ordering::Relaxed);
        }
        for signal in signals {
            self.send(signal);
        }
    }

    /// Resolve every model window that closed before now as a miss.
    /// Returns the number of predictions fully resolved.
    pub fn resolve_expired(&self) -> usize {
        self.resolve_expired_at(Utc::now())
    }

    pub fn resolve_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut pending = self.pending.lock();
        for record in pending.iter_mut() {
            self.expire(record, Some(now));
        }
        let before = pending.len();
        pending.retain(|r| !r.is_resolved());
        before - pending.len()
    }

    /// Close out a record. With `now = None` every unresolved model expires.
    fn expire(&self, record: &mut PendingPrediction, now: Option<DateTime<Utc>>) {
        for model in record.models.iter_mut().filter(|m| !m.resolved) {
            if now.is_some_and(|now| model.deadline >= now) {
                continue;
            }
            model.resolved = true;
            self.counters.false_positives.fetch_add(1, Ordering::Relaxed);
            if model.model_id == record.top && !record.top_resolved {
                record.top_resolved = true;
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(telemetry::PREDICTION_MISSES).increment(1);
            }
            self.send(FeedbackSignal { model_id: model.model_id, was_used: false, features: model.features });
        }
    }

    fn send(&self, signal: FeedbackSignal) {
        if self.feedback.send(signal).is_err() {
            tracing::trace!("Feedback receiver closed; signal dropped");
        }
    }

    pub fn total_predictions(&self) -> u64 {
        self.counters.predictions.load(Ordering::Relaxed)
    }

    /// Share of resolved predictions whose top model was used in time.
    pub fn prediction_accuracy(&self) -> f64 {
        ratio(self.counters.hits.load(Ordering::Relaxed), self.counters.misses.load(Ordering::Relaxed))
    }

    pub fn average_prediction_latency_ms(&self) -> f64 {
        let total = self.total_predictions();
        if total == 0 {
            return 0.0;
        }
        self.counters.latency_micros.load(Ordering::Relaxed) as f64 / 1000.0 / total as f64
    }

    pub fn precision(&self) -> f64 {
        ratio(
            self.counters.true_positives.load(Ordering::Relaxed),
            self.counters.false_positives.load(Ordering::Relaxed),
        )
    }

    pub fn recall(&self) -> f64 {
        ratio(
            self.counters.true_positives.load(Ordering::Relaxed),
            self.counters.false_negatives.load(Ordering::Relaxed),
        )
    }

    pub fn f1_score(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    pub fn record_warmup_outcome(&self, outcome: WarmupOutcome, load_latency: Option<Duration>) {
        let counter = match outcome {
            WarmupOutcome::Completed => &self.counters.completed,
            WarmupOutcome::Failed => &self.counters.failed,
            WarmupOutcome::TimedOut => &self.counters.timed_out,
            WarmupOutcome::Cancelled => &self.counters.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::WARMUP_OUTCOMES, "outcome" => outcome.as_str()).increment(1);

        if let (WarmupOutcome::Completed, Some(latency)) = (outcome, load_latency) {
            self.counters
                .load_latency_micros
                .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
            metrics::histogram!(telemetry::LOAD_LATENCY_MS).record(latency.as_secs_f64() * 1000.0);
        }
    }

    pub fn snapshot(&self) -> WarmupMetricsSnapshot {
        let completed = self.counters.completed.load(Ordering::Relaxed);
        let average_load_latency_ms = if completed == 0 {
            0.0
        } else {
            self.counters.load_latency_micros.load(Ordering::Relaxed) as f64 / 1000.0 / completed as f64
        };
        WarmupMetricsSnapshot {
            total_predictions: self.total_predictions(),
            prediction_accuracy: self.prediction_accuracy(),
            precision: self.precision(),
            recall: self.recall(),
            f1_score: self.f1_score(),
            average_prediction_latency_ms: self.average_prediction_latency_ms(),
            pending_predictions: self.pending.lock().len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            warmups_completed: completed,
            warmups_failed: self.counters.failed.load(Ordering::Relaxed),
            warmups_timed_out: self.counters.timed_out.load(Ordering::Relaxed),
            warmups_cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            warmups_evicted: 0,
            average_load_latency_ms,
        }
    }
}

fn ratio(positive: u64, negative: u64) -> f64 {
    let total = positive + negative;
    if total == 0 {
        0.0
    } else {
        positive as f64 / total as f64
    }
}

fn window_end(start: DateTime<Utc>, length: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(length)
        .ok()
        .and_then(|d| start.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
#[path = "collector_tests.rs"]
mod tests;
