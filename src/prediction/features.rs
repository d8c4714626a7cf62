//! Numeric features for scoring a (request, candidate) pair.

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::types::{ModelTask, RequestPriority, WarmupRequest};
use crate::usage::CandidateScore;

pub const FEATURE_DIM: usize = 20;

const COMPLEXITY_SLOT: usize = ModelTask::SLOTS;
const INPUT_LENGTH_SLOT: usize = COMPLEXITY_SLOT + 1;
const HOUR_SIN_SLOT: usize = INPUT_LENGTH_SLOT + 1;
const HOUR_COS_SLOT: usize = HOUR_SIN_SLOT + 1;
const PROJECT_SIZE_SLOT: usize = HOUR_COS_SLOT + 1;
const PROJECT_COMPLEXITY_SLOT: usize = PROJECT_SIZE_SLOT + 1;
const TASK_MATCH_SLOT: usize = PROJECT_COMPLEXITY_SLOT + 1;
const TIME_MATCH_SLOT: usize = TASK_MATCH_SLOT + 1;
const RECENCY_SLOT: usize = TIME_MATCH_SLOT + 1;
const SUCCESS_SLOT: usize = RECENCY_SLOT + 1;
pub(crate) const PRIORITY_SLOT: usize = SUCCESS_SLOT + 1;
pub(crate) const LATENCY_SLOT: usize = PRIORITY_SLOT + 1;

/// ln(1 + 60 000 ms): a one-minute latency budget maps to 1.0.
const LATENCY_SCALE: f64 = 11.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub [f64; FEATURE_DIM]);

impl FeatureVector {
    /// Request features plus the candidate's pattern features, when known.
    pub fn extract(request: &WarmupRequest, candidate: Option<&CandidateScore>) -> Self {
        let mut f = [0.0; FEATURE_DIM];

        f[request.task.index()] = 1.0;
        f[COMPLEXITY_SLOT] = request.complexity.ordinal() as f64 / 2.0;
        f[INPUT_LENGTH_SLOT] = log_scaled(request.input_length as f64, 10.0);

        let angle = TAU * request.hour_of_day() as f64 / 24.0;
        f[HOUR_SIN_SLOT] = angle.sin();
        f[HOUR_COS_SLOT] = angle.cos();

        f[PROJECT_SIZE_SLOT] = log_scaled(request.project_context.size_lines as f64, 15.0);
        f[PROJECT_COMPLEXITY_SLOT] = request.project_context.complexity_score.clamp(0.0, 1.0);

        f[PRIORITY_SLOT] = request.priority.rank() as f64 / (RequestPriority::LEVELS - 1) as f64;
        f[LATENCY_SLOT] = log_scaled(request.acceptable_latency.as_millis() as f64, LATENCY_SCALE);

        if let Some(c) = candidate {
            f[TASK_MATCH_SLOT] = c.task_match;
            f[TIME_MATCH_SLOT] = c.time_of_day;
            f[RECENCY_SLOT] = c.recency;
            f[SUCCESS_SLOT] = c.success_rate;
        }
        Self(f)
    }

    pub fn dot(&self, weights: &[f64]) -> f64 {
        self.0.iter().zip(weights).map(|(x, w)| x * w).sum()
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|x| x.is_finite())
    }
}

/// ln(1 + x) / scale, clamped to [0, 1].
fn log_scaled(value: f64, scale: f64) -> f64 {
    (value.max(0.0).ln_1p() / scale).clamp(0.0, 1.0)
}
