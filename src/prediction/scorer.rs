//! Scoring strategies: an always-available heuristic and an optional learned model.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::features::{FeatureVector, FEATURE_DIM};
use crate::usage::CandidateScore;

/// Observations at which pattern evidence reaches ~63%.
const EVIDENCE_SCALE: f64 = 20.0;
/// Usage probability assumed for a catalogued model with no history.
const COLD_PRIOR: f64 = 0.1;

/// Scorer selected per prediction.
#[derive(Debug, Clone)]
pub enum Scorer {
    Heuristic,
    Learned(Arc<LearnedModel>),
}

impl Scorer {
    pub fn name(&self) -> &'static str {
        match self {
            Scorer::Heuristic => "heuristic",
            Scorer::Learned(_) => "learned",
        }
    }
}

/// Heuristic output before blending.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeuristicScore {
    pub usage_probability: f64,
    pub confidence: f64,
}

/// Relevance scaled by observed success, discounted by how much evidence backs it.
pub fn heuristic_score(candidate: Option<&CandidateScore>) -> HeuristicScore {
    match candidate {
        Some(c) => {
            let usage_probability = (c.relevance * (0.7 + 0.3 * c.success_rate)).clamp(0.0, 1.0);
            let evidence = 1.0 - (-(c.observations as f64) / EVIDENCE_SCALE).exp();
            HeuristicScore { usage_probability, confidence: usage_probability * evidence }
        }
        None => HeuristicScore { usage_probability: COLD_PRIOR, confidence: 0.0 },
    }
}

/// Online logistic regression over `FeatureVector`s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedModel {
    pub weights: Vec<f64>,
    pub bias: f64,
    pub samples: u64,
}

impl LearnedModel {
    pub fn new() -> Self {
        Self { weights: vec![0.0; FEATURE_DIM], bias: 0.0, samples: 0 }
    }

    pub fn predict(&self, features: &FeatureVector) -> f64 {
        sigmoid(features.dot(&self.weights) + self.bias)
    }

    /// One SGD step on the log loss.
    pub fn train(&mut self, features: &FeatureVector, label: bool, learning_rate: f64) {
        if !features.is_finite() {
            return;
        }
        let target = if label { 1.0 } else { 0.0 };
        let error = target - self.predict(features);
        for (w, x) in self.weights.iter_mut().zip(features.0.iter()) {
            *w += learning_rate * error * x;
        }
        self.bias += learning_rate * error;
        self.samples += 1;
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.weights.len() != FEATURE_DIM {
            return Err(format!(
                "expected {FEATURE_DIM} weights, found {}",
                self.weights.len()
            ));
        }
        if !self.bias.is_finite() || self.weights.iter().any(|w| !w.is_finite()) {
            return Err("weights must be finite".to_string());
        }
        Ok(())
    }

    pub fn is_healthy(&self, min_samples: u64) -> bool {
        self.samples >= min_samples && self.validate().is_ok()
    }
}

impl Default for LearnedModel {
    fn default() -> Self {
        Self::new()
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
