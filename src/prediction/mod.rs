//! Model prediction: features, scorers and the engine.

mod engine;
mod features;
mod scorer;

pub use engine::{EngineStats, PredictionEngine};
pub use features::{FeatureVector, FEATURE_DIM};
pub use scorer::{heuristic_score, HeuristicScore, LearnedModel, Scorer};
