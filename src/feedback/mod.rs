//! Prediction accuracy tracking and the feedback loop that learns from it.

mod collector;
mod learning;

pub use collector::{FeedbackSignal, MetricsCollector, WarmupMetricsSnapshot, WarmupOutcome, MAX_PENDING_PREDICTIONS};
pub use learning::{apply_feedback, spawn_feedback_loop, EXPIRY_SWEEP_INTERVAL};
