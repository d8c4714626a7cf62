//! Background loop applying feedback to the analyzer and the engine.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::collector::{FeedbackSignal, MetricsCollector};
use crate::prediction::PredictionEngine;
use crate::usage::UsagePatternAnalyzer;

/// How often expired prediction windows are swept.
pub const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Apply one signal: success-rate update, then online training when the
/// prediction carried features.
pub async fn apply_feedback(signal: &FeedbackSignal, analyzer: &UsagePatternAnalyzer, engine: &PredictionEngine) {
    analyzer.apply_outcome(&signal.model_id, signal.was_used).await;
    if let Some(features) = &signal.features {
        engine.train(features, signal.was_used);
    }
}

/// Spawn the learning loop. On shutdown, signals already queued are applied
/// before the task exits.
pub fn spawn_feedback_loop(
    mut rx: UnboundedReceiver<FeedbackSignal>,
    analyzer: Arc<UsagePatternAnalyzer>,
    engine: Arc<PredictionEngine>,
    metrics: Arc<MetricsCollector>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sweep = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut applied: u64 = 0;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                signal = rx.recv() => match signal {
                    Some(signal) => {
                        apply_feedback(&signal, &analyzer, &engine).await;
                        applied += 1;
                    }
                    None => break,
                },
                _ = sweep.tick() => {
                    let resolved = metrics.resolve_expired();
                    if resolved > 0 {
                        tracing::debug!(resolved, "Expired prediction windows resolved");
                    }
                }
            }
        }

        while let Ok(signal) = rx.try_recv() {
            apply_feedback(&signal, &analyzer, &engine).await;
            applied += 1;
        }
        tracing::debug!(applied, "Feedback loop stopped");
    })
}
