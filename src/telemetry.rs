//! Tracing subscriber setup and metric names.

use tracing_subscriber::{fmt, EnvFilter};

pub const DEFAULT_FILTER: &str = "gg_warmup=info";

pub(crate) const PREDICTIONS_TOTAL: &str = "warmup_predictions_total";
pub(crate) const PREDICTION_LATENCY_MS: &str = "warmup_prediction_latency_ms";
pub(crate) const PREDICTION_HITS: &str = "warmup_prediction_hits_total";
pub(crate) const PREDICTION_MISSES: &str = "warmup_prediction_misses_total";
pub(crate) const WARMUP_OUTCOMES: &str = "warmup_outcomes_total";
pub(crate) const LOAD_LATENCY_MS: &str = "warmup_load_latency_ms";
pub(crate) const QUEUE_DEPTH: &str = "warmup_queue_depth";
pub(crate) const QUEUE_EVICTIONS: &str = "warmup_queue_evictions_total";
pub(crate) const RESOURCE_REJECTIONS: &str = "warmup_resource_rejections_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Install a global subscriber filtered by `RUST_LOG` (default `gg_warmup=info`).
///
/// Returns an error instead of panicking when a subscriber is already set.
pub fn init_logging(format: LogFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    match format {
        LogFormat::Pretty => fmt().with_env_filter(filter).with_target(true).try_init(),
        LogFormat::Json => fmt().json().with_env_filter(filter).with_current_span(false).try_init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice_does_not_panic() {
        let first = init_logging(LogFormat::Json);
        let second = init_logging(LogFormat::Pretty);
        // Another test may have installed a subscriber first.
        assert!(first.is_ok() || second.is_err());
        assert!(second.is_err());
    }
}
