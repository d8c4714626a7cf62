//! Warmup tunables, presets and validation.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors. Invalid values are rejected, never clamped.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{field} = {value} is out of range (expected {expected})")]
    OutOfRange {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// How the scheduler settles two candidates competing for the same headroom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Start the lower-priority task once headroom frees.
    #[default]
    DelayLowerPriority,
    /// Reject the lower-priority task outright.
    DropLowerPriority,
}

/// What a full queue does with an incoming task when nothing of lower
/// priority can be evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Fail with `QueueOverflow`.
    RejectNew,
    /// Evict the oldest entry of the same priority.
    EvictOldest,
    /// Reject Critical/High/Medium, evict for Low.
    #[default]
    PriorityAware,
}

/// Thirty days.
pub const MAX_USAGE_WINDOW_SECONDS: u64 = 30 * 24 * 3600;
/// One day.
pub const MAX_WARMUP_TIMEOUT_SECONDS: u64 = 24 * 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmupConfig {
    /// Models kept warm and accepted per schedule.
    pub max_warm_models: usize,
    pub max_memory_mb: u64,
    pub max_cpu_percent: f64,
    pub max_network_mbps: f64,
    pub max_storage_mb: u64,
    /// Minimum confidence for a prediction to be kept.
    pub prediction_threshold: f64,
    pub usage_window_seconds: u64,
    pub max_queue_size: usize,
    pub warmup_timeout_seconds: u64,
    /// Maximum tolerated responsiveness degradation, in [0, 1].
    pub performance_impact_threshold: f64,
    pub max_latency_increase_ms: f64,
    pub learning_rate: f64,
    pub background_warmup_enabled: bool,
    /// Zero disables the analysis cache.
    pub prediction_cache_ttl_seconds: u64,
    pub max_concurrent_warmups: usize,
    pub conflict_resolution: ConflictResolution,
    pub overflow_policy: OverflowPolicy,
    /// Zero disables the anti-starvation boost.
    pub priority_boost_interval_seconds: u64,
    pub heuristic_confidence_ceiling: f64,
    pub learned_model_weight: f64,
    pub min_training_samples: u64,
    pub analysis_top_k: usize,
    pub max_shrink_passes: usize,
    pub warmup_lead_time_seconds: u64,
    pub prediction_tolerance_seconds: u64,
    pub worker_poll_interval_ms: u64,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            max_warm_models: 5,
            max_memory_mb: 2048,
            max_cpu_percent: 30.0,
            max_network_mbps: 100.0,
            max_storage_mb: 4096,
            prediction_threshold: 0.7,
            usage_window_seconds: 3600,
            max_queue_size: 100,
            warmup_timeout_seconds: 30,
            performance_impact_threshold: 0.35,
            max_latency_increase_ms: 50.0,
            learning_rate: 0.1,
            background_warmup_enabled: true,
            prediction_cache_ttl_seconds: 300,
            max_concurrent_warmups: num_cpus::get().clamp(1, 3),
            conflict_resolution: ConflictResolution::DelayLowerPriority,
            overflow_policy: OverflowPolicy::PriorityAware,
            priority_boost_interval_seconds: 30,
            heuristic_confidence_ceiling: 0.85,
            learned_model_weight: 0.6,
            min_training_samples: 50,
            analysis_top_k: 5,
            max_shrink_passes: 3,
            warmup_lead_time_seconds: 5,
            prediction_tolerance_seconds: 30,
            worker_poll_interval_ms: 50,
        }
    }
}

impl WarmupConfig {
    /// Tight budgets for laptops and CI hosts.
    pub fn low_memory() -> Self {
        Self {
            max_warm_models: 2,
            max_memory_mb: 768,
            max_cpu_percent: 15.0,
            max_network_mbps: 25.0,
            max_storage_mb: 1024,
            max_queue_size: 32,
            max_concurrent_warmups: 1,
            prediction_threshold: 0.8,
            ..Default::default()
        }
    }

    /// Warm more, earlier, on well-provisioned workstations.
    pub fn aggressive() -> Self {
        Self {
            max_warm_models: 10,
            max_memory_mb: 8192,
            max_cpu_percent: 60.0,
            max_network_mbps: 400.0,
            max_storage_mb: 16384,
            prediction_threshold: 0.55,
            max_queue_size: 256,
            max_concurrent_warmups: num_cpus::get().clamp(1, 6),
            performance_impact_threshold: 0.6,
            max_latency_increase_ms: 120.0,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        at_least("max_warm_models", self.max_warm_models as f64, 1.0)?;
        at_least("max_memory_mb", self.max_memory_mb as f64, 1.0)?;
        in_range("max_cpu_percent", self.max_cpu_percent, 0.0, 100.0, "(0, 100]", false)?;
        positive_finite("max_network_mbps", self.max_network_mbps)?;
        at_least("max_storage_mb", self.max_storage_mb as f64, 1.0)?;
        in_range("prediction_threshold", self.prediction_threshold, 0.0, 1.0, "[0, 1]", true)?;
        at_least("usage_window_seconds", self.usage_window_seconds as f64, 1.0)?;
        at_least("max_queue_size", self.max_queue_size as f64, 1.0)?;
        at_least("warmup_timeout_seconds", self.warmup_timeout_seconds as f64, 1.0)?;
        at_most("usage_window_seconds", self.usage_window_seconds, MAX_USAGE_WINDOW_SECONDS, "<= 2592000")?;
        at_most("warmup_timeout_seconds", self.warmup_timeout_seconds, MAX_WARMUP_TIMEOUT_SECONDS, "<= 86400")?;
        at_most(
            "warmup_lead_time_seconds",
            self.warmup_lead_time_seconds,
            self.usage_window_seconds,
            "<= usage_window_seconds",
        )?;
        at_most(
            "prediction_tolerance_seconds",
            self.prediction_tolerance_seconds,
            self.usage_window_seconds,
            "<= usage_window_seconds",
        )?;
        in_range(
            "performance_impact_threshold",
            self.performance_impact_threshold,
            0.0,
            1.0,
            "(0, 1]",
            false,
        )?;
        positive_finite("max_latency_increase_ms", self.max_latency_increase_ms)?;
        in_range("learning_rate", self.learning_rate, 0.0, 1.0, "(0, 1]", false)?;
        at_least("max_concurrent_warmups", self.max_concurrent_warmups as f64, 1.0)?;
        if !(self.heuristic_confidence_ceiling > 0.0 && self.heuristic_confidence_ceiling < 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "heuristic_confidence_ceiling",
                value: self.heuristic_confidence_ceiling.to_string(),
                expected: "(0, 1)",
            });
        }
        in_range("learned_model_weight", self.learned_model_weight, 0.0, 1.0, "[0, 1]", true)?;
        at_least("analysis_top_k", self.analysis_top_k as f64, 1.0)?;
        at_least("worker_poll_interval_ms", self.worker_poll_interval_ms as f64, 1.0)?;
        Ok(())
    }

    pub fn usage_window(&self) -> Duration {
        Duration::from_secs(self.usage_window_seconds)
    }

    pub fn warmup_timeout(&self) -> Duration {
        Duration::from_secs(self.warmup_timeout_seconds)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.prediction_cache_ttl_seconds)
    }

    pub fn boost_interval(&self) -> Option<Duration> {
        (self.priority_boost_interval_seconds > 0)
            .then(|| Duration::from_secs(self.priority_boost_interval_seconds))
    }

    pub fn lead_time(&self) -> Duration {
        Duration::from_secs(self.warmup_lead_time_seconds)
    }

    pub fn prediction_tolerance(&self) -> Duration {
        Duration::from_secs(self.prediction_tolerance_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms)
    }
}

fn at_least(field: &'static str, value: f64, min: f64) -> Result<(), ConfigError> {
    if value < min {
        return Err(ConfigError::OutOfRange {
            field,
            value: value.to_string(),
            expected: ">= 1",
        });
    }
    Ok(())
}

fn at_most(field: &'static str, value: u64, max: u64, expected: &'static str) -> Result<(), ConfigError> {
    if value > max {
        return Err(ConfigError::OutOfRange { field, value: value.to_string(), expected });
    }
    Ok(())
}

fn positive_finite(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::OutOfRange {
            field,
            value: value.to_string(),
            expected: "finite and > 0",
        });
    }
    Ok(())
}

fn in_range(
    field: &'static str,
    value: f64,
    min: f64,
    max: f64,
    expected: &'static str,
    min_inclusive: bool,
) -> Result<(), ConfigError> {
    let above_min = if min_inclusive { value >= min } else { value > min };
    if !value.is_finite() || !above_min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value: value.to_string(),
            expected,
        });
    }
    Ok(())
}

/// Live configuration shared by every component.
///
/// Readers take an `Arc` snapshot per operation; `replace` validates first and
/// swaps the whole value, so a reload is never observed half-applied.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Arc<WarmupConfig>>>,
}

impl SharedConfig {
    pub fn new(config: WarmupConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { inner: Arc::new(RwLock::new(Arc::new(config))) })
    }

    pub fn current(&self) -> Arc<WarmupConfig> {
        self.inner.read().clone()
    }

    /// Validate and swap in `config`, returning the previous value.
    pub fn replace(&self, config: WarmupConfig) -> Result<Arc<WarmupConfig>, ConfigError> {
        config.validate()?;
        let mut guard = self.inner.write();
        Ok(std::mem::replace(&mut *guard, Arc::new(config)))
    }
}
