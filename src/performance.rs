//! Performance impact forecasting for candidate schedules.
//!
//! Costs are evaluated at the schedule's peak overlap rather than summed
//! across all tasks. Parallel warmups contend for the same disk and network,
//! so CPU and network cost grow superlinearly with the number of overlapping
//! tasks.

use std::time::Duration;

use crate::config::SharedConfig;
use crate::error::{Result, WarmupError};
use crate::types::{PerformanceImpact, ResourceRequirements, WarmupSchedule, WarmupTask};

/// Added latency per percent of CPU taken by warmups.
const LATENCY_MS_PER_CPU_PERCENT: f64 = 0.8;
/// Added latency per Mbps of warmup network traffic.
const LATENCY_MS_PER_MBPS: f64 = 0.2;
const INTERFERENCE_COEFFICIENT: f64 = 0.1;
const INTERFERENCE_EXPONENT: f64 = 1.5;
const CPU_SHARE: f64 = 0.6;
const LATENCY_SHARE: f64 = 0.4;

pub struct PerformancePredictor {
    config: SharedConfig,
}

impl PerformancePredictor {
    pub fn new(config: SharedConfig) -> Self {
        Self { config }
    }

    pub fn assess_impact(&self, schedule: &WarmupSchedule) -> Result<PerformanceImpact> {
        if schedule.tasks.is_empty() {
            return Ok(PerformanceImpact::none());
        }
        if let Some(task) = schedule.tasks.iter().find(|t| !t.requirements.is_valid()) {
            return Err(WarmupError::Internal(format!(
                "task {} for model {} carries invalid requirements",
                task.id, task.model_id
            )));
        }

        let config = self.config.current();
        let (peak, concurrency) = peak_concurrent(&schedule.tasks);
        let factor = interference_factor(concurrency);

        let cpu = peak.cpu_percent * factor;
        let network = peak.network_mbps * factor;
        let memory = peak.memory_mb as f64;
        let latency = cpu * LATENCY_MS_PER_CPU_PERCENT + network * LATENCY_MS_PER_MBPS;
        let responsiveness = (CPU_SHARE * cpu / config.max_cpu_percent
            + LATENCY_SHARE * latency / config.max_latency_increase_ms)
            .clamp(0.0, 1.0);

        let violations = [
            ("cpu", cpu > config.max_cpu_percent),
            ("memory", memory > config.max_memory_mb as f64),
            ("network", network > config.max_network_mbps),
            ("latency", latency > config.max_latency_increase_ms),
            ("responsiveness", responsiveness > config.performance_impact_threshold),
        ];
        let is_acceptable = violations.iter().all(|(_, crossed)| !crossed);
        if !is_acceptable {
            let crossed: Vec<&str> = violations.iter().filter(|(_, c)| *c).map(|(name, _)| *name).collect();
            tracing::debug!(
                tasks = schedule.tasks.len(),
                concurrency,
                cpu,
                latency,
                responsiveness,
                crossed = ?crossed,
                "Schedule impact unacceptable"
            );
        }

        Ok(PerformanceImpact {
            cpu_impact_percent: cpu,
            memory_impact_mb: memory,
            network_impact_mbps: network,
            latency_increase_ms: latency,
            responsiveness_impact: responsiveness,
            is_acceptable,
        })
    }
}

/// `1 + 0.1·(k-1)^1.5` for `k` overlapping tasks.
pub(crate) fn interference_factor(concurrency: usize) -> f64 {
    let extra = concurrency.saturating_sub(1) as f64;
    1.0 + INTERFERENCE_COEFFICIENT * extra.powf(INTERFERENCE_EXPONENT)
}

/// Per-dimension peak of concurrently running requirements, and the peak
/// number of overlapping tasks. Overlap only changes at task starts, so
/// those are the only instants evaluated.
pub(crate) fn peak_concurrent(tasks: &[WarmupTask]) -> (ResourceRequirements, usize) {
    let mut peak = ResourceRequirements::default();
    let mut max_overlap = 0;
    for starting in tasks {
        let at = starting.start_offset;
        let running: Vec<&WarmupTask> = tasks.iter().filter(|t| is_running(t, at)).collect();
        let load = running
            .iter()
            .fold(ResourceRequirements::default(), |acc, t| acc.plus(&t.requirements));
        peak = peak.peak(&load);
        max_overlap = max_overlap.max(running.len());
    }
    (peak, max_overlap)
}

pub(crate) fn is_running(task: &WarmupTask, at: Duration) -> bool {
    if task.estimated_time.is_zero() {
        return at == task.start_offset;
    }
    task.start_offset <= at && at < task.end_offset()
}
