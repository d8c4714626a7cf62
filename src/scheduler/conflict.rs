//! Conflict resolution strategies for the warmup scheduler.

use std::sync::Arc;
use std::time::Duration;

use crate::config::ConflictResolution;
use crate::error::ResourceDimension;
use crate::types::{RequestPriority, WarmupTask};

/// What to do with a candidate that only fits after earlier tasks finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDecision {
    /// Start at `ResourceConflict::delayed_start`.
    Delay,
    /// Reject the candidate.
    Drop,
}

/// A candidate that fits the concurrency limit at `requested_start` but not
/// the resource headroom.
#[derive(Debug)]
pub struct ResourceConflict<'a> {
    pub candidate: &'a WarmupTask,
    /// Already-placed tasks running at `requested_start`.
    pub blocking: Vec<&'a WarmupTask>,
    pub dimension: ResourceDimension,
    pub requested_start: Duration,
    /// Earliest start at which the candidate fits.
    pub delayed_start: Duration,
}

impl ResourceConflict<'_> {
    /// Highest priority among the blocking tasks.
    pub fn blocking_priority(&self) -> Option<RequestPriority> {
        self.blocking.iter().map(|t| t.priority).max()
    }
}

pub trait ConflictStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn resolve(&self, conflict: &ResourceConflict<'_>) -> ConflictDecision;
}

/// Always waits for headroom.
#[derive(Debug, Default, Clone, Copy)]
pub struct DelayLowerPriority;

impl ConflictStrategy for DelayLowerPriority {
    fn name(&self) -> &'static str {
        "delay_lower_priority"
    }

    fn resolve(&self, _conflict: &ResourceConflict<'_>) -> ConflictDecision {
        ConflictDecision::Delay
    }
}

/// Drops a candidate blocked by higher-priority work; peers still wait.
#[derive(Debug, Default, Clone, Copy)]
pub struct DropLowerPriority;

impl ConflictStrategy for DropLowerPriority {
    fn name(&self) -> &'static str {
        "drop_lower_priority"
    }

    fn resolve(&self, conflict: &ResourceConflict<'_>) -> ConflictDecision {
        match conflict.blocking_priority() {
            Some(blocking) if blocking > conflict.candidate.priority => ConflictDecision::Drop,
            _ => ConflictDecision::Delay,
        }
    }
}

pub fn for_resolution(resolution: ConflictResolution) -> Arc<dyn ConflictStrategy> {
    match resolution {
        ConflictResolution::DelayLowerPriority => Arc::new(DelayLowerPriority),
        ConflictResolution::DropLowerPriority => Arc::new(DropLowerPriority),
    }
}
