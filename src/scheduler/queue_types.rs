//! Types for the warmup queue.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::resources::ResourceAllocation;
use crate::types::{RequestPriority, WarmupTask};

/// Terminal states remembered after a task leaves the queue.
pub(super) const FINISHED_HISTORY: usize = 1024;

/// Roughly 30 years; stands in for an instant that cannot be represented.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `base + offset`, saturating to a far-future instant.
pub(super) fn instant_after(base: Instant, offset: Duration) -> Instant {
    base.checked_add(offset)
        .or_else(|| base.checked_add(FAR_FUTURE))
        .unwrap_or(base)
}

/// A queued task plus the bookkeeping the queue needs to order it.
#[derive(Debug)]
pub(super) struct QueueEntry {
    pub task: WarmupTask,
    /// Submission order, used to keep lanes FIFO across boosts.
    pub sequence: u64,
    pub enqueued: Instant,
    /// Priority at submission; boosts never demote below it.
    pub base_priority: RequestPriority,
}

impl QueueEntry {
    /// Earliest instant at which the task may start.
    pub fn not_before(&self) -> Instant {
        instant_after(self.enqueued, self.task.start_offset)
    }

    pub fn is_eligible(&self, now: Instant) -> bool {
        now >= self.not_before()
    }
}

/// A dequeued task holding its reservation.
#[derive(Debug)]
pub struct AdmittedTask {
    pub task: WarmupTask,
    pub allocation: ResourceAllocation,
    /// Cancelled by `WarmupQueue::cancel` or shutdown.
    pub cancel: CancellationToken,
}

/// Counters for queue activity.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub depth: usize,
    pub in_flight: usize,
    pub enqueued: u64,
    pub dequeued: u64,
    pub rejected: u64,
    pub evicted: u64,
    pub cancelled: u64,
    pub boosted: u64,
    pub completed: u64,
    pub failed: u64,
}
