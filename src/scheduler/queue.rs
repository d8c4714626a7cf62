// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Bounded priority queue of warmup tasks.
//!
//! One FIFO lane per priority, scanned from Critical down. Lanes stay in
//! submission order, including across priority boosts. A single mutex guards
//! the lanes and the task-state registry.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::queue_types::{AdmittedTask, QueueEntry, QueueStats, FINISHED_HISTORY};
use crate::config::{OverflowPolicy, SharedConfig};
use crate::error::{Result, WarmupError};
use crate::resources::ResourceManager;
use crate::telemetry;
use crate::types::{ModelId, RequestPriority, TaskId, TaskState, WarmupTask};

/// Boosts never lift a task above this level.
const BOOST_CAP: RequestPriority = RequestPriority::High;

struct QueueInner {
    lanes: [VecDeque<QueueEntry>; RequestPriority::LEVELS],
    states: HashMap<TaskId, TaskState>,
    in_flight: HashMap<TaskId, CancellationToken>,
    /// Model of each Scheduled or Loading task.
    in_flight_models: HashMap<TaskId, ModelId>,
    finished: VecDeque<TaskId>,
    next_sequence: u64,
    stats: QueueStats,
}

impl QueueInner {
    fn new() -> Self {
        Self {
            lanes: Default::default(),
            states: HashMap::new(),
            in_flight: HashMap::new(),
            in_flight_models: HashMap::new(),
            finished: VecDeque::new(),
            next_sequence: 0,
            stats: QueueStats::default(),
        }
    }

    fn depth(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    /// Insert keeping the lane ordered by submission sequence.
    fn insert(&mut self, entry: QueueEntry) {
        let lane = &mut self.lanes[entry.task.priority.rank()];
        let pos = lane.iter().position(|e| e.sequence > entry.sequence).unwrap_or(lane.len());
        lane.insert(pos, entry);
    }

    /// True while any non-terminal task targets `model_id`.
    fn has_model(&self, model_id: &ModelId) -> bool {
        self.in_flight_models.values().any(|m| m == model_id)
            || self.lanes.iter().flatten().any(|e| e.task.model_id == *model_id)
    }

    fn record_terminal(&mut self, id: TaskId, state: TaskState) {
        self.in_flight.remove(&id);
        self.in_flight_models.remove(&id);
        self.states.insert(id, state);
        self.finished.push_back(id);
        while self.finished.len() > FINISHED_HISTORY {
            if let Some(old) = self.finished.pop_front() {
                self.states.remove(&old);
            }
        }
    }

    fn evict_oldest(&mut self, rank: usize) -> Option<WarmupTask> {
        let entry = self.lanes[rank].pop_front()?;
        self.record_terminal(entry.task.id, TaskState::Cancelled);
        self.stats.evicted += 1;
        Some(entry.task)
    }

    /// Promote one level per `interval` waited since eligibility.
    fn boost(&mut self, now: Instant, interval: Duration) -> usize {
        let cap = BOOST_CAP.rank();
        let mut promoted = Vec::new();
        for lane in self.lanes.iter_mut().take(cap) {
            let mut i = 0;
            while i < lane.len() {
                let entry = &lane[i];
                let waited = now.saturating_duration_since(entry.not_before());
                let steps = (waited.as_nanos() / interval.as_nanos().max(1)) as usize;
                let target = (entry.base_priority.rank() + steps).min(cap);
                if target > entry.task.priority.rank() {
                    if let Some(mut entry) = lane.remove(i) {
                        entry.task.priority = RequestPriority::from_rank(target);
                        promoted.push(entry);
                    }
                } else {
                    i += 1;
                }
            }
        }
        let count = promoted.len();
        for entry in promoted {
            tracing::debug!(task_id = %entry.task.id, priority = %entry.task.priority, "Boosted waiting task");
            self.insert(entry);
        }
        self.stats.boosted += count as u64;
        count
    }

    /// Highest-priority lane's oldest eligible entry.
    fn find_eligible(&self, now: Instant) -> Option<(usize, usize)> {
        (0..RequestPriority::LEVELS).rev().find_map(|rank| {
            self.lanes[rank].iter().position(|e| e.is_eligible(now)).map(|i| (rank, i))
        })
    }

    fn take(&mut self, rank: usize, index: usize) -> Option<(WarmupTask, CancellationToken)> {
        let mut entry = self.lanes[rank].remove(index)?;
        entry.task.state = TaskState::Scheduled;
        let token = CancellationToken::new();
        self.states.insert(entry.task.id, TaskState::Scheduled);
        self.in_flight.insert(entry.task.id, token.clone());
        self.in_flight_models.insert(entry.task.id, entry.task.model_id);
        self.stats.dequeued += 1;
        Some((entry.task, token))
    }
}

pub struct WarmupQueue {
    config: SharedConfig,
    inner: Mutex<QueueInner>,
    notify: Notify,
    closed: AtomicBool,
}

impl WarmupQueue {
    pub fn new(config: SharedConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(QueueInner::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn enqueue_task(&self, task: WarmupTask) -> Result<()> {
        self.enqueue_at(task, Instant::now())
    }

    /// Enqueue unless another non-terminal task already targets the same
    /// model. Returns whether `task` was queued.
    pub fn enqueue_unique(&self, task: WarmupTask) -> Result<bool> {
        self.enqueue_checked(task, Instant::now(), true)
    }

    pub(crate) fn enqueue_at(&self, task: WarmupTask, now: Instant) -> Result<()> {
        self.enqueue_checked(task, now, false).map(|_| ())
    }

    fn enqueue_checked(&self, mut task: WarmupTask, now: Instant, unique: bool) -> Result<bool> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WarmupError::Shutdown);
        }
        if !task.requirements.is_valid() {
            return Err(WarmupError::InvalidInput(format!("task {} has invalid requirements", task.id)));
        }
        let config = self.config.current();
        let mut inner = self.inner.lock();

        if inner.states.get(&task.id).is_some_and(|s| !s.is_terminal()) {
            return Err(WarmupError::InvalidInput(format!("task {} is already queued", task.id)));
        }
        if unique && inner.has_model(&task.model_id) {
            tracing::trace!(task_id = %task.id, model_id = %task.model_id, "Model already pending");
            return Ok(false);
        }
        if let Some(interval) = config.boost_interval() {
            inner.boost(now, interval);
        }

        let max = config.max_queue_size;
        while inner.depth() >= max {
            let incoming = task.priority.rank();
            let lower = (0..incoming).find(|rank| !inner.lanes[*rank].is_empty());
            let victim = lower.or(match config.overflow_policy {
                OverflowPolicy::RejectNew => None,
                OverflowPolicy::EvictOldest => Some(incoming),
                OverflowPolicy::PriorityAware => (task.priority == RequestPriority::Low).then_some(incoming),
            });
            match victim.and_then(|rank| inner.evict_oldest(rank)) {
                Some(evicted) => {
                    metrics::counter!(telemetry::QUEUE_EVICTIONS).increment(1);
                    tracing::debug!(
                        evicted = %evicted.id,
                        evicted_priority = %evicted.priority,
                        incoming = %task.id,
                        "Evicted queued warmup to make room"
                    );
                }
                None => {
                    inner.stats.rejected += 1;
                    let depth = inner.depth();
                    tracing::debug!(task_id = %task.id, priority = %task.priority, depth, "Warmup queue full");
                    return Err(WarmupError::QueueOverflow { depth, max });
                }
            }
        }

        task.state = TaskState::Queued;
        task.enqueued_at = Some(Utc::now());
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.states.insert(task.id, TaskState::Queued);
        let base_priority = task.priority;
        inner.insert(QueueEntry { task, sequence, enqueued: now, base_priority });
        inner.stats.enqueued += 1;
        metrics::gauge!(telemetry::QUEUE_DEPTH).set(inner.depth() as f64);
        drop(inner);

        self.notify.notify_one();
        Ok(true)
    }

    /// Whether a Queued, Scheduled or Loading task targets `model_id`.
    pub fn is_model_pending(&self, model_id: &ModelId) -> bool {
        self.inner.lock().has_model(model_id)
    }

    /// Pop the highest-priority, oldest task whose start offset has elapsed.
    pub fn dequeue_next(&self) -> Result<Option<WarmupTask>> {
        self.dequeue_next_at(Instant::now())
    }

    pub(crate) fn dequeue_next_at(&self, now: Instant) -> Result<Option<WarmupTask>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WarmupError::Shutdown);
        }
        let config = self.config.current();
        let mut inner = self.inner.lock();
        if let Some(interval) = config.boost_interval() {
            inner.boost(now, interval);
        }
        let task = inner
            .find_eligible(now)
            .and_then(|(rank, index)| inner.take(rank, index))
            .map(|(task, _)| task);
        metrics::gauge!(telemetry::QUEUE_DEPTH).set(inner.depth() as f64);
        Ok(task)
    }

    /// Dequeue paired with a reservation. Strict priority: when the head
    /// task does not fit the current headroom, nothing is dequeued.
    pub fn dequeue_admitted(&self, resources: &ResourceManager) -> Result<Option<AdmittedTask>> {
        self.dequeue_admitted_at(resources, Instant::now())
    }

    pub(crate) fn dequeue_admitted_at(
        &self,
        resources: &ResourceManager,
        now: Instant,
    ) -> Result<Option<AdmittedTask>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WarmupError::Shutdown);
        }
        let config = self.config.current();
        let mut inner = self.inner.lock();
        if let Some(interval) = config.boost_interval() {
            inner.boost(now, interval);
        }

        while let Some((rank, index)) = inner.find_eligible(now) {
            let requirements = inner.lanes[rank][index].task.requirements;
            if let Some(dimension) = resources.exceeds_ceiling(&requirements) {
                if let Some(entry) = inner.lanes[rank].remove(index) {
                    tracing::warn!(
                        task_id = %entry.task.id,
                        model_id = %entry.task.model_id,
                        %dimension,
                        "Queued warmup can never fit the current ceilings; failing it"
                    );
                    inner.record_terminal(entry.task.id, TaskState::Failed);
                    inner.stats.failed += 1;
                }
                continue;
            }

            return match resources.allocate_resources(&requirements) {
                Ok(allocation) => {
                    let admitted = inner
                        .take(rank, index)
                        .map(|(task, cancel)| AdmittedTask { task, allocation, cancel });
                    metrics::gauge!(telemetry::QUEUE_DEPTH).set(inner.depth() as f64);
                    Ok(admitted)
                }
                Err(WarmupError::ResourceExhausted { .. }) => Ok(None),
                Err(e) => Err(e),
            };
        }
        Ok(None)
    }

    /// Scheduled → Loading. False when the task was cancelled meanwhile.
    pub fn mark_loading(&self, id: TaskId) -> bool {
        let mut inner = self.inner.lock();
        let cancelled = inner.in_flight.get(&id).map_or(true, CancellationToken::is_cancelled);
        if cancelled || inner.states.get(&id) != Some(&TaskState::Scheduled) {
            return false;
        }
        inner.states.insert(id, TaskState::Loading);
        true
    }

    /// Record a dequeued task's terminal state.
    pub fn finish(&self, id: TaskId, state: TaskState) {
        if !state.is_terminal() {
            return;
        }
        let mut inner = self.inner.lock();
        match state {
            TaskState::Warm => inner.stats.completed += 1,
            TaskState::Failed => inner.stats.failed += 1,
            _ => inner.stats.cancelled += 1,
        }
        inner.record_terminal(id, state);
    }

    /// Cancel a queued task outright, or signal an in-flight one. Returns
    /// false for unknown or already finished tasks.
    pub fn cancel(&self, id: TaskId) -> bool {
        let mut inner = self.inner.lock();
        for rank in 0..RequestPriority::LEVELS {
            if let Some(index) = inner.lanes[rank].iter().position(|e| e.task.id == id) {
                inner.lanes[rank].remove(index);
                inner.record_terminal(id, TaskState::Cancelled);
                inner.stats.cancelled += 1;
                metrics::gauge!(telemetry::QUEUE_DEPTH).set(inner.depth() as f64);
                tracing::debug!(task_id = %id, "Cancelled queued warmup");
                return true;
            }
        }
        match inner.in_flight.get(&id) {
            Some(token) => {
                token.cancel();
                tracing::debug!(task_id = %id, "Cancellation requested for in-flight warmup");
                true
            }
            None => false,
        }
    }

    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.inner.lock().states.get(&id).copied()
    }

    pub fn depth(&self) -> usize {
        self.inner.lock().depth()
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    /// Apply the anti-starvation boost now; returns the number promoted.
    pub fn apply_priority_boost(&self) -> usize {
        self.apply_priority_boost_at(Instant::now())
    }

    pub(crate) fn apply_priority_boost_at(&self, now: Instant) -> usize {
        match self.config.current().boost_interval() {
            Some(interval) => self.inner.lock().boost(now, interval),
            None => 0,
        }
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats { depth: inner.depth(), in_flight: inner.in_flight.len(), ..inner.stats.clone() }
    }

    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Wake every idle worker.
    pub fn wake(&self) {
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Refuse new work, cancel queued tasks and signal in-flight ones.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut inner = self.inner.lock();
        let pending: Vec<TaskId> = inner.lanes.iter_mut().flat_map(|lane| lane.drain(..)).map(|e| e.task.id).collect();
        for id in &pending {
            inner.record_terminal(*id, TaskState::Cancelled);
        }
        inner.stats.cancelled += pending.len() as u64;
        for token in inner.in_flight.values() {
            token.cancel();
        }
        metrics::gauge!(telemetry::QUEUE_DEPTH).set(0.0);
        drop(inner);

        tracing::info!(cancelled = pending.len(), "Warmup queue closed");
        self.wake();
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
