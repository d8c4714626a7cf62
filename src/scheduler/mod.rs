//! Warmup scheduling, the bounded task queue and its workers.

mod conflict;
mod queue;
mod queue_types;
mod warmup_scheduler;
mod worker;

pub use conflict::{
    for_resolution, ConflictDecision, ConflictStrategy, DelayLowerPriority, DropLowerPriority, ResourceConflict,
};
pub use queue::WarmupQueue;
pub use queue_types::{AdmittedTask, QueueStats};
pub use warmup_scheduler::WarmupScheduler;
pub use worker::{spawn_priority_booster, spawn_worker, spawn_worker_pool, WorkerContext, BOOST_TICK};
