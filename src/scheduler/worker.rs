// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Warmup workers: dequeue, load, publish.
//!
//! Each worker admits the next task against the ResourceManager, drives the
//! loader under the warmup timeout and releases the reservation on every
//! terminal path.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::queue::WarmupQueue;
use super::queue_types::{instant_after, AdmittedTask};
use crate::config::SharedConfig;
use crate::error::WarmupError;
use crate::feedback::{MetricsCollector, WarmupOutcome};
use crate::models::{LoadedHandle, ModelLoader, WarmPool};
use crate::resources::ResourceManager;
use crate::types::{TaskState, WarmupTask};

/// Period of the background priority booster.
pub const BOOST_TICK: Duration = Duration::from_secs(1);

/// Everything a worker needs, shared across the pool.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<WarmupQueue>,
    pub resources: Arc<ResourceManager>,
    pub loader: Arc<dyn ModelLoader>,
    pub warm_pool: Arc<WarmPool>,
    pub metrics: Arc<MetricsCollector>,
    pub config: SharedConfig,
}

/// Spawn a single worker that runs until `shutdown` is cancelled or the
/// queue is closed.
pub fn spawn_worker(ctx: WorkerContext, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(worker_loop(ctx, shutdown))
}

/// Spawn `max_concurrent_warmups` workers. The pool size is fixed at start-up.
pub fn spawn_worker_pool(ctx: WorkerContext, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
    let size = ctx.config.current().max_concurrent_warmups;
    tracing::info!(workers = size, "Starting warmup workers");
    (0..size)
        .map(|id| {
            let span = tracing::info_span!("warmup_worker", worker = id);
            tokio::spawn(worker_loop(ctx.clone(), shutdown.clone()).instrument(span))
        })
        .collect()
}

/// Periodically promote long-waiting tasks so idle workers see them.
pub fn spawn_priority_booster(queue: Arc<WarmupQueue>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(BOOST_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    if queue.is_closed() {
                        break;
                    }
                    if queue.apply_priority_boost() > 0 {
                        queue.wake();
                    }
                }
            }
        }
    })
}

async fn worker_loop(ctx: WorkerContext, shutdown: CancellationToken) {
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        let notified = ctx.queue.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        match ctx.queue.dequeue_admitted(&ctx.resources) {
            Ok(Some(admitted)) => {
                run_task(&ctx, admitted).await;
                continue;
            }
            Ok(None) => {}
            Err(WarmupError::Shutdown) => break,
            Err(e) => tracing::error!(error = %e, "Warmup dequeue failed"),
        }

        let poll = ctx.config.current().poll_interval();
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = &mut notified => {}
            _ = tokio::time::sleep(poll) => {}
        }
    }
    tracing::debug!("Warmup worker stopped");
}

async fn run_task(ctx: &WorkerContext, admitted: AdmittedTask) {
    let AdmittedTask { task, allocation, cancel } = admitted;
    let started = Instant::now();
    let (state, outcome) = execute(ctx, &task, &cancel).await;

    if let Err(e) = allocation.release() {
        tracing::error!(task_id = %task.id, error = %e, "Failed to release warmup reservation");
        let repaired = ctx.resources.check_consistency();
        tracing::warn!(repaired, "Resource ledger reconciled");
    }
    let latency = (outcome == WarmupOutcome::Completed).then(|| started.elapsed());
    ctx.metrics.record_warmup_outcome(outcome, latency);
    ctx.queue.finish(task.id, state);
    tracing::debug!(
        task_id = %task.id,
        model_id = %task.model_id,
        outcome = outcome.as_str(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Warmup finished"
    );
}

async fn execute(ctx: &WorkerContext, task: &WarmupTask, cancel: &CancellationToken) -> (TaskState, WarmupOutcome) {
    if cancel.is_cancelled() {
        return (TaskState::Cancelled, WarmupOutcome::Cancelled);
    }
    if !ctx.queue.mark_loading(task.id) {
        return (TaskState::Cancelled, WarmupOutcome::Cancelled);
    }
    if ctx.warm_pool.contains(&task.model_id).await {
        tracing::debug!(model_id = %task.model_id, "Model already warm");
        return (TaskState::Warm, WarmupOutcome::Completed);
    }

    let timeout = ctx.config.current().warmup_timeout();
    let deadline = instant_after(Instant::now(), timeout);
    let load = ctx.loader.load(&task.model_id, &task.requirements);
    tokio::pin!(load);

    let result = tokio::select! {
        result = tokio::time::timeout_at(deadline, &mut load) => result,
        _ = cancel.cancelled() => {
            // A load in flight is allowed to settle so its handle is not leaked.
            if let Ok(Ok(handle)) = tokio::time::timeout_at(deadline, &mut load).await {
                unload(ctx, handle).await;
            }
            tracing::debug!(task_id = %task.id, "Warmup cancelled while loading");
            return (TaskState::Cancelled, WarmupOutcome::Cancelled);
        }
    };

    match result {
        Ok(Ok(handle)) => {
            ctx.warm_pool.admit(handle, task.priority, ctx.loader.as_ref()).await;
            (TaskState::Warm, WarmupOutcome::Completed)
        }
        Ok(Err(e)) => {
            tracing::warn!(task_id = %task.id, model_id = %task.model_id, error = %e, "Warmup load failed");
            (TaskState::Failed, WarmupOutcome::Failed)
        }
        Err(_) => {
            tracing::warn!(
                task_id = %task.id,
                model_id = %task.model_id,
                timeout_secs = timeout.as_secs(),
                "Warmup load timed out"
            );
            (TaskState::Failed, WarmupOutcome::TimedOut)
        }
    }
}

async fn unload(ctx: &WorkerContext, handle: LoadedHandle) {
    if let Err(e) = ctx.loader.unload(handle).await {
        tracing::warn!(model_id = %handle.model_id(), error = %e, "Unload after cancellation failed");
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
