// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! GG-CORE predictive warmup.
//!
//! Learns which models a user reaches for from their request history, predicts
//! the next ones, and pre-loads them in the background within CPU, memory,
//! network and storage budgets so that the real request finds them warm.
//!
//! The pipeline for one request:
//!
//! 1. [`usage::UsagePatternAnalyzer`] records the request and ranks known models.
//! 2. [`prediction::PredictionEngine`] scores the ranking into confidence-rated
//!    [`types::ModelPrediction`]s.
//! 3. [`scheduler::WarmupScheduler`] turns predictions into a resource-feasible
//!    [`types::WarmupSchedule`], checked by [`performance::PerformancePredictor`].
//! 4. Accepted tasks enter the [`scheduler::WarmupQueue`], where workers load them
//!    through the caller's [`models::ModelLoader`] into the [`models::WarmPool`].
//! 5. [`feedback::MetricsCollector`] scores predictions against actual use and
//!    feeds outcomes back to the analyzer and engine.
//!
//! [`runtime::WarmupRuntime`] wires all of this together.

pub mod config;
pub mod error;
pub mod feedback;
pub mod models;
pub mod performance;
pub mod prediction;
pub mod resources;
pub mod runtime;
pub mod scheduler;
pub mod telemetry;
pub mod types;
pub mod usage;

pub use config::{ConfigurationSource, SharedConfig, WarmupConfig};
pub use error::{Result, WarmupError};
pub use feedback::WarmupMetricsSnapshot;
pub use models::{LoadError, LoadedHandle, ModelCatalog, ModelLoader, ModelProfile};
pub use runtime::WarmupRuntime;
pub use types::{
    Complexity, ModelId, ModelPrediction, ModelTask, RequestPriority, ResourceRequirements, TaskId, TaskState,
    WarmupPrediction, WarmupRequest, WarmupSchedule, WarmupTask,
};
