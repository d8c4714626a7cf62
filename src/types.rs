// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Core value types: requests, predictions, resources, tasks and schedules.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{ResourceDimension, Result, WarmupError};
use crate::prediction::FeatureVector;

/// Opaque 128-bit model identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelId(Uuid);

impl ModelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn parse(value: &str) -> Result<Self> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|e| WarmupError::InvalidInput(format!("invalid model id {value}: {e}")))
    }

    /// Stable id for a request shape that no catalogued model serves.
    pub fn derived(task: &ModelTask, complexity: Complexity) -> Self {
        let digest = Sha256::digest(format!("{}:{}", task.as_str(), complexity.as_str()).as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ModelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of work a model is asked to do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelTask {
    Completion,
    Chat,
    Classification,
    Generation,
    Analysis,
    Refactoring,
    Translation,
    Custom(String),
}

impl ModelTask {
    /// Number of one-hot slots: seven built-in tasks plus one shared custom slot.
    pub const SLOTS: usize = 8;

    pub fn index(&self) -> usize {
        match self {
            ModelTask::Completion => 0,
            ModelTask::Chat => 1,
            ModelTask::Classification => 2,
            ModelTask::Generation => 3,
            ModelTask::Analysis => 4,
            ModelTask::Refactoring => 5,
            ModelTask::Translation => 6,
            ModelTask::Custom(_) => 7,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ModelTask::Completion => "completion",
            ModelTask::Chat => "chat",
            ModelTask::Classification => "classification",
            ModelTask::Generation => "generation",
            ModelTask::Analysis => "analysis",
            ModelTask::Refactoring => "refactoring",
            ModelTask::Translation => "translation",
            ModelTask::Custom(name) => name.as_str(),
        }
    }
}

impl fmt::Display for ModelTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    pub fn ordinal(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Medium => "medium",
            Complexity::Complex => "complex",
        }
    }
}

/// Request and task priority. Ordering is Low < Medium < High < Critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RequestPriority {
    Low = 0,
    Medium = 1,
    High = 2,
    Critical = 3,
}

impl RequestPriority {
    pub const LEVELS: usize = 4;

    pub fn rank(&self) -> usize {
        *self as usize
    }

    pub fn from_rank(rank: usize) -> Self {
        match rank {
            0 => RequestPriority::Low,
            1 => RequestPriority::Medium,
            2 => RequestPriority::High,
            _ => RequestPriority::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestPriority::Low => "low",
            RequestPriority::Medium => "medium",
            RequestPriority::High => "high",
            RequestPriority::Critical => "critical",
        }
    }
}

impl fmt::Display for RequestPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub session_duration: Duration,
    pub recent_activities: Vec<String>,
    pub preferences: HashMap<String, String>,
}

impl Default for UserContext {
    fn default() -> Self {
        Self {
            user_id: "local".to_string(),
            session_duration: Duration::from_secs(0),
            recent_activities: Vec::new(),
            preferences: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub lines_changed: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub language: String,
    pub size_lines: usize,
    /// Normalized to [0, 1].
    pub complexity_score: f64,
    pub recent_changes: Vec<FileChange>,
}

/// A request to predict and pre-load the models a user is about to need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmupRequest {
    pub task: ModelTask,
    pub input_length: usize,
    pub complexity: Complexity,
    pub priority: RequestPriority,
    pub acceptable_latency: Duration,
    pub user_context: UserContext,
    pub project_context: ProjectContext,
    pub timestamp: DateTime<Utc>,
}

impl WarmupRequest {
    pub fn new(task: ModelTask, complexity: Complexity, priority: RequestPriority) -> Self {
        Self {
            task,
            input_length: 0,
            complexity,
            priority,
            acceptable_latency: Duration::from_millis(500),
            user_context: UserContext::default(),
            project_context: ProjectContext::default(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_input_length(mut self, input_length: usize) -> Self {
        self.input_length = input_length;
        self
    }

    pub fn with_user_context(mut self, user_context: UserContext) -> Self {
        self.user_context = user_context;
        self
    }

    pub fn with_project_context(mut self, project_context: ProjectContext) -> Self {
        self.project_context = project_context;
        self
    }

    pub fn hour_of_day(&self) -> usize {
        self.timestamp.hour() as usize
    }

    /// Monday = 0.
    pub fn day_of_week(&self) -> usize {
        self.timestamp.weekday().num_days_from_monday() as usize
    }

    /// Reject malformed requests before any side effect.
    pub fn validate(&self) -> Result<()> {
        if self.user_context.user_id.trim().is_empty() {
            return Err(WarmupError::InvalidInput("user_id must not be empty".into()));
        }
        if self.acceptable_latency.is_zero() {
            return Err(WarmupError::InvalidInput(
                "acceptable_latency must be greater than zero".into(),
            ));
        }
        let score = self.project_context.complexity_score;
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            return Err(WarmupError::InvalidInput(format!(
                "project complexity_score must be within [0, 1], got {score}"
            )));
        }
        if let ModelTask::Custom(name) = &self.task {
            if name.trim().is_empty() {
                return Err(WarmupError::InvalidInput("custom task name must not be empty".into()));
            }
        }
        Ok(())
    }
}

/// A single model the engine expects to be needed soon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPrediction {
    pub model_id: ModelId,
    pub confidence_score: f64,
    pub usage_probability: f64,
    pub time_until_needed: Duration,
    pub reasoning: Vec<String>,
    #[serde(skip)]
    pub(crate) features: Option<FeatureVector>,
}

impl ModelPrediction {
    /// Scores are clamped to [0, 1].
    pub fn new(
        model_id: ModelId,
        confidence_score: f64,
        usage_probability: f64,
        time_until_needed: Duration,
    ) -> Self {
        Self {
            model_id,
            confidence_score: clamp_unit(confidence_score),
            usage_probability: clamp_unit(usage_probability),
            time_until_needed,
            reasoning: Vec::new(),
            features: None,
        }
    }

    pub fn with_reasoning(mut self, reason: impl Into<String>) -> Self {
        self.reasoning.push(reason.into());
        self
    }

    pub(crate) fn with_features(mut self, features: FeatureVector) -> Self {
        self.features = Some(features);
        self
    }
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Resources a warmup needs while it runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub memory_mb: u64,
    pub cpu_percent: f64,
    pub network_mbps: f64,
    pub storage_mb: u64,
}

impl ResourceRequirements {
    pub fn new(memory_mb: u64, cpu_percent: f64, network_mbps: f64, storage_mb: u64) -> Self {
        Self { memory_mb, cpu_percent, network_mbps, storage_mb }
    }

    pub fn plus(&self, other: &ResourceRequirements) -> ResourceRequirements {
        ResourceRequirements {
            memory_mb: self.memory_mb + other.memory_mb,
            cpu_percent: self.cpu_percent + other.cpu_percent,
            network_mbps: self.network_mbps + other.network_mbps,
            storage_mb: self.storage_mb + other.storage_mb,
        }
    }

    /// Component-wise maximum.
    pub fn peak(&self, other: &ResourceRequirements) -> ResourceRequirements {
        ResourceRequirements {
            memory_mb: self.memory_mb.max(other.memory_mb),
            cpu_percent: self.cpu_percent.max(other.cpu_percent),
            network_mbps: self.network_mbps.max(other.network_mbps),
            storage_mb: self.storage_mb.max(other.storage_mb),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.cpu_percent.is_finite()
            && self.cpu_percent >= 0.0
            && self.network_mbps.is_finite()
            && self.network_mbps >= 0.0
    }

    pub fn amount(&self, dimension: ResourceDimension) -> f64 {
        match dimension {
            ResourceDimension::Memory => self.memory_mb as f64,
            ResourceDimension::Cpu => self.cpu_percent,
            ResourceDimension::Network => self.network_mbps,
            ResourceDimension::Storage => self.storage_mb as f64,
        }
    }
}

/// Point-in-time headroom. Re-query before acting on an old snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceAvailability {
    pub memory_mb: u64,
    pub cpu_percent: f64,
    pub network_mbps: f64,
    pub storage_mb: u64,
}

impl ResourceAvailability {
    pub fn new(memory_mb: u64, cpu_percent: f64, network_mbps: f64, storage_mb: u64) -> Self {
        Self { memory_mb, cpu_percent, network_mbps, storage_mb }
    }

    pub fn amount(&self, dimension: ResourceDimension) -> f64 {
        match dimension {
            ResourceDimension::Memory => self.memory_mb as f64,
            ResourceDimension::Cpu => self.cpu_percent,
            ResourceDimension::Network => self.network_mbps,
            ResourceDimension::Storage => self.storage_mb as f64,
        }
    }

    /// First dimension in which `requirements` does not fit, if any.
    pub fn shortfall(&self, requirements: &ResourceRequirements) -> Option<ResourceDimension> {
        const EPSILON: f64 = 1e-9;
        ResourceDimension::ALL
            .into_iter()
            .find(|dim| requirements.amount(*dim) > self.amount(*dim) + EPSILON)
    }

    pub fn admits(&self, requirements: &ResourceRequirements) -> bool {
        self.shortfall(requirements).is_none()
    }
}

/// Identifier of a scheduled warmup task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Warmup task lifecycle.
///
/// Queued → Scheduled → Loading → Warm or Failed. Every dequeued task passes
/// through Loading, including one whose model turns out to be warm already.
/// Cancelled is reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Queued,
    Scheduled,
    Loading,
    Warm,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Warm | TaskState::Failed | TaskState::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Scheduled => "scheduled",
            TaskState::Loading => "loading",
            TaskState::Warm => "warm",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }
}

/// One model warmup produced by the scheduler and driven by the queue workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupTask {
    pub id: TaskId,
    pub model_id: ModelId,
    pub priority: RequestPriority,
    pub requirements: ResourceRequirements,
    pub estimated_time: Duration,
    /// Delay after enqueue before the task becomes eligible.
    pub start_offset: Duration,
    pub confidence: f64,
    pub dependencies: Vec<ModelId>,
    pub enqueued_at: Option<DateTime<Utc>>,
    pub state: TaskState,
}

impl WarmupTask {
    pub fn new(model_id: ModelId, priority: RequestPriority, requirements: ResourceRequirements) -> Self {
        Self {
            id: TaskId::new(),
            model_id,
            priority,
            requirements,
            estimated_time: Duration::from_secs(1),
            start_offset: Duration::ZERO,
            confidence: 0.0,
            dependencies: Vec::new(),
            enqueued_at: None,
            state: TaskState::Queued,
        }
    }

    pub fn end_offset(&self) -> Duration {
        self.start_offset.saturating_add(self.estimated_time)
    }
}

/// Why a candidate did not make it into a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    BelowThreshold,
    ExceedsCeiling,
    ResourceExhausted,
    ResourceConflict,
    CapacityLimit,
    ImpactShrink,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedCandidate {
    pub model_id: ModelId,
    pub reason: RejectionReason,
}

/// Immutable schedule snapshot handed back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupSchedule {
    pub tasks: Vec<WarmupTask>,
    pub total_estimated_time: Duration,
    /// Peak concurrent requirement, not the sum over all tasks.
    pub resource_requirements: ResourceRequirements,
    pub priority: RequestPriority,
    pub rejected: Vec<RejectedCandidate>,
}

impl WarmupSchedule {
    pub fn empty() -> Self {
        Self {
            tasks: Vec::new(),
            total_estimated_time: Duration::ZERO,
            resource_requirements: ResourceRequirements::default(),
            priority: RequestPriority::Low,
            rejected: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn model_ids(&self) -> Vec<ModelId> {
        self.tasks.iter().map(|t| t.model_id).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceImpact {
    pub cpu_impact_percent: f64,
    pub memory_impact_mb: f64,
    pub network_impact_mbps: f64,
    pub latency_increase_ms: f64,
    pub responsiveness_impact: f64,
    pub is_acceptable: bool,
}

impl PerformanceImpact {
    /// Impact of doing nothing.
    pub fn none() -> Self {
        Self { is_acceptable: true, ..Default::default() }
    }
}

/// Aggregate result of `predict_and_warm`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupPrediction {
    pub predicted_models: Vec<ModelPrediction>,
    pub schedule: WarmupSchedule,
    pub performance_impact: PerformanceImpact,
    pub confidence_score: f64,
    pub generated_at: DateTime<Utc>,
    pub prediction_latency: Duration,
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
