//! Catalog of models the warmup core knows how to schedule.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::error::{Result, WarmupError};
use crate::types::{Complexity, ModelId, ModelTask, ResourceRequirements, WarmupRequest};

/// Static description of a schedulable model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelProfile {
    pub id: ModelId,
    pub name: String,
    pub tasks: Vec<ModelTask>,
    /// Complexity the model is sized for.
    pub complexity: Complexity,
    pub requirements: ResourceRequirements,
    pub estimated_load_time: Duration,
    /// Models that must be warm before this one.
    pub dependencies: Vec<ModelId>,
}

impl ModelProfile {
    pub fn new(name: impl Into<String>, tasks: Vec<ModelTask>, complexity: Complexity) -> Self {
        Self {
            id: ModelId::new(),
            name: name.into(),
            tasks,
            complexity,
            requirements: ResourceRequirements::default(),
            estimated_load_time: Duration::from_secs(1),
            dependencies: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: ModelId) -> Self {
        self.id = id;
        self
    }

    pub fn with_requirements(mut self, requirements: ResourceRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn with_load_time(mut self, load_time: Duration) -> Self {
        self.estimated_load_time = load_time;
        self
    }

    pub fn with_dependency(mut self, dependency: ModelId) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn supports(&self, task: &ModelTask) -> bool {
        self.tasks.contains(task)
    }
}

struct CatalogEntry {
    profile: ModelProfile,
    /// Registration order, used as a stable tie-breaker.
    sequence: u64,
}

/// Thread-safe registry of model profiles.
pub struct ModelCatalog {
    models: Arc<RwLock<HashMap<ModelId, CatalogEntry>>>,
    next_sequence: AtomicU64,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self {
            models: Arc::new(RwLock::new(HashMap::new())),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Register or replace a profile.
    pub async fn register(&self, profile: ModelProfile) -> Result<()> {
        if profile.tasks.is_empty() {
            return Err(WarmupError::InvalidInput(format!(
                "model {} declares no tasks",
                profile.name
            )));
        }
        if !profile.requirements.is_valid() {
            return Err(WarmupError::InvalidInput(format!(
                "model {} has invalid resource requirements",
                profile.name
            )));
        }
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(model_id = %profile.id, name = %profile.name, "Registered model profile");
        self.models.write().await.insert(profile.id, CatalogEntry { profile, sequence });
        Ok(())
    }

    pub async fn unregister(&self, model_id: &ModelId) -> Option<ModelProfile> {
        self.models.write().await.remove(model_id).map(|e| e.profile)
    }

    pub async fn get(&self, model_id: &ModelId) -> Option<ModelProfile> {
        self.models.read().await.get(model_id).map(|e| e.profile.clone())
    }

    pub async fn count(&self) -> usize {
        self.models.read().await.len()
    }

    /// Models supporting `task`, in registration order.
    pub async fn supporting(&self, task: &ModelTask) -> Vec<ModelId> {
        let models = self.models.read().await;
        let mut matches: Vec<&CatalogEntry> =
            models.values().filter(|e| e.profile.supports(task)).collect();
        matches.sort_by_key(|e| e.sequence);
        matches.into_iter().map(|e| e.profile.id).collect()
    }

    /// Model serving `task` whose sized complexity is closest to `complexity`.
    pub async fn resolve(&self, task: &ModelTask, complexity: Complexity) -> Option<ModelId> {
        let models = self.models.read().await;
        models
            .values()
            .filter(|e| e.profile.supports(task))
            .min_by_key(|e| {
                let distance = (e.profile.complexity.ordinal() as i16 - complexity.ordinal() as i16).abs();
                (distance, e.sequence)
            })
            .map(|e| e.profile.id)
    }

    /// Resolve a request, falling back to the derived id for uncatalogued shapes.
    pub async fn resolve_request(&self, request: &WarmupRequest) -> ModelId {
        match self.resolve(&request.task, request.complexity).await {
            Some(id) => id,
            None => ModelId::derived(&request.task, request.complexity),
        }
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new()
    }
}
