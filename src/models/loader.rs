//! External model loading capability.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{ModelId, ResourceRequirements};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("Model not found: {0}")]
    NotFound(ModelId),

    #[error("Load failed for {model_id}: {reason}")]
    Failed { model_id: ModelId, reason: String },

    #[error("Unload failed: {0}")]
    UnloadFailed(String),
}

/// Opaque handle to a model the loader brought into memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadedHandle {
    model_id: ModelId,
    id: u64,
}

impl LoadedHandle {
    pub fn new(model_id: ModelId, id: u64) -> Self {
        Self { model_id, id }
    }

    pub fn model_id(&self) -> ModelId {
        self.model_id
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Loads and unloads models on behalf of the warmup workers.
///
/// Loads may be slow and may fail. A load future may be dropped on timeout,
/// so implementations must tolerate being abandoned mid-flight.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(
        &self,
        model_id: &ModelId,
        requirements: &ResourceRequirements,
    ) -> Result<LoadedHandle, LoadError>;

    async fn unload(&self, handle: LoadedHandle) -> Result<(), LoadError>;
}
