// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error types shared by every warmup component.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::models::LoadError;

/// Resource dimension tracked by the resource manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceDimension {
    Memory,
    Cpu,
    Network,
    Storage,
}

impl ResourceDimension {
    pub const ALL: [ResourceDimension; 4] = [
        ResourceDimension::Memory,
        ResourceDimension::Cpu,
        ResourceDimension::Network,
        ResourceDimension::Storage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceDimension::Memory => "memory_mb",
            ResourceDimension::Cpu => "cpu_percent",
            ResourceDimension::Network => "network_mbps",
            ResourceDimension::Storage => "storage_mb",
        }
    }
}

impl fmt::Display for ResourceDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum WarmupError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Prediction failed: {0}")]
    Prediction(String),

    #[error("Resource allocation failed: {0}")]
    ResourceAllocation(String),

    #[error("Resource exhausted: {dimension} requested {requested}, available {available}")]
    ResourceExhausted {
        dimension: ResourceDimension,
        requested: f64,
        available: f64,
    },

    #[error("Warmup timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid request: {0}")]
    InvalidInput(String),

    #[error("Warmup queue overflow: {depth}/{max}")]
    QueueOverflow { depth: usize, max: usize },

    #[error("Model load failed: {0}")]
    Load(#[from] LoadError),

    #[error("Warmup runtime is shut down")]
    Shutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WarmupError {
    /// Errors returned to the caller of `predict_and_warm` instead of degrading.
    pub fn is_fatal_to_request(&self) -> bool {
        matches!(
            self,
            WarmupError::Configuration(_) | WarmupError::InvalidInput(_) | WarmupError::Internal(_)
        )
    }
}

impl From<ConfigError> for WarmupError {
    fn from(err: ConfigError) -> Self {
        WarmupError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WarmupError>;
