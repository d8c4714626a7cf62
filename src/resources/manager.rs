// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Resource manager: ceilings, snapshots and scoped reservations.

use std::fmt;
use std::sync::Arc;

use super::ledger::{Ledger, ResourceStats, Units};
use crate::config::{SharedConfig, WarmupConfig};
use crate::error::{ResourceDimension, Result, WarmupError};
use crate::types::{ResourceAvailability, ResourceRequirements};

/// Grants and tracks reservations against the configured hard ceilings.
pub struct ResourceManager {
    config: SharedConfig,
    ledger: Arc<Ledger>,
}

impl ResourceManager {
    pub fn new(config: SharedConfig) -> Self {
        Self { config, ledger: Arc::new(Ledger::new()) }
    }

    fn ceiling_units(config: &WarmupConfig) -> Units {
        Units::from_ceilings(
            config.max_memory_mb,
            config.max_cpu_percent,
            config.max_network_mbps,
            config.max_storage_mb,
        )
    }

    /// Hard ceilings from the live config.
    pub fn ceilings(&self) -> ResourceAvailability {
        Self::ceiling_units(&self.config.current()).to_availability()
    }

    /// Ceiling minus currently reserved, per dimension.
    pub fn get_available_resources(&self) -> Result<ResourceAvailability> {
        let ceilings = Self::ceiling_units(&self.config.current());
        Ok(ceilings.saturating_sub(&self.ledger.reserved()).to_availability())
    }

    /// Total currently reserved.
    pub fn reserved(&self) -> ResourceRequirements {
        self.ledger.reserved().to_requirements()
    }

    /// First dimension in which `requirements` alone exceeds the hard ceiling.
    pub fn exceeds_ceiling(&self, requirements: &ResourceRequirements) -> Option<ResourceDimension> {
        self.ceilings().shortfall(requirements)
    }

    /// Reserve `requirements` atomically. The returned guard releases the
    /// reservation exactly once, explicitly or when dropped.
    pub fn allocate_resources(&self, requirements: &ResourceRequirements) -> Result<ResourceAllocation> {
        if !requirements.is_valid() {
            return Err(WarmupError::ResourceAllocation(format!(
                "invalid requirements: {requirements:?}"
            )));
        }
        let units = Units::from_requirements(requirements);
        let ceilings = Self::ceiling_units(&self.config.current());
        let id = self.ledger.reserve(units, ceilings).map_err(|e| {
            metrics::counter!(crate::telemetry::RESOURCE_REJECTIONS).increment(1);
            tracing::debug!(error = %e, "Reservation denied");
            e
        })?;

        tracing::trace!(allocation_id = id, ?requirements, "Reserved resources");
        Ok(ResourceAllocation {
            id,
            requirements: *requirements,
            units,
            ledger: self.ledger.clone(),
            released: false,
        })
    }

    /// Reconcile reserved totals with live allocations; returns repaired dimensions.
    pub fn check_consistency(&self) -> usize {
        self.ledger.reconcile()
    }

    pub fn stats(&self) -> ResourceStats {
        self.ledger.stats()
    }

    #[cfg(test)]
    pub(crate) fn ledger(&self) -> &Ledger {
        &self.ledger
    }
}

/// Scoped reservation. Released on `release()` or drop, never twice.
pub struct ResourceAllocation {
    id: u64,
    requirements: ResourceRequirements,
    units: Units,
    ledger: Arc<Ledger>,
    released: bool,
}

impl ResourceAllocation {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn requirements(&self) -> &ResourceRequirements {
        &self.requirements
    }

    /// Release now, surfacing bookkeeping faults.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.ledger.release(self.id, self.units)
    }
}

impl fmt::Debug for ResourceAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceAllocation")
            .field("id", &self.id)
            .field("requirements", &self.requirements)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for ResourceAllocation {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            if let Err(e) = self.ledger.release(self.id, self.units) {
                tracing::error!(allocation_id = self.id, error = %e, "Release on drop failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
