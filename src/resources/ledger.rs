//! Fixed-point reservation ledger with one lock per resource dimension.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{ResourceDimension, Result, WarmupError};
use crate::types::{ResourceAvailability, ResourceRequirements};

/// Milli-units per percent / per Mbps.
const FRACTIONAL_SCALE: f64 = 1000.0;

const MEMORY: usize = 0;
const CPU: usize = 1;
const NETWORK: usize = 2;
const STORAGE: usize = 3;

/// Integer amounts per dimension, in ledger order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Units([u64; 4]);

impl Units {
    pub(crate) fn from_requirements(req: &ResourceRequirements) -> Self {
        Self([
            req.memory_mb,
            to_milli(req.cpu_percent),
            to_milli(req.network_mbps),
            req.storage_mb,
        ])
    }

    pub(crate) fn from_ceilings(memory_mb: u64, cpu_percent: f64, network_mbps: f64, storage_mb: u64) -> Self {
        Self([memory_mb, to_milli(cpu_percent), to_milli(network_mbps), storage_mb])
    }

    pub(crate) fn saturating_sub(&self, other: &Units) -> Units {
        let mut out = [0u64; 4];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.0[i].saturating_sub(other.0[i]);
        }
        Units(out)
    }

    pub(crate) fn to_availability(self) -> ResourceAvailability {
        ResourceAvailability {
            memory_mb: self.0[MEMORY],
            cpu_percent: from_milli(self.0[CPU]),
            network_mbps: from_milli(self.0[NETWORK]),
            storage_mb: self.0[STORAGE],
        }
    }

    pub(crate) fn to_requirements(self) -> ResourceRequirements {
        ResourceRequirements {
            memory_mb: self.0[MEMORY],
            cpu_percent: from_milli(self.0[CPU]),
            network_mbps: from_milli(self.0[NETWORK]),
            storage_mb: self.0[STORAGE],
        }
    }
}

fn to_milli(value: f64) -> u64 {
    (value.max(0.0) * FRACTIONAL_SCALE).round() as u64
}

fn from_milli(value: u64) -> f64 {
    value as f64 / FRACTIONAL_SCALE
}

#[derive(Debug, Default)]
struct DimensionLedger {
    reserved: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResourceStats {
    pub allocations: u64,
    pub releases: u64,
    pub failures: u64,
    pub consistency_repairs: u64,
    pub live_allocations: usize,
}

pub(crate) struct Ledger {
    dimensions: [Mutex<DimensionLedger>; 4],
    live: Mutex<HashMap<u64, Units>>,
    next_id: AtomicU64,
    allocations: AtomicU64,
    releases: AtomicU64,
    failures: AtomicU64,
    repairs: AtomicU64,
}

impl Ledger {
    pub(crate) fn new() -> Self {
        Self {
            dimensions: Default::default(),
            live: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            allocations: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            repairs: AtomicU64::new(0),
        }
    }

    pub(crate) fn reserved(&self) -> Units {
        let mut out = [0u64; 4];
        for (i, dim) in self.dimensions.iter().enumerate() {
            out[i] = dim.lock().reserved;
        }
        Units(out)
    }

    /// All-or-nothing reservation. Dimension locks are always taken in ledger order.
    pub(crate) fn reserve(&self, units: Units, ceilings: Units) -> Result<u64> {
        let mut guards: Vec<_> = self.dimensions.iter().map(|d| d.lock()).collect();

        for (i, dimension) in ResourceDimension::ALL.into_iter().enumerate() {
            let reserved = guards[i].reserved;
            if reserved.saturating_add(units.0[i]) > ceilings.0[i] {
                self.failures.fetch_add(1, Ordering::Relaxed);
                let available = ceilings.0[i].saturating_sub(reserved);
                return Err(WarmupError::ResourceExhausted {
                    dimension,
                    requested: natural(dimension, units.0[i]),
                    available: natural(dimension, available),
                });
            }
        }

        for (i, guard) in guards.iter_mut().enumerate() {
            guard.reserved += units.0[i];
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.live.lock().insert(id, units);
        drop(guards);

        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    /// Return a reservation. A missing or mismatched record is a bookkeeping
    /// fault: the release fails and the ledger is reconciled.
    pub(crate) fn release(&self, id: u64, units: Units) -> Result<()> {
        let mut guards: Vec<_> = self.dimensions.iter().map(|d| d.lock()).collect();
        let recorded = self.live.lock().remove(&id);

        let fault = match recorded {
            None => Some(format!("allocation {id} released twice or never recorded")),
            Some(recorded) if recorded != units => {
                Some(format!("allocation {id} released with mismatched amounts"))
            }
            Some(recorded) => {
                let mut underflow = None;
                for (i, guard) in guards.iter_mut().enumerate() {
                    match guard.reserved.checked_sub(recorded.0[i]) {
                        Some(rest) => guard.reserved = rest,
                        None => {
                            guard.reserved = 0;
                            underflow = Some(format!(
                                "allocation {id} underflowed {}",
                                ResourceDimension::ALL[i]
                            ));
                        }
                    }
                }
                underflow
            }
        };
        drop(guards);

        match fault {
            None => {
                self.releases.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Some(message) => {
                tracing::error!(allocation_id = id, %message, "Resource bookkeeping mismatch");
                self.reconcile();
                Err(WarmupError::Internal(message))
            }
        }
    }

    /// Recompute reserved totals from live allocations. Returns the number of
    /// dimensions that had drifted.
    pub(crate) fn reconcile(&self) -> usize {
        let mut guards: Vec<_> = self.dimensions.iter().map(|d| d.lock()).collect();
        let live = self.live.lock();

        let mut expected = [0u64; 4];
        for units in live.values() {
            for (i, slot) in expected.iter_mut().enumerate() {
                *slot += units.0[i];
            }
        }

        let mut repaired = 0;
        for (i, guard) in guards.iter_mut().enumerate() {
            if guard.reserved != expected[i] {
                tracing::error!(
                    dimension = %ResourceDimension::ALL[i],
                    recorded = guard.reserved,
                    expected = expected[i],
                    "Repairing resource ledger"
                );
                guard.reserved = expected[i];
                repaired += 1;
            }
        }
        if repaired > 0 {
            self.repairs.fetch_add(repaired as u64, Ordering::Relaxed);
        }
        repaired
    }

    pub(crate) fn stats(&self) -> ResourceStats {
        ResourceStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            consistency_repairs: self.repairs.load(Ordering::Relaxed),
            live_allocations: self.live.lock().len(),
        }
    }

    #[cfg(test)]
    pub(crate) fn corrupt_for_test(&self, dimension: usize, reserved: u64) {
        self.dimensions[dimension].lock().reserved = reserved;
    }
}

fn natural(dimension: ResourceDimension, units: u64) -> f64 {
    match dimension {
        ResourceDimension::Cpu | ResourceDimension::Network => from_milli(units),
        ResourceDimension::Memory | ResourceDimension::Storage => units as f64,
    }
}
