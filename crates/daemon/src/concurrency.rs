//! Concurrency planning module for riparr
//!
//! Derives the rip and encode slot counts from configuration and owns the
//! semaphores that enforce them.

use crate::config::Config;
use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Slot counts derived from configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyPlan {
    /// Concurrent rip operations (one per optical drive in practice)
    pub rip_slots: u32,
    /// Concurrent encode operations
    pub encode_slots: u32,
}

impl ConcurrencyPlan {
    /// Derive a concurrency plan from configuration
    ///
    /// Configured values are used as-is; zero is raised to one so a
    /// misconfigured limit can never deadlock the pipeline.
    pub fn derive(cfg: &Config) -> Self {
        Self {
            rip_slots: at_least_one(cfg.queue.max_concurrent_rips),
            encode_slots: at_least_one(cfg.queue.max_concurrent_encodes),
        }
    }
}

fn at_least_one(slots: u32) -> u32 {
    slots.max(1)
}

/// Public function to derive a concurrency plan from configuration
pub fn derive_plan(cfg: &Config) -> ConcurrencyPlan {
    ConcurrencyPlan::derive(cfg)
}

/// Counting resources bounding rip and encode parallelism.
///
/// Permits are released when dropped, so every exit path of the guarded
/// subprocess call gives its slot back.
#[derive(Debug, Clone)]
pub struct Slots {
    rip: Arc<Semaphore>,
    encode: Arc<Semaphore>,
    plan: ConcurrencyPlan,
}

impl Slots {
    pub fn new(plan: ConcurrencyPlan) -> Self {
        Self {
            rip: Arc::new(Semaphore::new(plan.rip_slots as usize)),
            encode: Arc::new(Semaphore::new(plan.encode_slots as usize)),
            plan,
        }
    }

    pub fn plan(&self) -> &ConcurrencyPlan {
        &self.plan
    }

    /// Wait for a rip slot
    pub async fn acquire_rip(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        self.rip.clone().acquire_owned().await
    }

    /// Wait for an encode slot
    pub async fn acquire_encode(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        self.encode.clone().acquire_owned().await
    }

    /// Try to take a rip slot without waiting
    pub fn try_acquire_rip(&self) -> Option<OwnedSemaphorePermit> {
        self.rip.clone().try_acquire_owned().ok()
    }

    pub fn available_rip_slots(&self) -> usize {
        self.rip.available_permits()
    }

    pub fn available_encode_slots(&self) -> usize {
        self.encode.available_permits()
    }
}
