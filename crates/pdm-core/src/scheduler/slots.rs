//! Per-host running counters checked against the per-host and global caps.
//!
//! Check and increment happen under one lock, so two admission passes can
//! never both take the last free slot.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct HostSlots {
    running: Mutex<HashMap<String, usize>>,
}

impl HostSlots {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes a slot for `host` iff it runs fewer than `per_host` jobs and all
    /// hosts together run fewer than `global`.
    pub fn try_acquire(&self, host: &str, per_host: usize, global: usize) -> bool {
        let mut running = self.lock();
        let total: usize = running.values().sum();
        let slot = running.entry(host.to_string()).or_insert(0);
        if *slot < per_host && total < global {
            *slot += 1;
            true
        } else {
            false
        }
    }

    pub fn release(&self, host: &str) {
        let mut running = self.lock();
        match running.get_mut(host) {
            Some(n) if *n > 0 => *n -= 1,
            _ => tracing::warn!(host, "released a slot that was not held"),
        }
    }

    pub fn running(&self, host: &str) -> usize {
        self.lock().get(host).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.lock().values().sum()
    }
}
