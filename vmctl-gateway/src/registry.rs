//! In-memory machine configuration registry.
//!
//! Configurations live only for the lifetime of the process; persisting them
//! is the caller's business.

use std::{collections::HashMap, sync::RwLock};

use vmctl_core::{VirtualMachineConfig, VmId};

/// Thread-safe registry of machine configurations.
#[derive(Debug, Default)]
pub struct MachineRegistry {
    entries: RwLock<HashMap<VmId, VirtualMachineConfig>>,
}

impl MachineRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a configuration. Returns the one it replaced.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned (a previous thread panicked
    /// while holding the write lock).
    pub fn upsert(&self, config: VirtualMachineConfig) -> Option<VirtualMachineConfig> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.entries
            .write()
            .expect("machine registry write lock poisoned")
            .insert(config.id, config)
    }

    /// Configuration registered under `id`.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned.
    #[must_use]
    pub fn get(&self, id: VmId) -> Option<VirtualMachineConfig> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.entries
            .read()
            .expect("machine registry read lock poisoned")
            .get(&id)
            .cloned()
    }

    /// All configurations, ordered by id.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned.
    #[must_use]
    pub fn list(&self) -> Vec<VirtualMachineConfig> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut all: Vec<VirtualMachineConfig> = self
            .entries
            .read()
            .expect("machine registry read lock poisoned")
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|c| c.id);
        all
    }
}
