use serde::{Deserialize, Serialize};

use crate::types::{
    RegionError, Result, DEFAULT_MAX_REGION_LEN, DEFAULT_REGISTRY_CAPACITY, HEADER_LEN,
    PBKDF2_ITERATIONS,
};

/// Tunables for a [`crate::RegionVault`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegionConfig {
    /// How many handles may be outstanding at once
    pub registry_capacity: usize,

    /// PBKDF2 rounds. Existing blobs only open with the default.
    pub kdf_iterations: u32,

    /// Request that key and plaintext buffers be kept out of swap
    pub lock_memory: bool,

    /// Largest accepted region `length`, header included
    pub max_region_len: u64,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
            kdf_iterations: PBKDF2_ITERATIONS,
            lock_memory: true,
            max_region_len: DEFAULT_MAX_REGION_LEN,
        }
    }
}

impl RegionConfig {
    /// Reject values the vault cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.registry_capacity == 0 {
            return Err(RegionError::InvalidConfig(
                "registry_capacity must be at least 1".to_string(),
            ));
        }
        if self.kdf_iterations == 0 {
            return Err(RegionError::InvalidConfig(
                "kdf_iterations must be at least 1".to_string(),
            ));
        }
        if self.max_region_len <= HEADER_LEN as u64 {
            return Err(RegionError::InvalidConfig(format!(
                "max_region_len must exceed the {} byte header",
                HEADER_LEN
            )));
        }
        Ok(())
    }

    /// Set the registry capacity
    pub fn with_registry_capacity(mut self, capacity: usize) -> Self {
        self.registry_capacity = capacity;
        self
    }

    /// Set the PBKDF2 round count
    pub fn with_kdf_iterations(mut self, iterations: u32) -> Self {
        self.kdf_iterations = iterations;
        self
    }

    /// Enable or disable memory locking
    pub fn with_lock_memory(mut self, lock: bool) -> Self {
        self.lock_memory = lock;
        self
    }

    /// Set the largest accepted region length
    pub fn with_max_region_len(mut self, max: u64) -> Self {
        self.max_region_len = max;
        self
    }
}
