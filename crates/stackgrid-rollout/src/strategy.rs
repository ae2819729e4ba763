//! Rolling update configuration.

use serde::{Deserialize, Serialize};

/// Configuration for rolling updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollingConfig {
    /// Number of stale instances updated per batch.
    pub max_parallel_updates: u32,
}

impl Default for RollingConfig {
    fn default() -> Self {
        Self {
            max_parallel_updates: 1,
        }
    }
}

impl RollingConfig {
    /// Effective batch size; zero is treated as one.
    pub fn batch_size(&self) -> usize {
        self.max_parallel_updates.max(1) as usize
    }
}

/// Calculate number of batches needed to update `stale` instances.
pub fn batch_count(stale: u32, batch_size: u32) -> u32 {
    if batch_size == 0 {
        return stale;
    }
    stale.div_ceil(batch_size)
}
