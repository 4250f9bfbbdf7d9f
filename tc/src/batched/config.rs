//! Batched sender configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Batched sender configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchedSenderConfig {
    /// Minimum time between successive flushes in milliseconds
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// How many recently flushed batches to retain for diagnostics
    #[serde(default = "default_recent_batch_capacity")]
    pub recent_batch_capacity: usize,
}

fn default_flush_interval_ms() -> u64 {
    10
}

fn default_recent_batch_capacity() -> usize {
    100
}

impl Default for BatchedSenderConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 10,
            recent_batch_capacity: 100,
        }
    }
}

impl BatchedSenderConfig {
    /// Get the flush interval as a Duration
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}
