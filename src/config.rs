//! Engine-wide settings.

use std::path::PathBuf;
use std::time::Duration;

/// Default number of rows a row set buffers before `put` blocks.
pub const DEFAULT_ROW_SET_CAPACITY: usize = 10_000;

/// Default wait slice between cancellation checks on a blocked row set.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Settings shared by every step of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Capacity of every row set created for a hop.
    pub row_set_capacity: usize,
    /// How long a step waits on a row set before re-checking the stop flag.
    pub poll_interval: Duration,
    /// Directory for spill files of steps that do not set their own.
    pub spill_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            row_set_capacity: DEFAULT_ROW_SET_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            spill_dir: std::env::temp_dir(),
        }
    }
}

impl EngineConfig {
    pub fn with_row_set_capacity(mut self, capacity: usize) -> Self {
        self.row_set_capacity = capacity.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_spill_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spill_dir = dir.into();
        self
    }
}
