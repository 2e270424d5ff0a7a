//! Pipeline-wide cooperative stop flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared stop flag checked by every step before each iteration and
/// between waits on a row set. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    stopped: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every step of the pipeline to stop.
    pub fn stop_all(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}
