//! Batch cancellation: one shared token, set once, observed by every worker.
//!
//! A fresh token is created per engine invocation and passed down explicitly;
//! nothing here is process-global. Workers poll the token at chunk boundaries
//! and sleep slices, so a cancel request is observed within the progress
//! cadence of the transfer loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared by the scheduler and its workers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent; there is no way to unset.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
