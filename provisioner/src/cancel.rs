//! Cooperative cancellation for a provisioning run.
//!
//! The sequencer checks the token between steps and between retry attempts;
//! the verifier checks it between poll slices. No step is interrupted
//! mid-action: there is no rollback, so a cancelled run recovers the same
//! way a failed one does. Re-run and let the precondition probes skip what
//! already holds.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation flag. Cloning yields a handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
