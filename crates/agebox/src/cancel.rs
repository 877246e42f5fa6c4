//! Cooperative cancellation passed to every capability call

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::error::BoxError;

/// Clonable cancellation flag. All clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with `BoxError::Cancelled` once cancelled. Long running
    /// collaborators call this between steps.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(BoxError::Cancelled.into());
        }
        Ok(())
    }
}
