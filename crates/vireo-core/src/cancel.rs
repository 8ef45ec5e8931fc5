//! Cooperative cancellation shared across the pipeline.
//!
//! A single token is cloned into adapters, inventory scans, and download
//! workers; cancelling any clone is observed by all of them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, VireoError};

/// A cancellation token for cooperative cancellation of async operations.
///
/// Cloning is cheap and all clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. All clones observe it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Check cancellation, returning `Cancelled` if requested.
    ///
    /// Convenience for loops that want to bail out with `?`.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(VireoError::Cancelled)
        } else {
            Ok(())
        }
    }
}
