//! Cancellation tokens.
//!
//! Long-running operations poll a token at disk I/O boundaries and between
//! significant loop iterations. Cancellation before any durable write is
//! equivalent to rollback; once a commit has synced its journal the token
//! is no longer consulted and the commit completes.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cooperative cancellation flag shared between an operation and its caller
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a new token in the not-cancelled state
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every operation polling this token
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fail with `Error::Cancelled` if cancellation has been requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
