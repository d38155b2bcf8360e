//! Cooperative cancellation and the bounded worker pool used by both
//! searchers. `rayon` has no first-class cancellation primitive, so this
//! layers a checked token on top — the analogue of the context token passed
//! through the original Go implementation's goroutine pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Error;

/// A cooperative cancellation signal plus an optional deadline. Checked at
/// file entry and at each query within a file, per the concurrency model.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)), deadline: None }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)), deadline: Some(Instant::now() + timeout) }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Returns `Err(Cancelled)` / `Err(TimedOut)` if this token should stop
    /// the current pass, `Ok(())` otherwise. Call at file entry and at each
    /// query.
    pub fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.is_expired() {
            self.cancel();
            return Err(Error::TimedOut);
        }
        Ok(())
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
