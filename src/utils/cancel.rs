use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Returned by traversals that noticed the token was set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canceled;

impl fmt::Display for Canceled {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "canceled")
    }
}

impl Error for Canceled {}

/// Cooperative cancellation signal shared between the search engine, its
/// kernels, and whoever orchestrates a timeout on another thread.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    interrupted: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.interrupted.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }

    /// Polled at the top of every step of a formula traversal.
    pub fn check(&self) -> Result<(), Canceled> {
        if self.is_canceled() {
            Err(Canceled)
        } else {
            Ok(())
        }
    }

    /// Clears the signal so the owner can be reused for the next query.
    pub fn reset(&self) {
        self.interrupted.store(false, Ordering::Relaxed);
    }
}
