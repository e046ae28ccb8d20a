//! Cooperative cancellation.
//!
//! Operations with suspension points (storage I/O, network reads, lock
//! retries) poll a [`CancelToken`] between steps and unwind in-flight lock
//! files and temporary packs before returning [`UtilError::Cancelled`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::UtilError;

/// Shared cancellation flag. Cloned handles observe the same signal.
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

    /// Return `Err(Cancelled)` if the signal has been raised.
    pub fn check(&self) -> Result<(), UtilError> {
        if self.is_cancelled() {
            Err(UtilError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_not_cancelled() {
        let t = CancelToken::new();
        assert!(!t.is_cancelled());
        assert!(t.check().is_ok());
    }

    #[test]
    fn clones_share_signal() {
        let t = CancelToken::new();
        let t2 = t.clone();
        t2.cancel();
        assert!(t.is_cancelled());
        assert!(matches!(t.check(), Err(UtilError::Cancelled)));
    }
}
