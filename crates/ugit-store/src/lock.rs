//! Advisory locks over storage keys.
//!
//! The protocol mirrors git's lock files: create `<key>.lock` exclusively,
//! stage the new contents there, then atomically rename over the target.
//! Dropping an uncommitted lock rolls back by deleting the lock key.

use std::time::{Duration, Instant};

use crate::{Storage, StoreError};

const LOCK_SUFFIX: &str = ".lock";

/// Retry budget for lock acquisition.
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// Total time to keep retrying before giving up with `LockTimeout`.
    pub budget: Duration,
    /// Initial backoff between attempts; doubles each retry up to `max_backoff`.
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(5),
            backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(500),
        }
    }
}

impl LockOptions {
    /// A single attempt, no retry. Used by tests and contention probes.
    pub fn no_retry() -> Self {
        Self {
            budget: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// A held lock on a storage key.
pub struct Lock<'a> {
    storage: &'a dyn Storage,
    target: String,
    lock_key: String,
    staged: Vec<u8>,
    committed: bool,
}

impl<'a> std::fmt::Debug for Lock<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("target", &self.target)
            .field("lock_key", &self.lock_key)
            .field("staged_len", &self.staged.len())
            .field("committed", &self.committed)
            .finish()
    }
}

impl<'a> Lock<'a> {
    /// Acquire the lock for `target`, retrying with exponential backoff
    /// within the configured budget.
    pub fn acquire(
        storage: &'a dyn Storage,
        target: &str,
        opts: &LockOptions,
    ) -> Result<Self, StoreError> {
        let lock_key = format!("{target}{LOCK_SUFFIX}");
        let start = Instant::now();
        let mut backoff = opts.backoff;

        loop {
            match storage.write_exclusive(&lock_key, b"") {
                Ok(()) => {
                    return Ok(Self {
                        storage,
                        target: target.to_string(),
                        lock_key,
                        staged: Vec::new(),
                        committed: false,
                    })
                }
                Err(StoreError::AlreadyExists { .. }) => {
                    if start.elapsed() >= opts.budget {
                        return Err(StoreError::LockTimeout {
                            key: lock_key,
                            waited_ms: start.elapsed().as_millis() as u64,
                        });
                    }
                    std::thread::sleep(backoff.min(opts.budget.saturating_sub(start.elapsed())));
                    backoff = (backoff * 2).min(opts.max_backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Stage bytes to be installed on commit.
    pub fn write(&mut self, data: &[u8]) {
        self.staged.extend_from_slice(data);
    }

    /// The key being locked.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Install the staged bytes over the target and release the lock.
    pub fn commit(mut self) -> Result<(), StoreError> {
        self.storage.write(&self.lock_key, &self.staged)?;
        self.storage.rename(&self.lock_key, &self.target)?;
        self.committed = true;
        Ok(())
    }

    /// Release without installing; the target is untouched.
    pub fn rollback(mut self) -> Result<(), StoreError> {
        match self.storage.delete(&self.lock_key) {
            Ok(()) | Err(StoreError::NotFound { .. }) => {
                self.committed = true;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for Lock<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let _ = self.storage.delete(&self.lock_key);
        }
    }
}
