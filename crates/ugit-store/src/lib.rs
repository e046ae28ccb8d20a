//! Byte storage backends for the git directory.
//!
//! Everything a repository persists — loose objects, packs, refs, reflogs,
//! the index, config — goes through the [`Storage`] trait as slash-separated
//! keys relative to the git-dir root (`objects/ab/cdef…`, `refs/heads/main`,
//! `HEAD`, `logs/HEAD`, …). Three backends are provided: the filesystem
//! (bit-exact git layout), an in-memory map, and an embedded SQLite database
//! that chunks oversized values.

mod error;
pub mod fs;
mod lock;
pub mod mem;
pub mod sqlite;

use std::ops::Deref;

pub use error::StoreError;
pub use fs::FsStore;
pub use lock::{Lock, LockOptions};
pub use mem::MemStore;
pub use sqlite::SqliteStore;

pub type Result<T> = std::result::Result<T, StoreError>;

/// A value read from storage, either owned or memory-mapped.
///
/// The filesystem backend hands out mapped views for large payloads
/// (packfiles); the others always own their bytes.
pub enum Payload {
    Owned(Vec<u8>),
    Mapped(memmap2::Mmap),
}

impl Deref for Payload {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match self {
            Payload::Owned(v) => v,
            Payload::Mapped(m) => m,
        }
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::Owned(v) => write!(f, "Payload::Owned({} bytes)", v.len()),
            Payload::Mapped(m) => write!(f, "Payload::Mapped({} bytes)", m.len()),
        }
    }
}

/// Uniform key→bytes surface over a git directory.
///
/// Keys use `/` separators on every backend. Writes are atomic: readers
/// never observe a partially written value under any key.
pub trait Storage: Send + Sync {
    /// Read the full value. `NotFound` when the key is absent.
    fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Read as a [`Payload`], allowing the backend to avoid a copy.
    fn read_payload(&self, key: &str) -> Result<Payload> {
        self.read(key).map(Payload::Owned)
    }

    /// Lazy chunked read for oversized values. Chunk sizes are
    /// backend-chosen; concatenated chunks equal [`read`](Storage::read).
    fn read_chunks(&self, key: &str) -> Result<Box<dyn Iterator<Item = Result<Vec<u8>>> + '_>> {
        let data = self.read(key)?;
        Ok(Box::new(std::iter::once(Ok(data))))
    }

    /// Write (create or replace) atomically.
    fn write(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Create the key; `AlreadyExists` if present. This is the exclusive
    /// primitive the lock protocol builds on.
    fn write_exclusive(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Remove the key. `NotFound` when absent.
    fn delete(&self, key: &str) -> Result<()>;

    /// Whether the key exists.
    fn has(&self, key: &str) -> bool;

    /// All keys starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Atomically move `from` over `to` (replacing it). Both the lock
    /// commit and pack installation rely on this being a single step.
    fn rename(&self, from: &str, to: &str) -> Result<()>;
}

/// Atomic locked replace: take the lock for `key`, verify the current value
/// (when `expected` is given; `Some(None)` asserts absence), then install
/// `new` and release.
pub fn write_locked(
    storage: &dyn Storage,
    key: &str,
    expected: Option<Option<&[u8]>>,
    new: &[u8],
    opts: &LockOptions,
) -> Result<()> {
    let mut lock = Lock::acquire(storage, key, opts)?;
    if let Some(want) = expected {
        let current = match storage.read(key) {
            Ok(data) => Some(data),
            Err(StoreError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };
        match (want, current) {
            (None, None) => {}
            (Some(w), Some(c)) if w == c.as_slice() => {}
            _ => {
                return Err(StoreError::AlreadyExists {
                    key: key.to_string(),
                })
            }
        }
    }
    lock.write(new);
    lock.commit()
}
