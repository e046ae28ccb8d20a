//! The staging index: the binary DIRC file and its operations.
//!
//! Entries are kept sorted by `(path, stage)`. For any path either a single
//! stage-0 entry exists or one to three conflict stages (1/2/3), never both;
//! the mutation operations maintain that invariant.

pub mod entry;
mod read;
mod tree_cache;
mod write;

use bstr::{BStr, BString, ByteSlice};
use std::collections::BTreeMap;
use std::sync::Arc;

use ugit_hash::{HashAlgorithm, ObjectId};
use ugit_odb::ObjectDatabase;
use ugit_store::{Lock, LockOptions, Storage, StoreError};

pub use entry::{EntryFlags, IndexEntry, Stage, StatData};
pub use tree_cache::CacheTree;
pub use write::write_tree;

pub(crate) const INDEX_SIGNATURE: &[u8; 4] = b"DIRC";

/// Errors from index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("corrupt index: {reason}")]
    Corrupt { reason: String },

    #[error("unsupported index version {0}")]
    UnsupportedVersion(u32),

    #[error("invalid index entry at offset {offset}: {reason}")]
    InvalidEntry { offset: usize, reason: String },

    #[error("invalid {signature} extension: {reason}")]
    InvalidExtension { signature: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Odb(#[from] ugit_odb::OdbError),

    #[error(transparent)]
    Hash(#[from] ugit_hash::HashError),
}

/// An extension we do not interpret, preserved for round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExtension {
    pub signature: [u8; 4],
    pub data: Vec<u8>,
}

/// The in-memory index.
#[derive(Debug, Clone)]
pub struct Index {
    pub version: u32,
    /// Sorted by `(path, stage)`.
    pub entries: Vec<IndexEntry>,
    pub cache_tree: Option<CacheTree>,
    pub unknown_extensions: Vec<RawExtension>,
    pub(crate) algo: HashAlgorithm,
}

impl Index {
    pub fn new(algo: HashAlgorithm) -> Self {
        Self {
            version: 2,
            entries: Vec::new(),
            cache_tree: None,
            unknown_extensions: Vec::new(),
            algo,
        }
    }

    /// Load from storage; a missing key yields an empty index.
    pub fn load(
        storage: &dyn Storage,
        key: &str,
        algo: HashAlgorithm,
    ) -> Result<Self, IndexError> {
        match storage.read(key) {
            Ok(data) => read::parse_index(&data, algo),
            Err(StoreError::NotFound { .. }) => Ok(Self::new(algo)),
            Err(e) => Err(e.into()),
        }
    }

    /// Serialize and install atomically under `<key>.lock`; readers keep
    /// seeing the previous fully-committed version until the rename.
    pub fn save(
        &self,
        storage: &dyn Storage,
        key: &str,
        lock_opts: &LockOptions,
    ) -> Result<(), IndexError> {
        let data = write::serialize_index(self)?;
        let mut lock = Lock::acquire(storage, key, lock_opts)?;
        lock.write(&data);
        lock.commit()?;
        Ok(())
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algo
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace an entry, evicting incompatible stages for the
    /// path (stage 0 displaces conflicts and vice versa).
    pub fn upsert(&mut self, entry: IndexEntry) {
        let path = entry.path.clone();
        self.invalidate_tree_cache_for(path.as_bstr());
        match entry.stage {
            Stage::Normal => self.entries.retain(|e| e.path != path),
            _ => self
                .entries
                .retain(|e| !(e.path == path && e.stage == Stage::Normal)),
        }
        match self
            .entries
            .binary_search_by(|e| e.sort_key().cmp(&entry.sort_key()))
        {
            Ok(i) => self.entries[i] = entry,
            Err(i) => self.entries.insert(i, entry),
        }
    }

    /// Remove every stage of `path`; reports whether anything was removed.
    pub fn remove(&mut self, path: &BStr) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.path != path);
        let removed = self.entries.len() != before;
        if removed {
            self.invalidate_tree_cache_for(path);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cache_tree = None;
    }

    /// Entries in `(path, stage)` order, optionally limited to a path prefix.
    pub fn entries(&self, prefix: Option<&BStr>) -> impl Iterator<Item = &IndexEntry> {
        let prefix: Option<BString> = prefix.map(BString::from);
        self.entries
            .iter()
            .filter(move |e| match &prefix {
                Some(p) => e.path.starts_with(p.as_slice()),
                None => true,
            })
    }

    /// The stage-0 entry at `path`.
    pub fn get(&self, path: &BStr) -> Option<&IndexEntry> {
        self.entries
            .iter()
            .find(|e| e.path == path && e.stage == Stage::Normal)
    }

    /// Paths that currently carry conflict stages.
    pub fn conflicted_paths(&self) -> Vec<BString> {
        let mut out: Vec<BString> = self
            .entries
            .iter()
            .filter(|e| e.stage != Stage::Normal)
            .map(|e| e.path.clone())
            .collect();
        out.dedup();
        out
    }

    pub fn has_conflicts(&self) -> bool {
        self.entries.iter().any(|e| e.stage != Stage::Normal)
    }

    /// All stage entries for `path`, keyed by stage.
    pub fn stage_entries(&self, path: &BStr) -> BTreeMap<Stage, &IndexEntry> {
        self.entries
            .iter()
            .filter(|e| e.path == path)
            .map(|e| (e.stage, e))
            .collect()
    }

    /// Record conflict stages for a path (clearing stage 0).
    pub fn set_conflict(
        &mut self,
        path: &BStr,
        stages: impl IntoIterator<Item = IndexEntry>,
    ) {
        self.entries.retain(|e| e.path != path);
        self.invalidate_tree_cache_for(path);
        for entry in stages {
            debug_assert_eq!(entry.path.as_bstr(), path);
            debug_assert_ne!(entry.stage, Stage::Normal);
            self.upsert(entry);
        }
    }

    /// Build (or refresh) the TREE cache and return the root tree OID.
    pub fn build_tree_cache(
        &mut self,
        odb: &ObjectDatabase,
    ) -> Result<ObjectId, IndexError> {
        write::write_tree(self, odb)
    }

    pub fn invalidate_tree_cache(&mut self) {
        self.cache_tree = None;
    }

    fn invalidate_tree_cache_for(&mut self, path: &BStr) {
        if let Some(tree) = &mut self.cache_tree {
            tree.invalidate_path(path.as_ref());
        }
    }
}

/// Load-modify-save helper bound to one storage key.
pub struct IndexFile {
    storage: Arc<dyn Storage>,
    key: String,
    lock_opts: LockOptions,
    pub index: Index,
}

impl IndexFile {
    pub fn open(
        storage: Arc<dyn Storage>,
        key: impl Into<String>,
        algo: HashAlgorithm,
    ) -> Result<Self, IndexError> {
        let key = key.into();
        let index = Index::load(storage.as_ref(), &key, algo)?;
        Ok(Self {
            storage,
            key,
            lock_opts: LockOptions::default(),
            index,
        })
    }

    pub fn save(&self) -> Result<(), IndexError> {
        self.index
            .save(self.storage.as_ref(), &self.key, &self.lock_opts)
    }

    pub fn reload(&mut self) -> Result<(), IndexError> {
        self.index = Index::load(self.storage.as_ref(), &self.key, self.index.algo)?;
        Ok(())
    }
}
