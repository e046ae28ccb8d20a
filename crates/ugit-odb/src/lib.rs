//! Unified object database.
//!
//! One read/write surface across loose objects, packfiles, the
//! multi-pack-index, and alternate object stores, all reached through the
//! storage backend. Lookup order: in-memory cache, loose key probe, the
//! oid→pack map (pre-built per pack so steady-state locates are O(1)),
//! multi-pack-index, then alternates.

pub mod loose;
pub mod pack;
mod prefix;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use ugit_hash::hasher::Hasher;
use ugit_hash::{HashAlgorithm, HashError, ObjectId};
use ugit_object::cache::ObjectCache;
use ugit_object::{Object, ObjectError, ObjectType};
use ugit_store::{FsStore, Storage, StoreError};

pub use loose::LooseStore;
pub use pack::file::PackFile;
pub use pack::index::IndexEntry;
pub use pack::midx::{MidxEntry, MultiPackIndex, MIDX_KEY};
pub use pack::write::{index_pack, install_pack, PackWriter};

/// Cache budget per object database (bytes).
const CACHE_BYTES: usize = 16 * 1024 * 1024;
/// Alternates may nest; bound the recursion like git does.
const MAX_ALTERNATE_DEPTH: usize = 5;

/// Errors from the object database.
#[derive(Debug, thiserror::Error)]
pub enum OdbError {
    #[error("object not found: {oid}")]
    NotFound { oid: ObjectId },

    #[error("no object matches prefix '{prefix}'")]
    PrefixNotFound { prefix: String },

    #[error("short object id {prefix} is ambiguous ({} candidates)", candidates.len())]
    AmbiguousOid {
        prefix: String,
        candidates: Vec<ObjectId>,
    },

    #[error("hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch {
        expected: ObjectId,
        computed: ObjectId,
    },

    #[error("corrupt pack {pack} at offset {offset}: {cause}")]
    Corrupt {
        pack: String,
        offset: u64,
        cause: String,
    },

    #[error("corrupt pack index: {cause}")]
    CorruptIndex { cause: String },

    #[error("corrupt loose object {oid}: {reason}")]
    CorruptLoose { oid: ObjectId, reason: String },

    #[error("invalid delta at stream offset {offset}: {reason}")]
    InvalidDelta { offset: usize, reason: String },

    #[error("delta chain exceeds {depth} levels in {pack} at offset {offset}")]
    DeltaChainTooLong {
        pack: String,
        offset: u64,
        depth: usize,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Hash(#[from] HashError),
}

/// Header-only object info.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInfo {
    pub obj_type: ObjectType,
    pub size: usize,
}

pub struct ObjectDatabase {
    storage: Arc<dyn Storage>,
    algo: HashAlgorithm,
    /// `"objects"` for a git-dir store; empty for alternates rooted at an
    /// objects directory.
    prefix: String,
    loose: LooseStore,
    packs: RwLock<Vec<Arc<PackFile>>>,
    /// oid → (pack slot, offset). Extended once per pack install, read-only
    /// between installs.
    locate: RwLock<HashMap<ObjectId, (usize, u64)>>,
    midx: Option<MultiPackIndex>,
    cache: Mutex<ObjectCache>,
    alternates: Vec<ObjectDatabase>,
}

impl ObjectDatabase {
    /// Open the object database of a git-dir storage backend.
    pub fn open(storage: Arc<dyn Storage>, algo: HashAlgorithm) -> Result<Self, OdbError> {
        Self::open_at(storage, "objects", algo, 0)
    }

    fn open_at(
        storage: Arc<dyn Storage>,
        prefix: &str,
        algo: HashAlgorithm,
        depth: usize,
    ) -> Result<Self, OdbError> {
        let loose = LooseStore::new(storage.clone(), prefix, algo);

        let pack_prefix = Self::join(prefix, "pack/");
        let mut packs = Vec::new();
        for key in storage.list(&pack_prefix)? {
            if !key.ends_with(".pack") {
                continue;
            }
            match PackFile::open(storage.as_ref(), &key, algo) {
                Ok(pack) => packs.push(Arc::new(pack)),
                Err(e) => {
                    // A pack that will not even open is skipped for the
                    // whole process; reads fall back to other sources.
                    tracing::warn!(pack = %key, error = %e, "skipping unreadable pack");
                }
            }
        }

        let mut locate = HashMap::new();
        for (slot, pack) in packs.iter().enumerate() {
            for (oid, offset) in pack.index().iter() {
                locate.insert(oid, (slot, offset));
            }
        }

        let midx_key = Self::join(prefix, "multi-pack-index");
        let midx = match storage.read_payload(&midx_key) {
            Ok(payload) => Some(MultiPackIndex::parse(payload, algo)?),
            Err(StoreError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };

        let alternates = if depth < MAX_ALTERNATE_DEPTH {
            Self::load_alternates(storage.as_ref(), prefix, algo, depth)?
        } else {
            Vec::new()
        };

        Ok(Self {
            storage,
            algo,
            prefix: prefix.to_string(),
            loose,
            packs: RwLock::new(packs),
            locate: RwLock::new(locate),
            midx,
            cache: Mutex::new(ObjectCache::new(CACHE_BYTES)),
            alternates,
        })
    }

    fn join(prefix: &str, rest: &str) -> String {
        if prefix.is_empty() {
            rest.to_string()
        } else {
            format!("{prefix}/{rest}")
        }
    }

    fn load_alternates(
        storage: &dyn Storage,
        prefix: &str,
        algo: HashAlgorithm,
        depth: usize,
    ) -> Result<Vec<ObjectDatabase>, OdbError> {
        let key = Self::join(prefix, "info/alternates");
        let data = match storage.read(&key) {
            Ok(data) => data,
            Err(StoreError::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut alternates = Vec::new();
        for line in data.split(|&b| b == b'\n') {
            let line = std::str::from_utf8(line).unwrap_or("").trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            // Each line names a peer objects directory on the filesystem.
            let alt_storage: Arc<dyn Storage> = Arc::new(FsStore::new(line));
            match Self::open_at(alt_storage, "", algo, depth + 1) {
                Ok(odb) => alternates.push(odb),
                Err(e) => {
                    tracing::warn!(path = line, error = %e, "skipping unreadable alternate");
                }
            }
        }
        Ok(alternates)
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algo
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Fully materialized read: `(type, bytes)` with delta chains resolved
    /// and the reconstruction verified against the requested OID.
    pub fn read_raw(&self, oid: &ObjectId) -> Result<(ObjectType, Vec<u8>), OdbError> {
        if let Some((t, data)) = self.read_raw_opt(oid)? {
            Ok((t, data))
        } else {
            Err(OdbError::NotFound { oid: *oid })
        }
    }

    fn read_raw_opt(&self, oid: &ObjectId) -> Result<Option<(ObjectType, Vec<u8>)>, OdbError> {
        if let Some((t, data)) = self.loose.read(oid)? {
            return Ok(Some((t, data)));
        }

        let mut pack_error: Option<OdbError> = None;
        if let Some(result) = self.read_packed(oid, &mut pack_error)? {
            return Ok(Some(result));
        }

        for alt in &self.alternates {
            if let Some(result) = alt.read_raw_opt(oid)? {
                return Ok(Some(result));
            }
        }

        // Every healthy source came up empty; a corrupt pack that claimed
        // the object is the real failure.
        match pack_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    fn read_packed(
        &self,
        oid: &ObjectId,
        pack_error: &mut Option<OdbError>,
    ) -> Result<Option<(ObjectType, Vec<u8>)>, OdbError> {
        let located = self.locate.read().unwrap().get(oid).copied();
        // Cloned so no lock is held while delta bases recurse into the ODB.
        let packs: Vec<Arc<PackFile>> = self.packs.read().unwrap().clone();

        let mut attempt = |pack: &Arc<PackFile>, offset: u64| -> Result<
            Option<(ObjectType, Vec<u8>)>,
            OdbError,
        > {
            if pack.is_quarantined() {
                return Ok(None);
            }
            match pack.read_at(offset, |base| {
                self.read_raw_opt(base).ok().flatten()
            }) {
                Ok(obj) => {
                    let computed =
                        Hasher::hash_object(self.algo, obj.obj_type.as_str(), &obj.data)?;
                    if computed != *oid {
                        return Err(OdbError::HashMismatch {
                            expected: *oid,
                            computed,
                        });
                    }
                    Ok(Some((obj.obj_type, obj.data)))
                }
                Err(e @ (OdbError::Corrupt { .. } | OdbError::DeltaChainTooLong { .. })) => {
                    tracing::warn!(pack = pack.key(), error = %e, "quarantining corrupt pack");
                    pack.quarantine();
                    *pack_error = Some(e);
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        };

        // Multi-pack-index supersedes per-pack lookups when present.
        if let Some(midx) = &self.midx {
            if let Some((pack_name, offset)) = midx.lookup(oid) {
                let full_key = Self::join(&self.prefix, &format!("pack/{pack_name}"));
                if let Some(pack) = packs.iter().find(|p| p.key() == full_key) {
                    if let Some(found) = attempt(pack, offset)? {
                        return Ok(Some(found));
                    }
                }
            }
        }

        if let Some((slot, offset)) = located {
            if let Some(pack) = packs.get(slot) {
                if let Some(found) = attempt(pack, offset)? {
                    return Ok(Some(found));
                }
            }
        }

        // Fallback sweep covers objects added by a pack whose map entry was
        // displaced, and quarantine re-routing.
        for pack in packs.iter() {
            if pack.is_quarantined() {
                continue;
            }
            if let Some(offset) = pack.index().lookup(oid) {
                if let Some(found) = attempt(pack, offset)? {
                    return Ok(Some(found));
                }
            }
        }
        Ok(None)
    }

    /// Parsed read through the shared cache.
    pub fn read_object(&self, oid: &ObjectId) -> Result<Object, OdbError> {
        if let Some(obj) = self.cache.lock().unwrap().get(oid) {
            return Ok(obj.clone());
        }
        let (obj_type, data) = self.read_raw(oid)?;
        let obj = Object::parse_content(obj_type, &data, self.algo)?;
        self.cache.lock().unwrap().insert(*oid, obj.clone());
        Ok(obj)
    }

    /// Header-only read: type and size without materializing content.
    pub fn read_header(&self, oid: &ObjectId) -> Result<ObjectInfo, OdbError> {
        if let Some(obj) = self.cache.lock().unwrap().get(oid) {
            return Ok(ObjectInfo {
                obj_type: obj.object_type(),
                size: obj.serialize_content().len(),
            });
        }
        if let Some((obj_type, size)) = self.loose.read_header(oid)? {
            return Ok(ObjectInfo { obj_type, size });
        }
        {
            let located = self.locate.read().unwrap().get(oid).copied();
            if let Some((slot, offset)) = located {
                let pack = self.packs.read().unwrap().get(slot).cloned();
                if let Some(pack) = pack {
                    if !pack.is_quarantined() {
                        if let Ok((obj_type, size)) = pack.info_at(offset) {
                            return Ok(ObjectInfo { obj_type, size });
                        }
                    }
                }
            }
        }
        for alt in &self.alternates {
            if let Ok(info) = alt.read_header(oid) {
                return Ok(info);
            }
        }
        // Cross-pack delta bases force a full read.
        let (obj_type, data) = self.read_raw(oid)?;
        Ok(ObjectInfo {
            obj_type,
            size: data.len(),
        })
    }

    pub fn has_object(&self, oid: &ObjectId) -> bool {
        if self.cache.lock().unwrap().contains(oid) || self.loose.contains(oid) {
            return true;
        }
        if self.locate.read().unwrap().contains_key(oid) {
            return true;
        }
        if let Some(midx) = &self.midx {
            if midx.lookup(oid).is_some() {
                return true;
            }
        }
        self.alternates.iter().any(|alt| alt.has_object(oid))
    }

    /// Write an object to loose storage; idempotent per content.
    pub fn write(&self, obj_type: ObjectType, body: &[u8]) -> Result<ObjectId, OdbError> {
        self.loose.write(obj_type, body)
    }

    /// Write a parsed object.
    pub fn write_object(&self, obj: &Object) -> Result<ObjectId, OdbError> {
        self.write(obj.object_type(), &obj.serialize_content())
    }

    /// Expand an abbreviated hex prefix (≥ 4 chars) to the unique full OID.
    pub fn expand_oid(&self, hex_prefix: &str) -> Result<ObjectId, OdbError> {
        prefix::expand(self, hex_prefix)
    }

    pub fn list_loose(&self) -> Result<Vec<ObjectId>, OdbError> {
        self.loose.list()
    }

    pub fn loose_store(&self) -> &LooseStore {
        &self.loose
    }

    pub fn packs(&self) -> Vec<Arc<PackFile>> {
        self.packs.read().unwrap().clone()
    }

    /// Install a finished pack and make its objects visible to this ODB.
    pub fn install_pack(
        &self,
        pack_bytes: &[u8],
        entries: &[IndexEntry],
        checksum: &ObjectId,
    ) -> Result<String, OdbError> {
        let key = install_pack(
            self.storage.as_ref(),
            pack_bytes,
            entries,
            checksum,
            self.algo,
        )?;
        self.register_pack(&key)?;
        Ok(key)
    }

    /// Load an already-installed pack into the live pack list and map.
    pub fn register_pack(&self, pack_key: &str) -> Result<(), OdbError> {
        let pack = Arc::new(PackFile::open(self.storage.as_ref(), pack_key, self.algo)?);
        let mut packs = self.packs.write().unwrap();
        let slot = packs.len();
        let mut locate = self.locate.write().unwrap();
        for (oid, offset) in pack.index().iter() {
            locate.insert(oid, (slot, offset));
        }
        packs.push(pack);
        Ok(())
    }

    pub(crate) fn alternates(&self) -> &[ObjectDatabase] {
        &self.alternates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ugit_store::MemStore;

    fn odb() -> ObjectDatabase {
        ObjectDatabase::open(Arc::new(MemStore::new()), HashAlgorithm::Sha1).unwrap()
    }

    #[test]
    fn write_then_read_identical() {
        let db = odb();
        let oid = db.write(ObjectType::Blob, b"hello\n").unwrap();
        let (t, data) = db.read_raw(&oid).unwrap();
        assert_eq!(t, ObjectType::Blob);
        assert_eq!(data, b"hello\n");
        assert!(db.has_object(&oid));
    }

    #[test]
    fn write_is_idempotent() {
        let db = odb();
        let a = db.write(ObjectType::Blob, b"same bytes").unwrap();
        let b = db.write(ObjectType::Blob, b"same bytes").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_object_is_not_found() {
        let db = odb();
        let oid = ObjectId::from_hex("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();
        assert!(matches!(
            db.read_raw(&oid),
            Err(OdbError::NotFound { .. })
        ));
        assert!(!db.has_object(&oid));
    }

    #[test]
    fn packed_objects_survive_loose_deletion() {
        let db = odb();
        let bodies: Vec<Vec<u8>> = (0..50u8).map(|i| format!("blob number {i}").into_bytes()).collect();
        let mut oids = Vec::new();
        for body in &bodies {
            oids.push(db.write(ObjectType::Blob, body).unwrap());
        }

        let mut writer = PackWriter::new(HashAlgorithm::Sha1, bodies.len() as u32);
        for body in &bodies {
            writer.write_object(ObjectType::Blob, body).unwrap();
        }
        let (bytes, entries, checksum) = writer.finish().unwrap();
        db.install_pack(&bytes, &entries, &checksum).unwrap();

        for oid in &oids {
            db.loose_store().delete(oid).unwrap();
        }
        assert!(db.list_loose().unwrap().is_empty());

        for (oid, body) in oids.iter().zip(&bodies) {
            let (_, data) = db.read_raw(oid).unwrap();
            assert_eq!(&data, body);
        }
    }

    #[test]
    fn header_read_reports_size() {
        let db = odb();
        let oid = db.write(ObjectType::Blob, &vec![1u8; 1234]).unwrap();
        let info = db.read_header(&oid).unwrap();
        assert_eq!(info.obj_type, ObjectType::Blob);
        assert_eq!(info.size, 1234);
    }

    #[test]
    fn parsed_reads_are_cached() {
        let db = odb();
        let oid = db.write(ObjectType::Blob, b"cache me").unwrap();
        let first = db.read_object(&oid).unwrap();
        assert!(db.cache.lock().unwrap().contains(&oid));
        let second = db.read_object(&oid).unwrap();
        assert_eq!(first, second);
    }
}
