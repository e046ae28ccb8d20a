//! The `packed-refs` file: many refs in one sorted text file.
//!
//! ```text
//! # pack-refs with: peeled fully-peeled sorted
//! <hex-oid> <refname>
//! ^<hex-oid>            (peeled target of the annotated tag above)
//! ```

use bstr::ByteSlice;
use ugit_hash::ObjectId;
use ugit_store::{Lock, LockOptions, Storage, StoreError};

use crate::error::RefError;
use crate::name::RefName;

pub const PACKED_REFS_KEY: &str = "packed-refs";
const HEADER: &str = "# pack-refs with: peeled fully-peeled sorted\n";

/// One packed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedRef {
    pub name: RefName,
    pub oid: ObjectId,
    /// For annotated tags: the commit the tag ultimately points at.
    pub peeled: Option<ObjectId>,
}

/// Parsed snapshot of the packed-refs file.
#[derive(Debug, Clone, Default)]
pub struct PackedRefs {
    refs: Vec<PackedRef>,
}

impl PackedRefs {
    pub fn parse(data: &[u8]) -> Result<Self, RefError> {
        let mut refs: Vec<PackedRef> = Vec::new();
        for line in data.lines() {
            if line.is_empty() || line.starts_with(b"#") {
                continue;
            }
            if let Some(peel) = line.strip_prefix(b"^") {
                let hex = std::str::from_utf8(peel)
                    .map_err(|_| RefError::Parse("packed-refs: non-UTF8 peel line".into()))?;
                let peeled = ObjectId::from_hex(hex.trim())?;
                match refs.last_mut() {
                    Some(last) => last.peeled = Some(peeled),
                    None => {
                        return Err(RefError::Parse(
                            "packed-refs: peel line before any ref".into(),
                        ))
                    }
                }
                continue;
            }

            let space = line
                .find_byte(b' ')
                .ok_or_else(|| RefError::Parse("packed-refs: missing separator".into()))?;
            let hex = std::str::from_utf8(&line[..space])
                .map_err(|_| RefError::Parse("packed-refs: non-UTF8 OID".into()))?;
            let oid = ObjectId::from_hex(hex)?;
            let name_str = std::str::from_utf8(&line[space + 1..])
                .map_err(|_| RefError::Parse("packed-refs: non-UTF8 name".into()))?;
            refs.push(PackedRef {
                name: RefName::new(name_str.trim())?,
                oid,
                peeled: None,
            });
        }
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self { refs })
    }

    /// Load from storage; a missing file is an empty set.
    pub fn load(storage: &dyn Storage) -> Result<Self, RefError> {
        match storage.read(PACKED_REFS_KEY) {
            Ok(data) => Self::parse(&data),
            Err(StoreError::NotFound { .. }) => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(HEADER.as_bytes());
        for r in &self.refs {
            out.extend_from_slice(r.oid.to_hex().as_bytes());
            out.push(b' ');
            out.extend_from_slice(r.name.as_str().as_bytes());
            out.push(b'\n');
            if let Some(peeled) = &r.peeled {
                out.push(b'^');
                out.extend_from_slice(peeled.to_hex().as_bytes());
                out.push(b'\n');
            }
        }
        out
    }

    pub fn find(&self, name: &RefName) -> Option<&PackedRef> {
        self.refs
            .binary_search_by(|r| r.name.cmp(name))
            .ok()
            .map(|i| &self.refs[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackedRef> {
        self.refs.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Remove an entry; reports whether it was present.
    pub fn remove(&mut self, name: &RefName) -> bool {
        match self.refs.binary_search_by(|r| r.name.cmp(name)) {
            Ok(i) => {
                self.refs.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    pub fn upsert(&mut self, entry: PackedRef) {
        match self.refs.binary_search_by(|r| r.name.cmp(&entry.name)) {
            Ok(i) => self.refs[i] = entry,
            Err(i) => self.refs.insert(i, entry),
        }
    }

    /// Rewrite the whole file atomically under its lock.
    pub fn save(&self, storage: &dyn Storage, opts: &LockOptions) -> Result<(), RefError> {
        let mut lock = Lock::acquire(storage, PACKED_REFS_KEY, opts)?;
        lock.write(&self.serialize());
        lock.commit()?;
        Ok(())
    }
}
