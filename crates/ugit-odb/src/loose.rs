//! Loose objects: one zlib-compressed `"<type> <size>\0<body>"` per key.

use std::sync::Arc;

use ugit_hash::hasher::Hasher;
use ugit_hash::{zlib, HashAlgorithm, ObjectId};
use ugit_object::{header, ObjectType};
use ugit_store::{Storage, StoreError};

use crate::OdbError;

pub struct LooseStore {
    storage: Arc<dyn Storage>,
    /// Key prefix, normally `"objects"`; empty for alternates rooted
    /// directly at an objects directory.
    prefix: String,
    algo: HashAlgorithm,
}

impl LooseStore {
    pub fn new(storage: Arc<dyn Storage>, prefix: impl Into<String>, algo: HashAlgorithm) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
            algo,
        }
    }

    fn key(&self, oid: &ObjectId) -> String {
        if self.prefix.is_empty() {
            oid.loose_key()
        } else {
            format!("{}/{}", self.prefix, oid.loose_key())
        }
    }

    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.storage.has(&self.key(oid))
    }

    /// Read and verify a loose object; `Ok(None)` when absent.
    ///
    /// The decompressed bytes are re-hashed: a value that does not hash to
    /// its key surfaces as `HashMismatch`.
    pub fn read(&self, oid: &ObjectId) -> Result<Option<(ObjectType, Vec<u8>)>, OdbError> {
        let compressed = match self.storage.read(&self.key(oid)) {
            Ok(data) => data,
            Err(StoreError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let raw = zlib::inflate(&compressed).map_err(|e| OdbError::CorruptLoose {
            oid: *oid,
            reason: format!("inflate failure: {e}"),
        })?;

        let computed = Hasher::digest(self.algo, &raw)?;
        if computed != *oid {
            return Err(OdbError::HashMismatch {
                expected: *oid,
                computed,
            });
        }

        let (obj_type, size, header_len) = header::parse_header(&raw)?;
        if raw.len() - header_len != size {
            return Err(OdbError::CorruptLoose {
                oid: *oid,
                reason: format!("header says {size} bytes, body has {}", raw.len() - header_len),
            });
        }
        Ok(Some((obj_type, raw[header_len..].to_vec())))
    }

    /// Read just `(type, size)` by inflating only the header bytes.
    pub fn read_header(
        &self,
        oid: &ObjectId,
    ) -> Result<Option<(ObjectType, usize)>, OdbError> {
        let compressed = match self.storage.read(&self.key(oid)) {
            Ok(data) => data,
            Err(StoreError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // Headers are well under 64 decompressed bytes.
        let mut inflater = zlib::Inflater::new();
        let mut buf = Vec::with_capacity(64);
        let mut fed = 0;
        while !buf.contains(&0) {
            if fed >= compressed.len() || buf.len() > 64 {
                return Err(OdbError::CorruptLoose {
                    oid: *oid,
                    reason: "no header terminator".into(),
                });
            }
            let end = (fed + 128).min(compressed.len());
            let step = inflater
                .push(&compressed[fed..end], &mut buf)
                .map_err(|e| OdbError::CorruptLoose {
                    oid: *oid,
                    reason: format!("inflate failure: {e}"),
                })?;
            fed += step.consumed.max(1);
            if step.done {
                break;
            }
        }

        let (obj_type, size, _) = header::parse_header(&buf)?;
        Ok(Some((obj_type, size)))
    }

    /// Write an object; idempotent for equal input, returns the OID either way.
    pub fn write(&self, obj_type: ObjectType, body: &[u8]) -> Result<ObjectId, OdbError> {
        let hdr = header::write_header(obj_type, body.len());
        let mut hasher = Hasher::new(self.algo);
        hasher.update(&hdr);
        hasher.update(body);
        let oid = hasher.finalize()?;

        let key = self.key(&oid);
        if self.storage.has(&key) {
            return Ok(oid);
        }

        let mut raw = hdr;
        raw.extend_from_slice(body);
        self.storage
            .write(&key, &zlib::deflate(&raw, zlib::Compression::default()))?;
        Ok(oid)
    }

    /// Delete a loose object (pack installation prunes the loose copies).
    pub fn delete(&self, oid: &ObjectId) -> Result<(), OdbError> {
        match self.storage.delete(&self.key(oid)) {
            Ok(()) | Err(StoreError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Enumerate all loose OIDs.
    pub fn list(&self) -> Result<Vec<ObjectId>, OdbError> {
        let list_prefix = if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        };
        let mut oids = Vec::new();
        for key in self.storage.list(&list_prefix)? {
            let rest = &key[list_prefix.len()..];
            // objects/pack and objects/info live alongside the fanout dirs.
            let mut parts = rest.splitn(2, '/');
            let (Some(dir), Some(file)) = (parts.next(), parts.next()) else {
                continue;
            };
            if dir.len() != 2 || file.contains('/') {
                continue;
            }
            let hex = format!("{dir}{file}");
            if hex.len() == self.algo.hex_len() {
                if let Ok(oid) = ObjectId::from_hex(&hex) {
                    oids.push(oid);
                }
            }
        }
        oids.sort();
        Ok(oids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ugit_store::MemStore;

    fn store() -> LooseStore {
        LooseStore::new(Arc::new(MemStore::new()), "objects", HashAlgorithm::Sha1)
    }

    #[test]
    fn write_read_roundtrip() {
        let loose = store();
        let oid = loose.write(ObjectType::Blob, b"hello\n").unwrap();
        assert_eq!(oid.to_hex(), "ce013625030ba8dba906f756967f9e9ca394464a");
        let (t, body) = loose.read(&oid).unwrap().unwrap();
        assert_eq!(t, ObjectType::Blob);
        assert_eq!(body, b"hello\n");
    }

    #[test]
    fn write_is_idempotent() {
        let loose = store();
        let a = loose.write(ObjectType::Blob, b"same").unwrap();
        let b = loose.write(ObjectType::Blob, b"same").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn absent_reads_none() {
        let loose = store();
        let oid = ObjectId::from_hex("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();
        assert!(loose.read(&oid).unwrap().is_none());
        assert!(loose.read_header(&oid).unwrap().is_none());
        assert!(!loose.contains(&oid));
    }

    #[test]
    fn header_only_read() {
        let loose = store();
        let body = vec![42u8; 10_000];
        let oid = loose.write(ObjectType::Blob, &body).unwrap();
        let (t, size) = loose.read_header(&oid).unwrap().unwrap();
        assert_eq!(t, ObjectType::Blob);
        assert_eq!(size, 10_000);
    }

    #[test]
    fn tampered_content_is_hash_mismatch() {
        let storage: Arc<dyn Storage> = Arc::new(MemStore::new());
        let loose = LooseStore::new(storage.clone(), "objects", HashAlgorithm::Sha1);
        let oid = loose.write(ObjectType::Blob, b"original").unwrap();
        // Overwrite the key with a different (validly compressed) object.
        let raw = b"blob 6\0other!";
        storage
            .write(
                &format!("objects/{}", oid.loose_key()),
                &zlib::deflate(raw, zlib::Compression::default()),
            )
            .unwrap();
        assert!(matches!(
            loose.read(&oid),
            Err(OdbError::HashMismatch { .. })
        ));
    }

    #[test]
    fn list_skips_pack_dir() {
        let storage: Arc<dyn Storage> = Arc::new(MemStore::new());
        let loose = LooseStore::new(storage.clone(), "objects", HashAlgorithm::Sha1);
        let oid = loose.write(ObjectType::Blob, b"x").unwrap();
        storage.write("objects/pack/pack-feed.pack", b"junk").unwrap();
        storage.write("objects/info/alternates", b"").unwrap();
        assert_eq!(loose.list().unwrap(), vec![oid]);
    }
}
