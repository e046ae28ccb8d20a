//! Reading objects out of a single packfile.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use lru::LruCache;
use ugit_hash::hasher::Hasher;
use ugit_hash::{zlib, HashAlgorithm, ObjectId};
use ugit_hash::crc::Crc32;
use ugit_object::ObjectType;
use ugit_store::{Payload, Storage};

use crate::OdbError;
use super::entry::parse_record_header;
use super::index::PackIndex;
use super::write::index_pack;
use super::{delta, PackedObject, RecordType, MAX_DELTA_CHAIN, PACK_HEADER_SIZE,
            PACK_SIGNATURE, PACK_VERSIONS};

/// Number of reconstructed bases kept per pack to short-circuit repeated
/// chain walks.
const BASE_CACHE_ENTRIES: usize = 64;

/// A packfile plus its index, opened for reading.
pub struct PackFile {
    /// Storage key of the `.pack` (used in error context).
    key: String,
    data: Payload,
    index: PackIndex,
    num_objects: u32,
    algo: HashAlgorithm,
    /// Reconstructed (type, bytes) keyed by record offset.
    base_cache: Mutex<LruCache<u64, (ObjectType, Vec<u8>)>>,
    /// Set when a read hits corruption; the ODB then skips this pack.
    unusable: AtomicBool,
}

impl PackFile {
    /// Open the pack at `pack_key`, validating header and trailer, and
    /// loading its `.idx` — or building and installing one if missing.
    pub fn open(
        storage: &dyn Storage,
        pack_key: &str,
        algo: HashAlgorithm,
    ) -> Result<Self, OdbError> {
        let data = storage.read_payload(pack_key)?;
        let corrupt = |offset: u64, cause: &str| OdbError::Corrupt {
            pack: pack_key.to_string(),
            offset,
            cause: cause.to_string(),
        };

        let hash_len = algo.digest_len();
        if data.len() < PACK_HEADER_SIZE + hash_len {
            return Err(corrupt(0, "pack too small"));
        }
        if &data[0..4] != PACK_SIGNATURE {
            return Err(corrupt(0, "bad PACK signature"));
        }
        let version = u32::from_be_bytes(data[4..8].try_into().expect("4 bytes"));
        if !PACK_VERSIONS.contains(&version) {
            return Err(corrupt(4, &format!("unsupported pack version {version}")));
        }
        let num_objects = u32::from_be_bytes(data[8..12].try_into().expect("4 bytes"));

        // Trailer is the hash of everything before it.
        let mut hasher = Hasher::new(algo);
        hasher.update(&data[..data.len() - hash_len]);
        let computed = hasher.finalize()?;
        if computed.as_bytes() != &data[data.len() - hash_len..] {
            return Err(corrupt(data.len() as u64 - hash_len as u64, "trailer hash mismatch"));
        }

        let idx_key = pack_key.replace(".pack", ".idx");
        let index = match storage.read_payload(&idx_key) {
            Ok(payload) => PackIndex::parse(payload, algo)?,
            Err(ugit_store::StoreError::NotFound { .. }) => {
                tracing::debug!(pack = pack_key, "no index found, rebuilding");
                let entries = index_pack(pack_key, &data, algo)?;
                let idx_bytes = PackIndex::build(&entries, &computed, algo)?;
                storage.write(&idx_key, &idx_bytes)?;
                PackIndex::parse(Payload::Owned(idx_bytes), algo)?
            }
            Err(e) => return Err(e.into()),
        };

        if index.num_objects() != num_objects {
            return Err(corrupt(
                8,
                &format!(
                    "pack has {num_objects} objects but index has {}",
                    index.num_objects()
                ),
            ));
        }

        Ok(Self {
            key: pack_key.to_string(),
            data,
            index,
            num_objects,
            algo,
            base_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(BASE_CACHE_ENTRIES).expect("nonzero"),
            )),
            unusable: AtomicBool::new(false),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn num_objects(&self) -> u32 {
        self.num_objects
    }

    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.index.lookup(oid).is_some()
    }

    /// Mark this pack unusable for the rest of the process.
    pub fn quarantine(&self) {
        self.unusable.store(true, Ordering::SeqCst);
    }

    pub fn is_quarantined(&self) -> bool {
        self.unusable.load(Ordering::SeqCst)
    }

    /// Read an object by OID; `None` when not in this pack.
    pub fn read(
        &self,
        oid: &ObjectId,
        resolve_base: impl Fn(&ObjectId) -> Option<(ObjectType, Vec<u8>)>,
    ) -> Result<Option<PackedObject>, OdbError> {
        match self.index.lookup(oid) {
            Some(offset) => self.read_at(offset, resolve_base).map(Some),
            None => Ok(None),
        }
    }

    /// Read the record at `offset`, resolving delta chains iteratively.
    ///
    /// `resolve_base` is consulted for REF_DELTA bases not present in this
    /// pack (thin packs, cross-pack deltas).
    pub fn read_at(
        &self,
        offset: u64,
        resolve_base: impl Fn(&ObjectId) -> Option<(ObjectType, Vec<u8>)>,
    ) -> Result<PackedObject, OdbError> {
        // Deltas collected outermost-first; each remembers the offset of the
        // record it reconstructs so intermediates can be cached.
        let mut chain: Vec<(u64, Vec<u8>)> = Vec::new();
        let mut current = offset;

        let (base_type, mut data) = loop {
            if chain.len() > MAX_DELTA_CHAIN {
                return Err(OdbError::DeltaChainTooLong {
                    pack: self.key.clone(),
                    offset,
                    depth: chain.len(),
                });
            }

            if let Some((t, bytes)) = self.base_cache.lock().unwrap().get(&current) {
                break (*t, bytes.clone());
            }

            let header = parse_record_header(
                &self.key,
                &self.data[current as usize..],
                current,
                self.algo,
            )?;
            let record = self.inflate_record(current, &header)?;

            match header.record_type {
                RecordType::Commit
                | RecordType::Tree
                | RecordType::Blob
                | RecordType::Tag => {
                    let t = header.record_type.to_object_type().expect("base type");
                    break (t, record);
                }
                RecordType::OfsDelta { base_offset } => {
                    chain.push((current, record));
                    current = base_offset;
                }
                RecordType::RefDelta { base_oid } => {
                    chain.push((current, record));
                    if let Some(base_offset) = self.index.lookup(&base_oid) {
                        current = base_offset;
                    } else if let Some((t, bytes)) = resolve_base(&base_oid) {
                        break (t, bytes);
                    } else {
                        return Err(OdbError::Corrupt {
                            pack: self.key.clone(),
                            offset: current,
                            cause: format!("missing REF_DELTA base {base_oid}"),
                        });
                    }
                }
            }
        };

        // Apply innermost-first, caching every intermediate reconstruction.
        for (record_offset, delta_stream) in chain.iter().rev() {
            data = delta::apply(&data, delta_stream).map_err(|e| match e {
                OdbError::InvalidDelta { offset: pos, reason } => OdbError::Corrupt {
                    pack: self.key.clone(),
                    offset: *record_offset,
                    cause: format!("bad delta at stream offset {pos}: {reason}"),
                },
                other => other,
            })?;
            self.base_cache
                .lock()
                .unwrap()
                .put(*record_offset, (base_type, data.clone()));
        }

        Ok(PackedObject {
            obj_type: base_type,
            data,
        })
    }

    /// Type and size without full reconstruction.
    ///
    /// Walks record headers through the delta chain: the outermost delta
    /// header carries the final target size, and the base record at the end
    /// of the chain supplies the type.
    pub fn info_at(&self, offset: u64) -> Result<(ObjectType, usize), OdbError> {
        let mut size: Option<usize> = None;
        let mut current = offset;
        for _ in 0..=MAX_DELTA_CHAIN {
            let header = parse_record_header(
                &self.key,
                &self.data[current as usize..],
                current,
                self.algo,
            )?;
            match header.record_type {
                RecordType::Commit
                | RecordType::Tree
                | RecordType::Blob
                | RecordType::Tag => {
                    let t = header.record_type.to_object_type().expect("base type");
                    return Ok((t, size.unwrap_or(header.inflated_size)));
                }
                RecordType::OfsDelta { base_offset } => {
                    if size.is_none() {
                        size = Some(self.peek_delta_target_size(current, &header)?);
                    }
                    current = base_offset;
                }
                RecordType::RefDelta { base_oid } => {
                    if size.is_none() {
                        size = Some(self.peek_delta_target_size(current, &header)?);
                    }
                    match self.index.lookup(&base_oid) {
                        Some(base_offset) => current = base_offset,
                        None => {
                            // Cross-pack base: fall back to full reconstruction
                            // is the caller's job; report what we know.
                            return Err(OdbError::Corrupt {
                                pack: self.key.clone(),
                                offset: current,
                                cause: format!("missing REF_DELTA base {base_oid}"),
                            });
                        }
                    }
                }
            }
        }
        Err(OdbError::DeltaChainTooLong {
            pack: self.key.clone(),
            offset,
            depth: MAX_DELTA_CHAIN + 1,
        })
    }

    /// Verify every object: CRC32 of the raw record against the index, and
    /// reconstructed bytes against the indexed OID.
    pub fn verify(&self) -> Result<(), OdbError> {
        // Record extents are [offset, next_offset); the trailer bounds the last.
        let mut offsets: Vec<u64> = (0..self.index.num_objects())
            .map(|i| self.index.offset_at(i))
            .collect();
        offsets.sort_unstable();
        let trailer_start = (self.data.len() - self.algo.digest_len()) as u64;

        for i in 0..self.index.num_objects() {
            let oid = self.index.oid_at(i);
            let offset = self.index.offset_at(i);
            let end = offsets
                .iter()
                .find(|&&o| o > offset)
                .copied()
                .unwrap_or(trailer_start);

            let crc = Crc32::digest(&self.data[offset as usize..end as usize]);
            if crc != self.index.crc32_at(i) {
                return Err(OdbError::Corrupt {
                    pack: self.key.clone(),
                    offset,
                    cause: format!("CRC mismatch for {oid}"),
                });
            }

            let obj = self.read_at(offset, |_| None)?;
            let computed = Hasher::hash_object(self.algo, obj.obj_type.as_str(), &obj.data)?;
            if computed != oid {
                return Err(OdbError::HashMismatch {
                    expected: oid,
                    computed,
                });
            }
        }
        Ok(())
    }

    fn inflate_record(
        &self,
        offset: u64,
        header: &super::entry::RecordHeader,
    ) -> Result<Vec<u8>, OdbError> {
        let start = offset as usize + header.data_start;
        let (bytes, _consumed) = zlib::inflate_prefix(&self.data[start..], header.inflated_size)
            .map_err(|e| OdbError::Corrupt {
                pack: self.key.clone(),
                offset,
                cause: format!("inflate failure: {e}"),
            })?;
        if bytes.len() != header.inflated_size {
            return Err(OdbError::Corrupt {
                pack: self.key.clone(),
                offset,
                cause: format!(
                    "inflated {} bytes, header declared {}",
                    bytes.len(),
                    header.inflated_size
                ),
            });
        }
        Ok(bytes)
    }

    /// Decompress just enough of a delta record to read its target size.
    fn peek_delta_target_size(
        &self,
        offset: u64,
        header: &super::entry::RecordHeader,
    ) -> Result<usize, OdbError> {
        let start = offset as usize + header.data_start;
        let input = &self.data[start..];
        let mut inflater = zlib::Inflater::new();
        let mut out = Vec::with_capacity(32);
        let mut fed = 0;
        // Two varints fit comfortably in 20 decompressed bytes.
        while out.len() < 20 && fed < input.len() {
            let end = (fed + 64).min(input.len());
            let step = inflater
                .push(&input[fed..end], &mut out)
                .map_err(|e| OdbError::Corrupt {
                    pack: self.key.clone(),
                    offset,
                    cause: format!("inflate failure: {e}"),
                })?;
            fed += step.consumed.max(1);
            if step.done {
                break;
            }
        }
        let (_, target) = delta::read_sizes(&out)?;
        Ok(target as usize)
    }
}
