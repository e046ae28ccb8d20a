//! Pack creation, indexing, and atomic installation.

use std::collections::HashMap;
use std::sync::Mutex;

use rayon::prelude::*;
use ugit_hash::crc::Crc32;
use ugit_hash::hasher::Hasher;
use ugit_hash::{varint, zlib, HashAlgorithm, ObjectId};
use ugit_object::ObjectType;
use ugit_store::Storage;

use crate::OdbError;
use super::entry::{encode_record_header, parse_record_header};
use super::index::{IndexEntry, PackIndex};
use super::{delta, RecordType, PACK_HEADER_SIZE, PACK_SIGNATURE, PACK_WRITE_VERSION};

/// Deltas are kept only when they shrink the record to at most this
/// fraction of the full body (n/8).
const DELTA_KEEP_NUM: usize = 6;

/// Streaming pack builder.
///
/// Objects are appended one at a time; consecutive objects of the same type
/// are tried as delta bases, which captures the common blob-revision case
/// without a window search.
pub struct PackWriter {
    algo: HashAlgorithm,
    buf: Vec<u8>,
    entries: Vec<IndexEntry>,
    expected: u32,
    last: Option<(ObjectType, Vec<u8>, u64)>,
}

impl PackWriter {
    pub fn new(algo: HashAlgorithm, object_count: u32) -> Self {
        let mut buf = Vec::new();
        buf.extend_from_slice(PACK_SIGNATURE);
        buf.extend_from_slice(&PACK_WRITE_VERSION.to_be_bytes());
        buf.extend_from_slice(&object_count.to_be_bytes());
        Self {
            algo,
            buf,
            entries: Vec::with_capacity(object_count as usize),
            expected: object_count,
            last: None,
        }
    }

    /// Append one object; returns its OID.
    pub fn write_object(
        &mut self,
        obj_type: ObjectType,
        body: &[u8],
    ) -> Result<ObjectId, OdbError> {
        let oid = Hasher::hash_object(self.algo, obj_type.as_str(), body)?;
        let offset = self.buf.len() as u64;

        let as_delta = self.last.as_ref().and_then(|(t, base, base_offset)| {
            if *t != obj_type || base.is_empty() {
                return None;
            }
            let d = delta::compute(base, body);
            (d.len() * 8 <= body.len() * DELTA_KEEP_NUM).then_some((d, *base_offset))
        });

        match as_delta {
            Some((d, base_offset)) => {
                self.buf
                    .extend_from_slice(&encode_record_header(6, d.len() as u64));
                self.buf
                    .extend_from_slice(&varint::write_offset(offset - base_offset));
                self.buf
                    .extend_from_slice(&zlib::deflate(&d, zlib::Compression::default()));
            }
            None => {
                let type_num = RecordType::from_object_type(obj_type).type_num();
                self.buf
                    .extend_from_slice(&encode_record_header(type_num, body.len() as u64));
                self.buf
                    .extend_from_slice(&zlib::deflate(body, zlib::Compression::default()));
            }
        }

        let crc32 = Crc32::digest(&self.buf[offset as usize..]);
        self.entries.push(IndexEntry { oid, offset, crc32 });
        self.last = Some((obj_type, body.to_vec(), offset));
        Ok(oid)
    }

    /// Finalize: append the trailer hash and hand back the pack bytes,
    /// index rows, and trailer OID.
    pub fn finish(mut self) -> Result<(Vec<u8>, Vec<IndexEntry>, ObjectId), OdbError> {
        debug_assert_eq!(self.entries.len() as u32, self.expected);
        let mut hasher = Hasher::new(self.algo);
        hasher.update(&self.buf);
        let checksum = hasher.finalize()?;
        self.buf.extend_from_slice(checksum.as_bytes());
        Ok((self.buf, self.entries, checksum))
    }
}

/// Install a finished pack: stage under a temporary key, atomically rename,
/// then publish the index (readers only see the pack once its `.idx` lands).
///
/// Returns the storage key of the installed `.pack`.
pub fn install_pack(
    storage: &dyn Storage,
    pack_bytes: &[u8],
    entries: &[IndexEntry],
    checksum: &ObjectId,
    algo: HashAlgorithm,
) -> Result<String, OdbError> {
    let hex = checksum.to_hex();
    let tmp_key = format!("objects/pack/pack-{hex}.pack.tmp");
    let pack_key = format!("objects/pack/pack-{hex}.pack");
    let idx_key = format!("objects/pack/pack-{hex}.idx");

    storage.write(&tmp_key, pack_bytes)?;
    storage.rename(&tmp_key, &pack_key)?;

    let idx_bytes = PackIndex::build(entries, checksum, algo)?;
    storage.write(&idx_key, &idx_bytes)?;
    tracing::debug!(pack = %pack_key, objects = entries.len(), "pack installed");
    Ok(pack_key)
}

/// One raw record scanned out of a pack body.
struct RawRecord {
    offset: u64,
    crc32: u32,
    record_type: RecordType,
    inflated: Vec<u8>,
}

/// Build index rows for a self-contained pack by scanning every record and
/// resolving delta chains.
///
/// Independent chains hang off distinct base records, so each base's
/// subtree resolves in parallel.
pub fn index_pack(
    pack_key: &str,
    data: &[u8],
    algo: HashAlgorithm,
) -> Result<Vec<IndexEntry>, OdbError> {
    let corrupt = |offset: u64, cause: String| OdbError::Corrupt {
        pack: pack_key.to_string(),
        offset,
        cause,
    };

    if data.len() < PACK_HEADER_SIZE + algo.digest_len() || &data[0..4] != PACK_SIGNATURE {
        return Err(corrupt(0, "not a packfile".into()));
    }
    let count = u32::from_be_bytes(data[8..12].try_into().expect("4 bytes")) as usize;

    // Pass 1: scan records sequentially (extents are only known by inflating).
    let mut records = Vec::with_capacity(count);
    let mut pos = PACK_HEADER_SIZE;
    for _ in 0..count {
        let offset = pos as u64;
        let header = parse_record_header(pack_key, &data[pos..], offset, algo)?;
        let body_start = pos + header.data_start;
        let (inflated, consumed) = zlib::inflate_prefix(&data[body_start..], header.inflated_size)
            .map_err(|e| corrupt(offset, format!("inflate failure: {e}")))?;
        if inflated.len() != header.inflated_size {
            return Err(corrupt(offset, "record size mismatch".into()));
        }
        let end = body_start + consumed;
        records.push(RawRecord {
            offset,
            crc32: Crc32::digest(&data[pos..end]),
            record_type: header.record_type,
            inflated,
        });
        pos = end;
    }

    // Pass 2: group deltas under their bases.
    let mut index_of: HashMap<u64, usize> = HashMap::with_capacity(count);
    for (i, rec) in records.iter().enumerate() {
        index_of.insert(rec.offset, i);
    }
    let mut ofs_children: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut ref_children: HashMap<ObjectId, Vec<usize>> = HashMap::new();
    let mut roots = Vec::new();
    for (i, rec) in records.iter().enumerate() {
        match &rec.record_type {
            RecordType::OfsDelta { base_offset } => {
                let base_idx = *index_of.get(base_offset).ok_or_else(|| {
                    corrupt(rec.offset, format!("OFS_DELTA base at {base_offset} is not a record"))
                })?;
                ofs_children.entry(base_idx).or_default().push(i);
            }
            RecordType::RefDelta { base_oid } => {
                ref_children.entry(*base_oid).or_default().push(i);
            }
            _ => roots.push(i),
        }
    }

    // Pass 3: resolve each base's chain tree; trees are disjoint.
    let entries = Mutex::new(Vec::with_capacity(count));
    let unresolved: Result<Vec<()>, OdbError> = roots
        .par_iter()
        .map(|&root| {
            let obj_type = records[root]
                .record_type
                .to_object_type()
                .expect("root is a base record");
            let mut stack: Vec<(usize, Vec<u8>)> =
                vec![(root, records[root].inflated.clone())];
            while let Some((i, bytes)) = stack.pop() {
                let rec = &records[i];
                let oid = Hasher::hash_object(algo, obj_type.as_str(), &bytes)?;
                entries.lock().unwrap().push(IndexEntry {
                    oid,
                    offset: rec.offset,
                    crc32: rec.crc32,
                });
                if let Some(children) = ofs_children.get(&i) {
                    for &child in children {
                        let reconstructed = delta::apply(&bytes, &records[child].inflated)?;
                        stack.push((child, reconstructed));
                    }
                }
                if let Some(children) = ref_children.get(&oid) {
                    for &child in children {
                        let reconstructed = delta::apply(&bytes, &records[child].inflated)?;
                        stack.push((child, reconstructed));
                    }
                }
            }
            Ok(())
        })
        .collect();
    unresolved?;

    let entries = entries.into_inner().unwrap();
    if entries.len() != count {
        return Err(corrupt(
            0,
            format!(
                "{} of {count} records resolved; pack is thin or has a delta cycle",
                entries.len()
            ),
        ));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ugit_store::MemStore;
    use crate::pack::file::PackFile;

    fn blob_oid(body: &[u8]) -> ObjectId {
        Hasher::hash_object(HashAlgorithm::Sha1, "blob", body).unwrap()
    }

    #[test]
    fn write_install_read_roundtrip() {
        let storage = MemStore::new();
        let bodies: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i; 64 + i as usize]).collect();

        let mut writer = PackWriter::new(HashAlgorithm::Sha1, bodies.len() as u32);
        let mut oids = Vec::new();
        for body in &bodies {
            oids.push(writer.write_object(ObjectType::Blob, body).unwrap());
        }
        let (bytes, entries, checksum) = writer.finish().unwrap();
        let pack_key =
            install_pack(&storage, &bytes, &entries, &checksum, HashAlgorithm::Sha1).unwrap();

        let pack = PackFile::open(&storage, &pack_key, HashAlgorithm::Sha1).unwrap();
        assert_eq!(pack.num_objects(), 20);
        for (oid, body) in oids.iter().zip(&bodies) {
            let obj = pack.read(oid, |_| None).unwrap().unwrap();
            assert_eq!(obj.obj_type, ObjectType::Blob);
            assert_eq!(&obj.data, body);
        }
        pack.verify().unwrap();
    }

    #[test]
    fn similar_objects_get_deltified() {
        let base: Vec<u8> = (0..200u8).cycle().take(4096).collect();
        let mut revised = base.clone();
        revised.extend_from_slice(b"appended tail");

        let mut writer = PackWriter::new(HashAlgorithm::Sha1, 2);
        writer.write_object(ObjectType::Blob, &base).unwrap();
        writer.write_object(ObjectType::Blob, &revised).unwrap();
        let (bytes, entries, checksum) = writer.finish().unwrap();

        // The second record must be an OFS_DELTA.
        let second_offset = entries[1].offset as usize;
        let type_num = (bytes[second_offset] >> 4) & 0x07;
        assert_eq!(type_num, 6);

        // And it still reads back correctly.
        let storage = MemStore::new();
        let key =
            install_pack(&storage, &bytes, &entries, &checksum, HashAlgorithm::Sha1).unwrap();
        let pack = PackFile::open(&storage, &key, HashAlgorithm::Sha1).unwrap();
        let obj = pack.read(&blob_oid(&revised), |_| None).unwrap().unwrap();
        assert_eq!(obj.data, revised);
    }

    #[test]
    fn index_rebuilt_when_missing() {
        let storage = MemStore::new();
        let mut writer = PackWriter::new(HashAlgorithm::Sha1, 3);
        let mut oids = Vec::new();
        for body in [b"one".as_slice(), b"two", b"three"] {
            oids.push(writer.write_object(ObjectType::Blob, body).unwrap());
        }
        let (bytes, entries, checksum) = writer.finish().unwrap();
        let key =
            install_pack(&storage, &bytes, &entries, &checksum, HashAlgorithm::Sha1).unwrap();

        // Drop the index and reopen: it must be rebuilt from the pack body.
        let idx_key = key.replace(".pack", ".idx");
        storage.delete(&idx_key).unwrap();
        let pack = PackFile::open(&storage, &key, HashAlgorithm::Sha1).unwrap();
        assert!(storage.has(&idx_key));
        for oid in &oids {
            assert!(pack.contains(oid));
        }
    }

    #[test]
    fn corrupted_trailer_detected() {
        let storage = MemStore::new();
        let mut writer = PackWriter::new(HashAlgorithm::Sha1, 1);
        writer.write_object(ObjectType::Blob, b"payload").unwrap();
        let (mut bytes, entries, checksum) = writer.finish().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let key = "objects/pack/pack-bad.pack";
        storage.write(key, &bytes).unwrap();
        let idx =
            PackIndex::build(&entries, &checksum, HashAlgorithm::Sha1).unwrap();
        storage.write("objects/pack/pack-bad.idx", &idx).unwrap();

        assert!(matches!(
            PackFile::open(&storage, key, HashAlgorithm::Sha1),
            Err(OdbError::Corrupt { .. })
        ));
    }

    #[test]
    fn size_only_read_avoids_reconstruction() {
        let storage = MemStore::new();
        let base: Vec<u8> = vec![9u8; 5000];
        let mut revised = base.clone();
        revised.truncate(4000);
        revised.extend_from_slice(&[7u8; 2000]);

        let mut writer = PackWriter::new(HashAlgorithm::Sha1, 2);
        writer.write_object(ObjectType::Blob, &base).unwrap();
        let target_oid = writer.write_object(ObjectType::Blob, &revised).unwrap();
        let (bytes, entries, checksum) = writer.finish().unwrap();
        let key =
            install_pack(&storage, &bytes, &entries, &checksum, HashAlgorithm::Sha1).unwrap();

        let pack = PackFile::open(&storage, &key, HashAlgorithm::Sha1).unwrap();
        let offset = pack.index().lookup(&target_oid).unwrap();
        let (t, size) = pack.info_at(offset).unwrap();
        assert_eq!(t, ObjectType::Blob);
        assert_eq!(size, revised.len());
    }
}
