//! Multi-pack-index: one sorted OID table spanning every pack.
//!
//! Chunked format:
//!
//! ```text
//! Header: MIDX | version (1) | oid version | chunk count | pack count
//! Chunk table: (id, file offset) pairs + terminating null row
//! PNAM: null-terminated pack file names, sorted
//! OIDF: 256 × u32 fanout
//! OIDL: sorted OIDs
//! OOFF: per OID, u32 pack id + u32 pack offset
//! Trailer: checksum hash
//! ```
//!
//! When present it supersedes per-pack `.idx` lookups on the read path.

use ugit_hash::hasher::Hasher;
use ugit_hash::{HashAlgorithm, ObjectId};
use ugit_store::Payload;

use crate::OdbError;

pub const MIDX_SIGNATURE: &[u8; 4] = b"MIDX";
pub const MIDX_VERSION: u8 = 1;
/// Storage key relative to the git-dir.
pub const MIDX_KEY: &str = "objects/pack/multi-pack-index";

const CHUNK_PNAM: u32 = u32::from_be_bytes(*b"PNAM");
const CHUNK_OIDF: u32 = u32::from_be_bytes(*b"OIDF");
const CHUNK_OIDL: u32 = u32::from_be_bytes(*b"OIDL");
const CHUNK_OOFF: u32 = u32::from_be_bytes(*b"OOFF");

/// One row handed to the writer.
#[derive(Debug, Clone)]
pub struct MidxEntry {
    pub oid: ObjectId,
    /// Index into the sorted pack-name list.
    pub pack_id: u32,
    pub offset: u64,
}

pub struct MultiPackIndex {
    data: Payload,
    pack_names: Vec<String>,
    num_objects: u32,
    fanout_start: usize,
    oid_start: usize,
    ooff_start: usize,
    algo: HashAlgorithm,
}

impl MultiPackIndex {
    pub fn parse(data: Payload, algo: HashAlgorithm) -> Result<Self, OdbError> {
        let invalid = |cause: &str| OdbError::CorruptIndex {
            cause: format!("multi-pack-index: {cause}"),
        };
        if data.len() < 12 || &data[0..4] != MIDX_SIGNATURE {
            return Err(invalid("bad signature"));
        }
        if data[4] != MIDX_VERSION {
            return Err(invalid("unsupported version"));
        }
        let chunk_count = data[6] as usize;
        let pack_count = read_u32(&data, 8) as usize;

        // Chunk table rows: u32 id + u64 offset, null-terminated.
        let mut chunks = Vec::with_capacity(chunk_count);
        let table_start = 12;
        for i in 0..chunk_count + 1 {
            let pos = table_start + i * 12;
            if pos + 12 > data.len() {
                return Err(invalid("truncated chunk table"));
            }
            let id = read_u32(&data, pos);
            let offset = u64::from_be_bytes(data[pos + 4..pos + 12].try_into().expect("8"));
            chunks.push((id, offset as usize));
        }

        let chunk_range = |id: u32| -> Result<(usize, usize), OdbError> {
            let i = chunks
                .iter()
                .position(|&(cid, _)| cid == id)
                .ok_or_else(|| invalid("missing chunk"))?;
            Ok((chunks[i].1, chunks[i + 1].1))
        };

        let (pnam_start, pnam_end) = chunk_range(CHUNK_PNAM)?;
        let mut pack_names = Vec::with_capacity(pack_count);
        for name in data[pnam_start..pnam_end].split(|&b| b == 0) {
            if !name.is_empty() {
                pack_names.push(
                    std::str::from_utf8(name)
                        .map_err(|_| invalid("non-UTF8 pack name"))?
                        .to_string(),
                );
            }
        }
        if pack_names.len() != pack_count {
            return Err(invalid("pack name count mismatch"));
        }

        let (fanout_start, _) = chunk_range(CHUNK_OIDF)?;
        let num_objects = read_u32(&data, fanout_start + 255 * 4);
        let (oid_start, _) = chunk_range(CHUNK_OIDL)?;
        let (ooff_start, _) = chunk_range(CHUNK_OOFF)?;

        Ok(Self {
            data,
            pack_names,
            num_objects,
            fanout_start,
            oid_start,
            ooff_start,
            algo,
        })
    }

    /// Serialize a multi-pack-index over `pack_names` (sorted) and entries.
    pub fn build(
        pack_names: &[String],
        entries: &[MidxEntry],
        algo: HashAlgorithm,
    ) -> Result<Vec<u8>, OdbError> {
        let mut sorted: Vec<MidxEntry> = entries.to_vec();
        sorted.sort_by(|a, b| a.oid.cmp(&b.oid));

        let mut pnam = Vec::new();
        for name in pack_names {
            pnam.extend_from_slice(name.as_bytes());
            pnam.push(0);
        }

        let mut fanout_bytes = Vec::with_capacity(1024);
        let mut fanout = [0u32; 256];
        for e in &sorted {
            fanout[e.oid.first_byte() as usize] += 1;
        }
        for i in 1..256 {
            fanout[i] += fanout[i - 1];
        }
        for count in fanout {
            fanout_bytes.extend_from_slice(&count.to_be_bytes());
        }

        let mut oidl = Vec::new();
        let mut ooff = Vec::new();
        for e in &sorted {
            oidl.extend_from_slice(e.oid.as_bytes());
            ooff.extend_from_slice(&e.pack_id.to_be_bytes());
            let offset: u32 = e
                .offset
                .try_into()
                .map_err(|_| OdbError::CorruptIndex {
                    cause: "multi-pack-index: offset exceeds 4 GiB".into(),
                })?;
            ooff.extend_from_slice(&offset.to_be_bytes());
        }

        let chunks: [(u32, &[u8]); 4] = [
            (CHUNK_PNAM, &pnam),
            (CHUNK_OIDF, &fanout_bytes),
            (CHUNK_OIDL, &oidl),
            (CHUNK_OOFF, &ooff),
        ];

        let mut buf = Vec::new();
        buf.extend_from_slice(MIDX_SIGNATURE);
        buf.push(MIDX_VERSION);
        buf.push(1); // oid version (1 = sha1-style inline digests)
        buf.push(chunks.len() as u8);
        buf.push(0);
        buf.extend_from_slice(&(pack_names.len() as u32).to_be_bytes());

        let header_len = 12 + (chunks.len() + 1) * 12;
        let mut offset = header_len as u64;
        for (id, payload) in &chunks {
            buf.extend_from_slice(&id.to_be_bytes());
            buf.extend_from_slice(&offset.to_be_bytes());
            offset += payload.len() as u64;
        }
        // terminating row
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&offset.to_be_bytes());

        for (_, payload) in &chunks {
            buf.extend_from_slice(payload);
        }

        let mut hasher = Hasher::new(algo);
        hasher.update(&buf);
        buf.extend_from_slice(hasher.finalize()?.as_bytes());
        Ok(buf)
    }

    /// Locate an OID: `(pack name, offset)`.
    pub fn lookup(&self, oid: &ObjectId) -> Option<(&str, u64)> {
        let (mut low, mut high) = self.fanout_range(oid.first_byte());
        let target = oid.as_bytes();
        while low < high {
            let mid = low + (high - low) / 2;
            match self.oid_bytes_at(mid).cmp(target) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => {
                    let pos = self.ooff_start + mid * 8;
                    let pack_id = read_u32(&self.data, pos) as usize;
                    let offset = u64::from(read_u32(&self.data, pos + 4));
                    return Some((self.pack_names.get(pack_id)?.as_str(), offset));
                }
            }
        }
        None
    }

    pub fn pack_names(&self) -> &[String] {
        &self.pack_names
    }

    pub fn num_objects(&self) -> u32 {
        self.num_objects
    }

    fn fanout_range(&self, first_byte: u8) -> (usize, usize) {
        let entry = |i: usize| read_u32(&self.data, self.fanout_start + i * 4) as usize;
        let end = entry(first_byte as usize);
        let start = if first_byte == 0 {
            0
        } else {
            entry(first_byte as usize - 1)
        };
        (start, end)
    }

    fn oid_bytes_at(&self, index: usize) -> &[u8] {
        let len = self.algo.digest_len();
        let start = self.oid_start + index * len;
        &self.data[start..start + len]
    }
}

fn read_u32(data: &[u8], pos: usize) -> u32 {
    u32::from_be_bytes(data[pos..pos + 4].try_into().expect("4 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(first: u8, last: u8) -> ObjectId {
        let mut bytes = [0u8; 20];
        bytes[0] = first;
        bytes[19] = last;
        ObjectId::from_bytes(&bytes, HashAlgorithm::Sha1).unwrap()
    }

    #[test]
    fn build_parse_lookup() {
        let packs = vec![
            "pack-aaaa.pack".to_string(),
            "pack-bbbb.pack".to_string(),
        ];
        let entries = vec![
            MidxEntry { oid: oid(0x01, 1), pack_id: 0, offset: 12 },
            MidxEntry { oid: oid(0x80, 2), pack_id: 1, offset: 99 },
            MidxEntry { oid: oid(0xff, 3), pack_id: 0, offset: 700 },
        ];
        let bytes = MultiPackIndex::build(&packs, &entries, HashAlgorithm::Sha1).unwrap();
        let midx = MultiPackIndex::parse(Payload::Owned(bytes), HashAlgorithm::Sha1).unwrap();

        assert_eq!(midx.num_objects(), 3);
        assert_eq!(midx.pack_names(), &packs[..]);
        assert_eq!(midx.lookup(&oid(0x80, 2)), Some(("pack-bbbb.pack", 99)));
        assert_eq!(midx.lookup(&oid(0xff, 3)), Some(("pack-aaaa.pack", 700)));
        assert_eq!(midx.lookup(&oid(0x80, 9)), None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(MultiPackIndex::parse(
            Payload::Owned(b"not a midx".to_vec()),
            HashAlgorithm::Sha1
        )
        .is_err());
    }
}
