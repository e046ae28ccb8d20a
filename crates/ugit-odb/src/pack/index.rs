//! Pack index (v2): OID → offset lookup via fanout plus binary search.
//!
//! Layout:
//!
//! ```text
//! Header:  \xff tOc | version (=2)
//! Fanout:  256 × u32 cumulative counts keyed by first OID byte
//! OIDs:    N × digest-length sorted OIDs
//! CRC32:   N × u32 over the raw packed record bytes
//! Offsets: N × u32 (high bit set → index into the 64-bit table)
//! 64-bit:  M × u64 offsets for packs over 2 GiB
//! Trailer: pack checksum | index checksum
//! ```

use ugit_hash::hasher::Hasher;
use ugit_hash::{HashAlgorithm, ObjectId};
use ugit_store::Payload;

use crate::OdbError;
use super::{IDX_SIGNATURE, IDX_VERSION};

/// One row of an index under construction.
#[derive(Debug, Clone, Copy)]
pub struct IndexEntry {
    pub oid: ObjectId,
    pub offset: u64,
    pub crc32: u32,
}

pub struct PackIndex {
    data: Payload,
    num_objects: u32,
    oid_start: usize,
    crc_start: usize,
    offset32_start: usize,
    offset64_start: usize,
    algo: HashAlgorithm,
}

impl PackIndex {
    /// Parse an index payload.
    pub fn parse(data: Payload, algo: HashAlgorithm) -> Result<Self, OdbError> {
        let invalid = |cause: &str| OdbError::CorruptIndex {
            cause: cause.to_string(),
        };
        let hash_len = algo.digest_len();

        if data.len() < 8 + 1024 + 2 * hash_len {
            return Err(invalid("index too small"));
        }
        if data[0..4] != IDX_SIGNATURE {
            return Err(invalid("bad index signature"));
        }
        let version = read_u32(&data, 4);
        if version != IDX_VERSION {
            return Err(invalid(&format!("unsupported index version {version}")));
        }

        let num_objects = read_u32(&data, 8 + 255 * 4);
        let n = num_objects as usize;
        let oid_start = 8 + 1024;
        let crc_start = oid_start + n * hash_len;
        let offset32_start = crc_start + n * 4;
        let offset64_start = offset32_start + n * 4;
        if data.len() < offset64_start + 2 * hash_len {
            return Err(invalid("index truncated"));
        }

        // Trailing hash covers everything before it.
        let mut hasher = Hasher::new(algo);
        hasher.update(&data[..data.len() - hash_len]);
        let computed = hasher
            .finalize()
            .map_err(|e| invalid(&format!("hash failure: {e}")))?;
        if computed.as_bytes() != &data[data.len() - hash_len..] {
            return Err(invalid("index checksum mismatch"));
        }

        Ok(Self {
            data,
            num_objects,
            oid_start,
            crc_start,
            offset32_start,
            offset64_start,
            algo,
        })
    }

    /// Serialize an index for `entries` (any order) and the pack trailer hash.
    pub fn build(
        entries: &[IndexEntry],
        pack_checksum: &ObjectId,
        algo: HashAlgorithm,
    ) -> Result<Vec<u8>, OdbError> {
        let mut sorted: Vec<IndexEntry> = entries.to_vec();
        sorted.sort_by(|a, b| a.oid.cmp(&b.oid));

        let mut buf = Vec::new();
        buf.extend_from_slice(&IDX_SIGNATURE);
        buf.extend_from_slice(&IDX_VERSION.to_be_bytes());

        let mut fanout = [0u32; 256];
        for e in &sorted {
            fanout[e.oid.first_byte() as usize] += 1;
        }
        for i in 1..256 {
            fanout[i] += fanout[i - 1];
        }
        for count in fanout {
            buf.extend_from_slice(&count.to_be_bytes());
        }

        for e in &sorted {
            buf.extend_from_slice(e.oid.as_bytes());
        }
        for e in &sorted {
            buf.extend_from_slice(&e.crc32.to_be_bytes());
        }

        let mut large: Vec<u64> = Vec::new();
        for e in &sorted {
            if e.offset <= 0x7fff_ffff {
                buf.extend_from_slice(&(e.offset as u32).to_be_bytes());
            } else {
                let slot = 0x8000_0000u32 | large.len() as u32;
                buf.extend_from_slice(&slot.to_be_bytes());
                large.push(e.offset);
            }
        }
        for offset in large {
            buf.extend_from_slice(&offset.to_be_bytes());
        }

        buf.extend_from_slice(pack_checksum.as_bytes());
        let mut hasher = Hasher::new(algo);
        hasher.update(&buf);
        let checksum = hasher.finalize()?;
        buf.extend_from_slice(checksum.as_bytes());
        Ok(buf)
    }

    /// Offset of `oid` in the pack, if present.
    pub fn lookup(&self, oid: &ObjectId) -> Option<u64> {
        let (mut low, mut high) = self.fanout_range(oid.first_byte());
        let target = oid.as_bytes();
        while low < high {
            let mid = low + (high - low) / 2;
            match self.oid_bytes_at(mid).cmp(target) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => return Some(self.offset_at(mid as u32)),
            }
        }
        None
    }

    /// All OIDs whose binary form starts with `prefix` bytes (the final
    /// half-byte of odd-length hex prefixes is filtered by the caller).
    pub fn lookup_prefix(&self, prefix: &[u8]) -> Vec<ObjectId> {
        if prefix.is_empty() {
            return Vec::new();
        }
        let (lo, hi) = self.fanout_range(prefix[0]);
        (lo..hi)
            .filter_map(|i| {
                let bytes = self.oid_bytes_at(i);
                bytes
                    .starts_with(prefix)
                    .then(|| ObjectId::from_bytes(bytes, self.algo).expect("index OID"))
            })
            .collect()
    }

    pub fn num_objects(&self) -> u32 {
        self.num_objects
    }

    pub fn oid_at(&self, index: u32) -> ObjectId {
        ObjectId::from_bytes(self.oid_bytes_at(index as usize), self.algo).expect("index OID")
    }

    pub fn offset_at(&self, index: u32) -> u64 {
        let val = read_u32(&self.data, self.offset32_start + index as usize * 4);
        if val & 0x8000_0000 != 0 {
            let pos = self.offset64_start + ((val & 0x7fff_ffff) as usize) * 8;
            u64::from_be_bytes(self.data[pos..pos + 8].try_into().expect("8 bytes"))
        } else {
            u64::from(val)
        }
    }

    pub fn crc32_at(&self, index: u32) -> u32 {
        read_u32(&self.data, self.crc_start + index as usize * 4)
    }

    /// Pack trailer hash recorded in this index.
    pub fn pack_checksum(&self) -> ObjectId {
        let hash_len = self.algo.digest_len();
        let start = self.data.len() - 2 * hash_len;
        ObjectId::from_bytes(&self.data[start..start + hash_len], self.algo)
            .expect("index trailer")
    }

    /// Iterate `(oid, offset)` in sorted OID order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, u64)> + '_ {
        (0..self.num_objects).map(|i| (self.oid_at(i), self.offset_at(i)))
    }

    fn fanout_range(&self, first_byte: u8) -> (usize, usize) {
        let entry = |i: usize| read_u32(&self.data, 8 + i * 4) as usize;
        let end = entry(first_byte as usize);
        let start = if first_byte == 0 {
            0
        } else {
            entry(first_byte as usize - 1)
        };
        (start, end)
    }

    fn oid_bytes_at(&self, index: usize) -> &[u8] {
        let hash_len = self.algo.digest_len();
        let start = self.oid_start + index * hash_len;
        &self.data[start..start + hash_len]
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

    fn parse(entries: &[IndexEntry]) -> PackIndex {
        let bytes =
            PackIndex::build(entries, &ObjectId::NULL_SHA1, HashAlgorithm::Sha1).unwrap();
        PackIndex::parse(Payload::Owned(bytes), HashAlgorithm::Sha1).unwrap()
    }

    #[test]
    fn build_then_lookup() {
        let entries = vec![
            IndexEntry { oid: oid(0x00, 1), offset: 100, crc32: 0x111 },
            IndexEntry { oid: oid(0x0a, 1), offset: 200, crc32: 0x222 },
            IndexEntry { oid: oid(0xab, 1), offset: 300, crc32: 0x333 },
            IndexEntry { oid: oid(0xff, 1), offset: 400, crc32: 0x444 },
        ];
        let idx = parse(&entries);
        assert_eq!(idx.num_objects(), 4);
        for e in &entries {
            assert_eq!(idx.lookup(&e.oid), Some(e.offset));
        }
        assert_eq!(idx.lookup(&oid(0xab, 2)), None);
    }

    #[test]
    fn sorted_regardless_of_input_order() {
        let entries = vec![
            IndexEntry { oid: oid(0xff, 1), offset: 1, crc32: 0 },
            IndexEntry { oid: oid(0x00, 1), offset: 2, crc32: 0 },
            IndexEntry { oid: oid(0x55, 1), offset: 3, crc32: 0 },
        ];
        let idx = parse(&entries);
        assert_eq!(idx.oid_at(0), oid(0x00, 1));
        assert_eq!(idx.oid_at(1), oid(0x55, 1));
        assert_eq!(idx.oid_at(2), oid(0xff, 1));
    }

    #[test]
    fn crc_preserved() {
        let entries = vec![
            IndexEntry { oid: oid(0x10, 1), offset: 1, crc32: 0xAAAA_BBBB },
            IndexEntry { oid: oid(0x20, 1), offset: 2, crc32: 0xCCCC_DDDD },
        ];
        let idx = parse(&entries);
        assert_eq!(idx.crc32_at(0), 0xAAAA_BBBB);
        assert_eq!(idx.crc32_at(1), 0xCCCC_DDDD);
    }

    #[test]
    fn large_offsets_use_64bit_table() {
        let big = 5 * 1024 * 1024 * 1024u64;
        let entries = vec![
            IndexEntry { oid: oid(0x42, 1), offset: big, crc32: 0 },
            IndexEntry { oid: oid(0x43, 1), offset: 12, crc32: 0 },
        ];
        let idx = parse(&entries);
        assert_eq!(idx.lookup(&oid(0x42, 1)), Some(big));
        assert_eq!(idx.lookup(&oid(0x43, 1)), Some(12));
    }

    #[test]
    fn prefix_scan() {
        let entries = vec![
            IndexEntry { oid: oid(0xab, 1), offset: 1, crc32: 0 },
            IndexEntry { oid: oid(0xab, 2), offset: 2, crc32: 0 },
            IndexEntry { oid: oid(0xac, 1), offset: 3, crc32: 0 },
        ];
        let idx = parse(&entries);
        assert_eq!(idx.lookup_prefix(&[0xab]).len(), 2);
        assert_eq!(idx.lookup_prefix(&[0xac]).len(), 1);
        assert!(idx.lookup_prefix(&[0xad]).is_empty());
    }

    #[test]
    fn corrupted_checksum_rejected() {
        let entries =
            vec![IndexEntry { oid: oid(0x01, 1), offset: 1, crc32: 0 }];
        let mut bytes =
            PackIndex::build(&entries, &ObjectId::NULL_SHA1, HashAlgorithm::Sha1).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(
            PackIndex::parse(Payload::Owned(bytes), HashAlgorithm::Sha1),
            Err(OdbError::CorruptIndex { .. })
        ));
    }

    #[test]
    fn empty_index() {
        let idx = parse(&[]);
        assert_eq!(idx.num_objects(), 0);
        assert_eq!(idx.iter().count(), 0);
    }
}
