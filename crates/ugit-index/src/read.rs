//! DIRC parsing (format v2 and v3).

use bstr::BString;
use ugit_hash::hasher::Hasher;
use ugit_hash::{HashAlgorithm, ObjectId};
use ugit_object::FileMode;

use crate::entry::{EntryFlags, IndexEntry, Stage, StatData};
use crate::tree_cache::CacheTree;
use crate::{Index, IndexError, RawExtension, INDEX_SIGNATURE};

/// Fixed stat prefix of an on-disk entry:
/// ctime(8) + mtime(8) + dev(4) + ino(4) + mode(4) + uid(4) + gid(4) + size(4).
const STAT_PREFIX: usize = 40;

/// On-disk entry size, padded with NULs to a multiple of eight.
pub(crate) fn ondisk_entry_size(name_len: usize, hash_len: usize, extended: bool) -> usize {
    let flags = if extended { 4 } else { 2 };
    (STAT_PREFIX + hash_len + flags + name_len + 8) & !7
}

/// Parse an index file.
pub fn parse_index(data: &[u8], algo: HashAlgorithm) -> Result<Index, IndexError> {
    let hash_len = algo.digest_len();
    if data.len() < 12 + hash_len {
        return Err(IndexError::Corrupt {
            reason: "index file too short".into(),
        });
    }

    // Trailing content hash first; a mismatch poisons everything else.
    let content = &data[..data.len() - hash_len];
    let stored = &data[data.len() - hash_len..];
    let computed = Hasher::digest(algo, content)?;
    if computed.as_bytes() != stored {
        return Err(IndexError::Corrupt {
            reason: "index checksum mismatch".into(),
        });
    }

    if &data[0..4] != INDEX_SIGNATURE {
        return Err(IndexError::Corrupt {
            reason: "bad DIRC signature".into(),
        });
    }
    let version = read_u32(data, 4);
    if !(2..=3).contains(&version) {
        return Err(IndexError::UnsupportedVersion(version));
    }
    let entry_count = read_u32(data, 8) as usize;

    let content_end = data.len() - hash_len;
    let mut cursor = 12;
    let mut entries = Vec::with_capacity(entry_count);
    for _ in 0..entry_count {
        let (entry, next) = parse_entry(data, cursor, version, algo, content_end)?;
        entries.push(entry);
        cursor = next;
    }

    let mut cache_tree = None;
    let mut unknown_extensions = Vec::new();
    while cursor + 8 <= content_end {
        let sig: [u8; 4] = data[cursor..cursor + 4].try_into().expect("4 bytes");
        let ext_size = read_u32(data, cursor + 4) as usize;
        cursor += 8;
        if cursor + ext_size > content_end {
            return Err(IndexError::InvalidExtension {
                signature: String::from_utf8_lossy(&sig).into_owned(),
                reason: "extension exceeds index bounds".into(),
            });
        }
        let ext_data = &data[cursor..cursor + ext_size];
        if &sig == CacheTree::SIGNATURE {
            cache_tree = Some(CacheTree::parse(ext_data, algo)?);
        } else {
            // Unknown extensions are preserved byte-for-byte for round-trip.
            unknown_extensions.push(RawExtension {
                signature: sig,
                data: ext_data.to_vec(),
            });
        }
        cursor += ext_size;
    }

    Ok(Index {
        version,
        entries,
        cache_tree,
        unknown_extensions,
        algo,
    })
}

fn parse_entry(
    data: &[u8],
    start: usize,
    version: u32,
    algo: HashAlgorithm,
    content_end: usize,
) -> Result<(IndexEntry, usize), IndexError> {
    let hash_len = algo.digest_len();
    let bad = |reason: &str| IndexError::InvalidEntry {
        offset: start,
        reason: reason.to_string(),
    };

    if start + STAT_PREFIX + hash_len + 2 > content_end {
        return Err(bad("entry truncated"));
    }

    let stat = StatData {
        ctime_secs: read_u32(data, start),
        ctime_nsecs: read_u32(data, start + 4),
        mtime_secs: read_u32(data, start + 8),
        mtime_nsecs: read_u32(data, start + 12),
        dev: read_u32(data, start + 16),
        ino: read_u32(data, start + 20),
        uid: read_u32(data, start + 28),
        gid: read_u32(data, start + 32),
        size: read_u32(data, start + 36),
    };
    let mode_raw = read_u32(data, start + 24);
    let mode = FileMode::from_raw(mode_raw)
        .ok_or_else(|| bad(&format!("invalid mode {mode_raw:o}")))?;

    let mut cursor = start + STAT_PREFIX;
    let oid = ObjectId::from_bytes(&data[cursor..cursor + hash_len], algo)
        .map_err(|_| bad("invalid OID"))?;
    cursor += hash_len;

    let flags_raw = read_u16(data, cursor);
    cursor += 2;
    let assume_valid = flags_raw & 0x8000 != 0;
    let extended = flags_raw & 0x4000 != 0;
    let stage = Stage::from_u8(((flags_raw >> 12) & 0x03) as u8)?;

    let mut intent_to_add = false;
    let mut skip_worktree = false;
    if extended {
        if version < 3 {
            return Err(bad("extended flags in a v2 index"));
        }
        if cursor + 2 > content_end {
            return Err(bad("truncated extended flags"));
        }
        let ext = read_u16(data, cursor);
        cursor += 2;
        skip_worktree = ext & 0x4000 != 0;
        intent_to_add = ext & 0x2000 != 0;
    }

    let name_len = data[cursor..content_end]
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| bad("unterminated path"))?;
    let path = BString::from(&data[cursor..cursor + name_len]);

    let next = start + ondisk_entry_size(name_len, hash_len, extended);
    if next > content_end {
        return Err(bad("entry padding exceeds index"));
    }

    Ok((
        IndexEntry {
            path,
            oid,
            mode,
            stage,
            stat,
            flags: EntryFlags {
                assume_valid,
                intent_to_add,
                skip_worktree,
            },
        },
        next,
    ))
}

fn read_u32(data: &[u8], pos: usize) -> u32 {
    u32::from_be_bytes(data[pos..pos + 4].try_into().expect("4 bytes"))
}

fn read_u16(data: &[u8], pos: usize) -> u16 {
    u16::from_be_bytes(data[pos..pos + 2].try_into().expect("2 bytes"))
}
