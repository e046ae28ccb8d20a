//! Abbreviated OID expansion.

use ugit_hash::hex::is_hex_digits;
use ugit_hash::ObjectId;

use crate::{ObjectDatabase, OdbError};

/// Minimum abbreviation git accepts.
const MIN_PREFIX_LEN: usize = 4;

/// Expand `hex_prefix` to the unique matching OID across loose objects,
/// packs, and alternates.
pub fn expand(odb: &ObjectDatabase, hex_prefix: &str) -> Result<ObjectId, OdbError> {
    let prefix = hex_prefix.to_ascii_lowercase();
    if prefix.len() < MIN_PREFIX_LEN
        || prefix.len() > odb.algorithm().hex_len()
        || !is_hex_digits(&prefix)
    {
        return Err(OdbError::PrefixNotFound {
            prefix: hex_prefix.to_string(),
        });
    }

    // Full-length input short-circuits to an existence check.
    if prefix.len() == odb.algorithm().hex_len() {
        let oid = ObjectId::from_hex(&prefix)?;
        return if odb.has_object(&oid) {
            Ok(oid)
        } else {
            Err(OdbError::PrefixNotFound {
                prefix: hex_prefix.to_string(),
            })
        };
    }

    let mut candidates = Vec::new();
    collect(odb, &prefix, &mut candidates)?;
    candidates.sort();
    candidates.dedup();

    match candidates.len() {
        0 => Err(OdbError::PrefixNotFound {
            prefix: hex_prefix.to_string(),
        }),
        1 => Ok(candidates[0]),
        _ => Err(OdbError::AmbiguousOid {
            prefix: hex_prefix.to_string(),
            candidates,
        }),
    }
}

fn collect(
    odb: &ObjectDatabase,
    prefix: &str,
    out: &mut Vec<ObjectId>,
) -> Result<(), OdbError> {
    for oid in odb.list_loose()? {
        if oid.starts_with_hex(prefix) {
            out.push(oid);
        }
    }

    // Packs narrow by the whole bytes of the prefix (at least two, since
    // the minimum abbreviation is four hex chars), then refine on hex for
    // odd-length prefixes.
    let whole_bytes = prefix.len() / 2;
    let mut byte_prefix = vec![0u8; whole_bytes];
    ugit_hash::hex::hex_decode(&prefix[..whole_bytes * 2], &mut byte_prefix)?;

    for pack in odb.packs() {
        for oid in pack.index().lookup_prefix(&byte_prefix) {
            if oid.starts_with_hex(prefix) {
                out.push(oid);
            }
        }
    }

    for alt in odb.alternates() {
        collect(alt, prefix, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use ugit_hash::HashAlgorithm;
    use ugit_object::ObjectType;
    use ugit_store::MemStore;

    fn odb() -> ObjectDatabase {
        ObjectDatabase::open(Arc::new(MemStore::new()), HashAlgorithm::Sha1).unwrap()
    }

    #[test]
    fn unique_prefix_expands() {
        let db = odb();
        let oid = db.write(ObjectType::Blob, b"hello\n").unwrap();
        let prefix = &oid.to_hex()[..8];
        assert_eq!(db.expand_oid(prefix).unwrap(), oid);
    }

    #[test]
    fn shared_prefix_is_ambiguous_until_disambiguated() {
        let db = odb();
        // Find two blobs whose OIDs share the first hex char, then use the
        // shortest shared prefix (≥4) that still matches both.
        let mut oids = Vec::new();
        for i in 0..2000u32 {
            let oid = db
                .write(ObjectType::Blob, format!("filler-{i}").as_bytes())
                .unwrap();
            oids.push(oid);
        }
        oids.sort();
        let (a, b) = oids
            .windows(2)
            .map(|w| (w[0], w[1]))
            .find(|(a, b)| a.to_hex()[..4] == b.to_hex()[..4])
            .expect("2000 objects over 65536 buckets collide");

        let shared = &a.to_hex()[..4];
        match db.expand_oid(shared) {
            Err(OdbError::AmbiguousOid { candidates, .. }) => {
                assert!(candidates.contains(&a));
                assert!(candidates.contains(&b));
            }
            other => panic!("expected AmbiguousOid, got {other:?}"),
        }

        // Lengthen the prefix until it is unique again.
        let a_hex = a.to_hex();
        let b_hex = b.to_hex();
        let split = a_hex
            .bytes()
            .zip(b_hex.bytes())
            .position(|(x, y)| x != y)
            .unwrap();
        let unique = &a_hex[..split + 1];
        if unique.len() >= 4 {
            assert_eq!(db.expand_oid(unique).unwrap(), a);
        }
    }

    #[test]
    fn too_short_or_garbage_rejected() {
        let db = odb();
        assert!(db.expand_oid("abc").is_err());
        assert!(db.expand_oid("zzzz").is_err());
    }

    #[test]
    fn unknown_prefix_not_found() {
        let db = odb();
        db.write(ObjectType::Blob, b"x").unwrap();
        assert!(matches!(
            db.expand_oid("0123abcd"),
            Err(OdbError::PrefixNotFound { .. })
        ));
    }

    #[test]
    fn packed_objects_participate() {
        let db = odb();
        let mut writer = crate::PackWriter::new(HashAlgorithm::Sha1, 1);
        let oid = writer
            .write_object(ObjectType::Blob, b"packed only")
            .unwrap();
        let (bytes, entries, checksum) = writer.finish().unwrap();
        db.install_pack(&bytes, &entries, &checksum).unwrap();

        assert_eq!(db.expand_oid(&oid.to_hex()[..10]).unwrap(), oid);
    }
}
