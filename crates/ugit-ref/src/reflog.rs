//! Reflogs: append-only history of ref values.
//!
//! One line per update, in insertion order:
//! `<old-hex> <new-hex> <identity>\t<message>\n`

use bstr::{BStr, BString, ByteSlice, ByteVec};
use ugit_hash::ObjectId;
use ugit_store::Storage;
use ugit_utils::date::Signature;

use crate::error::RefError;

/// A single reflog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflogEntry {
    pub old_oid: ObjectId,
    pub new_oid: ObjectId,
    pub identity: Signature,
    pub message: BString,
}

impl ReflogEntry {
    /// Parse one reflog line (without trailing newline).
    pub fn parse(line: &BStr) -> Result<Self, RefError> {
        let line = line.as_bytes();

        let mut fields = line.splitn(3, |&b| b == b' ');
        let old_hex = fields
            .next()
            .and_then(|f| std::str::from_utf8(f).ok())
            .ok_or_else(|| RefError::Parse("reflog: missing old OID".into()))?;
        let new_hex = fields
            .next()
            .and_then(|f| std::str::from_utf8(f).ok())
            .ok_or_else(|| RefError::Parse("reflog: missing new OID".into()))?;
        let rest = fields
            .next()
            .ok_or_else(|| RefError::Parse("reflog: missing identity".into()))?;

        let old_oid = ObjectId::from_hex(old_hex)?;
        let new_oid = ObjectId::from_hex(new_hex)?;

        let (identity_part, message) = match rest.find_byte(b'\t') {
            Some(tab) => (&rest[..tab], &rest[tab + 1..]),
            None => (rest, &b""[..]),
        };
        let identity = Signature::parse(identity_part.as_bstr())
            .map_err(|e| RefError::Parse(format!("reflog identity: {e}")))?;

        Ok(Self {
            old_oid,
            new_oid,
            identity,
            message: BString::from(message.strip_suffix(b"\n").unwrap_or(message)),
        })
    }

    /// Serialize to one line (no trailing newline).
    pub fn to_bytes(&self) -> BString {
        let mut out = BString::new(Vec::with_capacity(128));
        out.push_str(self.old_oid.to_hex().as_bytes());
        out.push(b' ');
        out.push_str(self.new_oid.to_hex().as_bytes());
        out.push(b' ');
        out.push_str(self.identity.to_bytes());
        out.push(b'\t');
        out.push_str(&self.message);
        out
    }
}

/// Append an entry to the log at `log_key`.
///
/// Callers hold the corresponding ref lock; the append itself is a plain
/// read-extend-write against the storage backend.
pub fn append(
    storage: &dyn Storage,
    log_key: &str,
    entry: &ReflogEntry,
) -> Result<(), RefError> {
    let mut contents = match storage.read(log_key) {
        Ok(data) => data,
        Err(ugit_store::StoreError::NotFound { .. }) => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    contents.extend_from_slice(&entry.to_bytes());
    contents.push(b'\n');
    storage.write(log_key, &contents)?;
    Ok(())
}

/// Read every entry at `log_key`, oldest first. Missing log reads as empty.
pub fn read(storage: &dyn Storage, log_key: &str) -> Result<Vec<ReflogEntry>, RefError> {
    let contents = match storage.read(log_key) {
        Ok(data) => data,
        Err(ugit_store::StoreError::NotFound { .. }) => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    contents
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| ReflogEntry::parse(line.as_bstr()))
        .collect()
}

/// `ref@{n}`-style lookup: `n` counts back from the newest entry.
pub fn entry_at(
    storage: &dyn Storage,
    log_key: &str,
    n: usize,
) -> Result<Option<ReflogEntry>, RefError> {
    let mut entries = read(storage, log_key)?;
    if n >= entries.len() {
        return Ok(None);
    }
    let idx = entries.len() - 1 - n;
    Ok(Some(entries.swap_remove(idx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ugit_store::MemStore;
    use ugit_utils::date::GitDate;

    fn sig() -> Signature {
        Signature::new("Alice", "a@x", GitDate::new(1_700_000_000, 0))
    }

    fn entry(n: u8, message: &str) -> ReflogEntry {
        let mut old = [0u8; 20];
        let mut new = [0u8; 20];
        old[19] = n;
        new[19] = n + 1;
        ReflogEntry {
            old_oid: ObjectId::from_bytes(&old, ugit_hash::HashAlgorithm::Sha1).unwrap(),
            new_oid: ObjectId::from_bytes(&new, ugit_hash::HashAlgorithm::Sha1).unwrap(),
            identity: sig(),
            message: BString::from(message),
        }
    }

    #[test]
    fn line_roundtrip() {
        let e = entry(0, "commit: initial");
        let parsed = ReflogEntry::parse(e.to_bytes().as_bstr()).unwrap();
        assert_eq!(parsed, e);
    }

    #[test]
    fn parse_line_without_message() {
        let line = format!(
            "{} {} Alice <a@x> 1700000000 +0000",
            "0".repeat(40),
            "1".repeat(40)
        );
        let e = ReflogEntry::parse(BStr::new(line.as_bytes())).unwrap();
        assert!(e.message.is_empty());
        assert!(e.old_oid.is_null());
    }

    #[test]
    fn append_preserves_order() {
        let storage = MemStore::new();
        for i in 0..3 {
            append(&storage, "logs/HEAD", &entry(i, &format!("step {i}"))).unwrap();
        }
        let entries = read(&storage, "logs/HEAD").unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "step 0");
        assert_eq!(entries[2].message, "step 2");
    }

    #[test]
    fn entry_at_counts_from_newest() {
        let storage = MemStore::new();
        for i in 0..3 {
            append(&storage, "logs/refs/heads/main", &entry(i, &format!("step {i}"))).unwrap();
        }
        let newest = entry_at(&storage, "logs/refs/heads/main", 0).unwrap().unwrap();
        assert_eq!(newest.message, "step 2");
        let oldest = entry_at(&storage, "logs/refs/heads/main", 2).unwrap().unwrap();
        assert_eq!(oldest.message, "step 0");
        assert!(entry_at(&storage, "logs/refs/heads/main", 3).unwrap().is_none());
    }

    #[test]
    fn missing_log_reads_empty() {
        let storage = MemStore::new();
        assert!(read(&storage, "logs/refs/heads/none").unwrap().is_empty());
    }
}
