//! The TREE extension: cached subtree OIDs.
//!
//! Speeds up commit by remembering the tree OID of directories whose
//! entries have not changed. On-disk, depth-first:
//!
//! ```text
//! <component>\0<entry-count> <subtree-count>\n[oid bytes when valid]
//! ```
//!
//! An entry count of -1 marks an invalidated node (no OID follows).

use bstr::{BString, ByteSlice};
use ugit_hash::{HashAlgorithm, ObjectId};

use crate::IndexError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTree {
    /// Path component ("" for the root).
    pub name: BString,
    /// Number of index entries covered, or -1 when invalidated.
    pub entry_count: i32,
    pub children: Vec<CacheTree>,
    /// Subtree OID; present exactly when `entry_count >= 0`.
    pub oid: Option<ObjectId>,
}

impl CacheTree {
    pub const SIGNATURE: &'static [u8; 4] = b"TREE";

    pub fn new_root() -> Self {
        Self {
            name: BString::from(""),
            entry_count: -1,
            children: Vec::new(),
            oid: None,
        }
    }

    pub fn parse(data: &[u8], algo: HashAlgorithm) -> Result<Self, IndexError> {
        let mut pos = 0;
        let root = Self::parse_node(data, &mut pos, algo)?;
        Ok(root)
    }

    fn parse_node(
        data: &[u8],
        pos: &mut usize,
        algo: HashAlgorithm,
    ) -> Result<Self, IndexError> {
        let bad = |reason: &str| IndexError::InvalidExtension {
            signature: "TREE".into(),
            reason: reason.to_string(),
        };

        let null = data[*pos..]
            .find_byte(0)
            .ok_or_else(|| bad("missing path terminator"))?;
        let name = BString::from(&data[*pos..*pos + null]);
        *pos += null + 1;

        let line_end = data[*pos..]
            .find_byte(b'\n')
            .ok_or_else(|| bad("missing counts terminator"))?;
        let counts = &data[*pos..*pos + line_end];
        *pos += line_end + 1;

        let space = counts.find_byte(b' ').ok_or_else(|| bad("missing count separator"))?;
        let entry_count: i32 = std::str::from_utf8(&counts[..space])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| bad("bad entry count"))?;
        let subtree_count: usize = std::str::from_utf8(&counts[space + 1..])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| bad("bad subtree count"))?;

        let oid = if entry_count >= 0 {
            let len = algo.digest_len();
            if *pos + len > data.len() {
                return Err(bad("truncated subtree OID"));
            }
            let oid = ObjectId::from_bytes(&data[*pos..*pos + len], algo)
                .map_err(|_| bad("invalid subtree OID"))?;
            *pos += len;
            Some(oid)
        } else {
            None
        };

        let mut children = Vec::with_capacity(subtree_count);
        for _ in 0..subtree_count {
            children.push(Self::parse_node(data, pos, algo)?);
        }

        Ok(Self {
            name,
            entry_count,
            children,
            oid,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize_node(&mut out);
        out
    }

    fn serialize_node(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.name);
        out.push(0);
        out.extend_from_slice(
            format!("{} {}\n", self.entry_count, self.children.len()).as_bytes(),
        );
        if let Some(oid) = &self.oid {
            out.extend_from_slice(oid.as_bytes());
        }
        for child in &self.children {
            child.serialize_node(out);
        }
    }

    /// Invalidate every node covering `path` (root included).
    pub fn invalidate_path(&mut self, path: &[u8]) {
        self.entry_count = -1;
        self.oid = None;
        let Some((head, rest)) = split_component(path) else {
            return;
        };
        if let Some(child) = self.children.iter_mut().find(|c| c.name == head) {
            child.invalidate_path(rest);
        }
    }

    /// The cached OID for a directory path ("" for the root), if valid.
    pub fn lookup(&self, path: &[u8]) -> Option<ObjectId> {
        if path.is_empty() {
            return if self.entry_count >= 0 { self.oid } else { None };
        }
        let (head, rest) = split_component(path)?;
        self.children
            .iter()
            .find(|c| c.name == head)
            .and_then(|c| c.lookup(rest))
    }
}

fn split_component(path: &[u8]) -> Option<(&[u8], &[u8])> {
    if path.is_empty() {
        return None;
    }
    match path.find_byte(b'/') {
        Some(pos) => Some((&path[..pos], &path[pos + 1..])),
        None => Some((path, &[][..])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(n: u8) -> ObjectId {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        ObjectId::from_bytes(&bytes, HashAlgorithm::Sha1).unwrap()
    }

    fn sample() -> CacheTree {
        CacheTree {
            name: BString::from(""),
            entry_count: 3,
            oid: Some(oid(1)),
            children: vec![CacheTree {
                name: BString::from("src"),
                entry_count: 2,
                oid: Some(oid(2)),
                children: vec![],
            }],
        }
    }

    #[test]
    fn serialize_parse_roundtrip() {
        let tree = sample();
        let parsed = CacheTree::parse(&tree.serialize(), HashAlgorithm::Sha1).unwrap();
        assert_eq!(parsed, tree);
    }

    #[test]
    fn invalidated_nodes_carry_no_oid() {
        let mut tree = sample();
        tree.invalidate_path(b"src/main.rs");
        assert_eq!(tree.entry_count, -1);
        assert!(tree.oid.is_none());
        assert_eq!(tree.children[0].entry_count, -1);

        let parsed = CacheTree::parse(&tree.serialize(), HashAlgorithm::Sha1).unwrap();
        assert_eq!(parsed, tree);
    }

    #[test]
    fn invalidation_spares_siblings() {
        let mut tree = sample();
        tree.children.push(CacheTree {
            name: BString::from("docs"),
            entry_count: 1,
            oid: Some(oid(3)),
            children: vec![],
        });
        tree.invalidate_path(b"src/lib.rs");
        assert_eq!(tree.children[1].entry_count, 1);
        assert_eq!(tree.lookup(b"docs"), Some(oid(3)));
        assert_eq!(tree.lookup(b"src"), None);
        assert_eq!(tree.lookup(b""), None);
    }

    #[test]
    fn lookup_nested() {
        let tree = sample();
        assert_eq!(tree.lookup(b""), Some(oid(1)));
        assert_eq!(tree.lookup(b"src"), Some(oid(2)));
        assert_eq!(tree.lookup(b"missing"), None);
    }
}
