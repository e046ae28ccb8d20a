//! Object model for the ugit portable git core.
//!
//! Types for git's four object kinds, parsing from raw bytes, serialization
//! to the canonical format, and the shared weight-bounded object cache.

mod blob;
pub mod cache;
mod commit;
pub mod header;
mod tag;
mod tree;

pub use blob::Blob;
pub use commit::Commit;
pub use tag::Tag;
pub use tree::{FileMode, Tree, TreeEntry};

use bstr::BString;
use ugit_hash::{HashAlgorithm, HashError, ObjectId};

/// Errors produced by object parsing and serialization.
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("invalid object type: {0}")]
    InvalidType(BString),

    #[error("invalid object header: {0}")]
    InvalidHeader(String),

    #[error("truncated object: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("invalid tree entry at offset {offset}: {reason}")]
    InvalidTreeEntry { offset: usize, reason: String },

    #[error("invalid commit: missing '{field}' header")]
    MissingCommitField { field: &'static str },

    #[error("invalid tag: missing '{field}' header")]
    MissingTagField { field: &'static str },

    #[error("invalid file mode: {0}")]
    InvalidFileMode(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error(transparent)]
    Hash(#[from] HashError),
}

/// The four kinds of git objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl ObjectType {
    pub fn from_bytes(s: &[u8]) -> Result<Self, ObjectError> {
        match s {
            b"blob" => Ok(Self::Blob),
            b"tree" => Ok(Self::Tree),
            b"commit" => Ok(Self::Commit),
            b"tag" => Ok(Self::Tag),
            _ => Err(ObjectError::InvalidType(BString::from(s))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Tag => "tag",
        }
    }

    pub fn as_bytes(&self) -> &'static [u8] {
        self.as_str().as_bytes()
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ObjectType {
    type Err = ObjectError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(s.as_bytes())
    }
}

/// A parsed git object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    Blob(Blob),
    Tree(Tree),
    Commit(Commit),
    Tag(Tag),
}

impl Object {
    /// Parse from raw bytes (`"<type> <size>\0<body>"`).
    ///
    /// The hash algorithm determines the width of binary OIDs inside tree
    /// bodies; it must match the repository's object format.
    pub fn parse(data: &[u8], algo: HashAlgorithm) -> Result<Self, ObjectError> {
        let (obj_type, content_size, header_len) = header::parse_header(data)?;
        let content = &data[header_len..];
        if content.len() < content_size {
            return Err(ObjectError::Truncated {
                expected: content_size,
                actual: content.len(),
            });
        }
        Self::parse_content(obj_type, &content[..content_size], algo)
    }

    /// Parse from body bytes with a known type (no header).
    pub fn parse_content(
        obj_type: ObjectType,
        content: &[u8],
        algo: HashAlgorithm,
    ) -> Result<Self, ObjectError> {
        match obj_type {
            ObjectType::Blob => Ok(Self::Blob(Blob::new(content.to_vec()))),
            ObjectType::Tree => Ok(Self::Tree(Tree::parse(content, algo)?)),
            ObjectType::Commit => Ok(Self::Commit(Commit::parse(content)?)),
            ObjectType::Tag => Ok(Self::Tag(Tag::parse(content)?)),
        }
    }

    /// Serialize to canonical git form (header + body).
    pub fn serialize(&self) -> Vec<u8> {
        let content = self.serialize_content();
        let hdr = header::write_header(self.object_type(), content.len());
        let mut out = Vec::with_capacity(hdr.len() + content.len());
        out.extend_from_slice(&hdr);
        out.extend_from_slice(&content);
        out
    }

    /// Serialize just the body.
    pub fn serialize_content(&self) -> Vec<u8> {
        match self {
            Self::Blob(b) => b.data.clone(),
            Self::Tree(t) => t.serialize_content(),
            Self::Commit(c) => c.serialize_content(),
            Self::Tag(t) => t.serialize_content(),
        }
    }

    pub fn object_type(&self) -> ObjectType {
        match self {
            Self::Blob(_) => ObjectType::Blob,
            Self::Tree(_) => ObjectType::Tree,
            Self::Commit(_) => ObjectType::Commit,
            Self::Tag(_) => ObjectType::Tag,
        }
    }

    /// Compute the OID over `"<type> <size>\0<body>"`.
    pub fn compute_oid(&self, algo: HashAlgorithm) -> Result<ObjectId, HashError> {
        ugit_hash::hasher::Hasher::hash_object(
            algo,
            self.object_type().as_str(),
            &self.serialize_content(),
        )
    }

    /// Approximate in-memory weight in bytes (for the cache).
    pub fn weight(&self) -> usize {
        match self {
            Self::Blob(b) => b.data.len(),
            Self::Tree(t) => t
                .entries
                .iter()
                .map(|e| e.name.len() + e.oid.as_bytes().len() + 8)
                .sum(),
            Self::Commit(c) => c.message.len() + c.parents.len() * 20 + 128,
            Self::Tag(t) => t.message.len() + 128,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_type_roundtrip() {
        for t in [
            ObjectType::Blob,
            ObjectType::Tree,
            ObjectType::Commit,
            ObjectType::Tag,
        ] {
            assert_eq!(ObjectType::from_bytes(t.as_bytes()).unwrap(), t);
            assert_eq!(t.as_str().parse::<ObjectType>().unwrap(), t);
        }
        assert!(ObjectType::from_bytes(b"bogus").is_err());
    }

    #[test]
    fn parse_blob_with_header() {
        let obj = Object::parse(b"blob 6\0hello\n", HashAlgorithm::Sha1).unwrap();
        assert_eq!(obj.object_type(), ObjectType::Blob);
        assert_eq!(obj.serialize_content(), b"hello\n");
    }

    #[test]
    fn truncated_body_rejected() {
        assert!(Object::parse(b"blob 10\0short", HashAlgorithm::Sha1).is_err());
    }

    #[test]
    fn oid_matches_known_blob() {
        let obj = Object::Blob(Blob::new(b"hello\n".to_vec()));
        assert_eq!(
            obj.compute_oid(HashAlgorithm::Sha1).unwrap().to_hex(),
            "ce013625030ba8dba906f756967f9e9ca394464a"
        );
    }
}
