use bstr::{BStr, BString, ByteSlice};
use ugit_hash::ObjectId;
use ugit_utils::date::Signature;

use crate::ObjectError;

/// A commit object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// OID of the root tree.
    pub tree: ObjectId,
    /// Parent commit OIDs in order (empty for a root commit).
    pub parents: Vec<ObjectId>,
    pub author: Signature,
    pub committer: Signature,
    /// Optional encoding header (e.g., "ISO-8859-1").
    pub encoding: Option<BString>,
    /// Optional GPG signature, newline-joined.
    pub gpgsig: Option<BString>,
    /// Remaining headers (mergetag and friends), preserved for round-trip.
    pub extra_headers: Vec<(BString, BString)>,
    /// Message: everything after the blank separator line.
    pub message: BString,
}

impl Commit {
    /// Parse commit body bytes (no object header).
    ///
    /// Accepts the conventional header sequence: `tree`, `parent*`,
    /// `author`, `committer`, then optional `gpgsig` / `mergetag` /
    /// `encoding`, a blank line, and the message. Multi-line header values
    /// continue on lines starting with a space.
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        let mut tree: Option<ObjectId> = None;
        let mut parents = Vec::new();
        let mut author: Option<Signature> = None;
        let mut committer: Option<Signature> = None;
        let mut encoding: Option<BString> = None;
        let mut gpgsig: Option<BString> = None;
        let mut extra_headers: Vec<(BString, BString)> = Vec::new();

        let data = content;
        let mut pos = 0;

        loop {
            if pos >= data.len() {
                break;
            }
            if data[pos] == b'\n' {
                pos += 1;
                break;
            }

            let line_end = data[pos..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|p| p + pos)
                .unwrap_or(data.len());
            let line = &data[pos..line_end];

            let Some(space_pos) = line.iter().position(|&b| b == b' ') else {
                pos = line_end + 1;
                continue;
            };
            let key = &line[..space_pos];
            let value = &line[space_pos + 1..];

            match key {
                b"tree" => {
                    tree = Some(parse_oid_value(value, "tree")?);
                    pos = line_end + 1;
                }
                b"parent" => {
                    parents.push(parse_oid_value(value, "parent")?);
                    pos = line_end + 1;
                }
                b"author" => {
                    author = Some(parse_signature(value)?);
                    pos = line_end + 1;
                }
                b"committer" => {
                    committer = Some(parse_signature(value)?);
                    pos = line_end + 1;
                }
                b"encoding" => {
                    encoding = Some(BString::from(value));
                    pos = line_end + 1;
                }
                b"gpgsig" | b"gpgsig-sha256" => {
                    let (val, next) = read_folded_value(data, value, line_end);
                    gpgsig = Some(val);
                    pos = next;
                }
                _ => {
                    let (val, next) = read_folded_value(data, value, line_end);
                    extra_headers.push((BString::from(key), val));
                    pos = next;
                }
            }
        }

        let tree = tree.ok_or(ObjectError::MissingCommitField { field: "tree" })?;
        let author = author.ok_or(ObjectError::MissingCommitField { field: "author" })?;
        let committer =
            committer.ok_or(ObjectError::MissingCommitField { field: "committer" })?;

        Ok(Self {
            tree,
            parents,
            author,
            committer,
            encoding,
            gpgsig,
            extra_headers,
            message: BString::from(&data[pos.min(data.len())..]),
        })
    }

    /// Serialize the body (no object header).
    pub fn serialize_content(&self) -> Vec<u8> {
        let mut out = Vec::new();

        out.extend_from_slice(b"tree ");
        out.extend_from_slice(self.tree.to_hex().as_bytes());
        out.push(b'\n');

        for parent in &self.parents {
            out.extend_from_slice(b"parent ");
            out.extend_from_slice(parent.to_hex().as_bytes());
            out.push(b'\n');
        }

        out.extend_from_slice(b"author ");
        out.extend_from_slice(&self.author.to_bytes());
        out.push(b'\n');

        out.extend_from_slice(b"committer ");
        out.extend_from_slice(&self.committer.to_bytes());
        out.push(b'\n');

        if let Some(ref enc) = self.encoding {
            out.extend_from_slice(b"encoding ");
            out.extend_from_slice(enc);
            out.push(b'\n');
        }

        if let Some(ref sig) = self.gpgsig {
            out.extend_from_slice(b"gpgsig ");
            write_folded_value(&mut out, sig);
        }

        for (key, val) in &self.extra_headers {
            out.extend_from_slice(key);
            out.push(b' ');
            write_folded_value(&mut out, val);
        }

        out.push(b'\n');
        out.extend_from_slice(&self.message);
        out
    }

    pub fn first_parent(&self) -> Option<&ObjectId> {
        self.parents.first()
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// First line of the message.
    pub fn summary(&self) -> &BStr {
        let msg: &[u8] = self.message.as_ref();
        match msg.find_byte(b'\n') {
            Some(pos) => BStr::new(&msg[..pos]),
            None => BStr::new(msg),
        }
    }
}

/// Gather a multi-line header value; continuation lines start with a space.
/// Returns the value and the position after the last continuation line.
fn read_folded_value(data: &[u8], first: &[u8], line_end: usize) -> (BString, usize) {
    let mut val = Vec::from(first);
    let mut next = line_end + 1;
    while next < data.len() && data[next] == b' ' {
        val.push(b'\n');
        let cont_end = data[next..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| p + next)
            .unwrap_or(data.len());
        val.extend_from_slice(&data[next + 1..cont_end]);
        next = cont_end + 1;
    }
    (BString::from(val), next)
}

fn write_folded_value(out: &mut Vec<u8>, val: &[u8]) {
    for (i, line) in val.split(|&b| b == b'\n').enumerate() {
        if i > 0 {
            out.push(b'\n');
            out.push(b' ');
        }
        out.extend_from_slice(line);
    }
    out.push(b'\n');
}

fn parse_oid_value(value: &[u8], field: &'static str) -> Result<ObjectId, ObjectError> {
    let hex = std::str::from_utf8(value)
        .map_err(|_| ObjectError::InvalidHeader(format!("non-UTF8 {field} OID")))?;
    Ok(ObjectId::from_hex(hex)?)
}

fn parse_signature(data: &[u8]) -> Result<Signature, ObjectError> {
    Signature::parse(BStr::new(data)).map_err(|e| ObjectError::InvalidSignature(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"tree da39a3ee5e6b4b0d3255bfef95601890afd80709\n");
        out.extend_from_slice(b"parent 0000000000000000000000000000000000000001\n");
        out.extend_from_slice(b"author Alice <a@x> 1700000000 +0000\n");
        out.extend_from_slice(b"committer Alice <a@x> 1700000000 +0000\n");
        out.extend_from_slice(b"\ninit\n");
        out
    }

    #[test]
    fn parse_fields() {
        let commit = Commit::parse(&sample()).unwrap();
        assert_eq!(
            commit.tree.to_hex(),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
        assert_eq!(commit.parents.len(), 1);
        assert_eq!(commit.author.name, "Alice");
        assert_eq!(commit.author.date.timestamp, 1_700_000_000);
        assert_eq!(commit.message, "init\n");
    }

    #[test]
    fn serialize_roundtrip() {
        let original = sample();
        let commit = Commit::parse(&original).unwrap();
        assert_eq!(commit.serialize_content(), original);
    }

    #[test]
    fn merge_and_root_predicates() {
        let mut data = Vec::new();
        data.extend_from_slice(b"tree da39a3ee5e6b4b0d3255bfef95601890afd80709\n");
        data.extend_from_slice(b"author A <a@b> 1 +0000\n");
        data.extend_from_slice(b"committer A <a@b> 1 +0000\n");
        data.extend_from_slice(b"\nroot\n");
        let root = Commit::parse(&data).unwrap();
        assert!(root.is_root());
        assert!(!root.is_merge());

        let mut data = Vec::new();
        data.extend_from_slice(b"tree da39a3ee5e6b4b0d3255bfef95601890afd80709\n");
        data.extend_from_slice(b"parent 0000000000000000000000000000000000000001\n");
        data.extend_from_slice(b"parent 0000000000000000000000000000000000000002\n");
        data.extend_from_slice(b"author A <a@b> 1 +0000\n");
        data.extend_from_slice(b"committer A <a@b> 1 +0000\n");
        data.extend_from_slice(b"\nmerge\n");
        let merge = Commit::parse(&data).unwrap();
        assert!(merge.is_merge());
        assert_eq!(merge.first_parent(), Some(&merge.parents[0]));
    }

    #[test]
    fn gpgsig_folding_roundtrip() {
        let mut data = Vec::new();
        data.extend_from_slice(b"tree da39a3ee5e6b4b0d3255bfef95601890afd80709\n");
        data.extend_from_slice(b"author A <a@b> 1 +0000\n");
        data.extend_from_slice(b"committer A <a@b> 1 +0000\n");
        data.extend_from_slice(b"gpgsig -----BEGIN PGP SIGNATURE-----\n");
        data.extend_from_slice(b" line2of sig\n");
        data.extend_from_slice(b" -----END PGP SIGNATURE-----\n");
        data.extend_from_slice(b"\nsigned\n");

        let commit = Commit::parse(&data).unwrap();
        let sig = commit.gpgsig.as_ref().unwrap();
        assert!(sig.starts_with(b"-----BEGIN"));
        assert_eq!(sig.split(|&b| b == b'\n').count(), 3);
        assert_eq!(commit.serialize_content(), data);
    }

    #[test]
    fn mergetag_preserved_as_extra_header() {
        let mut data = Vec::new();
        data.extend_from_slice(b"tree da39a3ee5e6b4b0d3255bfef95601890afd80709\n");
        data.extend_from_slice(b"author A <a@b> 1 +0000\n");
        data.extend_from_slice(b"committer A <a@b> 1 +0000\n");
        data.extend_from_slice(b"mergetag object 0000000000000000000000000000000000000003\n");
        data.extend_from_slice(b" type commit\n");
        data.extend_from_slice(b"\nmsg\n");

        let commit = Commit::parse(&data).unwrap();
        assert_eq!(commit.extra_headers.len(), 1);
        assert_eq!(commit.extra_headers[0].0, "mergetag");
        assert_eq!(commit.serialize_content(), data);
    }

    #[test]
    fn summary_is_first_line() {
        let commit = Commit::parse(&sample()).unwrap();
        assert_eq!(commit.summary(), "init");
    }

    #[test]
    fn missing_tree_rejected() {
        let data = b"author A <a@b> 1 +0000\ncommitter A <a@b> 1 +0000\n\nmsg\n";
        assert!(matches!(
            Commit::parse(data),
            Err(ObjectError::MissingCommitField { field: "tree" })
        ));
    }
}
