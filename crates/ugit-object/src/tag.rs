use bstr::{BStr, BString};
use ugit_hash::ObjectId;
use ugit_utils::date::Signature;

use crate::{ObjectError, ObjectType};

/// An annotated tag object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// The tagged object.
    pub target: ObjectId,
    /// Type of the tagged object.
    pub target_type: ObjectType,
    /// Tag name (the part after `refs/tags/`).
    pub name: BString,
    /// Tagger identity; historically optional.
    pub tagger: Option<Signature>,
    pub message: BString,
}

impl Tag {
    /// Parse tag body bytes (no object header).
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        let mut target: Option<ObjectId> = None;
        let mut target_type: Option<ObjectType> = None;
        let mut name: Option<BString> = None;
        let mut tagger: Option<Signature> = None;

        let mut pos = 0;
        while pos < content.len() {
            if content[pos] == b'\n' {
                pos += 1;
                break;
            }
            let line_end = content[pos..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|p| p + pos)
                .unwrap_or(content.len());
            let line = &content[pos..line_end];

            if let Some(space_pos) = line.iter().position(|&b| b == b' ') {
                let key = &line[..space_pos];
                let value = &line[space_pos + 1..];
                match key {
                    b"object" => {
                        let hex = std::str::from_utf8(value).map_err(|_| {
                            ObjectError::InvalidHeader("non-UTF8 object OID".into())
                        })?;
                        target = Some(ObjectId::from_hex(hex)?);
                    }
                    b"type" => {
                        target_type = Some(ObjectType::from_bytes(value)?);
                    }
                    b"tag" => {
                        name = Some(BString::from(value));
                    }
                    b"tagger" => {
                        tagger = Some(
                            Signature::parse(BStr::new(value))
                                .map_err(|e| ObjectError::InvalidSignature(e.to_string()))?,
                        );
                    }
                    _ => {}
                }
            }
            pos = line_end + 1;
        }

        Ok(Self {
            target: target.ok_or(ObjectError::MissingTagField { field: "object" })?,
            target_type: target_type.ok_or(ObjectError::MissingTagField { field: "type" })?,
            name: name.ok_or(ObjectError::MissingTagField { field: "tag" })?,
            tagger,
            message: BString::from(&content[pos.min(content.len())..]),
        })
    }

    /// Serialize the body (no object header).
    pub fn serialize_content(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"object ");
        out.extend_from_slice(self.target.to_hex().as_bytes());
        out.push(b'\n');

        out.extend_from_slice(b"type ");
        out.extend_from_slice(self.target_type.as_bytes());
        out.push(b'\n');

        out.extend_from_slice(b"tag ");
        out.extend_from_slice(&self.name);
        out.push(b'\n');

        if let Some(ref tagger) = self.tagger {
            out.extend_from_slice(b"tagger ");
            out.extend_from_slice(&tagger.to_bytes());
            out.push(b'\n');
        }

        out.push(b'\n');
        out.extend_from_slice(&self.message);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"object da39a3ee5e6b4b0d3255bfef95601890afd80709\n");
        out.extend_from_slice(b"type commit\n");
        out.extend_from_slice(b"tag v1.0\n");
        out.extend_from_slice(b"tagger Alice <a@x> 1700000000 +0000\n");
        out.extend_from_slice(b"\nrelease 1.0\n");
        out
    }

    #[test]
    fn parse_fields() {
        let tag = Tag::parse(&sample()).unwrap();
        assert_eq!(tag.target_type, ObjectType::Commit);
        assert_eq!(tag.name, "v1.0");
        assert_eq!(tag.tagger.as_ref().unwrap().email, "a@x");
        assert_eq!(tag.message, "release 1.0\n");
    }

    #[test]
    fn serialize_roundtrip() {
        let original = sample();
        assert_eq!(Tag::parse(&original).unwrap().serialize_content(), original);
    }

    #[test]
    fn tagger_is_optional() {
        let data = b"object da39a3ee5e6b4b0d3255bfef95601890afd80709\ntype commit\ntag old\n\nmsg\n";
        let tag = Tag::parse(data).unwrap();
        assert!(tag.tagger.is_none());
        assert_eq!(tag.serialize_content(), data);
    }

    #[test]
    fn missing_object_rejected() {
        assert!(Tag::parse(b"type commit\ntag v1\n\nmsg\n").is_err());
    }
}
