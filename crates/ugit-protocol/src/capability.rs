//! Capability discovery: parsing server advertisements (v1 and v2) and
//! choosing what to ask for.

use bstr::{BString, ByteSlice};
use ugit_hash::ObjectId;

use crate::pktline::{PktLine, PktLineReader};
use crate::{ProtocolError, ProtocolVersion};

/// Server capability set.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    caps: Vec<String>,
}

impl Capabilities {
    pub fn parse(raw: &[u8]) -> Self {
        let caps = raw
            .split(|&b| b == b' ' || b == b'\n')
            .filter(|c| !c.is_empty())
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect();
        Self { caps }
    }

    pub fn has(&self, name: &str) -> bool {
        self.caps
            .iter()
            .any(|c| c == name || c.starts_with(&format!("{name}=")))
    }

    /// Value of a `key=value` capability.
    pub fn value(&self, name: &str) -> Option<&str> {
        let prefix = format!("{name}=");
        self.caps
            .iter()
            .find_map(|c| c.strip_prefix(prefix.as_str()))
    }

    /// `symref=HEAD:refs/heads/main` → the target of HEAD.
    pub fn head_symref_target(&self) -> Option<&str> {
        self.caps.iter().find_map(|c| {
            c.strip_prefix("symref=HEAD:")
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.caps.iter().map(|c| c.as_str())
    }
}

/// Sideband multiplexing level both ends agreed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidebandMode {
    None,
    Band,
    Band64k,
}

pub fn select_sideband(server: &Capabilities) -> SidebandMode {
    if server.has("side-band-64k") {
        SidebandMode::Band64k
    } else if server.has("side-band") {
        SidebandMode::Band
    } else {
        SidebandMode::None
    }
}

/// Client capabilities to request for a fetch, limited to what the server
/// offers.
pub fn fetch_capabilities(server: &Capabilities) -> Vec<String> {
    let mut caps = Vec::new();
    for candidate in ["multi_ack", "ofs-delta", "side-band-64k", "agent=ugit/0.2"] {
        let name = candidate.split('=').next().expect("non-empty");
        if name == "agent" || server.has(name) {
            caps.push(candidate.to_string());
        }
    }
    caps
}

/// Client capabilities for a push.
pub fn push_capabilities(server: &Capabilities) -> Vec<String> {
    let mut caps = Vec::new();
    for candidate in ["report-status", "delete-refs", "ofs-delta", "agent=ugit/0.2"] {
        let name = candidate.split('=').next().expect("non-empty");
        if name == "agent" || server.has(name) {
            caps.push(candidate.to_string());
        }
    }
    caps
}

/// A ref advertisement from the server.
#[derive(Debug, Default)]
pub struct Advertisement {
    pub version: ProtocolVersion,
    pub capabilities: Capabilities,
    /// `(oid, refname)`, in advertisement order. Empty under v2 until
    /// `ls-refs` runs.
    pub refs: Vec<(ObjectId, BString)>,
    /// Peeled values for annotated tags (`refname^{}` lines).
    pub peeled: Vec<(ObjectId, BString)>,
}

/// Parse a v1 advertisement (or detect a v2 capability listing).
///
/// v1: `OID SP refname NUL cap cap…` on the first line, then `OID SP
/// refname` lines until flush. An empty repository advertises
/// `<null-oid> capabilities^{}` instead.
pub fn read_advertisement<R: std::io::Read>(
    reader: &mut PktLineReader<R>,
) -> Result<Advertisement, ProtocolError> {
    let mut ad = Advertisement::default();
    let mut first = true;

    loop {
        let line = match reader.read_pkt()? {
            PktLine::Data(data) => data,
            PktLine::Flush => break,
            other => {
                return Err(ProtocolError::Remote(format!(
                    "unexpected packet in advertisement: {other:?}"
                )))
            }
        };

        if first && line.starts_with(b"version 2") {
            ad.version = ProtocolVersion::V2;
            // The rest of the section is capability lines.
            for cap_line in reader.read_until_flush()? {
                ad.capabilities = Capabilities::parse(
                    &[ad_caps_raw(&ad.capabilities), cap_line].concat(),
                );
            }
            return Ok(ad);
        }
        if first && line.starts_with(b"version 1") {
            first = false;
            continue;
        }

        let line = line.strip_suffix(b"\n").unwrap_or(&line);
        let (payload, caps) = match line.find_byte(0) {
            Some(null) => (&line[..null], Some(&line[null + 1..])),
            None => (line, None),
        };
        if let Some(caps) = caps {
            ad.capabilities = Capabilities::parse(caps);
        }

        let space = payload.find_byte(b' ').ok_or_else(|| {
            ProtocolError::Remote(format!(
                "malformed advertisement line: {}",
                String::from_utf8_lossy(payload)
            ))
        })?;
        let hex = std::str::from_utf8(&payload[..space])
            .map_err(|_| ProtocolError::Remote("non-UTF8 OID in advertisement".into()))?;
        let oid = ObjectId::from_hex(hex)
            .map_err(|e| ProtocolError::Remote(format!("bad OID in advertisement: {e}")))?;
        let name = BString::from(&payload[space + 1..]);

        // Placeholder advertisement of an empty repository.
        if name == "capabilities^{}" {
            first = false;
            continue;
        }

        if let Some(base) = name.strip_suffix(b"^{}") {
            ad.peeled.push((oid, BString::from(base)));
        } else {
            ad.refs.push((oid, name));
        }
        first = false;
    }

    Ok(ad)
}

fn ad_caps_raw(caps: &Capabilities) -> Vec<u8> {
    let mut out = Vec::new();
    for c in caps.iter() {
        out.extend_from_slice(c.as_bytes());
        out.push(b' ');
    }
    out
}
