//! Protocol v2: `ls-refs` and `fetch` commands.
//!
//! v2 responses are section-structured: a section name line, its payload,
//! then a delimiter or response-end. The packfile section is sideband
//! framed.

use bstr::BString;
use ugit_hash::ObjectId;
use ugit_transport::Connection;

use crate::fetch::FetchOptions;
use crate::pktline::{PktLine, PktLineReader, PktLineWriter};
use crate::sideband::{BAND_DATA, BAND_ERROR, BAND_PROGRESS};
use crate::ProtocolError;

/// One ref from `ls-refs`.
#[derive(Debug, Clone)]
pub struct LsRef {
    pub oid: ObjectId,
    pub name: BString,
    /// Target for symbolic refs (`symref-target:` attribute).
    pub symref_target: Option<String>,
    /// Peeled OID for annotated tags (`peeled:` attribute).
    pub peeled: Option<ObjectId>,
}

/// Run `ls-refs`, asking for symrefs and peeled tags under `prefixes`.
pub fn ls_refs(
    conn: &mut dyn Connection,
    prefixes: &[&str],
) -> Result<Vec<LsRef>, ProtocolError> {
    {
        let mut writer = PktLineWriter::new(conn.writer());
        writer.write_text("command=ls-refs")?;
        writer.write_delimiter()?;
        writer.write_text("symrefs")?;
        writer.write_text("peel")?;
        for prefix in prefixes {
            writer.write_text(&format!("ref-prefix {prefix}"))?;
        }
        writer.write_flush()?;
        writer.flush()?;
    }

    let mut reader = PktLineReader::new(conn.reader());
    let mut refs = Vec::new();
    for line in reader.read_until_flush()? {
        let line = line.strip_suffix(b"\n").unwrap_or(&line);
        let text = String::from_utf8_lossy(line);
        let mut fields = text.split(' ');
        let oid = fields
            .next()
            .and_then(|hex| ObjectId::from_hex(hex).ok())
            .ok_or_else(|| ProtocolError::Remote(format!("bad ls-refs line: {text}")))?;
        let name = fields
            .next()
            .ok_or_else(|| ProtocolError::Remote(format!("bad ls-refs line: {text}")))?;

        let mut entry = LsRef {
            oid,
            name: BString::from(name),
            symref_target: None,
            peeled: None,
        };
        for attr in fields {
            if let Some(target) = attr.strip_prefix("symref-target:") {
                entry.symref_target = Some(target.to_string());
            } else if let Some(hex) = attr.strip_prefix("peeled:") {
                entry.peeled = ObjectId::from_hex(hex).ok();
            }
        }
        refs.push(entry);
    }
    Ok(refs)
}

/// What a v2 `fetch` returned.
#[derive(Debug, Default)]
pub struct FetchResponse {
    pub pack: Vec<u8>,
    pub shallow: Vec<ObjectId>,
    pub unshallow: Vec<ObjectId>,
}

/// Run `command=fetch` with `done` (single round; the caller retries with
/// more haves if it ever implements multi-round negotiation).
pub fn fetch(
    conn: &mut dyn Connection,
    wants: &[ObjectId],
    haves: &[ObjectId],
    options: &FetchOptions,
) -> Result<FetchResponse, ProtocolError> {
    {
        let mut writer = PktLineWriter::new(conn.writer());
        writer.write_text("command=fetch")?;
        writer.write_delimiter()?;
        for want in wants {
            writer.write_text(&format!("want {want}"))?;
        }
        for have in haves {
            writer.write_text(&format!("have {have}"))?;
        }
        if let Some(depth) = options.depth {
            writer.write_text(&format!("deepen {depth}"))?;
        }
        if let Some(since) = options.deepen_since {
            writer.write_text(&format!("deepen-since {since}"))?;
        }
        writer.write_text("done")?;
        writer.write_flush()?;
        writer.flush()?;
    }

    let mut reader = PktLineReader::new(conn.reader());
    let mut response = FetchResponse::default();
    let mut section: Option<String> = None;

    loop {
        match reader.read_pkt()? {
            PktLine::Data(data) => {
                let line = data.strip_suffix(b"\n").unwrap_or(&data);
                match section.as_deref() {
                    None => {
                        section = Some(String::from_utf8_lossy(line).into_owned());
                    }
                    Some("shallow-info") => {
                        let text = String::from_utf8_lossy(line);
                        if let Some(hex) = text.strip_prefix("shallow ") {
                            if let Ok(oid) = ObjectId::from_hex(hex.trim()) {
                                response.shallow.push(oid);
                            }
                        } else if let Some(hex) = text.strip_prefix("unshallow ") {
                            if let Ok(oid) = ObjectId::from_hex(hex.trim()) {
                                response.unshallow.push(oid);
                            }
                        }
                    }
                    Some("acknowledgments") => {
                        // With `done` sent, acknowledgments are informational.
                    }
                    Some("packfile") => {
                        let Some((&band, rest)) = data.split_first() else {
                            continue;
                        };
                        match band {
                            BAND_DATA => {
                                response.pack.extend_from_slice(rest);
                                options.progress.report(
                                    "Receiving objects",
                                    response.pack.len() as u64,
                                    None,
                                );
                            }
                            BAND_PROGRESS => {}
                            BAND_ERROR => {
                                return Err(ProtocolError::Remote(
                                    String::from_utf8_lossy(rest).trim_end().to_string(),
                                ));
                            }
                            other => {
                                return Err(ProtocolError::Remote(format!(
                                    "unknown sideband {other}"
                                )))
                            }
                        }
                    }
                    Some(other) => {
                        return Err(ProtocolError::Remote(format!(
                            "unexpected v2 section '{other}'"
                        )))
                    }
                }
            }
            PktLine::Delimiter => {
                section = None;
            }
            PktLine::Flush | PktLine::ResponseEnd => break,
        }
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ugit_transport::DuplexPipe;

    fn oid(n: u8) -> ObjectId {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        ObjectId::from_bytes(&bytes, ugit_hash::HashAlgorithm::Sha1).unwrap()
    }

    #[test]
    fn ls_refs_parses_attributes() {
        let (client, mut server) = DuplexPipe::pair();
        let handle = std::thread::spawn(move || {
            // Drain the request.
            {
                let mut r = PktLineReader::new(server.reader());
                loop {
                    if matches!(r.read_pkt().unwrap(), PktLine::Flush) {
                        break;
                    }
                }
            }
            let mut w = PktLineWriter::new(server.writer());
            w.write_text(&format!(
                "{} HEAD symref-target:refs/heads/main",
                oid(1)
            ))
            .unwrap();
            w.write_text(&format!("{} refs/heads/main", oid(1))).unwrap();
            w.write_text(&format!("{} refs/tags/v1 peeled:{}", oid(2), oid(3)))
                .unwrap();
            w.write_flush().unwrap();
            w.flush().unwrap();
        });

        let mut conn: Box<dyn Connection> = Box::new(client);
        let refs = ls_refs(conn.as_mut(), &["refs/"]).unwrap();
        handle.join().unwrap();

        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].symref_target.as_deref(), Some("refs/heads/main"));
        assert_eq!(refs[2].peeled, Some(oid(3)));
    }

    #[test]
    fn fetch_response_sections() {
        let (client, mut server) = DuplexPipe::pair();
        let handle = std::thread::spawn(move || {
            {
                let mut r = PktLineReader::new(server.reader());
                loop {
                    if matches!(r.read_pkt().unwrap(), PktLine::Flush) {
                        break;
                    }
                }
            }
            let mut w = PktLineWriter::new(server.writer());
            w.write_text("shallow-info").unwrap();
            w.write_text(&format!("shallow {}", oid(7))).unwrap();
            w.write_delimiter().unwrap();
            w.write_text("packfile").unwrap();
            let mut line = vec![BAND_DATA];
            line.extend_from_slice(b"PACKDATA");
            w.write_line(&line).unwrap();
            w.write_flush().unwrap();
            w.flush().unwrap();
        });

        let mut conn: Box<dyn Connection> = Box::new(client);
        let response = fetch(conn.as_mut(), &[oid(1)], &[], &FetchOptions::default()).unwrap();
        handle.join().unwrap();

        assert_eq!(response.shallow, vec![oid(7)]);
        assert_eq!(response.pack, b"PACKDATA");
    }
}
