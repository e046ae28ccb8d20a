//! Fetch: discovery, negotiation, pack ingest, atomic install.
//!
//! ```text
//! Idle → Discovering → Negotiating → Receiving → Indexing → Installing → Done
//!                             ↑__________loop___|
//! ```
//!
//! Errors route to a `Failed(phase, cause)` terminal carrying the phase the
//! engine was in; temporary pack state never survives a failure because the
//! pack only lands via the storage backend's atomic rename.

use std::collections::HashSet;
use std::time::Instant;

use bstr::BString;
use ugit_hash::hasher::Hasher;
use ugit_hash::ObjectId;
use ugit_odb::ObjectDatabase;
use ugit_transport::Connection;
use ugit_utils::cancel::CancelToken;
use ugit_utils::progress::ProgressSink;

use crate::capability::{self, Advertisement, SidebandMode};
use crate::pktline::{PktLine, PktLineReader, PktLineWriter};
use crate::{shallow, sideband, v2, ProtocolError, ProtocolVersion};

/// State machine phases, reported in failure context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Idle,
    Discovering,
    Negotiating,
    Receiving,
    Indexing,
    Installing,
    Done,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Full ref names to fetch; empty fetches every advertised ref.
    pub wanted_refs: Vec<String>,
    /// Shallow clone depth.
    pub depth: Option<u32>,
    /// Extend history to commits newer than this epoch (`deepen-since`).
    pub deepen_since: Option<i64>,
    /// Turn a shallow repository into a complete one.
    pub unshallow: bool,
    pub progress: ProgressSink,
    pub cancel: CancelToken,
    /// Absolute deadline; crossing it fails with `Timeout`.
    pub deadline: Option<Instant>,
}

/// What a completed fetch produced.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Advertised tip per wanted ref; the caller applies these with CAS.
    pub ref_updates: Vec<(BString, ObjectId)>,
    /// Installed pack key, when any objects arrived.
    pub pack_key: Option<String>,
    pub new_objects: u32,
    /// Remote `HEAD` symref target, when advertised.
    pub head_target: Option<String>,
}

/// Run a fetch over an established connection against `odb`'s repository.
///
/// `local_tips` seeds the `have` lines (normally every local ref tip).
pub fn fetch(
    conn: &mut dyn Connection,
    odb: &ObjectDatabase,
    local_tips: &[ObjectId],
    options: &FetchOptions,
) -> Result<FetchOutcome, ProtocolError> {
    let mut phase = FetchPhase::Idle;
    let mut run = || -> Result<FetchOutcome, (FetchPhase, ProtocolError)> {
        let stage =
            |phase: &mut FetchPhase, next: FetchPhase, options: &FetchOptions| -> Result<(), (FetchPhase, ProtocolError)> {
                *phase = next;
                checkpoint(options).map_err(|e| (next, e))
            };

        stage(&mut phase, FetchPhase::Discovering, options)?;
        let ad = {
            let mut reader = PktLineReader::new(conn.reader());
            capability::read_advertisement(&mut reader).map_err(|e| (phase, e))?
        };
        tracing::debug!(version = ?ad.version, refs = ad.refs.len(), "advertisement read");

        let (refs, head_target) = if ad.version == ProtocolVersion::V2 {
            let refs = v2::ls_refs(conn, &["refs/"]).map_err(|e| (phase, e))?;
            let head = refs
                .iter()
                .find(|r| r.name == "HEAD")
                .and_then(|r| r.symref_target.clone());
            (
                refs.into_iter().map(|r| (r.oid, r.name)).collect::<Vec<_>>(),
                head,
            )
        } else {
            (
                ad.refs.clone(),
                ad.capabilities.head_symref_target().map(str::to_string),
            )
        };

        let ref_updates = select_updates(&refs, &options.wanted_refs);
        let wants: Vec<ObjectId> = {
            let mut seen = HashSet::new();
            ref_updates
                .iter()
                .map(|(_, oid)| *oid)
                .filter(|oid| !odb.has_object(oid) && seen.insert(*oid))
                .collect()
        };
        if wants.is_empty() {
            return Ok(FetchOutcome {
                ref_updates,
                pack_key: None,
                new_objects: 0,
                head_target,
            });
        }

        stage(&mut phase, FetchPhase::Negotiating, options)?;
        let (pack_data, shallow_added, shallow_removed) =
            if ad.version == ProtocolVersion::V2 {
                let response = v2::fetch(conn, &wants, local_tips, options)
                    .map_err(|e| (phase, e))?;
                (response.pack, response.shallow, response.unshallow)
            } else {
                negotiate_v1(conn, &ad, &wants, local_tips, options, &mut phase)?
            };

        if !shallow_added.is_empty() || !shallow_removed.is_empty() {
            shallow::update(odb.storage().as_ref(), &shallow_added, &shallow_removed)
                .map_err(|e| (phase, e))?;
        }

        stage(&mut phase, FetchPhase::Indexing, options)?;
        if pack_data.len() < 32 {
            return Err((
                phase,
                ProtocolError::Remote("server sent no packfile".into()),
            ));
        }
        // Trailer check before any indexing work.
        let hash_len = odb.algorithm().digest_len();
        let mut hasher = Hasher::new(odb.algorithm());
        hasher.update(&pack_data[..pack_data.len() - hash_len]);
        let checksum = hasher.finalize().map_err(|e| (phase, e.into()))?;
        if checksum.as_bytes() != &pack_data[pack_data.len() - hash_len..] {
            return Err((
                phase,
                ProtocolError::Remote("pack trailer hash mismatch".into()),
            ));
        }
        let tmp_name = format!("pack-{}.pack", checksum.to_hex());
        let entries = ugit_odb::index_pack(&tmp_name, &pack_data, odb.algorithm())
            .map_err(|e| (phase, e.into()))?;
        options
            .progress
            .report("Indexing objects", entries.len() as u64, Some(entries.len() as u64));

        stage(&mut phase, FetchPhase::Installing, options)?;
        let pack_key = odb
            .install_pack(&pack_data, &entries, &checksum)
            .map_err(|e| (phase, e.into()))?;

        phase = FetchPhase::Done;
        Ok(FetchOutcome {
            ref_updates,
            pack_key: Some(pack_key),
            new_objects: entries.len() as u32,
            head_target,
        })
    };

    run().map_err(|(phase, cause)| match cause {
        e @ (ProtocolError::Cancelled | ProtocolError::Timeout) => e,
        cause => ProtocolError::Failed {
            phase,
            cause: Box::new(cause),
        },
    })
}

/// v1 stateful negotiation: wants + deepen, then haves and `done`, then the
/// shallow/ACK preamble, then the (possibly sidebanded) pack.
fn negotiate_v1(
    conn: &mut dyn Connection,
    ad: &Advertisement,
    wants: &[ObjectId],
    local_tips: &[ObjectId],
    options: &FetchOptions,
    phase: &mut FetchPhase,
) -> Result<(Vec<u8>, Vec<ObjectId>, Vec<ObjectId>), (FetchPhase, ProtocolError)> {
    let caps = capability::fetch_capabilities(&ad.capabilities);
    let sideband_mode = capability::select_sideband(&ad.capabilities);
    let deepening =
        options.depth.is_some() || options.deepen_since.is_some() || options.unshallow;

    {
        let mut writer = PktLineWriter::new(conn.writer());
        for (i, want) in wants.iter().enumerate() {
            let line = if i == 0 {
                format!("want {} {}", want, caps.join(" "))
            } else {
                format!("want {want}")
            };
            writer.write_text(&line).map_err(|e| (*phase, e))?;
        }
        if let Some(depth) = options.depth {
            writer
                .write_text(&format!("deepen {depth}"))
                .map_err(|e| (*phase, e))?;
        }
        if let Some(since) = options.deepen_since {
            writer
                .write_text(&format!("deepen-since {since}"))
                .map_err(|e| (*phase, e))?;
        }
        if options.unshallow {
            writer
                .write_text(&format!("deepen {}", i32::MAX))
                .map_err(|e| (*phase, e))?;
        }
        writer.write_flush().map_err(|e| (*phase, e))?;

        for have in local_tips {
            writer
                .write_text(&format!("have {have}"))
                .map_err(|e| (*phase, e))?;
        }
        writer.write_text("done").map_err(|e| (*phase, e))?;
        writer.flush().map_err(|e| (*phase, e))?;
    }

    // Preamble: shallow/unshallow lines (when deepening), ACKs, final NAK.
    let mut shallow_added = Vec::new();
    let mut shallow_removed = Vec::new();
    let mut reader = PktLineReader::new(conn.reader());
    loop {
        checkpoint(options).map_err(|e| (*phase, e))?;
        match reader.read_pkt().map_err(|e| (*phase, e))? {
            PktLine::Data(data) => {
                let line = String::from_utf8_lossy(&data);
                let line = line.trim_end_matches('\n');
                if line == "NAK" {
                    break;
                }
                if let Some(hex) = line.strip_prefix("shallow ") {
                    if let Ok(oid) = ObjectId::from_hex(hex.trim()) {
                        shallow_added.push(oid);
                    }
                } else if let Some(hex) = line.strip_prefix("unshallow ") {
                    if let Ok(oid) = ObjectId::from_hex(hex.trim()) {
                        shallow_removed.push(oid);
                    }
                } else if line.starts_with("ACK ") {
                    // multi_ack chatter; the final ACK ends the preamble.
                    if !line.ends_with("continue") && !line.ends_with("common") {
                        break;
                    }
                } else if let Some(msg) = line.strip_prefix("ERR ") {
                    return Err((*phase, ProtocolError::Remote(msg.to_string())));
                }
            }
            PktLine::Flush if deepening => continue,
            _ => break,
        }
    }

    *phase = FetchPhase::Receiving;
    checkpoint(options).map_err(|e| (*phase, e))?;
    let pack = match sideband_mode {
        SidebandMode::None => sideband::read_raw(reader.inner_mut()).map_err(|e| (*phase, e))?,
        _ => sideband::demux(&mut reader, &options.progress).map_err(|e| (*phase, e))?,
    };
    Ok((pack, shallow_added, shallow_removed))
}

/// Pick the advertised refs the caller asked for (all of `refs/` when no
/// filter was given).
fn select_updates(
    refs: &[(ObjectId, BString)],
    wanted: &[String],
) -> Vec<(BString, ObjectId)> {
    refs.iter()
        .filter(|(_, name)| {
            if wanted.is_empty() {
                name.starts_with(b"refs/")
            } else {
                wanted.iter().any(|w| name == w.as_str())
            }
        })
        .map(|(oid, name)| (name.clone(), *oid))
        .collect()
}

fn checkpoint(options: &FetchOptions) -> Result<(), ProtocolError> {
    if options.cancel.is_cancelled() {
        return Err(ProtocolError::Cancelled);
    }
    if let Some(deadline) = options.deadline {
        if Instant::now() > deadline {
            return Err(ProtocolError::Timeout);
        }
    }
    Ok(())
}
