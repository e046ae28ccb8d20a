//! Push: ref update commands, pack upload, per-ref status report.

use std::collections::{HashSet, VecDeque};
use std::io::{Cursor, Write};

use ugit_hash::ObjectId;
use ugit_object::{Object, ObjectType};
use ugit_odb::{ObjectDatabase, PackWriter};
use ugit_transport::Connection;
use ugit_utils::cancel::CancelToken;
use ugit_utils::progress::ProgressSink;

use crate::capability::{self, SidebandMode};
use crate::pktline::{PktLineReader, PktLineWriter};
use crate::{sideband, ProtocolError};

/// One ref the caller wants changed on the remote.
#[derive(Debug, Clone)]
pub struct RefPush {
    /// Full ref name on the remote.
    pub name: String,
    /// New value; `None` deletes the ref.
    pub new: Option<ObjectId>,
    /// Expected current remote value; defaults to whatever the remote
    /// advertises. Supplying it turns the command into a strict CAS.
    pub expected: Option<ObjectId>,
}

#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    pub progress: ProgressSink,
    pub cancel: CancelToken,
}

/// Per-ref outcome parsed from report-status.
#[derive(Debug)]
pub struct PushOutcome {
    pub unpack_ok: bool,
    /// `(refname, Ok(()) | Err(reason))` in report order.
    pub statuses: Vec<(String, Result<(), String>)>,
}

impl PushOutcome {
    pub fn all_ok(&self) -> bool {
        self.unpack_ok && self.statuses.iter().all(|(_, s)| s.is_ok())
    }
}

/// Push `updates` over an established receive-pack connection.
pub fn push(
    conn: &mut dyn Connection,
    odb: &ObjectDatabase,
    updates: &[RefPush],
    options: &PushOptions,
) -> Result<PushOutcome, ProtocolError> {
    if updates.is_empty() {
        return Ok(PushOutcome {
            unpack_ok: true,
            statuses: Vec::new(),
        });
    }

    let ad = {
        let mut reader = PktLineReader::new(conn.reader());
        capability::read_advertisement(&mut reader)?
    };
    let caps = capability::push_capabilities(&ad.capabilities);
    let report_status = ad.capabilities.has("report-status");
    let sideband_mode = capability::select_sideband(&ad.capabilities);

    let advertised = |name: &str| -> Option<ObjectId> {
        ad.refs
            .iter()
            .find(|(_, n)| n == name)
            .map(|(oid, _)| *oid)
    };
    let null = odb.algorithm().null_oid();

    // Command section: `old new name` lines, capabilities on the first.
    let mut commands = Vec::new();
    for update in updates {
        let old = update
            .expected
            .or_else(|| advertised(&update.name))
            .unwrap_or(null);
        let new = update.new.unwrap_or(null);
        commands.push((old, new, update.name.clone()));
    }

    {
        let mut writer = PktLineWriter::new(conn.writer());
        for (i, (old, new, name)) in commands.iter().enumerate() {
            let line = if i == 0 {
                format!("{old} {new} {name}\0{}", caps.join(" "))
            } else {
                format!("{old} {new} {name}")
            };
            writer.write_text(&line)?;
        }
        writer.write_flush()?;
    }

    // Pack section: objects reachable from the new tips but not from what
    // the remote already has. Pure deletes send no pack.
    let new_tips: Vec<ObjectId> = updates.iter().filter_map(|u| u.new).collect();
    if !new_tips.is_empty() {
        options.cancel.check().map_err(|_| ProtocolError::Cancelled)?;
        let remote_tips: Vec<ObjectId> = ad.refs.iter().map(|(oid, _)| *oid).collect();
        let objects = missing_objects(odb, &new_tips, &remote_tips)?;
        options
            .progress
            .report("Counting objects", objects.len() as u64, Some(objects.len() as u64));

        let mut writer = PackWriter::new(odb.algorithm(), objects.len() as u32);
        for (oid, obj_type) in &objects {
            let (_, body) = odb.read_raw(oid)?;
            writer.write_object(*obj_type, &body)?;
            options.cancel.check().map_err(|_| ProtocolError::Cancelled)?;
        }
        let (pack_bytes, _entries, _checksum) = writer.finish()?;
        options
            .progress
            .report("Writing objects", pack_bytes.len() as u64, None);
        conn.writer().write_all(&pack_bytes)?;
        conn.writer().flush()?;
    }

    if !report_status {
        return Ok(PushOutcome {
            unpack_ok: true,
            statuses: Vec::new(),
        });
    }

    // Status section; under sideband the report itself is pkt-line framed
    // inside band 1.
    let mut reader = PktLineReader::new(conn.reader());
    let report_bytes = match sideband_mode {
        SidebandMode::None => {
            let mut lines = Vec::new();
            for line in reader.read_until_flush()? {
                lines.extend_from_slice(&line);
            }
            return parse_report(&mut PktFreeLines::new(lines));
        }
        _ => sideband::demux(&mut reader, &options.progress)?,
    };
    let mut inner = PktLineReader::new(Cursor::new(report_bytes));
    let mut lines = Vec::new();
    for line in inner.read_until_flush()? {
        lines.extend_from_slice(&line);
    }
    parse_report(&mut PktFreeLines::new(lines))
}

/// Line iterator over already-deframed report text.
struct PktFreeLines {
    data: Vec<u8>,
}

impl PktFreeLines {
    fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

fn parse_report(lines: &mut PktFreeLines) -> Result<PushOutcome, ProtocolError> {
    let text = String::from_utf8_lossy(&lines.data);
    let mut unpack_ok = false;
    let mut statuses = Vec::new();
    for line in text.lines() {
        if let Some(status) = line.strip_prefix("unpack ") {
            unpack_ok = status == "ok";
        } else if let Some(name) = line.strip_prefix("ok ") {
            statuses.push((name.to_string(), Ok(())));
        } else if let Some(rest) = line.strip_prefix("ng ") {
            let (name, reason) = rest.split_once(' ').unwrap_or((rest, "unspecified"));
            statuses.push((name.to_string(), Err(reason.to_string())));
        }
    }
    Ok(PushOutcome {
        unpack_ok,
        statuses,
    })
}

/// Objects reachable from `tips` but not from `known`, as `(oid, type)` in
/// a parent-before-child-friendly order (commits first, then trees, blobs,
/// tags interleaved as encountered).
pub fn missing_objects(
    odb: &ObjectDatabase,
    tips: &[ObjectId],
    known: &[ObjectId],
) -> Result<Vec<(ObjectId, ObjectType)>, ProtocolError> {
    // Everything reachable from `known` that exists locally is excluded.
    let mut excluded = HashSet::new();
    for tip in known {
        if odb.has_object(tip) {
            collect(odb, *tip, &mut excluded, &mut Vec::new())?;
        }
    }

    let mut seen = excluded.clone();
    let mut ordered = Vec::new();
    for tip in tips {
        collect(odb, *tip, &mut seen, &mut ordered)?;
    }
    Ok(ordered)
}

/// BFS from `start`, recording newly seen objects into `out`.
fn collect(
    odb: &ObjectDatabase,
    start: ObjectId,
    seen: &mut HashSet<ObjectId>,
    out: &mut Vec<(ObjectId, ObjectType)>,
) -> Result<(), ProtocolError> {
    let mut queue = VecDeque::new();
    if seen.insert(start) {
        queue.push_back(start);
    }
    while let Some(oid) = queue.pop_front() {
        let obj = odb.read_object(&oid)?;
        out.push((oid, obj.object_type()));
        match obj {
            Object::Commit(commit) => {
                for parent in &commit.parents {
                    if odb.has_object(parent) && seen.insert(*parent) {
                        queue.push_back(*parent);
                    }
                }
                if seen.insert(commit.tree) {
                    queue.push_back(commit.tree);
                }
            }
            Object::Tree(tree) => {
                for entry in tree.iter() {
                    if entry.mode.is_gitlink() {
                        continue;
                    }
                    if seen.insert(entry.oid) {
                        queue.push_back(entry.oid);
                    }
                }
            }
            Object::Tag(tag) => {
                if seen.insert(tag.target) {
                    queue.push_back(tag.target);
                }
            }
            Object::Blob(_) => {}
        }
    }
    Ok(())
}

/// Build the `old new name` command triple as text (exposed for tests and
/// the repository facade's dry-run path).
pub fn format_command(old: &ObjectId, new: &ObjectId, name: &str) -> String {
    format!("{old} {new} {name}")
}
