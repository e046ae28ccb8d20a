//! DIRC serialization and tree building.

use bstr::BString;
use ugit_hash::hasher::Hasher;
use ugit_hash::ObjectId;
use ugit_object::{FileMode, ObjectType, Tree, TreeEntry};
use ugit_odb::ObjectDatabase;

use crate::entry::{IndexEntry, Stage};
use crate::read::ondisk_entry_size;
use crate::tree_cache::CacheTree;
use crate::{Index, IndexError, INDEX_SIGNATURE};

/// Serialize the index, choosing v3 only when extended flags demand it.
pub fn serialize_index(index: &Index) -> Result<Vec<u8>, IndexError> {
    let version: u32 = if index.entries.iter().any(|e| e.flags.needs_v3()) {
        3
    } else {
        2
    };

    let mut buf = Vec::new();
    buf.extend_from_slice(INDEX_SIGNATURE);
    buf.extend_from_slice(&version.to_be_bytes());
    buf.extend_from_slice(&(index.entries.len() as u32).to_be_bytes());

    for entry in &index.entries {
        write_entry(&mut buf, entry, version);
    }

    if let Some(tree) = &index.cache_tree {
        let data = tree.serialize();
        buf.extend_from_slice(CacheTree::SIGNATURE);
        buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
        buf.extend_from_slice(&data);
    }
    for ext in &index.unknown_extensions {
        buf.extend_from_slice(&ext.signature);
        buf.extend_from_slice(&(ext.data.len() as u32).to_be_bytes());
        buf.extend_from_slice(&ext.data);
    }

    let checksum = Hasher::digest(index.algo, &buf)?;
    buf.extend_from_slice(checksum.as_bytes());
    Ok(buf)
}

fn write_entry(buf: &mut Vec<u8>, entry: &IndexEntry, version: u32) {
    let start = buf.len();

    buf.extend_from_slice(&entry.stat.ctime_secs.to_be_bytes());
    buf.extend_from_slice(&entry.stat.ctime_nsecs.to_be_bytes());
    buf.extend_from_slice(&entry.stat.mtime_secs.to_be_bytes());
    buf.extend_from_slice(&entry.stat.mtime_nsecs.to_be_bytes());
    buf.extend_from_slice(&entry.stat.dev.to_be_bytes());
    buf.extend_from_slice(&entry.stat.ino.to_be_bytes());
    buf.extend_from_slice(&entry.mode.raw().to_be_bytes());
    buf.extend_from_slice(&entry.stat.uid.to_be_bytes());
    buf.extend_from_slice(&entry.stat.gid.to_be_bytes());
    buf.extend_from_slice(&entry.stat.size.to_be_bytes());
    buf.extend_from_slice(entry.oid.as_bytes());

    let extended = version >= 3 && entry.flags.needs_v3();
    // Path length is clamped into the low 12 bits.
    let mut flags: u16 = entry.path.len().min(0xfff) as u16;
    flags |= u16::from(entry.stage.as_u8()) << 12;
    if entry.flags.assume_valid {
        flags |= 0x8000;
    }
    if extended {
        flags |= 0x4000;
    }
    buf.extend_from_slice(&flags.to_be_bytes());

    if extended {
        let mut ext: u16 = 0;
        if entry.flags.skip_worktree {
            ext |= 0x4000;
        }
        if entry.flags.intent_to_add {
            ext |= 0x2000;
        }
        buf.extend_from_slice(&ext.to_be_bytes());
    }

    buf.extend_from_slice(&entry.path);

    let total = ondisk_entry_size(
        entry.path.len(),
        entry.oid.as_bytes().len(),
        extended,
    );
    buf.resize(start + total, 0);
}

/// Write the stage-0 entries out as a tree hierarchy, reusing valid cache
/// nodes and refreshing the cache with everything recomputed.
///
/// Returns the root tree OID.
pub fn write_tree(index: &mut Index, odb: &ObjectDatabase) -> Result<ObjectId, IndexError> {
    let staged: Vec<IndexEntry> = index
        .entries
        .iter()
        .filter(|e| e.stage == Stage::Normal)
        .cloned()
        .collect();

    let old_cache = index.cache_tree.take();
    let (oid, root) = build_subtree(&staged, b"", BString::from(""), old_cache.as_ref(), odb)?;
    index.cache_tree = Some(root);
    Ok(oid)
}

/// Recursively build the tree for entries under `prefix`, returning the
/// subtree OID and its refreshed cache node.
fn build_subtree(
    entries: &[IndexEntry],
    prefix: &[u8],
    node_name: BString,
    cached: Option<&CacheTree>,
    odb: &ObjectDatabase,
) -> Result<(ObjectId, CacheTree), IndexError> {
    // A still-valid cache node answers without touching the ODB.
    if let Some(node) = cached {
        if node.entry_count == entries.len() as i32 {
            if let Some(oid) = node.oid {
                return Ok((oid, node.clone()));
            }
        }
    }

    let mut tree = Tree::new();
    let mut children = Vec::new();
    let mut i = 0;
    while i < entries.len() {
        let rel = &entries[i].path[prefix.len()..];
        match rel.iter().position(|&b| b == b'/') {
            Some(slash) => {
                let dir: BString = rel[..slash].into();
                let mut full_prefix = prefix.to_vec();
                full_prefix.extend_from_slice(&dir);
                full_prefix.push(b'/');

                let end = entries[i..]
                    .iter()
                    .position(|e| !e.path.starts_with(&full_prefix))
                    .map(|p| i + p)
                    .unwrap_or(entries.len());

                let sub_cached = cached
                    .and_then(|c| c.children.iter().find(|child| child.name == dir));
                let (sub_oid, sub_node) = build_subtree(
                    &entries[i..end],
                    &full_prefix,
                    dir.clone(),
                    sub_cached,
                    odb,
                )?;
                tree.entries.push(TreeEntry {
                    mode: FileMode::Tree,
                    name: dir,
                    oid: sub_oid,
                });
                children.push(sub_node);
                i = end;
            }
            None => {
                tree.entries.push(TreeEntry {
                    mode: entries[i].mode,
                    name: rel.into(),
                    oid: entries[i].oid,
                });
                i += 1;
            }
        }
    }

    tree.sort();
    let oid = odb.write(ObjectType::Tree, &tree.serialize_content())?;
    Ok((
        oid,
        CacheTree {
            name: node_name,
            entry_count: entries.len() as i32,
            children,
            oid: Some(oid),
        },
    ))
}
