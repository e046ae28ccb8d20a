//! Merge-base computation.

use std::collections::{HashMap, HashSet, VecDeque};

use ugit_hash::ObjectId;
use ugit_object::Object;
use ugit_odb::ObjectDatabase;

use crate::MergeError;

// Paint flags for the two-color walk.
const PAINT_OURS: u8 = 1;
const PAINT_THEIRS: u8 = 2;
const PAINT_RESULT: u8 = 4;

/// The lowest common ancestor of two commits, or `None` for unrelated
/// histories. With several candidate ancestors the best (most recent by
/// commit time) is returned; [`merge_bases`] exposes the full set.
pub fn merge_base(
    odb: &ObjectDatabase,
    ours: ObjectId,
    theirs: ObjectId,
) -> Result<Option<ObjectId>, MergeError> {
    let bases = merge_bases(odb, ours, theirs)?;
    Ok(bases.into_iter().next())
}

/// All independent common ancestors, most recent first.
pub fn merge_bases(
    odb: &ObjectDatabase,
    ours: ObjectId,
    theirs: ObjectId,
) -> Result<Vec<ObjectId>, MergeError> {
    if ours == theirs {
        return Ok(vec![ours]);
    }

    // Paint ancestors of both tips; a commit carrying both colors is a
    // common ancestor. Stop descending once a node is doubly painted.
    let mut paint: HashMap<ObjectId, u8> = HashMap::new();
    let mut times: HashMap<ObjectId, i64> = HashMap::new();
    let mut queue: VecDeque<(ObjectId, u8)> = VecDeque::new();
    queue.push_back((ours, PAINT_OURS));
    queue.push_back((theirs, PAINT_THEIRS));
    let mut common = Vec::new();

    while let Some((oid, color)) = queue.pop_front() {
        let new_bits = {
            let entry = paint.entry(oid).or_insert(0);
            let new_bits = color & !*entry;
            *entry |= new_bits;
            if *entry & (PAINT_OURS | PAINT_THEIRS) == (PAINT_OURS | PAINT_THEIRS)
                && *entry & PAINT_RESULT == 0
            {
                *entry |= PAINT_RESULT;
                common.push(oid);
            }
            new_bits
        };
        if new_bits == 0 {
            continue;
        }

        let commit = match odb.read_object(&oid)? {
            Object::Commit(c) => c,
            _ => return Err(MergeError::NotACommit(oid)),
        };
        times.insert(oid, commit.committer.date.timestamp);
        for parent in &commit.parents {
            queue.push_back((*parent, new_bits));
        }
    }

    // Drop common ancestors that are ancestors of other common ancestors.
    let mut independent = Vec::new();
    for &candidate in &common {
        let mut dominated = false;
        for &other in &common {
            if other != candidate && is_ancestor(odb, candidate, other)? {
                dominated = true;
                break;
            }
        }
        if !dominated {
            independent.push(candidate);
        }
    }

    independent.sort_by_key(|oid| std::cmp::Reverse(times.get(oid).copied().unwrap_or(0)));
    Ok(independent)
}

/// Whether `ancestor` is reachable from `descendant`.
pub fn is_ancestor(
    odb: &ObjectDatabase,
    ancestor: ObjectId,
    descendant: ObjectId,
) -> Result<bool, MergeError> {
    if ancestor == descendant {
        return Ok(true);
    }
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(descendant);
    while let Some(oid) = queue.pop_front() {
        if !seen.insert(oid) {
            continue;
        }
        if oid == ancestor {
            return Ok(true);
        }
        if let Object::Commit(commit) = odb.read_object(&oid)? {
            for parent in &commit.parents {
                queue.push_back(*parent);
            }
        }
    }
    Ok(false)
}
