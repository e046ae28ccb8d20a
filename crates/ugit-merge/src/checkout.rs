//! Checkout planning and application.
//!
//! `analyze_checkout` computes the minimal operation set taking the workdir
//! to a target tree without silently clobbering local changes;
//! `apply_checkout` executes it with rollback, fanning file materialization
//! out across workers. Index mutation happens only after every workdir
//! write succeeded.

use std::collections::BTreeMap;
use std::sync::Mutex;

use bstr::{BString, ByteSlice};
use rayon::prelude::*;
use ugit_hash::hasher::Hasher;
use ugit_hash::ObjectId;
use ugit_index::{Index, IndexEntry, Stage};
use ugit_object::FileMode;
use ugit_odb::ObjectDatabase;
use ugit_utils::progress::ProgressSink;

use crate::tree::{flatten_tree, SideEntry};
use crate::worktree::WorktreeBackend;
use crate::MergeError;

/// One planned workdir operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutOp {
    Create {
        path: BString,
        mode: FileMode,
        oid: ObjectId,
    },
    Update {
        path: BString,
        mode: FileMode,
        oid: ObjectId,
    },
    Delete {
        path: BString,
    },
}

impl CheckoutOp {
    pub fn path(&self) -> &BString {
        match self {
            Self::Create { path, .. } | Self::Update { path, .. } | Self::Delete { path } => path,
        }
    }
}

/// The computed plan plus the index image of the target tree.
#[derive(Debug)]
pub struct CheckoutPlan {
    pub ops: Vec<CheckoutOp>,
    pub target_entries: BTreeMap<BString, SideEntry>,
}

/// How the workdir copy of a path relates to the index and target.
fn workdir_oid(
    worktree: &dyn WorktreeBackend,
    odb: &ObjectDatabase,
    path: &BString,
) -> Result<Option<ObjectId>, MergeError> {
    match worktree.stat(path.as_bstr())? {
        None => Ok(None),
        Some(_) => {
            let content = worktree.read(path.as_bstr())?;
            Ok(Some(Hasher::hash_object(
                odb.algorithm(),
                "blob",
                &content,
            ).map_err(ugit_odb::OdbError::from)?))
        }
    }
}

/// Plan the sync from the current index/workdir to `target_tree`.
///
/// With `force` off, a path whose content differs from both the index and
/// the target is never touched; such paths fail the analysis with
/// `CheckoutWouldOverwrite`.
pub fn analyze_checkout(
    odb: &ObjectDatabase,
    target_tree: ObjectId,
    index: &Index,
    worktree: &dyn WorktreeBackend,
    force: bool,
) -> Result<CheckoutPlan, MergeError> {
    let target = flatten_tree(odb, target_tree)?;
    let staged: BTreeMap<BString, SideEntry> = index
        .entries(None)
        .filter(|e| e.stage == Stage::Normal)
        .map(|e| (e.path.clone(), (e.mode, e.oid)))
        .collect();

    let mut ops = Vec::new();
    let mut blocked: Vec<BString> = Vec::new();

    for (path, &(mode, oid)) in &target {
        let on_disk = workdir_oid(worktree, odb, path)?;
        match staged.get(path) {
            Some(&(_, index_oid)) => {
                let clean = on_disk == Some(index_oid);
                if index_oid == oid {
                    // Unchanged by the checkout; restore only if missing.
                    if on_disk.is_none() {
                        ops.push(CheckoutOp::Create { path: path.clone(), mode, oid });
                    }
                    // A dirty copy of an unchanged file survives checkout.
                } else if on_disk.is_none() || clean {
                    ops.push(CheckoutOp::Update { path: path.clone(), mode, oid });
                } else if on_disk == Some(oid) {
                    // Workdir already holds the target content.
                } else if force {
                    ops.push(CheckoutOp::Update { path: path.clone(), mode, oid });
                } else {
                    blocked.push(path.clone());
                }
            }
            None => match on_disk {
                None => ops.push(CheckoutOp::Create { path: path.clone(), mode, oid }),
                Some(disk_oid) if disk_oid == oid => {
                    // Untracked copy already matches; just index it.
                }
                Some(_) if force => {
                    ops.push(CheckoutOp::Update { path: path.clone(), mode, oid })
                }
                Some(_) => blocked.push(path.clone()),
            },
        }
    }

    for (path, &(_, index_oid)) in &staged {
        if target.contains_key(path) {
            continue;
        }
        match workdir_oid(worktree, odb, path)? {
            None => ops.push(CheckoutOp::Delete { path: path.clone() }),
            Some(disk_oid) if disk_oid == index_oid || force => {
                ops.push(CheckoutOp::Delete { path: path.clone() })
            }
            Some(_) => blocked.push(path.clone()),
        }
    }

    if !blocked.is_empty() {
        blocked.sort();
        return Err(MergeError::CheckoutWouldOverwrite { paths: blocked });
    }

    Ok(CheckoutPlan {
        ops,
        target_entries: target,
    })
}

/// Execute a plan. File writes fan out across workers (each path is written
/// exactly once, so cross-worker ordering is immaterial); a mid-flight
/// failure rolls already-written paths back to their prior bytes before the
/// error surfaces. On success the index is rebuilt to the target image —
/// the caller persists it (and moves refs) afterwards.
pub fn apply_checkout(
    plan: &CheckoutPlan,
    odb: &ObjectDatabase,
    index: &mut Index,
    worktree: &dyn WorktreeBackend,
    progress: &ProgressSink,
) -> Result<(), MergeError> {
    // Snapshot prior state of every touched path for rollback.
    let mut prior: BTreeMap<BString, Option<Vec<u8>>> = BTreeMap::new();
    for op in &plan.ops {
        let path = op.path();
        let existing = match worktree.stat(path.as_bstr())? {
            Some(_) => Some(worktree.read(path.as_bstr())?),
            None => None,
        };
        prior.insert(path.clone(), existing);
    }

    let total = plan.ops.len() as u64;
    let done = Mutex::new(0u64);

    let write_ops: Vec<&CheckoutOp> = plan
        .ops
        .iter()
        .filter(|op| !matches!(op, CheckoutOp::Delete { .. }))
        .collect();

    let result: Result<(), MergeError> = write_ops
        .par_iter()
        .map(|op| -> Result<(), MergeError> {
            let (path, mode, oid) = match op {
                CheckoutOp::Create { path, mode, oid }
                | CheckoutOp::Update { path, mode, oid } => (path, mode, oid),
                CheckoutOp::Delete { .. } => unreachable!("filtered"),
            };
            let (_, content) = odb.read_raw(oid)?;
            if mode.is_symlink() {
                worktree.symlink(path.as_bstr(), content.as_bstr())?;
            } else {
                worktree.write(path.as_bstr(), &content)?;
                worktree.set_executable(path.as_bstr(), *mode == FileMode::Executable)?;
            }
            let mut done = done.lock().unwrap();
            *done += 1;
            progress.report("Updating files", *done, Some(total));
            Ok(())
        })
        .collect();

    if let Err(e) = result {
        rollback(worktree, &prior);
        return Err(e);
    }

    for op in &plan.ops {
        if let CheckoutOp::Delete { path } = op {
            if let Err(e) = worktree.remove(path.as_bstr()) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    rollback(worktree, &prior);
                    return Err(e.into());
                }
            }
            let mut done = done.lock().unwrap();
            *done += 1;
            progress.report("Updating files", *done, Some(total));
        }
    }

    // Workdir fully materialized; now the index may move.
    index.clear();
    for (path, (mode, oid)) in &plan.target_entries {
        index.upsert(IndexEntry::new(path.clone(), *oid, *mode, Stage::Normal));
    }
    Ok(())
}

fn rollback(worktree: &dyn WorktreeBackend, prior: &BTreeMap<BString, Option<Vec<u8>>>) {
    for (path, state) in prior {
        match state {
            Some(content) => {
                let _ = worktree.write(path.as_bstr(), content);
            }
            None => {
                let _ = worktree.remove(path.as_bstr());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::write_tree_from_entries;
    use crate::worktree::MemWorktree;
    use std::sync::Arc;
    use ugit_hash::HashAlgorithm;
    use ugit_object::ObjectType;
    use ugit_store::MemStore;

    fn odb() -> ObjectDatabase {
        ObjectDatabase::open(Arc::new(MemStore::new()), HashAlgorithm::Sha1).unwrap()
    }

    fn tree_of(db: &ObjectDatabase, files: &[(&str, &str)]) -> ObjectId {
        let mut entries = BTreeMap::new();
        for (path, content) in files {
            let oid = db.write(ObjectType::Blob, content.as_bytes()).unwrap();
            entries.insert(BString::from(*path), (FileMode::Regular, oid));
        }
        write_tree_from_entries(db, &entries).unwrap()
    }

    fn checkout_all(
        db: &ObjectDatabase,
        tree: ObjectId,
        index: &mut Index,
        worktree: &dyn WorktreeBackend,
        force: bool,
    ) -> Result<(), MergeError> {
        let plan = analyze_checkout(db, tree, index, worktree, force)?;
        apply_checkout(&plan, db, index, worktree, &ProgressSink::discard())
    }

    #[test]
    fn fresh_checkout_materializes_everything() {
        let db = odb();
        let wt = MemWorktree::new();
        let mut index = Index::new(HashAlgorithm::Sha1);
        let tree = tree_of(&db, &[("a.txt", "A"), ("dir/b.txt", "B")]);

        checkout_all(&db, tree, &mut index, &wt, false).unwrap();
        assert_eq!(wt.read(b"a.txt".as_bstr()).unwrap(), b"A");
        assert_eq!(wt.read(b"dir/b.txt".as_bstr()).unwrap(), b"B");
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn switching_trees_updates_and_deletes() {
        let db = odb();
        let wt = MemWorktree::new();
        let mut index = Index::new(HashAlgorithm::Sha1);
        let first = tree_of(&db, &[("keep", "same"), ("change", "v1"), ("drop", "gone")]);
        let second = tree_of(&db, &[("keep", "same"), ("change", "v2"), ("new", "born")]);

        checkout_all(&db, first, &mut index, &wt, false).unwrap();
        checkout_all(&db, second, &mut index, &wt, false).unwrap();

        assert_eq!(wt.read(b"change".as_bstr()).unwrap(), b"v2");
        assert_eq!(wt.read(b"new".as_bstr()).unwrap(), b"born");
        assert!(wt.stat(b"drop".as_bstr()).unwrap().is_none());
        assert!(index.get(b"drop".as_bstr()).is_none());
    }

    #[test]
    fn dirty_file_blocks_checkout_without_force() {
        let db = odb();
        let wt = MemWorktree::new();
        let mut index = Index::new(HashAlgorithm::Sha1);
        let first = tree_of(&db, &[("f", "v1")]);
        let second = tree_of(&db, &[("f", "v2")]);

        checkout_all(&db, first, &mut index, &wt, false).unwrap();
        wt.write(b"f".as_bstr(), b"local edits").unwrap();

        let err = checkout_all(&db, second, &mut index, &wt, false).unwrap_err();
        match err {
            MergeError::CheckoutWouldOverwrite { paths } => {
                assert_eq!(paths, vec![BString::from("f")]);
            }
            other => panic!("expected overwrite error, got {other}"),
        }
        // The local edit survived.
        assert_eq!(wt.read(b"f".as_bstr()).unwrap(), b"local edits");

        // Force pushes through.
        checkout_all(&db, second, &mut index, &wt, true).unwrap();
        assert_eq!(wt.read(b"f".as_bstr()).unwrap(), b"v2");
    }

    #[test]
    fn dirty_but_unchanged_file_survives_branch_switch() {
        let db = odb();
        let wt = MemWorktree::new();
        let mut index = Index::new(HashAlgorithm::Sha1);
        let first = tree_of(&db, &[("stable", "same"), ("other", "v1")]);
        let second = tree_of(&db, &[("stable", "same"), ("other", "v2")]);

        checkout_all(&db, first, &mut index, &wt, false).unwrap();
        wt.write(b"stable".as_bstr(), b"dirty local").unwrap();

        checkout_all(&db, second, &mut index, &wt, false).unwrap();
        // "stable" is identical in both trees, so the dirty copy stays.
        assert_eq!(wt.read(b"stable".as_bstr()).unwrap(), b"dirty local");
        assert_eq!(wt.read(b"other".as_bstr()).unwrap(), b"v2");
    }

    #[test]
    fn untracked_matching_content_is_adopted() {
        let db = odb();
        let wt = MemWorktree::new();
        let mut index = Index::new(HashAlgorithm::Sha1);
        wt.write(b"f".as_bstr(), b"exact content").unwrap();
        let tree = tree_of(&db, &[("f", "exact content")]);

        checkout_all(&db, tree, &mut index, &wt, false).unwrap();
        assert!(index.get(b"f".as_bstr()).is_some());
    }

    #[test]
    fn untracked_conflicting_content_blocks() {
        let db = odb();
        let wt = MemWorktree::new();
        let mut index = Index::new(HashAlgorithm::Sha1);
        wt.write(b"f".as_bstr(), b"unrelated").unwrap();
        let tree = tree_of(&db, &[("f", "target content")]);

        assert!(matches!(
            checkout_all(&db, tree, &mut index, &wt, false),
            Err(MergeError::CheckoutWouldOverwrite { .. })
        ));
    }

    #[test]
    fn repeated_checkout_is_idempotent() {
        let db = odb();
        let wt = MemWorktree::new();
        let mut index = Index::new(HashAlgorithm::Sha1);
        let tree = tree_of(&db, &[("a", "1"), ("b/c", "2")]);

        checkout_all(&db, tree, &mut index, &wt, false).unwrap();
        let files_before = wt.list_files().unwrap();
        let entries_before = index.entries.clone();

        checkout_all(&db, tree, &mut index, &wt, false).unwrap();
        assert_eq!(wt.list_files().unwrap(), files_before);
        assert_eq!(index.entries, entries_before);
    }
}
