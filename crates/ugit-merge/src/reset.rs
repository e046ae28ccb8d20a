//! Reset semantics: soft, mixed, hard.

use ugit_hash::ObjectId;
use ugit_index::{Index, IndexEntry, Stage};
use ugit_odb::ObjectDatabase;
use ugit_ref::{RefName, RefStore, WriteOptions};
use ugit_utils::date::Signature;
use ugit_utils::progress::ProgressSink;

use crate::checkout::{analyze_checkout, apply_checkout};
use crate::tree::{commit_tree, flatten_tree};
use crate::worktree::WorktreeBackend;
use crate::MergeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Move HEAD only.
    Soft,
    /// Move HEAD and reload the index from the target tree.
    Mixed,
    /// Move HEAD, index, and workdir (forced checkout).
    Hard,
}

/// Reset the current branch to `target`.
///
/// The caller persists the index afterwards; the HEAD move itself commits
/// through the ref store's lock protocol and lands in the reflog.
pub fn reset(
    odb: &ObjectDatabase,
    refs: &RefStore,
    index: &mut Index,
    worktree: Option<&dyn WorktreeBackend>,
    target: ObjectId,
    mode: ResetMode,
    committer: &Signature,
) -> Result<(), MergeError> {
    let tree = commit_tree(odb, target)?;
    let head = RefName::new("HEAD").expect("HEAD is valid");

    refs.write(
        &head,
        target,
        WriteOptions {
            expected: None,
            message: Some(format!("reset: moving to {target}")),
        },
        committer,
    )?;

    match mode {
        ResetMode::Soft => {}
        ResetMode::Mixed => {
            index.clear();
            for (path, (entry_mode, oid)) in flatten_tree(odb, tree)? {
                index.upsert(IndexEntry::new(path, oid, entry_mode, Stage::Normal));
            }
        }
        ResetMode::Hard => {
            let worktree = worktree.expect("hard reset requires a worktree");
            let plan = analyze_checkout(odb, tree, index, worktree, true)?;
            apply_checkout(&plan, odb, index, worktree, &ProgressSink::discard())?;
        }
    }
    Ok(())
}
