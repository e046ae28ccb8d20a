//! Merge and checkout core: three-way merge, workdir synchronization, reset.

pub mod base;
pub mod checkout;
pub mod content;
pub mod diff;
pub mod reset;
pub mod tree;
pub mod worktree;

use bstr::BString;

pub use base::merge_base;
pub use checkout::{analyze_checkout, apply_checkout, CheckoutOp, CheckoutPlan};
pub use content::{ContentMergeResult, MergeLabels};
pub use reset::{reset, ResetMode};
pub use tree::{merge_commits, merge_trees, MergeCommitsResult, PathConflict, TreeMergeResult};
pub use worktree::{MemWorktree, WorktreeBackend, WorktreeStat};

use ugit_config::ConflictStyle;

/// Options shared by merge entry points.
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub conflict_style: ConflictStyle,
    /// Refuse the fast-forward shortcut and always produce a merge tree.
    pub no_ff: bool,
}

/// What kind of conflict a path is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Both sides changed the content incompatibly.
    Content,
    /// One side modified, the other deleted.
    ModifyDelete,
    /// Both sides added different content.
    AddAdd,
    /// Both sides changed it and at least one side is binary.
    Binary,
}

/// Errors from merge, checkout, and reset.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("merge produced {} conflicted path(s)", paths.len())]
    MergeConflict { paths: Vec<(BString, ConflictKind)> },

    #[error("checkout would overwrite {} local change(s)", paths.len())]
    CheckoutWouldOverwrite { paths: Vec<BString> },

    #[error("no merge base between {ours} and {theirs}")]
    NoMergeBase {
        ours: ugit_hash::ObjectId,
        theirs: ugit_hash::ObjectId,
    },

    #[error("not a commit: {0}")]
    NotACommit(ugit_hash::ObjectId),

    #[error(transparent)]
    Odb(#[from] ugit_odb::OdbError),

    #[error(transparent)]
    Index(#[from] ugit_index::IndexError),

    #[error(transparent)]
    Ref(#[from] ugit_ref::RefError),

    #[error(transparent)]
    Object(#[from] ugit_object::ObjectError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
