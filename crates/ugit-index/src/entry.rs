//! Index entry types.

use bstr::BString;
use ugit_hash::ObjectId;
use ugit_object::FileMode;

use crate::IndexError;

/// Merge stage of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Normal, no conflict.
    Normal,
    /// Common ancestor version.
    Base,
    /// Our side of the conflict.
    Ours,
    /// Their side of the conflict.
    Theirs,
}

impl Stage {
    pub fn from_u8(v: u8) -> Result<Self, IndexError> {
        match v {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Base),
            2 => Ok(Self::Ours),
            3 => Ok(Self::Theirs),
            other => Err(IndexError::InvalidEntry {
                offset: 0,
                reason: format!("invalid stage {other}"),
            }),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Base => 1,
            Self::Ours => 2,
            Self::Theirs => 3,
        }
    }
}

/// Filesystem stat data cached for change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatData {
    pub ctime_secs: u32,
    pub ctime_nsecs: u32,
    pub mtime_secs: u32,
    pub mtime_nsecs: u32,
    pub dev: u32,
    pub ino: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u32,
}

/// Per-entry flag bits beyond the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryFlags {
    /// CE_VALID: trust the cached stat data unconditionally.
    pub assume_valid: bool,
    /// CE_INTENT_TO_ADD (`add -N` placeholder). Extended, needs v3.
    pub intent_to_add: bool,
    /// CE_SKIP_WORKTREE (sparse checkout). Extended, needs v3.
    pub skip_worktree: bool,
}

impl EntryFlags {
    /// Extended bits force index format v3.
    pub fn needs_v3(&self) -> bool {
        self.intent_to_add || self.skip_worktree
    }
}

/// One index entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub path: BString,
    pub oid: ObjectId,
    pub mode: FileMode,
    pub stage: Stage,
    pub stat: StatData,
    pub flags: EntryFlags,
}

impl IndexEntry {
    /// A minimal entry carrying no stat data (as produced by merges and
    /// tree reads; the next status walk refreshes it).
    pub fn new(path: impl Into<BString>, oid: ObjectId, mode: FileMode, stage: Stage) -> Self {
        Self {
            path: path.into(),
            oid,
            mode,
            stage,
            stat: StatData::default(),
            flags: EntryFlags::default(),
        }
    }

    /// Sort key: strict lexicographic by path, then ascending stage.
    pub fn sort_key(&self) -> (&[u8], u8) {
        (self.path.as_ref(), self.stage.as_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ugit_hash::HashAlgorithm;

    fn oid() -> ObjectId {
        ObjectId::from_bytes(&[7u8; 20], HashAlgorithm::Sha1).unwrap()
    }

    #[test]
    fn stage_roundtrip() {
        for v in 0..=3u8 {
            assert_eq!(Stage::from_u8(v).unwrap().as_u8(), v);
        }
        assert!(Stage::from_u8(4).is_err());
    }

    #[test]
    fn sort_key_orders_path_then_stage() {
        let a = IndexEntry::new("a.txt", oid(), FileMode::Regular, Stage::Ours);
        let b = IndexEntry::new("a.txt", oid(), FileMode::Regular, Stage::Theirs);
        let c = IndexEntry::new("b.txt", oid(), FileMode::Regular, Stage::Normal);
        assert!(a.sort_key() < b.sort_key());
        assert!(b.sort_key() < c.sort_key());
    }

    #[test]
    fn extended_flags_need_v3() {
        assert!(!EntryFlags::default().needs_v3());
        assert!(EntryFlags { intent_to_add: true, ..Default::default() }.needs_v3());
        assert!(EntryFlags { skip_worktree: true, ..Default::default() }.needs_v3());
        assert!(!EntryFlags { assume_valid: true, ..Default::default() }.needs_v3());
    }
}
