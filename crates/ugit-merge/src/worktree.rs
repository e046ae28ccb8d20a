//! The worktree surface checkout writes through.
//!
//! Checkout is the consumer, so the trait lives here; the repository crate
//! supplies the native filesystem implementation, and [`MemWorktree`] backs
//! bare extraction and tests.

use std::collections::BTreeMap;
use std::io;
use std::sync::RwLock;

use bstr::{BStr, BString};

/// Minimal stat result for change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorktreeStat {
    pub size: u64,
    pub is_symlink: bool,
    pub executable: bool,
}

/// Abstract file view of the working directory. Paths are repo-relative,
/// slash-separated byte strings.
pub trait WorktreeBackend: Send + Sync {
    fn read(&self, path: &BStr) -> io::Result<Vec<u8>>;
    fn write(&self, path: &BStr, data: &[u8]) -> io::Result<()>;
    fn remove(&self, path: &BStr) -> io::Result<()>;
    /// `None` when the path does not exist.
    fn stat(&self, path: &BStr) -> io::Result<Option<WorktreeStat>>;
    /// Every file under the root (recursive), sorted.
    fn list_files(&self) -> io::Result<Vec<BString>>;
    fn set_executable(&self, path: &BStr, executable: bool) -> io::Result<()>;
    fn symlink(&self, path: &BStr, target: &BStr) -> io::Result<()>;
    fn read_link(&self, path: &BStr) -> io::Result<BString>;
}

#[derive(Debug, Clone)]
struct MemEntry {
    data: Vec<u8>,
    executable: bool,
    symlink: bool,
}

/// In-memory worktree: used by the virtual extraction path (`ungit`-style
/// tree export without a retained git-directory) and by tests.
#[derive(Default)]
pub struct MemWorktree {
    files: RwLock<BTreeMap<BString, MemEntry>>,
}

impl MemWorktree {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorktreeBackend for MemWorktree {
    fn read(&self, path: &BStr) -> io::Result<Vec<u8>> {
        self.files
            .read()
            .unwrap()
            .get(path)
            .map(|e| e.data.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
    }

    fn write(&self, path: &BStr, data: &[u8]) -> io::Result<()> {
        self.files.write().unwrap().insert(
            BString::from(path),
            MemEntry {
                data: data.to_vec(),
                executable: false,
                symlink: false,
            },
        );
        Ok(())
    }

    fn remove(&self, path: &BStr) -> io::Result<()> {
        self.files
            .write()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
    }

    fn stat(&self, path: &BStr) -> io::Result<Option<WorktreeStat>> {
        Ok(self.files.read().unwrap().get(path).map(|e| WorktreeStat {
            size: e.data.len() as u64,
            is_symlink: e.symlink,
            executable: e.executable,
        }))
    }

    fn list_files(&self) -> io::Result<Vec<BString>> {
        Ok(self.files.read().unwrap().keys().cloned().collect())
    }

    fn set_executable(&self, path: &BStr, executable: bool) -> io::Result<()> {
        let mut files = self.files.write().unwrap();
        let entry = files
            .get_mut(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))?;
        entry.executable = executable;
        Ok(())
    }

    fn symlink(&self, path: &BStr, target: &BStr) -> io::Result<()> {
        self.files.write().unwrap().insert(
            BString::from(path),
            MemEntry {
                data: target.to_vec(),
                executable: false,
                symlink: true,
            },
        );
        Ok(())
    }

    fn read_link(&self, path: &BStr) -> io::Result<BString> {
        let files = self.files.read().unwrap();
        let entry = files
            .get(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))?;
        if !entry.symlink {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a symlink"));
        }
        Ok(BString::from(entry.data.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bstr::ByteSlice;

    #[test]
    fn write_read_remove() {
        let wt = MemWorktree::new();
        wt.write(b"dir/file.txt".as_bstr(), b"hi").unwrap();
        assert_eq!(wt.read(b"dir/file.txt".as_bstr()).unwrap(), b"hi");
        assert_eq!(
            wt.stat(b"dir/file.txt".as_bstr()).unwrap().unwrap().size,
            2
        );
        wt.remove(b"dir/file.txt".as_bstr()).unwrap();
        assert!(wt.stat(b"dir/file.txt".as_bstr()).unwrap().is_none());
    }

    #[test]
    fn executable_bit() {
        let wt = MemWorktree::new();
        wt.write(b"run.sh".as_bstr(), b"#!/bin/sh\n").unwrap();
        wt.set_executable(b"run.sh".as_bstr(), true).unwrap();
        assert!(wt.stat(b"run.sh".as_bstr()).unwrap().unwrap().executable);
    }

    #[test]
    fn symlinks() {
        let wt = MemWorktree::new();
        wt.symlink(b"link".as_bstr(), b"target/file".as_bstr()).unwrap();
        let stat = wt.stat(b"link".as_bstr()).unwrap().unwrap();
        assert!(stat.is_symlink);
        assert_eq!(wt.read_link(b"link".as_bstr()).unwrap(), "target/file");
    }

    #[test]
    fn listing_is_sorted() {
        let wt = MemWorktree::new();
        wt.write(b"b".as_bstr(), b"").unwrap();
        wt.write(b"a/z".as_bstr(), b"").unwrap();
        wt.write(b"a/a".as_bstr(), b"").unwrap();
        assert_eq!(wt.list_files().unwrap(), vec!["a/a", "a/z", "b"]);
    }
}
