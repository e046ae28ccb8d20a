//! Filesystem backend: keys map to paths under the git-dir root, producing
//! a layout bit-exact with stock git.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::{Payload, Storage, StoreError};

/// Payloads at or above this size are memory-mapped instead of copied.
const MMAP_THRESHOLD: u64 = 64 * 1024;

pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        // Reject traversal; keys are always relative slash paths.
        if key.is_empty()
            || key.starts_with('/')
            || key.split('/').any(|c| c.is_empty() || c == "." || c == "..")
        {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.root.join(key))
    }

    fn ensure_parent(path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn collect_keys(
        &self,
        dir: &Path,
        rel: &mut String,
        out: &mut Vec<String>,
    ) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let prev_len = rel.len();
            if !rel.is_empty() {
                rel.push('/');
            }
            rel.push_str(&name);
            if entry.file_type()?.is_dir() {
                self.collect_keys(&entry.path(), rel, out)?;
            } else {
                out.push(rel.clone());
            }
            rel.truncate(prev_len);
        }
        Ok(())
    }
}

impl Storage for FsStore {
    fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::not_found(key)),
            Err(e) => Err(e.into()),
        }
    }

    fn read_payload(&self, key: &str) -> Result<Payload, StoreError> {
        let path = self.path_for(key)?;
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::not_found(key))
            }
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len();
        if len >= MMAP_THRESHOLD {
            let map = unsafe { memmap2::Mmap::map(&file)? };
            Ok(Payload::Mapped(map))
        } else {
            Ok(Payload::Owned(fs::read(&path)?))
        }
    }

    fn write(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        Self::ensure_parent(&path)?;

        // Stage in a sibling temp file so the rename stays on one filesystem.
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!(".{file_name}.tmp{}", std::process::id()));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        match fs::rename(&tmp, &path) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                Err(e.into())
            }
        }
    }

    fn write_exclusive(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        Self::ensure_parent(&path)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    StoreError::already_exists(key)
                } else {
                    StoreError::Io(e)
                }
            })?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::not_found(key)),
            Err(e) => Err(e.into()),
        }
    }

    fn has(&self, key: &str) -> bool {
        self.path_for(key).map(|p| p.is_file()).unwrap_or(false)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        // Walk from the deepest existing directory implied by the prefix.
        let dir_part = match prefix.rfind('/') {
            Some(pos) => &prefix[..pos],
            None => "",
        };
        let start = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.root.join(dir_part)
        };
        if !start.is_dir() {
            return Ok(Vec::new());
        }

        let mut rel = dir_part.to_string();
        let mut keys = Vec::new();
        self.collect_keys(&start, &mut rel, &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StoreError> {
        let from_path = self.path_for(from)?;
        let to_path = self.path_for(to)?;
        Self::ensure_parent(&to_path)?;
        match fs::rename(&from_path, &to_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::not_found(from)),
            Err(e) => Err(e.into()),
        }
    }
}
