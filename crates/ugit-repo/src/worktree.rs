//! Native filesystem worktree backend.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bstr::{BStr, BString, ByteSlice};
use ugit_merge::{WorktreeBackend, WorktreeStat};

pub struct FsWorktree {
    root: PathBuf,
}

impl FsWorktree {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &BStr) -> io::Result<PathBuf> {
        let rel = path.to_str().map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "non-UTF8 worktree path")
        })?;
        if rel.is_empty()
            || rel.starts_with('/')
            || rel.split('/').any(|c| c.is_empty() || c == "." || c == "..")
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid worktree path: {rel}"),
            ));
        }
        Ok(self.root.join(rel))
    }

    fn collect(&self, dir: &Path, rel: &mut BString, out: &mut Vec<BString>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if name == ".git" {
                continue;
            }
            let name_bytes = name.to_string_lossy().into_owned();
            let prev = rel.len();
            if !rel.is_empty() {
                rel.push(b'/');
            }
            rel.extend_from_slice(name_bytes.as_bytes());
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.collect(&entry.path(), rel, out)?;
            } else {
                out.push(rel.clone());
            }
            rel.truncate(prev);
        }
        Ok(())
    }
}

impl WorktreeBackend for FsWorktree {
    fn read(&self, path: &BStr) -> io::Result<Vec<u8>> {
        fs::read(self.resolve(path)?)
    }

    fn write(&self, path: &BStr, data: &[u8]) -> io::Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(full, data)
    }

    fn remove(&self, path: &BStr) -> io::Result<()> {
        let full = self.resolve(path)?;
        fs::remove_file(&full)?;
        // Prune now-empty parent directories up to the root.
        let mut dir = full.parent().map(Path::to_path_buf);
        while let Some(d) = dir {
            if d == self.root || fs::remove_dir(&d).is_err() {
                break;
            }
            dir = d.parent().map(Path::to_path_buf);
        }
        Ok(())
    }

    fn stat(&self, path: &BStr) -> io::Result<Option<WorktreeStat>> {
        let full = self.resolve(path)?;
        match fs::symlink_metadata(&full) {
            Ok(meta) => {
                #[cfg(unix)]
                let executable = {
                    use std::os::unix::fs::PermissionsExt;
                    meta.permissions().mode() & 0o111 != 0
                };
                #[cfg(not(unix))]
                let executable = false;
                Ok(Some(WorktreeStat {
                    size: meta.len(),
                    is_symlink: meta.file_type().is_symlink(),
                    executable: executable && !meta.is_dir(),
                }))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list_files(&self) -> io::Result<Vec<BString>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        let mut rel = BString::from("");
        self.collect(&self.root.clone(), &mut rel, &mut out)?;
        out.sort();
        Ok(out)
    }

    fn set_executable(&self, path: &BStr, executable: bool) -> io::Result<()> {
        let full = self.resolve(path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = fs::metadata(&full)?;
            let mode = if executable {
                meta.permissions().mode() | 0o111
            } else {
                meta.permissions().mode() & !0o111
            };
            fs::set_permissions(&full, fs::Permissions::from_mode(mode))?;
        }
        #[cfg(not(unix))]
        {
            let _ = (full, executable);
        }
        Ok(())
    }

    fn symlink(&self, path: &BStr, target: &BStr) -> io::Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        #[cfg(unix)]
        {
            let target = target.to_str().map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "non-UTF8 symlink target")
            })?;
            match std::os::unix::fs::symlink(target, &full) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    fs::remove_file(&full)?;
                    std::os::unix::fs::symlink(target, &full)
                }
                Err(e) => Err(e),
            }
        }
        #[cfg(not(unix))]
        {
            // core.symlinks=false behavior: materialize as a plain file.
            fs::write(full, target)
        }
    }

    fn read_link(&self, path: &BStr) -> io::Result<BString> {
        let full = self.resolve(path)?;
        let target = fs::read_link(full)?;
        Ok(BString::from(target.to_string_lossy().into_owned()))
    }
}
