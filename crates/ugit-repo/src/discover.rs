//! Git-directory discovery.

use std::fs;
use std::path::{Path, PathBuf};

use crate::RepoError;

/// What discovery found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub git_dir: PathBuf,
    /// Absent for bare repositories.
    pub work_dir: Option<PathBuf>,
}

/// Walk upward from `start` looking for a `.git` directory (or gitfile, as
/// written by linked worktrees), or a bare git directory itself.
pub fn discover(start: impl AsRef<Path>) -> Result<Discovered, RepoError> {
    let start = start.as_ref();
    let mut current = Some(start.to_path_buf());

    while let Some(dir) = current {
        let dot_git = dir.join(".git");
        if dot_git.is_dir() {
            return Ok(Discovered {
                git_dir: dot_git,
                work_dir: Some(dir),
            });
        }
        if dot_git.is_file() {
            // Gitfile: `gitdir: <path>`, used by linked worktrees.
            let contents = fs::read_to_string(&dot_git)?;
            let target = contents
                .strip_prefix("gitdir:")
                .map(str::trim)
                .ok_or_else(|| RepoError::NotARepository {
                    path: start.to_path_buf(),
                })?;
            let git_dir = if Path::new(target).is_absolute() {
                PathBuf::from(target)
            } else {
                dir.join(target)
            };
            return Ok(Discovered {
                git_dir,
                work_dir: Some(dir),
            });
        }
        if looks_like_git_dir(&dir) {
            return Ok(Discovered {
                git_dir: dir,
                work_dir: None,
            });
        }
        current = dir.parent().map(Path::to_path_buf);
    }

    Err(RepoError::NotARepository {
        path: start.to_path_buf(),
    })
}

/// A bare git directory has HEAD, an objects dir, and a refs dir.
fn looks_like_git_dir(dir: &Path) -> bool {
    dir.join("HEAD").is_file() && dir.join("objects").is_dir() && dir.join("refs").is_dir()
}
