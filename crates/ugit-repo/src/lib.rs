//! Repository facade: binds config, object database, refs, index, and
//! worktree into one unit.
//!
//! Instances are interned per resolved git-directory — opening the same
//! repository twice in a process yields the same `Arc<Repository>` until
//! [`clear_instance_cache`] evicts it. The detected object format is
//! memoized per git-directory as well, so repeated opens skip the config
//! read.

pub mod discover;
pub mod init;
pub mod worktree;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use bstr::{BStr, BString, ByteSlice};
use ugit_config::{Config, ConfigFile, ConfigScope, MergeFf};
use ugit_hash::{HashAlgorithm, ObjectId};
use ugit_index::{IndexEntry, IndexFile, Stage};
use ugit_merge::{
    analyze_checkout, apply_checkout, MemWorktree, MergeCommitsResult, MergeLabels,
    MergeOptions, ResetMode, WorktreeBackend,
};
use ugit_object::{Commit, FileMode, Object, ObjectType};
use ugit_odb::ObjectDatabase;
use ugit_ref::{RefName, RefStore, Reference, WriteOptions};
use ugit_store::{FsStore, MemStore, Storage};
use ugit_transport::Connection;
use ugit_utils::date::{GitDate, Signature};
use ugit_utils::progress::ProgressSink;

pub use discover::{discover, Discovered};
pub use init::InitOptions;
pub use worktree::FsWorktree;

/// Errors from repository-level operations.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("not a git repository (or any parent): {path}")]
    NotARepository { path: PathBuf },

    #[error("repository already initialized")]
    AlreadyInitialized,

    #[error("nothing to commit")]
    NothingToCommit,

    #[error("HEAD is unborn and {0} does not resolve")]
    UnbornHead(RefName),

    #[error("no identity configured; set user.name and user.email")]
    NoIdentity,

    #[error("refusing non-fast-forward merge (merge.ff=only)")]
    FastForwardOnly,

    #[error(transparent)]
    Odb(#[from] ugit_odb::OdbError),

    #[error(transparent)]
    Ref(#[from] ugit_ref::RefError),

    #[error(transparent)]
    Index(#[from] ugit_index::IndexError),

    #[error(transparent)]
    Merge(#[from] ugit_merge::MergeError),

    #[error(transparent)]
    Protocol(#[from] ugit_protocol::ProtocolError),

    #[error(transparent)]
    Config(#[from] ugit_config::ConfigError),

    #[error(transparent)]
    Object(#[from] ugit_object::ObjectError),

    #[error(transparent)]
    Store(#[from] ugit_store::StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn instances() -> &'static Mutex<HashMap<PathBuf, Arc<Repository>>> {
    static INSTANCES: OnceLock<Mutex<HashMap<PathBuf, Arc<Repository>>>> = OnceLock::new();
    INSTANCES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Detected object format per git-directory; repeated config reads here
/// were a measured hotspot, so the answer is memoized process-wide.
fn format_cache() -> &'static Mutex<HashMap<PathBuf, HashAlgorithm>> {
    static FORMATS: OnceLock<Mutex<HashMap<PathBuf, HashAlgorithm>>> = OnceLock::new();
    FORMATS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Drop all interned instances and memoized formats (test isolation).
pub fn clear_instance_cache() {
    instances().lock().unwrap().clear();
    format_cache().lock().unwrap().clear();
}

/// What a merge produced.
#[derive(Debug)]
pub enum MergeSummary {
    AlreadyUpToDate,
    FastForward(ObjectId),
    MergeCommit(ObjectId),
}

pub struct Repository {
    git_dir: PathBuf,
    storage: Arc<dyn Storage>,
    config: Config,
    algo: HashAlgorithm,
    odb: ObjectDatabase,
    refs: RefStore,
    worktree: Option<Arc<dyn WorktreeBackend>>,
}

impl Repository {
    /// Open the repository containing `path`, reusing an interned instance
    /// when the resolved git-directory was opened before.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>, RepoError> {
        let found = discover::discover(path)?;
        Self::open_discovered(found)
    }

    /// Initialize a new repository at `path` and open it.
    pub fn init(path: impl AsRef<Path>, options: &InitOptions) -> Result<Arc<Self>, RepoError> {
        let path = path.as_ref();
        let git_dir = if options.bare {
            path.to_path_buf()
        } else {
            path.join(".git")
        };
        std::fs::create_dir_all(&git_dir)?;
        let storage = FsStore::new(&git_dir);
        init::init_git_dir(&storage, options)?;
        Self::open_discovered(Discovered {
            git_dir,
            work_dir: (!options.bare).then(|| path.to_path_buf()),
        })
    }

    /// An in-memory repository (never interned); used by tests and virtual
    /// extraction flows.
    pub fn init_in_memory(options: &InitOptions) -> Result<Self, RepoError> {
        let storage: Arc<dyn Storage> = Arc::new(MemStore::new());
        let config = init::init_git_dir(storage.as_ref(), options)?;
        let worktree: Option<Arc<dyn WorktreeBackend>> =
            (!options.bare).then(|| Arc::new(MemWorktree::new()) as Arc<dyn WorktreeBackend>);
        Self::assemble(PathBuf::from(":memory:"), storage, config, worktree)
    }

    fn open_discovered(found: Discovered) -> Result<Arc<Self>, RepoError> {
        let key = found
            .git_dir
            .canonicalize()
            .unwrap_or_else(|_| found.git_dir.clone());
        if let Some(existing) = instances().lock().unwrap().get(&key) {
            return Ok(existing.clone());
        }

        let storage: Arc<dyn Storage> = Arc::new(FsStore::new(&found.git_dir));
        let mut config = Config::new();
        match storage.read("config") {
            Ok(data) => {
                config.set_layer(ConfigScope::Local, ConfigFile::parse(&data)?);
            }
            Err(ugit_store::StoreError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let worktree: Option<Arc<dyn WorktreeBackend>> = if config.is_bare() {
            None
        } else {
            found
                .work_dir
                .map(|dir| Arc::new(FsWorktree::new(dir)) as Arc<dyn WorktreeBackend>)
        };

        let repo = Self::assemble(key.clone(), storage, config, worktree)?;
        tracing::debug!(git_dir = %repo.git_dir.display(), format = %repo.algo, "repository opened");
        let repo = Arc::new(repo);
        instances().lock().unwrap().insert(key, repo.clone());
        Ok(repo)
    }

    fn assemble(
        git_dir: PathBuf,
        storage: Arc<dyn Storage>,
        config: Config,
        worktree: Option<Arc<dyn WorktreeBackend>>,
    ) -> Result<Self, RepoError> {
        let algo = {
            let mut cache = format_cache().lock().unwrap();
            *cache
                .entry(git_dir.clone())
                .or_insert_with(|| config.object_format())
        };

        let odb = ObjectDatabase::open(storage.clone(), algo)?;
        let refs = RefStore::new(storage.clone())
            .with_log_all_ref_updates(config.log_all_ref_updates());

        Ok(Self {
            git_dir,
            storage,
            config,
            algo,
            odb,
            refs,
            worktree,
        })
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn object_format(&self) -> HashAlgorithm {
        self.algo
    }

    pub fn odb(&self) -> &ObjectDatabase {
        &self.odb
    }

    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    pub fn is_bare(&self) -> bool {
        self.worktree.is_none()
    }

    pub fn worktree(&self) -> Option<&dyn WorktreeBackend> {
        self.worktree.as_deref()
    }

    /// The staging index bound to this repository's `index` key.
    pub fn index(&self) -> Result<IndexFile, RepoError> {
        Ok(IndexFile::open(self.storage.clone(), "index", self.algo)?)
    }

    /// Committer identity from config; `NoIdentity` when unset.
    pub fn identity(&self) -> Result<Signature, RepoError> {
        match (self.config.user_name(), self.config.user_email()) {
            (Some(name), Some(email)) => {
                Ok(Signature::new(name, email, GitDate::now()))
            }
            _ => Err(RepoError::NoIdentity),
        }
    }

    pub fn head(&self) -> Result<Option<ObjectId>, RepoError> {
        Ok(self.refs.resolve(&head_ref())?)
    }

    /// The branch HEAD points at, when it is symbolic.
    pub fn current_branch(&self) -> Result<Option<RefName>, RepoError> {
        match self.refs.read(&head_ref())? {
            Some(Reference::Symbolic { target, .. }) => Ok(Some(target)),
            _ => Ok(None),
        }
    }

    /// Stage the workdir copy of `path` (add or update).
    pub fn stage(&self, path: &BStr) -> Result<ObjectId, RepoError> {
        let worktree = self.require_worktree()?;
        let mut content = worktree.read(path)?;
        let stat = worktree.stat(path)?;
        if self.config.auto_crlf().normalizes_on_input() && !looks_binary(&content) {
            content = normalize_crlf(content);
        }
        let oid = self.odb.write(ObjectType::Blob, &content)?;
        let mode = match stat {
            Some(s) if s.is_symlink => FileMode::Symlink,
            Some(s) if s.executable => FileMode::Executable,
            _ => FileMode::Regular,
        };

        let mut index = self.index()?;
        index
            .index
            .upsert(IndexEntry::new(path, oid, mode, Stage::Normal));
        index.save()?;
        Ok(oid)
    }

    /// Remove `path` from the index (and optionally the workdir).
    pub fn unstage(&self, path: &BStr, remove_file: bool) -> Result<(), RepoError> {
        let mut index = self.index()?;
        index.index.remove(path);
        index.save()?;
        if remove_file {
            if let Some(worktree) = self.worktree() {
                let _ = worktree.remove(path);
            }
        }
        Ok(())
    }

    /// Commit the index: build trees, write the commit, advance HEAD.
    pub fn commit(
        &self,
        message: &str,
        author: &Signature,
        committer: &Signature,
    ) -> Result<ObjectId, RepoError> {
        let mut index = self.index()?;
        if index.index.has_conflicts() {
            return Err(ugit_merge::MergeError::MergeConflict {
                paths: index
                    .index
                    .conflicted_paths()
                    .into_iter()
                    .map(|p| (p, ugit_merge::ConflictKind::Content))
                    .collect(),
            }
            .into());
        }

        let tree = index.index.build_tree_cache(&self.odb)?;
        let parent = self.head()?;

        if let Some(parent_oid) = parent {
            if let Object::Commit(parent_commit) = self.odb.read_object(&parent_oid)? {
                if parent_commit.tree == tree {
                    return Err(RepoError::NothingToCommit);
                }
            }
        }

        let commit = Commit {
            tree,
            parents: parent.into_iter().collect(),
            author: author.clone(),
            committer: committer.clone(),
            encoding: None,
            gpgsig: None,
            extra_headers: Vec::new(),
            message: BString::from(message),
        };
        let oid = self.odb.write_object(&Object::Commit(commit))?;

        let summary = message.lines().next().unwrap_or("");
        let reflog = if parent.is_none() {
            format!("commit (initial): {summary}")
        } else {
            format!("commit: {summary}")
        };
        self.refs.write(
            &head_ref(),
            oid,
            WriteOptions {
                expected: None,
                message: Some(reflog),
            },
            committer,
        )?;
        index.save()?;
        Ok(oid)
    }

    /// Sync index and workdir to `commit`'s tree (no HEAD movement).
    pub fn checkout_tree(&self, commit: ObjectId, force: bool) -> Result<(), RepoError> {
        let worktree = self.require_worktree()?;
        let tree = ugit_merge::tree::commit_tree(&self.odb, commit)?;
        let mut index = self.index()?;
        let plan = analyze_checkout(&self.odb, tree, &index.index, worktree, force)?;
        apply_checkout(
            &plan,
            &self.odb,
            &mut index.index,
            worktree,
            &ProgressSink::discard(),
        )?;
        index.save()?;
        Ok(())
    }

    /// Switch HEAD to `branch`, syncing index and workdir.
    pub fn switch_branch(
        &self,
        branch: &str,
        force: bool,
        committer: &Signature,
    ) -> Result<(), RepoError> {
        let name = RefName::branch(branch)?;
        let target = self
            .refs
            .resolve(&name)?
            .ok_or_else(|| RepoError::UnbornHead(name.clone()))?;
        self.checkout_tree(target, force)?;
        self.refs.write_symbolic(
            &head_ref(),
            name,
            Some(format!("checkout: moving to {branch}")),
            committer,
        )?;
        Ok(())
    }

    /// Merge `theirs` into the current branch.
    ///
    /// Fast-forwards when permitted (per `merge.ff` and `options.no_ff`),
    /// creates a merge commit on a clean real merge, and on conflicts
    /// materializes stages 1/2/3 plus marker files before returning the
    /// `MergeConflict` error.
    pub fn merge(
        &self,
        theirs: ObjectId,
        theirs_label: &str,
        options: &MergeOptions,
        committer: &Signature,
    ) -> Result<MergeSummary, RepoError> {
        let ours = self
            .head()?
            .ok_or_else(|| RepoError::UnbornHead(head_ref()))?;

        let mut options = options.clone();
        match self.config.merge_ff() {
            MergeFf::Never => options.no_ff = true,
            MergeFf::Allowed | MergeFf::Only => {}
        }

        let labels = MergeLabels {
            base: "merged common ancestors",
            ours: "HEAD",
            theirs: theirs_label,
        };

        match ugit_merge::merge_commits(&self.odb, ours, theirs, &options, &labels)? {
            MergeCommitsResult::UpToDate => Ok(MergeSummary::AlreadyUpToDate),
            MergeCommitsResult::FastForward { target } => {
                self.checkout_tree(target, false)?;
                self.refs.write(
                    &head_ref(),
                    target,
                    WriteOptions {
                        expected: Some(Some(ours)),
                        message: Some(format!("merge {theirs_label}: Fast-forward")),
                    },
                    committer,
                )?;
                Ok(MergeSummary::FastForward(target))
            }
            MergeCommitsResult::Merged { result, .. } => {
                if self.config.merge_ff() == MergeFf::Only {
                    return Err(RepoError::FastForwardOnly);
                }
                let worktree = self.require_worktree()?;
                let mut index = self.index()?;
                ugit_merge::tree::apply_merge_result(
                    &result,
                    &mut index.index,
                    worktree,
                    &self.odb,
                )?;
                index.save()?;

                if let Some(error) = result.conflict_error() {
                    return Err(error.into());
                }

                let tree = result.tree.expect("clean merge has a tree");
                let commit = Commit {
                    tree,
                    parents: vec![ours, theirs],
                    author: committer.clone(),
                    committer: committer.clone(),
                    encoding: None,
                    gpgsig: None,
                    extra_headers: Vec::new(),
                    message: BString::from(format!("Merge {theirs_label}\n")),
                };
                let oid = self.odb.write_object(&Object::Commit(commit))?;
                self.refs.write(
                    &head_ref(),
                    oid,
                    WriteOptions {
                        expected: Some(Some(ours)),
                        message: Some(format!("merge {theirs_label}: Merge made")),
                    },
                    committer,
                )?;
                Ok(MergeSummary::MergeCommit(oid))
            }
        }
    }

    /// `reset --soft|--mixed|--hard` to `target`.
    pub fn reset(
        &self,
        target: ObjectId,
        mode: ResetMode,
        committer: &Signature,
    ) -> Result<(), RepoError> {
        let mut index = self.index()?;
        ugit_merge::reset(
            &self.odb,
            &self.refs,
            &mut index.index,
            self.worktree(),
            target,
            mode,
            committer,
        )?;
        index.save()?;
        Ok(())
    }

    /// Extract `commit`'s tree into an arbitrary worktree backend without
    /// retaining any git state there (the `ungit` flow).
    pub fn extract_commit(
        &self,
        commit: ObjectId,
        destination: &dyn WorktreeBackend,
    ) -> Result<(), RepoError> {
        let tree = ugit_merge::tree::commit_tree(&self.odb, commit)?;
        let mut scratch = ugit_index::Index::new(self.algo);
        let plan = analyze_checkout(&self.odb, tree, &scratch, destination, true)?;
        apply_checkout(
            &plan,
            &self.odb,
            &mut scratch,
            destination,
            &ProgressSink::discard(),
        )?;
        Ok(())
    }

    /// Fetch from `remote` over an established connection, recording the
    /// advertised tips under `refs/remotes/<remote>/` with CAS writes.
    pub fn fetch_from(
        &self,
        conn: &mut dyn Connection,
        remote: &str,
        options: &ugit_protocol::FetchOptions,
        committer: &Signature,
    ) -> Result<ugit_protocol::FetchOutcome, RepoError> {
        let local_tips: Vec<ObjectId> = self
            .refs
            .list("refs/")?
            .into_iter()
            .map(|(_, oid)| oid)
            .collect();

        let outcome = ugit_protocol::fetch(conn, &self.odb, &local_tips, options)?;

        for (name, oid) in &outcome.ref_updates {
            let tracking = match name.strip_prefix(b"refs/heads/") {
                Some(short) => format!("refs/remotes/{remote}/{}", short.as_bstr()),
                None => match name.strip_prefix(b"refs/tags/") {
                    Some(short) => format!("refs/tags/{}", short.as_bstr()),
                    None => continue,
                },
            };
            let tracking = RefName::new(tracking)?;
            let current = self.refs.resolve(&tracking)?;
            if current == Some(*oid) {
                continue;
            }
            self.refs.write(
                &tracking,
                *oid,
                WriteOptions {
                    expected: Some(current),
                    message: Some(format!("fetch {remote}")),
                },
                committer,
            )?;
        }
        Ok(outcome)
    }

    /// Push `branch` to the same name on the remote.
    pub fn push_to(
        &self,
        conn: &mut dyn Connection,
        branch: &str,
        options: &ugit_protocol::PushOptions,
    ) -> Result<ugit_protocol::PushOutcome, RepoError> {
        let name = RefName::branch(branch)?;
        let tip = self.refs.resolve_required(&name)?;
        let updates = vec![ugit_protocol::RefPush {
            name: name.to_string(),
            new: Some(tip),
            expected: None,
        }];
        Ok(ugit_protocol::push(conn, &self.odb, &updates, options)?)
    }

    fn require_worktree(&self) -> Result<&dyn WorktreeBackend, RepoError> {
        self.worktree().ok_or_else(|| RepoError::NotARepository {
            path: self.git_dir.clone(),
        })
    }
}

fn head_ref() -> RefName {
    RefName::new("HEAD").expect("HEAD is a valid ref name")
}

fn looks_binary(data: &[u8]) -> bool {
    data[..data.len().min(8192)].contains(&0)
}

/// CRLF → LF for staged text when `core.autocrlf` asks for it.
fn normalize_crlf(data: Vec<u8>) -> Vec<u8> {
    if !data.windows(2).any(|w| w == b"\r\n") {
        return data;
    }
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter().peekable();
    while let Some(&b) = iter.next() {
        if b == b'\r' && iter.peek() == Some(&&b'\n') {
            continue;
        }
        out.push(b);
    }
    out
}
