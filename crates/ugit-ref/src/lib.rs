//! Reference store: loose refs, packed-refs, reflogs, and atomic updates.
//!
//! All reads and writes go through the storage backend. A linked worktree
//! sees its own `HEAD` and `logs/HEAD` under `worktrees/<id>/`, while
//! everything under `refs/` is shared with the main worktree.

pub mod error;
pub mod name;
pub mod packed;
pub mod reflog;
pub mod transaction;

use std::sync::Arc;

use bstr::ByteSlice;
use ugit_hash::ObjectId;
use ugit_store::{LockOptions, Storage, StoreError};
use ugit_utils::date::Signature;

pub use error::RefError;
pub use name::RefName;
pub use packed::{PackedRef, PackedRefs};
pub use reflog::ReflogEntry;
pub use transaction::{RefTransaction, RefUpdate};

/// Maximum symbolic-ref hops before the chain is declared cyclic.
pub const MAX_SYMREF_DEPTH: usize = 8;

/// A reference: either a direct OID or a pointer to another ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Direct { name: RefName, target: ObjectId },
    Symbolic { name: RefName, target: RefName },
}

impl Reference {
    pub fn name(&self) -> &RefName {
        match self {
            Self::Direct { name, .. } | Self::Symbolic { name, .. } => name,
        }
    }
}

/// Options for a single ref write.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// CAS expectation: `Some(Some(oid))` requires the current value,
    /// `Some(None)` requires absence, `None` skips the check.
    pub expected: Option<Option<ObjectId>>,
    /// Reflog message. An explicit message forces a log entry even when
    /// `core.logAllRefUpdates` is off.
    pub message: Option<String>,
}

pub struct RefStore {
    storage: Arc<dyn Storage>,
    /// Linked-worktree id; `None` for the main worktree.
    worktree: Option<String>,
    /// `core.logAllRefUpdates`.
    log_all_ref_updates: bool,
    lock_opts: LockOptions,
}

impl RefStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            worktree: None,
            log_all_ref_updates: true,
            lock_opts: LockOptions::default(),
        }
    }

    /// Route worktree-private refs under `worktrees/<id>/`.
    pub fn for_worktree(mut self, id: impl Into<String>) -> Self {
        self.worktree = Some(id.into());
        self
    }

    pub fn with_log_all_ref_updates(mut self, enabled: bool) -> Self {
        self.log_all_ref_updates = enabled;
        self
    }

    pub fn with_lock_options(mut self, opts: LockOptions) -> Self {
        self.lock_opts = opts;
        self
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub(crate) fn lock_options(&self) -> &LockOptions {
        &self.lock_opts
    }

    /// Storage key of the ref value.
    pub(crate) fn ref_key(&self, name: &RefName) -> String {
        match (&self.worktree, name.is_pseudo()) {
            (Some(id), true) => format!("worktrees/{id}/{name}"),
            _ => name.to_string(),
        }
    }

    /// Storage key of the ref's log.
    pub(crate) fn log_key(&self, name: &RefName) -> String {
        match (&self.worktree, name.is_pseudo()) {
            (Some(id), true) => format!("worktrees/{id}/logs/{name}"),
            _ => format!("logs/{name}"),
        }
    }

    /// Whether an update to `name` gets a reflog entry.
    ///
    /// `HEAD` (and the other pseudo-refs) plus `refs/heads/*` are always
    /// logged; `core.logAllRefUpdates` only governs the remaining
    /// namespaces. An explicit message forces a log entry anywhere.
    pub(crate) fn should_log(&self, name: &RefName, explicit_message: bool) -> bool {
        if name.is_pseudo() || name.is_branch() {
            return true;
        }
        if explicit_message {
            // An explicit message overrides a disabled config.
            return true;
        }
        self.log_all_ref_updates
    }

    /// Raw read: the ref as stored (direct or symbolic), loose over packed.
    pub fn read(&self, name: &RefName) -> Result<Option<Reference>, RefError> {
        match self.storage.read(&self.ref_key(name)) {
            Ok(data) => Ok(Some(parse_loose(name.clone(), &data)?)),
            Err(StoreError::NotFound { .. }) => {
                let packed = PackedRefs::load(self.storage.as_ref())?;
                Ok(packed.find(name).map(|p| Reference::Direct {
                    name: name.clone(),
                    target: p.oid,
                }))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Follow the symbolic chain to an OID. Fails on cycles or depth
    /// exhaustion; `Ok(None)` when the terminal ref does not exist yet
    /// (fresh `HEAD`).
    pub fn resolve(&self, name: &RefName) -> Result<Option<ObjectId>, RefError> {
        let mut current = name.clone();
        for _ in 0..MAX_SYMREF_DEPTH {
            match self.read(&current)? {
                Some(Reference::Direct { target, .. }) => return Ok(Some(target)),
                Some(Reference::Symbolic { target, .. }) => current = target,
                None => return Ok(None),
            }
        }
        Err(RefError::SymrefLoop {
            name: name.clone(),
            depth: MAX_SYMREF_DEPTH,
        })
    }

    /// Like [`resolve`](Self::resolve) but absence is an error.
    pub fn resolve_required(&self, name: &RefName) -> Result<ObjectId, RefError> {
        self.resolve(name)?
            .ok_or_else(|| RefError::NotFound { name: name.clone() })
    }

    /// The final direct ref name a symbolic chain lands on (`HEAD` →
    /// `refs/heads/main`). A direct or absent ref is its own terminal.
    pub fn resolve_final_name(&self, name: &RefName) -> Result<RefName, RefError> {
        let mut current = name.clone();
        for _ in 0..MAX_SYMREF_DEPTH {
            match self.read(&current)? {
                Some(Reference::Symbolic { target, .. }) => current = target,
                _ => return Ok(current),
            }
        }
        Err(RefError::SymrefLoop {
            name: name.clone(),
            depth: MAX_SYMREF_DEPTH,
        })
    }

    /// All direct refs under `prefix`, sorted by name, loose shadowing
    /// packed.
    pub fn list(&self, prefix: &str) -> Result<Vec<(RefName, ObjectId)>, RefError> {
        let mut out: Vec<(RefName, ObjectId)> = Vec::new();

        let packed = PackedRefs::load(self.storage.as_ref())?;
        for p in packed.iter() {
            if p.name.as_str().starts_with(prefix) {
                out.push((p.name.clone(), p.oid));
            }
        }

        for key in self.storage.list(prefix)? {
            if key.ends_with(".lock") {
                continue;
            }
            let Ok(name) = RefName::new(key.as_str()) else {
                continue;
            };
            if let Some(Reference::Direct { target, .. }) = self.read(&name)? {
                match out.binary_search_by(|(n, _)| n.cmp(&name)) {
                    Ok(i) => out[i] = (name, target),
                    Err(i) => out.insert(i, (name, target)),
                }
            }
        }

        out.sort_by(|a, b| a.0.cmp(&b.0));
        out.dedup_by(|a, b| a.0 == b.0);
        Ok(out)
    }

    /// Atomic single-ref write; follows a symbolic head to its target.
    pub fn write(
        &self,
        name: &RefName,
        new_oid: ObjectId,
        opts: WriteOptions,
        committer: &Signature,
    ) -> Result<(), RefError> {
        let mut tx = RefTransaction::new();
        tx.set(name.clone(), new_oid, opts);
        tx.commit(self, committer)
    }

    /// Point `name` at another ref (e.g. `HEAD` → `refs/heads/main`).
    pub fn write_symbolic(
        &self,
        name: &RefName,
        target: RefName,
        message: Option<String>,
        committer: &Signature,
    ) -> Result<(), RefError> {
        let mut tx = RefTransaction::new();
        tx.set_symbolic(name.clone(), target, message);
        tx.commit(self, committer)
    }

    /// Delete a ref (loose file and packed entry); returns the old OID for
    /// reflog completeness.
    pub fn delete(
        &self,
        name: &RefName,
        message: Option<String>,
        committer: &Signature,
    ) -> Result<ObjectId, RefError> {
        let old = self.resolve_required(name)?;
        let mut tx = RefTransaction::new();
        tx.delete(name.clone(), Some(old), message);
        tx.commit(self, committer)?;
        Ok(old)
    }

    /// The CAS primitive used by push and fetch: exactly one concurrent
    /// caller wins; losers observe `AlreadyExists`.
    pub fn compare_and_swap(
        &self,
        name: &RefName,
        expected: Option<ObjectId>,
        new_oid: ObjectId,
        committer: &Signature,
    ) -> Result<(), RefError> {
        self.write(
            name,
            new_oid,
            WriteOptions {
                expected: Some(expected),
                message: Some(format!("update by compare-and-swap to {new_oid}")),
            },
            committer,
        )
    }

    /// Reflog entries for `name`, oldest first.
    pub fn reflog(&self, name: &RefName) -> Result<Vec<ReflogEntry>, RefError> {
        reflog::read(self.storage.as_ref(), &self.log_key(name))
    }

    /// `name@{n}` reflog lookup, newest-first indexing.
    pub fn reflog_entry(&self, name: &RefName, n: usize) -> Result<Option<ReflogEntry>, RefError> {
        reflog::entry_at(self.storage.as_ref(), &self.log_key(name), n)
    }
}

/// Parse a loose ref payload: `"ref: <name>\n"` or a hex OID line.
fn parse_loose(name: RefName, data: &[u8]) -> Result<Reference, RefError> {
    let text = data.trim();
    if let Some(target) = text.strip_prefix(b"ref: ") {
        let target_str = std::str::from_utf8(target)
            .map_err(|_| RefError::Parse("non-UTF8 symbolic target".into()))?;
        return Ok(Reference::Symbolic {
            name,
            target: RefName::new(target_str.trim())?,
        });
    }
    let hex = std::str::from_utf8(text)
        .map_err(|_| RefError::Parse("non-UTF8 ref value".into()))?;
    Ok(Reference::Direct {
        name,
        target: ObjectId::from_hex(hex)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ugit_store::MemStore;
    use ugit_utils::date::GitDate;

    fn oid(n: u8) -> ObjectId {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        ObjectId::from_bytes(&bytes, ugit_hash::HashAlgorithm::Sha1).unwrap()
    }

    fn sig() -> Signature {
        Signature::new("Alice", "a@x", GitDate::new(1_700_000_000, 0))
    }

    fn store() -> RefStore {
        RefStore::new(Arc::new(MemStore::new()))
    }

    #[test]
    fn write_then_resolve() {
        let refs = store();
        let main = RefName::branch("main").unwrap();
        refs.write(&main, oid(1), WriteOptions::default(), &sig()).unwrap();
        assert_eq!(refs.resolve(&main).unwrap(), Some(oid(1)));
    }

    #[test]
    fn symbolic_head_resolves_through_branch() {
        let refs = store();
        let head = RefName::new("HEAD").unwrap();
        let main = RefName::branch("main").unwrap();
        refs.write_symbolic(&head, main.clone(), None, &sig()).unwrap();
        assert_eq!(refs.resolve(&head).unwrap(), None); // unborn branch

        refs.write(&main, oid(5), WriteOptions::default(), &sig()).unwrap();
        assert_eq!(refs.resolve(&head).unwrap(), Some(oid(5)));
        assert_eq!(refs.resolve_final_name(&head).unwrap(), main);
    }

    #[test]
    fn symref_cycle_detected() {
        let refs = store();
        refs.storage
            .write("refs/heads/a", b"ref: refs/heads/b\n")
            .unwrap();
        refs.storage
            .write("refs/heads/b", b"ref: refs/heads/a\n")
            .unwrap();
        let a = RefName::branch("a").unwrap();
        assert!(matches!(
            refs.resolve(&a),
            Err(RefError::SymrefLoop { .. })
        ));
    }

    #[test]
    fn writing_through_symbolic_head_moves_branch() {
        let refs = store();
        let head = RefName::new("HEAD").unwrap();
        let main = RefName::branch("main").unwrap();
        refs.write_symbolic(&head, main.clone(), None, &sig()).unwrap();
        refs.write(&head, oid(9), WriteOptions::default(), &sig()).unwrap();

        // HEAD stays symbolic; the branch moved.
        assert!(matches!(
            refs.read(&head).unwrap(),
            Some(Reference::Symbolic { .. })
        ));
        assert_eq!(refs.resolve(&main).unwrap(), Some(oid(9)));
    }

    #[test]
    fn list_merges_loose_over_packed() {
        let refs = store();
        // Packed holds main@1 and dev@2; loose shadows main with 3.
        let mut packed = PackedRefs::default();
        packed.upsert(PackedRef {
            name: RefName::branch("main").unwrap(),
            oid: oid(1),
            peeled: None,
        });
        packed.upsert(PackedRef {
            name: RefName::branch("dev").unwrap(),
            oid: oid(2),
            peeled: None,
        });
        packed.save(refs.storage.as_ref(), &LockOptions::no_retry()).unwrap();
        refs.write(
            &RefName::branch("main").unwrap(),
            oid(3),
            WriteOptions::default(),
            &sig(),
        )
        .unwrap();

        let listed = refs.list("refs/heads/").unwrap();
        assert_eq!(
            listed,
            vec![
                (RefName::branch("dev").unwrap(), oid(2)),
                (RefName::branch("main").unwrap(), oid(3)),
            ]
        );
    }

    #[test]
    fn packed_ref_still_resolves() {
        let refs = store();
        let mut packed = PackedRefs::default();
        packed.upsert(PackedRef {
            name: RefName::branch("packed-only").unwrap(),
            oid: oid(4),
            peeled: None,
        });
        packed.save(refs.storage.as_ref(), &LockOptions::no_retry()).unwrap();
        assert_eq!(
            refs.resolve(&RefName::branch("packed-only").unwrap()).unwrap(),
            Some(oid(4))
        );
    }

    #[test]
    fn delete_returns_old_oid_and_prunes_packed() {
        let refs = store();
        let name = RefName::branch("doomed").unwrap();
        let mut packed = PackedRefs::default();
        packed.upsert(PackedRef { name: name.clone(), oid: oid(1), peeled: None });
        packed.save(refs.storage.as_ref(), &LockOptions::no_retry()).unwrap();
        refs.write(&name, oid(2), WriteOptions::default(), &sig()).unwrap();

        let old = refs.delete(&name, None, &sig()).unwrap();
        assert_eq!(old, oid(2));
        assert!(refs.read(&name).unwrap().is_none());
        assert!(PackedRefs::load(refs.storage.as_ref())
            .unwrap()
            .find(&name)
            .is_none());
    }

    #[test]
    fn cas_winner_and_loser() {
        let refs = store();
        let name = RefName::branch("main").unwrap();
        refs.write(&name, oid(1), WriteOptions::default(), &sig()).unwrap();

        refs.compare_and_swap(&name, Some(oid(1)), oid(2), &sig()).unwrap();
        let lost = refs.compare_and_swap(&name, Some(oid(1)), oid(3), &sig());
        assert!(matches!(lost, Err(RefError::AlreadyExists { .. })));
        assert_eq!(refs.resolve(&name).unwrap(), Some(oid(2)));

        // Exactly the create + two... only winning transitions logged.
        let log = refs.reflog(&name).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].old_oid, oid(1));
        assert_eq!(log[1].new_oid, oid(2));
    }

    #[test]
    fn worktree_head_is_private() {
        let storage: Arc<dyn Storage> = Arc::new(MemStore::new());
        let main_refs = RefStore::new(storage.clone());
        let wt_refs = RefStore::new(storage.clone()).for_worktree("wt1");
        let head = RefName::new("HEAD").unwrap();
        let branch = RefName::branch("shared").unwrap();

        main_refs
            .write_symbolic(&head, RefName::branch("main").unwrap(), None, &sig())
            .unwrap();
        wt_refs
            .write_symbolic(&head, branch.clone(), None, &sig())
            .unwrap();

        // Distinct HEADs, shared branches.
        assert!(storage.has("HEAD"));
        assert!(storage.has("worktrees/wt1/HEAD"));
        main_refs.write(&branch, oid(1), WriteOptions::default(), &sig()).unwrap();
        assert_eq!(wt_refs.resolve(&branch).unwrap(), Some(oid(1)));
    }

    #[test]
    fn branches_and_head_always_log_even_when_config_disabled() {
        let storage: Arc<dyn Storage> = Arc::new(MemStore::new());
        let refs = RefStore::new(storage).with_log_all_ref_updates(false);
        let branch = RefName::branch("always").unwrap();

        // A plain branch write with no explicit message still logs.
        refs.write(&branch, oid(1), WriteOptions::default(), &sig()).unwrap();
        let log = refs.reflog(&branch).unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].old_oid.is_null());
        assert_eq!(log[0].new_oid, oid(1));

        // Writing through HEAD is equally unconditional, on both logs.
        let head = RefName::new("HEAD").unwrap();
        refs.write_symbolic(&head, branch.clone(), None, &sig()).unwrap();
        refs.write(&head, oid(2), WriteOptions::default(), &sig()).unwrap();
        assert_eq!(refs.reflog(&branch).unwrap().len(), 2);
        assert!(!refs.reflog(&head).unwrap().is_empty());
    }

    #[test]
    fn config_flag_gates_other_namespaces() {
        let storage: Arc<dyn Storage> = Arc::new(MemStore::new());
        let quiet = RefStore::new(storage.clone()).with_log_all_ref_updates(false);
        let name = RefName::new("refs/notes/commits").unwrap();

        quiet.write(&name, oid(1), WriteOptions::default(), &sig()).unwrap();
        assert!(quiet.reflog(&name).unwrap().is_empty());

        // An explicit message overrides the disabled config.
        quiet
            .write(
                &name,
                oid(2),
                WriteOptions {
                    expected: None,
                    message: Some("forced entry".into()),
                },
                &sig(),
            )
            .unwrap();
        let log = quiet.reflog(&name).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].message, "forced entry");

        // With the flag on, plain writes to the same namespace log too.
        let loud = RefStore::new(storage).with_log_all_ref_updates(true);
        loud.write(&name, oid(3), WriteOptions::default(), &sig()).unwrap();
        assert_eq!(loud.reflog(&name).unwrap().len(), 2);
    }
}
