//! Atomic ref transactions.
//!
//! Protocol, per update: take `<ref>.lock` via the storage backend's
//! exclusive-create primitive, verify the compare-and-swap expectation
//! against the current loose-or-packed value, stage the new content, append
//! the reflog entry while the lock is held, then commit by atomic rename.
//! Any failure before commit drops the locks, which rolls everything back.

use bstr::BString;
use ugit_hash::ObjectId;
use ugit_store::{Lock, StoreError};
use ugit_utils::date::Signature;

use crate::error::RefError;
use crate::name::RefName;
use crate::packed::PackedRefs;
use crate::reflog::{self, ReflogEntry};
use crate::{RefStore, Reference, WriteOptions};

/// One update within a transaction.
#[derive(Debug, Clone)]
pub enum RefUpdate {
    /// Point the ref at an OID (create or move).
    Set {
        name: RefName,
        new: ObjectId,
        expected: Option<Option<ObjectId>>,
        message: Option<String>,
    },
    /// Remove the ref.
    Delete {
        name: RefName,
        expected: Option<ObjectId>,
        message: Option<String>,
    },
    /// Make the ref symbolic.
    SetSymbolic {
        name: RefName,
        target: RefName,
        message: Option<String>,
    },
}

impl RefUpdate {
    fn name(&self) -> &RefName {
        match self {
            Self::Set { name, .. } | Self::Delete { name, .. } | Self::SetSymbolic { name, .. } => {
                name
            }
        }
    }
}

/// A batch of updates applied atomically: all commit or none do.
#[derive(Debug, Default)]
pub struct RefTransaction {
    updates: Vec<RefUpdate>,
}

impl RefTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: RefName, new: ObjectId, opts: WriteOptions) {
        self.updates.push(RefUpdate::Set {
            name,
            new,
            expected: opts.expected,
            message: opts.message,
        });
    }

    pub fn delete(&mut self, name: RefName, expected: Option<ObjectId>, message: Option<String>) {
        self.updates.push(RefUpdate::Delete {
            name,
            expected,
            message,
        });
    }

    pub fn set_symbolic(&mut self, name: RefName, target: RefName, message: Option<String>) {
        self.updates
            .push(RefUpdate::SetSymbolic { name, target, message });
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn updates(&self) -> &[RefUpdate] {
        &self.updates
    }

    /// Apply every update atomically against `store`.
    pub fn commit(self, store: &RefStore, committer: &Signature) -> Result<(), RefError> {
        if self.updates.is_empty() {
            return Ok(());
        }
        let storage = store.storage().clone();
        let packed = PackedRefs::load(storage.as_ref())?;

        // Phase 1: route symbolic heads, take locks, verify expectations.
        struct Prepared<'a> {
            update: RefUpdate,
            /// Name the symbolic chain lands on; the value written there.
            target_name: RefName,
            lock: Lock<'a>,
            current: Option<ObjectId>,
        }

        let mut prepared: Vec<Prepared<'_>> = Vec::with_capacity(self.updates.len());
        for update in self.updates {
            // Writing through a symbolic ref moves the branch it points at;
            // re-pointing the symref itself does not chase the chain.
            let target_name = match &update {
                RefUpdate::SetSymbolic { name, .. } => name.clone(),
                _ => store.resolve_final_name(update.name())?,
            };

            let lock = Lock::acquire(
                storage.as_ref(),
                &store.ref_key(&target_name),
                store.lock_options(),
            )?;

            let current = match &update {
                // For a symref flip the interesting "old" value is the full
                // resolution of the chain being replaced.
                RefUpdate::SetSymbolic { .. } => store.resolve(&target_name).unwrap_or(None),
                _ => match store.read(&target_name)? {
                    Some(Reference::Direct { target, .. }) => Some(target),
                    Some(Reference::Symbolic { .. }) | None => {
                        packed.find(&target_name).map(|p| p.oid)
                    }
                },
            };

            verify_expectation(&update, &target_name, current)?;
            prepared.push(Prepared {
                update,
                target_name,
                lock,
                current,
            });
        }

        // Phase 2: stage new values.
        for p in &mut prepared {
            match &p.update {
                RefUpdate::Set { new, .. } => {
                    p.lock.write(format!("{}\n", new.to_hex()).as_bytes());
                }
                RefUpdate::SetSymbolic { target, .. } => {
                    p.lock.write(format!("ref: {target}\n").as_bytes());
                }
                RefUpdate::Delete { .. } => {}
            }
        }

        // Phase 3: reflogs, written while the ref lock is still held. A
        // failed append is reported but never unwinds the ref update.
        for p in &prepared {
            let (message, new_oid) = match &p.update {
                RefUpdate::Set { new, message, .. } => (message, Some(*new)),
                RefUpdate::Delete { message, .. } => (message, None),
                RefUpdate::SetSymbolic { target, message, .. } => {
                    // Re-pointing a symref logs the transition between the
                    // old and new resolutions when one exists.
                    (message, store.resolve(target).ok().flatten())
                }
            };
            if !store.should_log(p.update.name(), message.is_some()) {
                continue;
            }
            let null = match new_oid.or(p.current) {
                Some(oid) => oid.algorithm().null_oid(),
                None => continue,
            };
            let entry = ReflogEntry {
                old_oid: p.current.unwrap_or(null),
                new_oid: new_oid.unwrap_or(null),
                identity: committer.clone(),
                message: BString::from(message.clone().unwrap_or_default()),
            };
            let mut log_keys = vec![store.log_key(&p.target_name)];
            if p.update.name() != &p.target_name {
                // Moving a branch through HEAD logs both.
                log_keys.push(store.log_key(p.update.name()));
            }
            for key in log_keys {
                if let Err(e) = reflog::append(storage.as_ref(), &key, &entry) {
                    tracing::warn!(log = %key, error = %e, "reflog append failed");
                }
            }
        }

        // Phase 4: commit (or delete). Past the first commit there is no
        // rollback; failures here are surfaced as-is.
        for p in prepared {
            match p.update {
                RefUpdate::Delete { .. } => {
                    p.lock.rollback()?;
                    match storage.delete(&store.ref_key(&p.target_name)) {
                        Ok(()) | Err(StoreError::NotFound { .. }) => {}
                        Err(e) => return Err(e.into()),
                    }
                    let _ = storage.delete(&store.log_key(&p.target_name));
                    let mut packed = PackedRefs::load(storage.as_ref())?;
                    if packed.remove(&p.target_name) {
                        packed.save(storage.as_ref(), store.lock_options())?;
                    }
                }
                _ => p.lock.commit()?,
            }
        }
        Ok(())
    }
}

fn verify_expectation(
    update: &RefUpdate,
    name: &RefName,
    current: Option<ObjectId>,
) -> Result<(), RefError> {
    match update {
        RefUpdate::Set { expected, .. } => match expected {
            None => Ok(()),
            Some(None) => {
                if current.is_some() {
                    Err(RefError::AlreadyExists {
                        name: name.clone(),
                        current,
                    })
                } else {
                    Ok(())
                }
            }
            Some(Some(want)) => {
                if current == Some(*want) {
                    Ok(())
                } else {
                    Err(RefError::AlreadyExists {
                        name: name.clone(),
                        current,
                    })
                }
            }
        },
        RefUpdate::Delete { expected, .. } => {
            let actual = current.ok_or_else(|| RefError::NotFound { name: name.clone() })?;
            match expected {
                Some(want) if *want != actual => Err(RefError::AlreadyExists {
                    name: name.clone(),
                    current: Some(actual),
                }),
                _ => Ok(()),
            }
        }
        RefUpdate::SetSymbolic { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use ugit_store::MemStore;
    use ugit_utils::date::GitDate;

    fn oid(n: u8) -> ObjectId {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        ObjectId::from_bytes(&bytes, ugit_hash::HashAlgorithm::Sha1).unwrap()
    }

    fn sig() -> Signature {
        Signature::new("Test", "t@x", GitDate::new(1_700_000_000, 0))
    }

    fn store() -> RefStore {
        RefStore::new(Arc::new(MemStore::new()))
    }

    #[test]
    fn multi_ref_batch_commits_together() {
        let refs = store();
        let mut tx = RefTransaction::new();
        tx.set(RefName::branch("a").unwrap(), oid(1), WriteOptions::default());
        tx.set(RefName::branch("b").unwrap(), oid(2), WriteOptions::default());
        tx.commit(&refs, &sig()).unwrap();

        assert_eq!(refs.resolve(&RefName::branch("a").unwrap()).unwrap(), Some(oid(1)));
        assert_eq!(refs.resolve(&RefName::branch("b").unwrap()).unwrap(), Some(oid(2)));
    }

    #[test]
    fn failed_expectation_rolls_back_whole_batch() {
        let refs = store();
        let a = RefName::branch("a").unwrap();
        refs.write(&a, oid(9), WriteOptions::default(), &sig()).unwrap();

        let mut tx = RefTransaction::new();
        tx.set(RefName::branch("b").unwrap(), oid(1), WriteOptions::default());
        // Expect a value `a` does not have.
        tx.set(
            a.clone(),
            oid(2),
            WriteOptions {
                expected: Some(Some(oid(1))),
                message: None,
            },
        );
        assert!(tx.commit(&refs, &sig()).is_err());

        // Neither update landed, and no lock file lingers.
        assert!(refs.read(&RefName::branch("b").unwrap()).unwrap().is_none());
        assert_eq!(refs.resolve(&a).unwrap(), Some(oid(9)));
        assert!(!refs.storage().has("refs/heads/a.lock"));
        assert!(!refs.storage().has("refs/heads/b.lock"));
    }

    #[test]
    fn create_expecting_absence_conflicts_with_packed() {
        let refs = store();
        let name = RefName::branch("taken").unwrap();
        let mut packed = PackedRefs::default();
        packed.upsert(crate::PackedRef { name: name.clone(), oid: oid(3), peeled: None });
        packed
            .save(refs.storage().as_ref(), refs.lock_options())
            .unwrap();

        let mut tx = RefTransaction::new();
        tx.set(
            name,
            oid(4),
            WriteOptions {
                expected: Some(None),
                message: None,
            },
        );
        assert!(matches!(
            tx.commit(&refs, &sig()),
            Err(RefError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn delete_missing_ref_is_not_found() {
        let refs = store();
        let mut tx = RefTransaction::new();
        tx.delete(RefName::branch("ghost").unwrap(), None, None);
        assert!(matches!(
            tx.commit(&refs, &sig()),
            Err(RefError::NotFound { .. })
        ));
    }

    #[test]
    fn reflog_recorded_under_ref_lock_with_transition() {
        let refs = store();
        let name = RefName::branch("logged").unwrap();
        refs.write(
            &name,
            oid(1),
            WriteOptions {
                expected: None,
                message: Some("branch: created".into()),
            },
            &sig(),
        )
        .unwrap();

        let log = refs.reflog(&name).unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].old_oid.is_null());
        assert_eq!(log[0].new_oid, oid(1));
        assert_eq!(log[0].message, "branch: created");
    }

    #[test]
    fn contended_lock_times_out() {
        let refs = store();
        let name = RefName::branch("busy").unwrap();
        // Hold the lock out-of-band.
        refs.storage()
            .write_exclusive("refs/heads/busy.lock", b"")
            .unwrap();

        let fast = RefStore::new(refs.storage().clone())
            .with_lock_options(ugit_store::LockOptions {
                budget: std::time::Duration::from_millis(20),
                backoff: std::time::Duration::from_millis(5),
                max_backoff: std::time::Duration::from_millis(10),
            });
        let result = fast.write(&name, oid(1), WriteOptions::default(), &sig());
        assert!(matches!(
            result,
            Err(RefError::Store(StoreError::LockTimeout { .. }))
        ));
    }
}
