//! The `shallow` state file: one boundary commit OID per line.

use std::collections::BTreeSet;

use bstr::ByteSlice;
use ugit_hash::ObjectId;
use ugit_store::{Lock, LockOptions, Storage, StoreError};

use crate::ProtocolError;

pub const SHALLOW_KEY: &str = "shallow";

/// Read the recorded shallow boundary; missing file means a full clone.
pub fn read(storage: &dyn Storage) -> Result<BTreeSet<ObjectId>, ProtocolError> {
    let data = match storage.read(SHALLOW_KEY) {
        Ok(data) => data,
        Err(StoreError::NotFound { .. }) => return Ok(BTreeSet::new()),
        Err(e) => return Err(e.into()),
    };
    let mut set = BTreeSet::new();
    for line in data.lines() {
        let hex = std::str::from_utf8(line.trim())
            .map_err(|_| ProtocolError::Remote("non-UTF8 shallow line".into()))?;
        if !hex.is_empty() {
            set.insert(
                ObjectId::from_hex(hex)
                    .map_err(|e| ProtocolError::Remote(format!("bad shallow OID: {e}")))?,
            );
        }
    }
    Ok(set)
}

/// Apply the server's shallow/unshallow lines atomically. An empty result
/// removes the file (the repository is complete again).
pub fn update(
    storage: &dyn Storage,
    added: &[ObjectId],
    removed: &[ObjectId],
) -> Result<(), ProtocolError> {
    let mut set = read(storage)?;
    for oid in added {
        set.insert(*oid);
    }
    for oid in removed {
        set.remove(oid);
    }

    if set.is_empty() {
        match storage.delete(SHALLOW_KEY) {
            Ok(()) | Err(StoreError::NotFound { .. }) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }

    let mut contents = Vec::with_capacity(set.len() * 41);
    for oid in &set {
        contents.extend_from_slice(oid.to_hex().as_bytes());
        contents.push(b'\n');
    }
    let mut lock = Lock::acquire(storage, SHALLOW_KEY, &LockOptions::default())?;
    lock.write(&contents);
    lock.commit()?;
    Ok(())
}
