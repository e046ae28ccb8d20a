use ugit_hash::ObjectId;

use crate::name::RefName;

/// Errors from the reference store.
#[derive(Debug, thiserror::Error)]
pub enum RefError {
    #[error("ref not found: {name}")]
    NotFound { name: RefName },

    #[error("ref {name} already at a different value")]
    AlreadyExists {
        name: RefName,
        /// Current value, when the ref exists.
        current: Option<ObjectId>,
    },

    #[error("symbolic ref chain for {name} exceeds {depth} hops or cycles")]
    SymrefLoop { name: RefName, depth: usize },

    #[error("invalid ref name: {0}")]
    InvalidName(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Store(#[from] ugit_store::StoreError),

    #[error(transparent)]
    Hash(#[from] ugit_hash::HashError),
}
