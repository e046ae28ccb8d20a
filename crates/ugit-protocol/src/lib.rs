//! Git wire protocol engine.
//!
//! Speaks protocol v1 and v2 over an injected [`ugit_transport::Connection`]:
//! capability discovery, want/have negotiation, pack streaming in both
//! directions, shallow bookkeeping, and the push status report. The engine
//! owns no sockets and performs no ref updates itself — it returns the ref
//! transitions for the caller to apply atomically.

pub mod capability;
pub mod fetch;
pub mod pktline;
pub mod push;
pub mod shallow;
pub mod sideband;
pub mod v2;

pub use capability::{Advertisement, Capabilities, SidebandMode};
pub use fetch::{fetch, FetchOptions, FetchOutcome, FetchPhase};
pub use push::{push, PushOptions, PushOutcome, RefPush};

/// Wire protocol version in use for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    #[default]
    V1,
    V2,
}

/// Errors from the protocol engine.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid pkt-line: {0}")]
    InvalidPktLine(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("fetch failed during {phase:?}: {cause}")]
    Failed {
        phase: FetchPhase,
        #[source]
        cause: Box<ProtocolError>,
    },

    #[error("operation deadline exceeded")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Transport(#[from] ugit_transport::TransportError),

    #[error(transparent)]
    Odb(#[from] ugit_odb::OdbError),

    #[error(transparent)]
    Object(#[from] ugit_object::ObjectError),

    #[error(transparent)]
    Store(#[from] ugit_store::StoreError),

    #[error(transparent)]
    Hash(#[from] ugit_hash::HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
