//! Out-of-band progress reporting.
//!
//! Long-running operations (fetch, checkout, pack indexing) report progress
//! through a caller-supplied callback instead of writing to a terminal
//! themselves. The callback receives the phase name, the units completed so
//! far, and the total when it is known up front.

use std::sync::Arc;

/// A single progress update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Phase label, e.g. "Receiving objects" or "Updating files".
    pub phase: &'static str,
    /// Units completed so far (objects, bytes, files — phase-dependent).
    pub loaded: u64,
    /// Total units, when known at phase start.
    pub total: Option<u64>,
}

/// Shared handle that operations use to emit [`ProgressEvent`]s.
///
/// Cloning is cheap; all clones feed the same callback. The default handle
/// discards every event.
#[derive(Clone)]
pub struct ProgressSink {
    callback: Option<Arc<dyn Fn(ProgressEvent) + Send + Sync>>,
}

impl ProgressSink {
    /// A sink that drops all events.
    pub fn discard() -> Self {
        Self { callback: None }
    }

    /// A sink forwarding events to the given callback.
    pub fn new(callback: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    /// Emit one update.
    pub fn report(&self, phase: &'static str, loaded: u64, total: Option<u64>) {
        if let Some(cb) = &self.callback {
            cb(ProgressEvent {
                phase,
                loaded,
                total,
            });
        }
    }
}

impl Default for ProgressSink {
    fn default() -> Self {
        Self::discard()
    }
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSink")
            .field("active", &self.callback.is_some())
            .finish()
    }
}
