//! Error types for handle, version, and notification operations.
//!
//! "Not found" is deliberately absent: an entity missing at a version is an
//! ordinary outcome and is reported as `None` by the resolving operation.

use crate::handle::{HandleKind, RawHandle};
use std::thread::ThreadId;

/// Structural failures reported by the native engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The database was closed, possibly concurrently.
    #[error("database is closed")]
    Closed,

    /// The engine does not know this handle (released or foreign).
    #[error("unknown {kind} handle {raw}")]
    UnknownHandle { kind: HandleKind, raw: RawHandle },

    /// Two handles from different databases were combined.
    #[error("handles belong to different databases")]
    WrongDatabase,

    /// A mutation was attempted through a frozen reference.
    #[error("cannot write through a frozen reference")]
    FrozenWrite,

    /// Notifications and refresh need a live reference.
    #[error("operation requires a live reference")]
    NotLive,

    #[error("no write transaction in progress")]
    NoWriteTransaction,

    #[error("a write transaction is already in progress")]
    WriteInProgress,

    /// A mutation targeted an object or list that does not exist.
    #[error("{0} does not exist at the current version")]
    MissingTarget(String),

    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// Pinning another version would exceed the configured limit.
    #[error("too many active versions (limit {limit})")]
    TooManyVersions { limit: usize },

    /// A bounded delivery channel was full when the engine delivered a change.
    #[error("notification delivery overflowed a bounded channel")]
    DeliveryOverflow,

    /// I/O or corruption inside the engine.
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Errors surfaced by the versioned-reference and notification layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The versioned reference backing an entity was released.
    #[error("invalidated reference: {0}")]
    InvalidatedReference(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A thread-confined entity was used outside the context that owns it.
    #[error("confinement violation: owned by {expected:?}, accessed from {actual:?}")]
    ConfinementViolation { expected: ThreadId, actual: ThreadId },

    /// Resolve was asked to map an entity into another database.
    #[error("entity belongs to {entity}, target reference belongs to {target}")]
    WrongDatabase {
        entity: crate::DatabaseId,
        target: crate::DatabaseId,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_convert_transparently() {
        let err: Error = EngineError::UnknownHandle {
            kind: HandleKind::Object,
            raw: RawHandle(3),
        }
        .into();
        assert_eq!(err.to_string(), "unknown object handle 0x3");
    }
}
