//! Snapshot versions.
//!
//! Every commit produces a new [`VersionId`]. Versions of one database are
//! totally ordered; a live reference only ever moves forward through them,
//! a frozen reference stays on the one it was created at.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one committed snapshot of a database.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct VersionId {
    /// Transaction number of the commit that produced the snapshot.
    pub txn_number: u64,
    /// Position of the snapshot in the engine's version history.
    pub txn_index: u64,
}

impl VersionId {
    pub const fn new(txn_number: u64, txn_index: u64) -> Self {
        Self {
            txn_number,
            txn_index,
        }
    }

    /// The version produced by the next commit.
    pub const fn next(self) -> Self {
        Self {
            txn_number: self.txn_number + 1,
            txn_index: self.txn_index + 1,
        }
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.txn_number, self.txn_index)
    }
}

/// Identity of an open database, shared by all of its live and frozen
/// references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatabaseId(pub u64);

impl fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "db-{}", self.0)
    }
}
