//! # snapflow-core
//!
//! Typed vocabulary shared by the engine surface and the notification
//! layer: capability-tagged native handles, snapshot versions, property
//! values, collection change-sets, and the error taxonomy.
//!
//! Nothing in this crate talks to an engine or runs asynchronously.
//!
//! ## Architecture
//!
//! ```text
//! NativeHandle<C>     ← owned engine resource, released on drop
//!     │
//! VersionId           ← position of a snapshot in commit order
//!     │
//! ChangesetBuilder    ← native index/range arrays
//!     │
//! Changeset           ← immutable, index and range forms in agreement
//! ```

pub mod changeset;
pub mod error;
pub mod handle;
pub mod value;
pub mod version;

pub use changeset::{
    Changeset, ChangesetBuilder, IndexRange, Move, expand_ranges, ranges_from_indices,
};
pub use error::{EngineError, Error, Result};
pub use handle::{
    Capability, Database, HandleKind, List, NativeHandle, NotificationToken, Object, Query,
    RawHandle, Release, Results,
};
pub use value::{ObjectKey, Value};
pub use version::{DatabaseId, VersionId};
