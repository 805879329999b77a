//! # snapflow-notify
//!
//! Versioned references over a [`NativeEngine`], and the change streams
//! built on them.
//!
//! ```text
//! Session             ← live reference, version arena, registry
//!     │
//! VersionedRef        ← live (follows commits) or frozen (pinned)
//!     │
//! resolver            ← freeze, thaw, resolve entities across versions
//!     │
//! NotificationRegistry← native callbacks, idempotent unregister
//!     │
//! ChangeStream        ← Initial, Updated…, Deleted
//! ```
//!
//! Entities bound to a live reference are confined to the thread that
//! produced them. Every event a stream yields is bound to a frozen
//! reference and may be sent anywhere.
//!
//! [`NativeEngine`]: snapflow_engine::NativeEngine

mod arena;
mod config;
mod decode;
mod entity;
mod reference;
mod registry;
mod resolver;
mod session;
mod stream;

pub use arena::{VersionArena, VersionData};
pub use config::{ConfigError, NotifierConfig, SessionConfig};
pub use entity::{
    BoundList, BoundObject, BoundResults, Entity, EntityRef, ListEntity, ObjectChangeset,
    ObjectEntity, Observable, ResultsEntity,
};
pub use reference::VersionedRef;
pub use registry::{NotificationRegistry, RegistrationToken, RegistryStats};
pub use resolver::{freeze, resolve, thaw};
pub use session::{Session, WriteTransaction};
pub use stream::{ChangeEvent, ChangeStream, DatabaseChange, DatabaseChangeStream};

pub use snapflow_core::{
    Changeset, DatabaseId, EngineError, Error, IndexRange, Move, ObjectKey, Result, Value,
    VersionId,
};
pub use snapflow_engine::{EngineConfig, Filter};
