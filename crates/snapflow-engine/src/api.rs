//! The narrow, C-style engine surface.
//!
//! This is everything the versioned-reference and notification layer needs
//! from a storage engine. Every resource crosses the boundary as a
//! capability-tagged [`NativeHandle`]; every fallible call reports a
//! structural [`EngineError`]. An entity that does not exist at some version
//! is reported as `None`, never as an error.
//!
//! Notification callbacks run on an engine-owned notifier thread, never on
//! the thread that registered them.

use snapflow_core::{
    Database, DatabaseId, EngineError, List, NativeHandle, NotificationToken, Object, ObjectKey,
    Query, Results, Value, VersionId,
};
use std::collections::BTreeMap;

use crate::config::EngineConfig;

pub type EngineResult<T> = Result<T, EngineError>;

/// Element counts of a native collection change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeCounts {
    pub deletions: usize,
    pub insertions: usize,
    pub modifications: usize,
    pub moves: usize,
}

/// Range counts of a native collection change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeCounts {
    pub deletions: usize,
    pub insertions: usize,
    pub modifications: usize,
    pub modifications_after: usize,
}

/// Raw change data handed to a notification callback.
///
/// Accessors mirror native arrays: they return the engine's signed index
/// type and are only valid for `i < count`.
pub trait RawChanges {
    /// Version the change was computed against.
    fn version(&self) -> VersionId;

    /// Whether the observed object (or the object owning the observed list)
    /// no longer exists at [`version`](Self::version).
    fn is_deleted(&self) -> bool;

    /// Names of properties that changed, for object notifications.
    fn modified_properties(&self) -> Vec<String>;

    fn num_changes(&self) -> ChangeCounts;
    fn deletion_at(&self, i: usize) -> i64;
    fn insertion_at(&self, i: usize) -> i64;
    fn modification_at(&self, i: usize) -> i64;
    fn modification_after_at(&self, i: usize) -> i64;
    fn move_at(&self, i: usize) -> (i64, i64);

    fn num_ranges(&self) -> RangeCounts;
    fn deletion_range_at(&self, i: usize) -> (i64, i64);
    fn insertion_range_at(&self, i: usize) -> (i64, i64);
    fn modification_range_at(&self, i: usize) -> (i64, i64);
    fn modification_range_after_at(&self, i: usize) -> (i64, i64);
}

/// Entity change callback. Invoked on the notifier thread.
pub type ChangeCallback = Box<dyn FnMut(&dyn RawChanges) + Send + 'static>;

/// Database-changed callback. Invoked on the notifier thread before any
/// entity callback for the same version.
pub type DatabaseChangedCallback = Box<dyn FnMut(VersionId) + Send + 'static>;

/// Query predicate. Query-string parsing is the engine's business; this
/// layer only needs class-wide and single-field equality queries.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq { field: String, value: Value },
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// C-style handle API of a native storage engine.
pub trait NativeEngine: Send + Sync {
    // -- database lifecycle -------------------------------------------------

    /// Open a live reference to the database at `path`, at its latest version.
    fn open(&self, path: &str, config: &EngineConfig) -> EngineResult<NativeHandle<Database>>;

    /// Close a database reference. Later calls through it fail with
    /// [`EngineError::Closed`]; releasing it remains the handle's drop.
    fn close(&self, db: &NativeHandle<Database>) -> EngineResult<()>;

    fn is_closed(&self, db: &NativeHandle<Database>) -> bool;

    fn database_id(&self, db: &NativeHandle<Database>) -> EngineResult<DatabaseId>;

    /// Version the reference currently reads at.
    fn version(&self, db: &NativeHandle<Database>) -> EngineResult<VersionId>;

    fn is_frozen(&self, db: &NativeHandle<Database>) -> EngineResult<bool>;

    /// Pin the reference's current version in a new frozen reference.
    fn freeze(&self, db: &NativeHandle<Database>) -> EngineResult<NativeHandle<Database>>;

    /// Open a new live reference to the same database at its latest version.
    fn thaw(&self, db: &NativeHandle<Database>) -> EngineResult<NativeHandle<Database>>;

    /// Advance a live reference to the latest committed version.
    fn refresh(&self, db: &NativeHandle<Database>) -> EngineResult<VersionId>;

    // -- transactions -------------------------------------------------------

    fn begin_write(&self, db: &NativeHandle<Database>) -> EngineResult<()>;
    fn commit(&self, db: &NativeHandle<Database>) -> EngineResult<VersionId>;
    fn rollback(&self, db: &NativeHandle<Database>) -> EngineResult<()>;
    fn is_in_transaction(&self, db: &NativeHandle<Database>) -> bool;

    // -- objects ------------------------------------------------------------

    fn object_create(
        &self,
        db: &NativeHandle<Database>,
        class: &str,
    ) -> EngineResult<NativeHandle<Object>>;

    fn object_find(
        &self,
        db: &NativeHandle<Database>,
        class: &str,
        key: ObjectKey,
    ) -> EngineResult<Option<NativeHandle<Object>>>;

    fn object_key(&self, obj: &NativeHandle<Object>) -> EngineResult<ObjectKey>;
    fn object_class(&self, obj: &NativeHandle<Object>) -> EngineResult<String>;
    fn object_is_valid(&self, obj: &NativeHandle<Object>) -> bool;

    fn object_get(&self, obj: &NativeHandle<Object>, field: &str) -> EngineResult<Option<Value>>;
    fn object_fields(&self, obj: &NativeHandle<Object>) -> EngineResult<BTreeMap<String, Value>>;
    fn object_set(&self, obj: &NativeHandle<Object>, field: &str, value: Value)
    -> EngineResult<()>;
    fn object_delete(&self, obj: &NativeHandle<Object>) -> EngineResult<()>;

    // -- lists --------------------------------------------------------------

    fn object_get_list(
        &self,
        obj: &NativeHandle<Object>,
        field: &str,
    ) -> EngineResult<NativeHandle<List>>;

    fn list_size(&self, list: &NativeHandle<List>) -> EngineResult<usize>;
    fn list_get(&self, list: &NativeHandle<List>, index: usize) -> EngineResult<Value>;
    fn list_insert(&self, list: &NativeHandle<List>, index: usize, value: Value)
    -> EngineResult<()>;
    fn list_set(&self, list: &NativeHandle<List>, index: usize, value: Value) -> EngineResult<()>;
    fn list_erase(&self, list: &NativeHandle<List>, index: usize) -> EngineResult<()>;
    fn list_move(&self, list: &NativeHandle<List>, from: usize, to: usize) -> EngineResult<()>;

    // -- queries and results ------------------------------------------------

    fn query(
        &self,
        db: &NativeHandle<Database>,
        class: &str,
        filter: Filter,
    ) -> EngineResult<NativeHandle<Query>>;

    fn query_find_all(&self, query: &NativeHandle<Query>) -> EngineResult<NativeHandle<Results>>;
    fn results_size(&self, results: &NativeHandle<Results>) -> EngineResult<usize>;
    fn results_get(
        &self,
        results: &NativeHandle<Results>,
        index: usize,
    ) -> EngineResult<NativeHandle<Object>>;

    // -- resolve ------------------------------------------------------------

    /// The same object bound to `target`, or `None` if it does not exist at
    /// `target`'s version.
    fn object_resolve_in(
        &self,
        obj: &NativeHandle<Object>,
        target: &NativeHandle<Database>,
    ) -> EngineResult<Option<NativeHandle<Object>>>;

    fn list_resolve_in(
        &self,
        list: &NativeHandle<List>,
        target: &NativeHandle<Database>,
    ) -> EngineResult<Option<NativeHandle<List>>>;

    /// Results always resolve: a query is re-evaluated at the target version.
    fn results_resolve_in(
        &self,
        results: &NativeHandle<Results>,
        target: &NativeHandle<Database>,
    ) -> EngineResult<NativeHandle<Results>>;

    // -- notifications ------------------------------------------------------

    fn object_add_notification_callback(
        &self,
        obj: &NativeHandle<Object>,
        callback: ChangeCallback,
    ) -> EngineResult<NativeHandle<NotificationToken>>;

    fn list_add_notification_callback(
        &self,
        list: &NativeHandle<List>,
        callback: ChangeCallback,
    ) -> EngineResult<NativeHandle<NotificationToken>>;

    fn results_add_notification_callback(
        &self,
        results: &NativeHandle<Results>,
        callback: ChangeCallback,
    ) -> EngineResult<NativeHandle<NotificationToken>>;

    fn add_database_changed_callback(
        &self,
        db: &NativeHandle<Database>,
        callback: DatabaseChangedCallback,
    ) -> EngineResult<NativeHandle<NotificationToken>>;

    /// Stop a callback. Releasing the token is the unregistration.
    fn unregister_notification_callback(&self, token: NativeHandle<NotificationToken>) {
        drop(token);
    }
}
