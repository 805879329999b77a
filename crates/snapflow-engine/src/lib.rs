//! # snapflow-engine
//!
//! The C-style surface a native storage engine exposes to the
//! versioned-reference layer, and [`MemoryEngine`], an in-process
//! implementation of it.
//!
//! `MemoryEngine` keeps every committed snapshot of a database, lets one
//! writer at a time build the next one, and runs one notifier thread per
//! open database. After each commit the notifier diffs the previous and new
//! snapshot for every registered callback and invokes it with the raw
//! index arrays, the way a native engine would.

pub mod api;
pub mod config;
pub mod memory;

pub use api::{
    ChangeCallback, ChangeCounts, DatabaseChangedCallback, EngineResult, Filter, NativeEngine,
    RangeCounts, RawChanges,
};
pub use config::{ConfigError, DEFAULT_NOTIFIER_THREAD_NAME, EngineConfig};
pub use memory::{EngineStats, MemoryEngine};
