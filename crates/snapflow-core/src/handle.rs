//! Capability-tagged native handles.
//!
//! The native engine hands out opaque resource identifiers. This module
//! wraps each of them in a move-only [`NativeHandle<C>`] whose capability
//! marker `C` records what the handle may be used for, so a results handle
//! cannot be passed where an object handle is expected.
//!
//! Release is tied to scoped destruction: dropping the wrapper calls back
//! into the engine exactly once. The wrapper is not `Clone`, so there is no
//! second owner that could release the same identifier again.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Engine-side identifier of a native resource.
///
/// Identifiers may be reused by the engine once the resource is released,
/// exactly like a pointer returned by a C allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RawHandle(pub u64);

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Runtime mirror of the capability markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleKind {
    Database,
    Object,
    List,
    Results,
    Query,
    NotificationToken,
}

impl HandleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Object => "object",
            Self::List => "list",
            Self::Results => "results",
            Self::Query => "query",
            Self::NotificationToken => "notification_token",
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Type-level capability of a native handle.
///
/// Sealed: the set of capabilities is fixed by the engine API.
pub trait Capability: sealed::Sealed + Send + Sync + 'static {
    const KIND: HandleKind;
}

macro_rules! capability {
    ($(#[$doc:meta])* $name:ident => $kind:ident) => {
        $(#[$doc])*
        #[derive(Debug)]
        pub enum $name {}

        impl sealed::Sealed for $name {}

        impl Capability for $name {
            const KIND: HandleKind = HandleKind::$kind;
        }
    };
}

capability!(
    /// An open database, either live or frozen at one version.
    Database => Database
);
capability!(
    /// A single object.
    Object => Object
);
capability!(
    /// A list property of an object.
    List => List
);
capability!(
    /// A materialized result set.
    Results => Results
);
capability!(
    /// A query over one class.
    Query => Query
);
capability!(
    /// An active notification callback registration.
    NotificationToken => NotificationToken
);

/// Engine hook that frees a native resource.
///
/// Called exactly once per minted handle, from the handle's destructor.
pub trait Release: Send + Sync {
    fn release(&self, kind: HandleKind, raw: RawHandle);
}

/// Owned, move-only handle to a native resource with capability `C`.
pub struct NativeHandle<C: Capability> {
    raw: RawHandle,
    owner: Arc<dyn Release>,
    _capability: PhantomData<fn() -> C>,
}

impl<C: Capability> NativeHandle<C> {
    /// Take ownership of a freshly minted engine identifier.
    ///
    /// Only engines call this. The identifier must not be wrapped twice.
    pub fn from_raw(raw: RawHandle, owner: Arc<dyn Release>) -> Self {
        Self {
            raw,
            owner,
            _capability: PhantomData,
        }
    }

    /// The engine-side identifier.
    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    pub fn kind(&self) -> HandleKind {
        C::KIND
    }
}

impl<C: Capability> Drop for NativeHandle<C> {
    fn drop(&mut self) {
        self.owner.release(C::KIND, self.raw);
    }
}

impl<C: Capability> fmt::Debug for NativeHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeHandle<{}>({})", C::KIND.as_str(), self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        released: Mutex<Vec<(HandleKind, RawHandle)>>,
    }

    impl Release for Recorder {
        fn release(&self, kind: HandleKind, raw: RawHandle) {
            self.released
                .lock()
                .expect("recorder lock should not be poisoned")
                .push((kind, raw));
        }
    }

    #[test]
    fn drop_releases_exactly_once_with_capability_kind() {
        let recorder = Arc::new(Recorder::default());
        {
            let handle: NativeHandle<Results> = NativeHandle::from_raw(RawHandle(7), recorder.clone());
            assert_eq!(handle.kind(), HandleKind::Results);
            let moved = handle;
            assert_eq!(moved.raw(), RawHandle(7));
        }
        let released = recorder.released.lock().expect("lock").clone();
        assert_eq!(released, vec![(HandleKind::Results, RawHandle(7))]);
    }

    #[test]
    fn debug_names_capability() {
        let recorder = Arc::new(Recorder::default());
        let handle: NativeHandle<NotificationToken> =
            NativeHandle::from_raw(RawHandle(0x2a), recorder);
        assert_eq!(
            format!("{handle:?}"),
            "NativeHandle<notification_token>(0x2a)"
        );
    }
}
