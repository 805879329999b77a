//! Bound entity handles and the typed entities built on them.
//!
//! A bound handle pairs an engine handle with the [`VersionedRef`] it was
//! obtained through. Entities bound to a live reference are confined to the
//! thread that produced them; entities bound to a frozen reference may be
//! shared freely.

use snapflow_core::{
    Changeset, Error, HandleKind, List, NativeHandle, Object, ObjectKey, Result, Results, Value,
    VersionId,
};
use snapflow_engine::{Filter, RawChanges};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crate::decode;
use crate::reference::VersionedRef;
use crate::resolver;

pub struct BoundObject {
    pub(crate) handle: NativeHandle<Object>,
    pub(crate) reference: Arc<VersionedRef>,
    pub(crate) class: String,
    pub(crate) key: ObjectKey,
}

impl BoundObject {
    pub(crate) fn new(handle: NativeHandle<Object>, reference: Arc<VersionedRef>) -> Result<Self> {
        let engine = reference.engine();
        let class = engine.object_class(&handle)?;
        let key = engine.object_key(&handle)?;
        Ok(Self {
            handle,
            reference,
            class,
            key,
        })
    }
}

pub struct BoundList {
    pub(crate) handle: NativeHandle<List>,
    pub(crate) reference: Arc<VersionedRef>,
    pub(crate) class: String,
    pub(crate) key: ObjectKey,
    pub(crate) field: String,
}

pub struct BoundResults {
    pub(crate) handle: NativeHandle<Results>,
    pub(crate) reference: Arc<VersionedRef>,
    pub(crate) class: String,
    pub(crate) filter: Filter,
}

/// An owned bound handle of any observable kind.
pub enum Entity {
    Object(BoundObject),
    List(BoundList),
    Results(BoundResults),
}

impl Entity {
    pub fn entity_ref(&self) -> EntityRef<'_> {
        match self {
            Self::Object(bound) => EntityRef::Object(bound),
            Self::List(bound) => EntityRef::List(bound),
            Self::Results(bound) => EntityRef::Results(bound),
        }
    }
}

/// A borrowed bound handle of any observable kind.
#[derive(Clone, Copy)]
pub enum EntityRef<'a> {
    Object(&'a BoundObject),
    List(&'a BoundList),
    Results(&'a BoundResults),
}

impl<'a> EntityRef<'a> {
    pub fn reference(self) -> &'a Arc<VersionedRef> {
        match self {
            Self::Object(bound) => &bound.reference,
            Self::List(bound) => &bound.reference,
            Self::Results(bound) => &bound.reference,
        }
    }

    pub fn kind(self) -> HandleKind {
        match self {
            Self::Object(_) => HandleKind::Object,
            Self::List(_) => HandleKind::List,
            Self::Results(_) => HandleKind::Results,
        }
    }
}

impl fmt::Display for EntityRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(bound) => write!(f, "{} {}", bound.class, bound.key),
            Self::List(bound) => write!(f, "{} {}.{}", bound.class, bound.key, bound.field),
            Self::Results(bound) => write!(f, "{} results", bound.class),
        }
    }
}

/// Thread an entity may be used from. `None` for frozen entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Confinement(Option<ThreadId>);

impl Confinement {
    fn for_reference(reference: &VersionedRef) -> Self {
        if reference.is_live() {
            Self(Some(thread::current().id()))
        } else {
            Self(None)
        }
    }

    fn check(self, reference: &VersionedRef) -> Result<()> {
        if let Some(expected) = self.0 {
            let actual = thread::current().id();
            if expected != actual {
                return Err(Error::ConfinementViolation { expected, actual });
            }
        }
        reference.check_open()
    }
}

/// Something a change stream can be opened on.
pub trait Observable: Sized + Send + 'static {
    /// Change description carried by `Updated` events.
    type Changes: fmt::Debug + Send + 'static;

    fn entity(&self) -> EntityRef<'_>;

    /// Rebuild the typed entity from a resolved handle of the same kind.
    fn from_entity(entity: Entity) -> Option<Self>;

    fn decode(raw: &dyn RawChanges) -> Self::Changes;

    fn has_changes(changes: &Self::Changes) -> bool;

    fn reference(&self) -> &Arc<VersionedRef> {
        self.entity().reference()
    }

    fn version(&self) -> Result<VersionId> {
        self.reference().version()
    }

    /// The same entity bound to `target`, or `None` if it does not exist
    /// at `target`'s version.
    fn resolve_in(&self, target: &Arc<VersionedRef>) -> Result<Option<Self>> {
        let kind = self.entity().kind();
        match resolver::resolve(self.entity(), target)? {
            Some(entity) => Self::from_entity(entity).map(Some).ok_or_else(|| {
                Error::InvalidatedReference(format!("{kind} resolved to another kind"))
            }),
            None => Ok(None),
        }
    }
}

/// Property-level change of a single object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectChangeset {
    pub changed_fields: Vec<String>,
}

impl ObjectChangeset {
    pub fn is_empty(&self) -> bool {
        self.changed_fields.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.changed_fields.iter().any(|name| name == field)
    }
}

pub struct ObjectEntity {
    bound: BoundObject,
    confinement: Confinement,
}

impl ObjectEntity {
    pub(crate) fn new(bound: BoundObject) -> Self {
        let confinement = Confinement::for_reference(&bound.reference);
        Self { bound, confinement }
    }

    pub fn key(&self) -> ObjectKey {
        self.bound.key
    }

    pub fn class(&self) -> &str {
        &self.bound.class
    }

    pub(crate) fn bound(&self) -> Result<&BoundObject> {
        self.confinement.check(&self.bound.reference)?;
        Ok(&self.bound)
    }

    pub fn is_valid(&self) -> bool {
        self.bound().is_ok()
            && self
                .bound
                .reference
                .engine()
                .object_is_valid(&self.bound.handle)
    }

    /// Value of `field`, `None` if the field was never set.
    pub fn get(&self, field: &str) -> Result<Option<Value>> {
        let bound = self.bound()?;
        Ok(bound.reference.engine().object_get(&bound.handle, field)?)
    }

    pub fn fields(&self) -> Result<BTreeMap<String, Value>> {
        let bound = self.bound()?;
        Ok(bound.reference.engine().object_fields(&bound.handle)?)
    }

    /// The list property `field` of this object.
    pub fn list(&self, field: &str) -> Result<ListEntity> {
        let bound = self.bound()?;
        let handle = bound
            .reference
            .engine()
            .object_get_list(&bound.handle, field)?;
        Ok(ListEntity::new(BoundList {
            handle,
            reference: bound.reference.clone(),
            class: bound.class.clone(),
            key: bound.key,
            field: field.to_string(),
        }))
    }
}

impl Observable for ObjectEntity {
    type Changes = ObjectChangeset;

    fn entity(&self) -> EntityRef<'_> {
        EntityRef::Object(&self.bound)
    }

    fn from_entity(entity: Entity) -> Option<Self> {
        match entity {
            Entity::Object(bound) => Some(Self::new(bound)),
            _ => None,
        }
    }

    fn decode(raw: &dyn RawChanges) -> ObjectChangeset {
        decode::object_changes(raw)
    }

    fn has_changes(changes: &ObjectChangeset) -> bool {
        !changes.is_empty()
    }
}

impl PartialEq for ObjectEntity {
    fn eq(&self, other: &Self) -> bool {
        same_snapshot(&self.bound.reference, &other.bound.reference)
            && self.bound.class == other.bound.class
            && self.bound.key == other.bound.key
    }
}

impl fmt::Debug for ObjectEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectEntity")
            .field("class", &self.bound.class)
            .field("key", &self.bound.key)
            .field("reference", &self.bound.reference)
            .finish()
    }
}

pub struct ListEntity {
    bound: BoundList,
    confinement: Confinement,
}

impl ListEntity {
    pub(crate) fn new(bound: BoundList) -> Self {
        let confinement = Confinement::for_reference(&bound.reference);
        Self { bound, confinement }
    }

    /// Key of the object owning the list.
    pub fn owner(&self) -> ObjectKey {
        self.bound.key
    }

    pub fn field(&self) -> &str {
        &self.bound.field
    }

    pub(crate) fn bound(&self) -> Result<&BoundList> {
        self.confinement.check(&self.bound.reference)?;
        Ok(&self.bound)
    }

    pub fn len(&self) -> Result<usize> {
        let bound = self.bound()?;
        Ok(bound.reference.engine().list_size(&bound.handle)?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, index: usize) -> Result<Value> {
        let bound = self.bound()?;
        Ok(bound.reference.engine().list_get(&bound.handle, index)?)
    }

    pub fn values(&self) -> Result<Vec<Value>> {
        (0..self.len()?).map(|i| self.get(i)).collect()
    }
}

impl Observable for ListEntity {
    type Changes = Changeset;

    fn entity(&self) -> EntityRef<'_> {
        EntityRef::List(&self.bound)
    }

    fn from_entity(entity: Entity) -> Option<Self> {
        match entity {
            Entity::List(bound) => Some(Self::new(bound)),
            _ => None,
        }
    }

    fn decode(raw: &dyn RawChanges) -> Changeset {
        decode::collection_changes(raw)
    }

    fn has_changes(changes: &Changeset) -> bool {
        !changes.is_empty()
    }
}

impl PartialEq for ListEntity {
    fn eq(&self, other: &Self) -> bool {
        same_snapshot(&self.bound.reference, &other.bound.reference)
            && self.bound.class == other.bound.class
            && self.bound.key == other.bound.key
            && self.bound.field == other.bound.field
    }
}

impl fmt::Debug for ListEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListEntity")
            .field("owner", &self.bound.key)
            .field("field", &self.bound.field)
            .field("reference", &self.bound.reference)
            .finish()
    }
}

pub struct ResultsEntity {
    bound: BoundResults,
    confinement: Confinement,
}

impl ResultsEntity {
    pub(crate) fn new(bound: BoundResults) -> Self {
        let confinement = Confinement::for_reference(&bound.reference);
        Self { bound, confinement }
    }

    pub fn class(&self) -> &str {
        &self.bound.class
    }

    pub fn filter(&self) -> &Filter {
        &self.bound.filter
    }

    pub(crate) fn bound(&self) -> Result<&BoundResults> {
        self.confinement.check(&self.bound.reference)?;
        Ok(&self.bound)
    }

    pub fn len(&self) -> Result<usize> {
        let bound = self.bound()?;
        Ok(bound.reference.engine().results_size(&bound.handle)?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, index: usize) -> Result<ObjectEntity> {
        let bound = self.bound()?;
        let handle = bound.reference.engine().results_get(&bound.handle, index)?;
        let object = BoundObject::new(handle, bound.reference.clone())?;
        Ok(ObjectEntity::new(object))
    }

    /// The member with `key`, if it is part of these results.
    pub fn find(&self, key: ObjectKey) -> Result<Option<ObjectEntity>> {
        for index in 0..self.len()? {
            let object = self.get(index)?;
            if object.key() == key {
                return Ok(Some(object));
            }
        }
        Ok(None)
    }

    pub fn keys(&self) -> Result<Vec<ObjectKey>> {
        (0..self.len()?)
            .map(|index| self.get(index).map(|object| object.key()))
            .collect()
    }
}

impl Observable for ResultsEntity {
    type Changes = Changeset;

    fn entity(&self) -> EntityRef<'_> {
        EntityRef::Results(&self.bound)
    }

    fn from_entity(entity: Entity) -> Option<Self> {
        match entity {
            Entity::Results(bound) => Some(Self::new(bound)),
            _ => None,
        }
    }

    fn decode(raw: &dyn RawChanges) -> Changeset {
        decode::collection_changes(raw)
    }

    fn has_changes(changes: &Changeset) -> bool {
        !changes.is_empty()
    }
}

impl PartialEq for ResultsEntity {
    fn eq(&self, other: &Self) -> bool {
        same_snapshot(&self.bound.reference, &other.bound.reference)
            && self.bound.class == other.bound.class
            && self.bound.filter == other.bound.filter
    }
}

impl fmt::Debug for ResultsEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultsEntity")
            .field("class", &self.bound.class)
            .field("filter", &self.bound.filter)
            .field("reference", &self.bound.reference)
            .finish()
    }
}

fn same_snapshot(a: &VersionedRef, b: &VersionedRef) -> bool {
    a.database() == b.database()
        && a.is_live() == b.is_live()
        && matches!((a.version(), b.version()), (Ok(x), Ok(y)) if x == y)
}
