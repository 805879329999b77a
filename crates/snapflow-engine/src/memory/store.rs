//! Snapshot contents and change computation.
//!
//! A [`Snapshot`] is the full state of a database at one version. Snapshots
//! are immutable once committed; a write transaction works on a private
//! clone of the latest one.

use snapflow_core::{ObjectKey, Value, VersionId, ranges_from_indices};
use std::collections::{BTreeMap, BTreeSet};

use crate::api::{ChangeCounts, Filter, RangeCounts, RawChanges};

/// One element of a list property. The id survives moves and value updates
/// so consecutive snapshots can be diffed by identity.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ListElement {
    pub id: u64,
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ObjectState {
    pub fields: BTreeMap<String, Value>,
    pub lists: BTreeMap<String, Vec<ListElement>>,
}

impl ObjectState {
    pub fn list(&self, field: &str) -> &[ListElement] {
        self.lists.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    fn matches(&self, filter: &Filter) -> bool {
        match filter {
            Filter::All => true,
            Filter::Eq { field, value } => {
                self.fields.get(field).unwrap_or(&Value::Null) == value
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Snapshot {
    classes: BTreeMap<String, BTreeMap<ObjectKey, ObjectState>>,
}

impl Snapshot {
    pub fn object(&self, class: &str, key: ObjectKey) -> Option<&ObjectState> {
        self.classes.get(class).and_then(|objects| objects.get(&key))
    }

    pub fn object_mut(&mut self, class: &str, key: ObjectKey) -> Option<&mut ObjectState> {
        self.classes
            .get_mut(class)
            .and_then(|objects| objects.get_mut(&key))
    }

    pub fn insert(&mut self, class: &str, key: ObjectKey, state: ObjectState) {
        self.classes
            .entry(class.to_string())
            .or_default()
            .insert(key, state);
    }

    pub fn remove(&mut self, class: &str, key: ObjectKey) -> Option<ObjectState> {
        self.classes
            .get_mut(class)
            .and_then(|objects| objects.remove(&key))
    }

    /// Keys of the objects of `class` matching `filter`, in key order.
    pub fn select(&self, class: &str, filter: &Filter) -> Vec<ObjectKey> {
        self.classes
            .get(class)
            .into_iter()
            .flat_map(|objects| objects.iter())
            .filter(|(_, state)| state.matches(filter))
            .map(|(key, _)| *key)
            .collect()
    }

    fn class_changed(&self, other: &Snapshot, class: &str) -> bool {
        self.classes.get(class) != other.classes.get(class)
    }
}

/// What a registration observes.
#[derive(Debug, Clone)]
pub(crate) enum Target {
    Object {
        class: String,
        key: ObjectKey,
    },
    List {
        class: String,
        key: ObjectKey,
        field: String,
    },
    Results {
        class: String,
        filter: Filter,
    },
    Database,
}

/// Element-level difference between two orderings of one collection.
///
/// Moved elements are reported in `moves` and also as a deletion at their
/// old index plus an insertion at their new index. Modifications only cover
/// elements that kept their relative order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CollectionDiff {
    pub deletions: Vec<usize>,
    pub insertions: Vec<usize>,
    pub modifications: Vec<usize>,
    pub modifications_after: Vec<usize>,
    pub moves: Vec<(usize, usize)>,
}

pub(crate) fn diff_collection<K: Ord + Copy>(
    old: &[K],
    new: &[K],
    modified: impl Fn(K) -> bool,
) -> CollectionDiff {
    let old_positions: BTreeMap<K, usize> = old.iter().enumerate().map(|(i, k)| (*k, i)).collect();
    let new_keys: BTreeSet<K> = new.iter().copied().collect();

    let mut diff = CollectionDiff {
        deletions: old
            .iter()
            .enumerate()
            .filter(|(_, key)| !new_keys.contains(key))
            .map(|(i, _)| i)
            .collect(),
        ..CollectionDiff::default()
    };

    // (old index, new index, key) of surviving elements, in new order.
    let mut common = Vec::new();
    for (new_index, key) in new.iter().enumerate() {
        match old_positions.get(key) {
            Some(old_index) => common.push((*old_index, new_index, *key)),
            None => diff.insertions.push(new_index),
        }
    }

    let order: Vec<usize> = common.iter().map(|(old_index, _, _)| *old_index).collect();
    let stable = longest_increasing(&order);
    for ((old_index, new_index, key), keep) in common.into_iter().zip(stable) {
        if keep {
            if modified(key) {
                diff.modifications.push(old_index);
                diff.modifications_after.push(new_index);
            }
        } else {
            diff.moves.push((old_index, new_index));
            diff.deletions.push(old_index);
            diff.insertions.push(new_index);
        }
    }
    diff.deletions.sort_unstable();
    diff.insertions.sort_unstable();
    diff.moves.sort_unstable_by_key(|(_, to)| *to);
    diff
}

/// Marks one longest strictly increasing subsequence of `values`.
fn longest_increasing(values: &[usize]) -> Vec<bool> {
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; values.len()];
    for (i, value) in values.iter().enumerate() {
        let at = tails.partition_point(|&t| values[t] < *value);
        if at > 0 {
            previous[i] = Some(tails[at - 1]);
        }
        if at == tails.len() {
            tails.push(i);
        } else {
            tails[at] = i;
        }
    }
    let mut keep = vec![false; values.len()];
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        keep[i] = true;
        cursor = previous[i];
    }
    keep
}

fn changed_fields(old: &ObjectState, new: &ObjectState) -> Vec<String> {
    let mut names = BTreeSet::new();
    for (name, value) in &old.fields {
        if new.fields.get(name) != Some(value) {
            names.insert(name.clone());
        }
    }
    for name in new.fields.keys() {
        if !old.fields.contains_key(name) {
            names.insert(name.clone());
        }
    }
    for name in old.lists.keys().chain(new.lists.keys()) {
        if old.list(name) != new.list(name) {
            names.insert(name.clone());
        }
    }
    names.into_iter().collect()
}

/// Raw change data for one registration and one version step.
#[derive(Debug, Clone)]
pub(crate) struct MemoryChanges {
    version: VersionId,
    deleted: bool,
    properties: Vec<String>,
    diff: CollectionDiff,
}

impl MemoryChanges {
    /// Change between `old` and `new` as seen by `target`, or `None` when
    /// nothing the target observes was touched.
    ///
    /// Results fire whenever any object of their class changed, even if
    /// no matching object did.
    pub fn between(
        target: &Target,
        old: &Snapshot,
        new: &Snapshot,
        version: VersionId,
    ) -> Option<Self> {
        let changes = |deleted, properties, diff| {
            Some(Self {
                version,
                deleted,
                properties,
                diff,
            })
        };
        match target {
            Target::Object { class, key } => {
                let before = old.object(class, *key);
                match (before, new.object(class, *key)) {
                    (_, None) => changes(true, Vec::new(), CollectionDiff::default()),
                    (Some(before), Some(after)) if before == after => None,
                    (before, Some(after)) => {
                        let empty = ObjectState::default();
                        let properties = changed_fields(before.unwrap_or(&empty), after);
                        changes(false, properties, CollectionDiff::default())
                    }
                }
            }
            Target::List { class, key, field } => {
                let Some(owner) = new.object(class, *key) else {
                    return changes(true, Vec::new(), CollectionDiff::default());
                };
                let before = old.object(class, *key).map(|o| o.list(field)).unwrap_or(&[]);
                let after = owner.list(field);
                if before == after {
                    return None;
                }
                let old_ids: Vec<u64> = before.iter().map(|e| e.id).collect();
                let new_ids: Vec<u64> = after.iter().map(|e| e.id).collect();
                let diff = diff_collection(&old_ids, &new_ids, |id| {
                    let value_of = |list: &[ListElement]| {
                        list.iter().find(|e| e.id == id).map(|e| e.value.clone())
                    };
                    value_of(before) != value_of(after)
                });
                changes(false, Vec::new(), diff)
            }
            Target::Results { class, filter } => {
                if !old.class_changed(new, class) {
                    return None;
                }
                let old_keys = old.select(class, filter);
                let new_keys = new.select(class, filter);
                let diff = diff_collection(&old_keys, &new_keys, |key| {
                    old.object(class, key) != new.object(class, key)
                });
                changes(false, Vec::new(), diff)
            }
            Target::Database => None,
        }
    }
}

fn signed(index: usize) -> i64 {
    i64::try_from(index).unwrap_or(i64::MAX)
}

fn range_at(indices: &[usize], i: usize) -> (i64, i64) {
    let range = ranges_from_indices(indices)[i];
    (signed(range.start), signed(range.end))
}

impl RawChanges for MemoryChanges {
    fn version(&self) -> VersionId {
        self.version
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn modified_properties(&self) -> Vec<String> {
        self.properties.clone()
    }

    fn num_changes(&self) -> ChangeCounts {
        ChangeCounts {
            deletions: self.diff.deletions.len(),
            insertions: self.diff.insertions.len(),
            modifications: self.diff.modifications.len(),
            moves: self.diff.moves.len(),
        }
    }

    fn deletion_at(&self, i: usize) -> i64 {
        signed(self.diff.deletions[i])
    }

    fn insertion_at(&self, i: usize) -> i64 {
        signed(self.diff.insertions[i])
    }

    fn modification_at(&self, i: usize) -> i64 {
        signed(self.diff.modifications[i])
    }

    fn modification_after_at(&self, i: usize) -> i64 {
        signed(self.diff.modifications_after[i])
    }

    fn move_at(&self, i: usize) -> (i64, i64) {
        let (from, to) = self.diff.moves[i];
        (signed(from), signed(to))
    }

    fn num_ranges(&self) -> RangeCounts {
        RangeCounts {
            deletions: ranges_from_indices(&self.diff.deletions).len(),
            insertions: ranges_from_indices(&self.diff.insertions).len(),
            modifications: ranges_from_indices(&self.diff.modifications).len(),
            modifications_after: ranges_from_indices(&self.diff.modifications_after).len(),
        }
    }

    fn deletion_range_at(&self, i: usize) -> (i64, i64) {
        range_at(&self.diff.deletions, i)
    }

    fn insertion_range_at(&self, i: usize) -> (i64, i64) {
        range_at(&self.diff.insertions, i)
    }

    fn modification_range_at(&self, i: usize) -> (i64, i64) {
        range_at(&self.diff.modifications, i)
    }

    fn modification_range_after_at(&self, i: usize) -> (i64, i64) {
        range_at(&self.diff.modifications_after, i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(fields: &[(&str, Value)]) -> ObjectState {
        ObjectState {
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            lists: BTreeMap::new(),
        }
    }

    #[test]
    fn diff_reports_insertions_and_deletions() {
        let diff = diff_collection(&[1, 2, 3], &[1, 3, 4], |_| false);
        assert_eq!(diff.deletions, vec![1]);
        assert_eq!(diff.insertions, vec![2]);
        assert!(diff.moves.is_empty());
        assert!(diff.modifications.is_empty());
    }

    #[test]
    fn diff_reports_move_as_delete_plus_insert() {
        let diff = diff_collection(&[1, 2, 3], &[3, 1, 2], |_| false);
        assert_eq!(diff.moves, vec![(2, 0)]);
        assert_eq!(diff.deletions, vec![2]);
        assert_eq!(diff.insertions, vec![0]);
    }

    #[test]
    fn diff_pairs_modifications_before_and_after() {
        let diff = diff_collection(&[1, 2, 3], &[0, 1, 2, 3], |key| key == 2);
        assert_eq!(diff.insertions, vec![0]);
        assert_eq!(diff.modifications, vec![1]);
        assert_eq!(diff.modifications_after, vec![2]);
    }

    #[test]
    fn object_changes_name_modified_fields() {
        let mut old = Snapshot::default();
        old.insert("Dog", ObjectKey(1), object(&[("name", "rex".into()), ("age", Value::Int(3))]));
        let mut new = old.clone();
        new.insert("Dog", ObjectKey(1), object(&[("name", "rex".into()), ("age", Value::Int(4))]));

        let target = Target::Object {
            class: "Dog".to_string(),
            key: ObjectKey(1),
        };
        let changes = MemoryChanges::between(&target, &old, &new, VersionId::new(2, 2))
            .expect("changed object should notify");
        assert!(!changes.is_deleted());
        assert_eq!(changes.modified_properties(), vec!["age".to_string()]);

        assert!(MemoryChanges::between(&target, &new, &new, VersionId::new(3, 3)).is_none());
    }

    #[test]
    fn removed_object_reports_deleted() {
        let mut old = Snapshot::default();
        old.insert("Dog", ObjectKey(1), ObjectState::default());
        let new = Snapshot::default();
        let target = Target::Object {
            class: "Dog".to_string(),
            key: ObjectKey(1),
        };
        let changes = MemoryChanges::between(&target, &old, &new, VersionId::new(2, 2))
            .expect("deletion should notify");
        assert!(changes.is_deleted());
    }

    #[test]
    fn results_fire_on_unrelated_class_writes_with_empty_diff() {
        let mut old = Snapshot::default();
        old.insert("Dog", ObjectKey(1), object(&[("name", "rex".into())]));
        old.insert("Dog", ObjectKey(2), object(&[("name", "fido".into())]));
        let mut new = old.clone();
        new.insert("Dog", ObjectKey(2), object(&[("name", "spot".into())]));

        let target = Target::Results {
            class: "Dog".to_string(),
            filter: Filter::eq("name", "rex"),
        };
        let changes = MemoryChanges::between(&target, &old, &new, VersionId::new(2, 2))
            .expect("class write should notify results");
        assert_eq!(changes.num_changes(), ChangeCounts::default());

        let other = Target::Results {
            class: "Cat".to_string(),
            filter: Filter::All,
        };
        assert!(MemoryChanges::between(&other, &old, &new, VersionId::new(2, 2)).is_none());
    }

    #[test]
    fn ranges_are_derived_from_indices() {
        let changes = MemoryChanges {
            version: VersionId::default(),
            deleted: false,
            properties: Vec::new(),
            diff: CollectionDiff {
                insertions: vec![0, 1, 4],
                ..CollectionDiff::default()
            },
        };
        assert_eq!(changes.num_ranges().insertions, 2);
        assert_eq!(changes.insertion_range_at(0), (0, 2));
        assert_eq!(changes.insertion_range_at(1), (4, 5));
    }
}
