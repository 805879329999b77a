//! Decoding of native change descriptions.
//!
//! The engine reports collection changes through index and range
//! accessors. Both forms are read so the builder can cross-check them.

use snapflow_core::{Changeset, ChangesetBuilder};
use snapflow_engine::RawChanges;

use crate::entity::ObjectChangeset;

pub(crate) fn collection_changes(raw: &dyn RawChanges) -> Changeset {
    let counts = raw.num_changes();
    let ranges = raw.num_ranges();
    let mut builder = ChangesetBuilder::new();
    builder
        .set_deletion_indices(counts.deletions, |i| raw.deletion_at(i))
        .set_insertion_indices(counts.insertions, |i| raw.insertion_at(i))
        .set_modification_indices(counts.modifications, |i| raw.modification_at(i))
        .set_modification_indices_after(counts.modifications, |i| raw.modification_after_at(i))
        .set_moves(counts.moves, |i| raw.move_at(i).0, |i| raw.move_at(i).1)
        .set_deletion_ranges(
            ranges.deletions,
            |i| raw.deletion_range_at(i).0,
            |i| raw.deletion_range_at(i).1,
        )
        .set_insertion_ranges(
            ranges.insertions,
            |i| raw.insertion_range_at(i).0,
            |i| raw.insertion_range_at(i).1,
        )
        .set_modification_ranges(
            ranges.modifications,
            |i| raw.modification_range_at(i).0,
            |i| raw.modification_range_at(i).1,
        )
        .set_modification_ranges_after(
            ranges.modifications_after,
            |i| raw.modification_range_after_at(i).0,
            |i| raw.modification_range_after_at(i).1,
        );
    builder.build()
}

pub(crate) fn object_changes(raw: &dyn RawChanges) -> ObjectChangeset {
    ObjectChangeset {
        changed_fields: raw.modified_properties(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapflow_core::{IndexRange, Move, VersionId};
    use snapflow_engine::{ChangeCounts, RangeCounts};

    #[derive(Default)]
    struct Fake {
        deletions: Vec<i64>,
        insertions: Vec<i64>,
        modifications: Vec<i64>,
        modifications_after: Vec<i64>,
        moves: Vec<(i64, i64)>,
        deletion_ranges: Vec<(i64, i64)>,
        insertion_ranges: Vec<(i64, i64)>,
        modification_ranges: Vec<(i64, i64)>,
        modification_ranges_after: Vec<(i64, i64)>,
        properties: Vec<String>,
    }

    impl RawChanges for Fake {
        fn version(&self) -> VersionId {
            VersionId::new(1, 1)
        }
        fn is_deleted(&self) -> bool {
            false
        }
        fn modified_properties(&self) -> Vec<String> {
            self.properties.clone()
        }
        fn num_changes(&self) -> ChangeCounts {
            ChangeCounts {
                deletions: self.deletions.len(),
                insertions: self.insertions.len(),
                modifications: self.modifications.len(),
                moves: self.moves.len(),
            }
        }
        fn deletion_at(&self, i: usize) -> i64 {
            self.deletions[i]
        }
        fn insertion_at(&self, i: usize) -> i64 {
            self.insertions[i]
        }
        fn modification_at(&self, i: usize) -> i64 {
            self.modifications[i]
        }
        fn modification_after_at(&self, i: usize) -> i64 {
            self.modifications_after[i]
        }
        fn move_at(&self, i: usize) -> (i64, i64) {
            self.moves[i]
        }
        fn num_ranges(&self) -> RangeCounts {
            RangeCounts {
                deletions: self.deletion_ranges.len(),
                insertions: self.insertion_ranges.len(),
                modifications: self.modification_ranges.len(),
                modifications_after: self.modification_ranges_after.len(),
            }
        }
        fn deletion_range_at(&self, i: usize) -> (i64, i64) {
            self.deletion_ranges[i]
        }
        fn insertion_range_at(&self, i: usize) -> (i64, i64) {
            self.insertion_ranges[i]
        }
        fn modification_range_at(&self, i: usize) -> (i64, i64) {
            self.modification_ranges[i]
        }
        fn modification_range_after_at(&self, i: usize) -> (i64, i64) {
            self.modification_ranges_after[i]
        }
    }

    #[test]
    fn decodes_both_forms() {
        let raw = Fake {
            deletions: vec![0, 1, 4],
            insertions: vec![2],
            modifications: vec![3],
            modifications_after: vec![2],
            moves: vec![(4, 0)],
            deletion_ranges: vec![(0, 2), (4, 5)],
            insertion_ranges: vec![(2, 3)],
            modification_ranges: vec![(3, 4)],
            modification_ranges_after: vec![(2, 3)],
            ..Fake::default()
        };
        let changes = collection_changes(&raw);
        assert_eq!(changes.deletions(), &[0, 1, 4]);
        assert_eq!(
            changes.deletion_ranges(),
            &[IndexRange::new(0, 2), IndexRange::new(4, 5)]
        );
        assert_eq!(changes.insertions(), &[2]);
        assert_eq!(changes.modifications(), &[3]);
        assert_eq!(changes.modifications_after(), &[2]);
        assert_eq!(changes.moves(), &[Move { from: 4, to: 0 }]);
        assert!(!changes.is_empty());
    }

    #[test]
    fn empty_report_decodes_to_empty_changeset() {
        let changes = collection_changes(&Fake::default());
        assert!(changes.is_empty());
        assert!(changes.insertion_ranges().is_empty());
    }

    #[test]
    #[should_panic]
    fn disagreeing_forms_are_rejected() {
        let raw = Fake {
            insertions: vec![1],
            insertion_ranges: vec![(0, 1)],
            ..Fake::default()
        };
        collection_changes(&raw);
    }

    #[test]
    fn object_changes_keep_property_names() {
        let raw = Fake {
            properties: vec!["name".to_string(), "age".to_string()],
            ..Fake::default()
        };
        let changes = object_changes(&raw);
        assert!(changes.contains("age"));
        assert!(!changes.contains("email"));
    }
}
