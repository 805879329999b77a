//! Collection change-sets and their builder.
//!
//! A [`Changeset`] describes how a collection moved from one version to the
//! next. It carries the same content twice: as sorted index lists and as
//! half-open index ranges. The two forms are always mutually derivable;
//! [`ChangesetBuilder::build`] derives whichever form the caller did not
//! supply and cross-checks the ones it did.
//!
//! The builder trusts its inputs. A negative index, an unsorted index list,
//! or an inverted range is a contract violation by the decoder and panics
//! rather than producing a change-set that would corrupt a consumer's view
//! of the collection.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-open range `[start, end)` of collection indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexRange {
    pub start: usize,
    pub end: usize,
}

impl IndexRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn indices(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

impl fmt::Display for IndexRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// An element that moved from index `from` (old collection) to `to` (new collection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Move {
    pub from: usize,
    pub to: usize,
}

/// Immutable description of one collection update.
///
/// Deletions and `modifications` index into the collection before the
/// update; insertions and `modifications_after` index into it after.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    insertions: Vec<usize>,
    deletions: Vec<usize>,
    modifications: Vec<usize>,
    modifications_after: Vec<usize>,
    moves: Vec<Move>,
    insertion_ranges: Vec<IndexRange>,
    deletion_ranges: Vec<IndexRange>,
    modification_ranges: Vec<IndexRange>,
    modification_ranges_after: Vec<IndexRange>,
}

impl Changeset {
    pub fn insertions(&self) -> &[usize] {
        &self.insertions
    }

    pub fn deletions(&self) -> &[usize] {
        &self.deletions
    }

    pub fn modifications(&self) -> &[usize] {
        &self.modifications
    }

    pub fn modifications_after(&self) -> &[usize] {
        &self.modifications_after
    }

    pub fn moves(&self) -> &[Move] {
        &self.moves
    }

    pub fn insertion_ranges(&self) -> &[IndexRange] {
        &self.insertion_ranges
    }

    pub fn deletion_ranges(&self) -> &[IndexRange] {
        &self.deletion_ranges
    }

    pub fn modification_ranges(&self) -> &[IndexRange] {
        &self.modification_ranges
    }

    pub fn modification_ranges_after(&self) -> &[IndexRange] {
        &self.modification_ranges_after
    }

    /// True iff no insertion, deletion, modification, or move is recorded.
    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty()
            && self.deletions.is_empty()
            && self.modifications.is_empty()
            && self.modifications_after.is_empty()
            && self.moves.is_empty()
    }
}

impl fmt::Display for Changeset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn ranges(items: &[IndexRange]) -> String {
            let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
            format!("[{}]", parts.join(", "))
        }
        let moves: Vec<String> = self
            .moves
            .iter()
            .map(|m| format!("{}->{}", m.from, m.to))
            .collect();
        write!(
            f,
            "insert={} delete={} modify={}->{} move=[{}]",
            ranges(&self.insertion_ranges),
            ranges(&self.deletion_ranges),
            ranges(&self.modification_ranges),
            ranges(&self.modification_ranges_after),
            moves.join(", ")
        )
    }
}

/// Coalesce a strictly increasing index list into maximal ranges.
pub fn ranges_from_indices(indices: &[usize]) -> Vec<IndexRange> {
    let mut ranges: Vec<IndexRange> = Vec::new();
    for &index in indices {
        match ranges.last_mut() {
            Some(last) if last.end == index => last.end = index + 1,
            _ => ranges.push(IndexRange::new(index, index + 1)),
        }
    }
    ranges
}

/// Expand ranges back into the index list they cover.
pub fn expand_ranges(ranges: &[IndexRange]) -> Vec<usize> {
    ranges.iter().flat_map(IndexRange::indices).collect()
}

/// Accumulates a [`Changeset`] from accessor-style native arrays.
///
/// Each setter takes an element count and accessor closures so a decoder can
/// pull values straight out of native memory. Index and range forms of the
/// same category may both be supplied; they must agree.
#[derive(Debug, Default)]
pub struct ChangesetBuilder {
    insertions: Option<Vec<usize>>,
    deletions: Option<Vec<usize>>,
    modifications: Option<Vec<usize>>,
    modifications_after: Option<Vec<usize>>,
    moves: Vec<Move>,
    insertion_ranges: Option<Vec<IndexRange>>,
    deletion_ranges: Option<Vec<IndexRange>>,
    modification_ranges: Option<Vec<IndexRange>>,
    modification_ranges_after: Option<Vec<IndexRange>>,
}

impl ChangesetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_insertion_indices(
        &mut self,
        count: usize,
        index_at: impl Fn(usize) -> i64,
    ) -> &mut Self {
        self.insertions = Some(collect_indices("insertion", count, index_at));
        self
    }

    pub fn set_deletion_indices(
        &mut self,
        count: usize,
        index_at: impl Fn(usize) -> i64,
    ) -> &mut Self {
        self.deletions = Some(collect_indices("deletion", count, index_at));
        self
    }

    pub fn set_modification_indices(
        &mut self,
        count: usize,
        index_at: impl Fn(usize) -> i64,
    ) -> &mut Self {
        self.modifications = Some(collect_indices("modification", count, index_at));
        self
    }

    pub fn set_modification_indices_after(
        &mut self,
        count: usize,
        index_at: impl Fn(usize) -> i64,
    ) -> &mut Self {
        self.modifications_after = Some(collect_indices("modification-after", count, index_at));
        self
    }

    pub fn set_moves(
        &mut self,
        count: usize,
        from_at: impl Fn(usize) -> i64,
        to_at: impl Fn(usize) -> i64,
    ) -> &mut Self {
        self.moves = (0..count)
            .map(|i| Move {
                from: checked_index("move source", from_at(i)),
                to: checked_index("move target", to_at(i)),
            })
            .collect();
        self
    }

    pub fn set_insertion_ranges(
        &mut self,
        count: usize,
        from_at: impl Fn(usize) -> i64,
        to_at: impl Fn(usize) -> i64,
    ) -> &mut Self {
        self.insertion_ranges = Some(collect_ranges("insertion", count, from_at, to_at));
        self
    }

    pub fn set_deletion_ranges(
        &mut self,
        count: usize,
        from_at: impl Fn(usize) -> i64,
        to_at: impl Fn(usize) -> i64,
    ) -> &mut Self {
        self.deletion_ranges = Some(collect_ranges("deletion", count, from_at, to_at));
        self
    }

    pub fn set_modification_ranges(
        &mut self,
        count: usize,
        from_at: impl Fn(usize) -> i64,
        to_at: impl Fn(usize) -> i64,
    ) -> &mut Self {
        self.modification_ranges = Some(collect_ranges("modification", count, from_at, to_at));
        self
    }

    pub fn set_modification_ranges_after(
        &mut self,
        count: usize,
        from_at: impl Fn(usize) -> i64,
        to_at: impl Fn(usize) -> i64,
    ) -> &mut Self {
        self.modification_ranges_after =
            Some(collect_ranges("modification-after", count, from_at, to_at));
        self
    }

    /// Whether the change-set under construction records nothing.
    ///
    /// Answers from whichever form was supplied, without building.
    pub fn is_empty(&self) -> bool {
        category_is_empty(&self.insertions, &self.insertion_ranges)
            && category_is_empty(&self.deletions, &self.deletion_ranges)
            && category_is_empty(&self.modifications, &self.modification_ranges)
            && category_is_empty(&self.modifications_after, &self.modification_ranges_after)
            && self.moves.is_empty()
    }

    /// Finish the change-set, deriving missing forms.
    ///
    /// # Panics
    ///
    /// If the index and range form of one category disagree.
    pub fn build(self) -> Changeset {
        let (insertions, insertion_ranges) =
            reconcile("insertion", self.insertions, self.insertion_ranges);
        let (deletions, deletion_ranges) =
            reconcile("deletion", self.deletions, self.deletion_ranges);
        let (modifications, modification_ranges) =
            reconcile("modification", self.modifications, self.modification_ranges);
        let (modifications_after, modification_ranges_after) = reconcile(
            "modification-after",
            self.modifications_after,
            self.modification_ranges_after,
        );
        assert_eq!(
            modifications.len(),
            modifications_after.len(),
            "modification indices before and after must pair up"
        );
        Changeset {
            insertions,
            deletions,
            modifications,
            modifications_after,
            moves: self.moves,
            insertion_ranges,
            deletion_ranges,
            modification_ranges,
            modification_ranges_after,
        }
    }
}

fn checked_index(what: &str, raw: i64) -> usize {
    usize::try_from(raw)
        .unwrap_or_else(|_| panic!("negative {what} index {raw} from native change data"))
}

fn collect_indices(what: &str, count: usize, index_at: impl Fn(usize) -> i64) -> Vec<usize> {
    let indices: Vec<usize> = (0..count).map(|i| checked_index(what, index_at(i))).collect();
    assert!(
        indices.windows(2).all(|w| w[0] < w[1]),
        "{what} indices must be strictly increasing: {indices:?}"
    );
    indices
}

fn collect_ranges(
    what: &str,
    count: usize,
    from_at: impl Fn(usize) -> i64,
    to_at: impl Fn(usize) -> i64,
) -> Vec<IndexRange> {
    let ranges: Vec<IndexRange> = (0..count)
        .map(|i| {
            let start = checked_index(what, from_at(i));
            let end = checked_index(what, to_at(i));
            assert!(start < end, "invalid {what} range {start}..{end}");
            IndexRange::new(start, end)
        })
        .collect();
    assert!(
        ranges.windows(2).all(|w| w[0].end <= w[1].start),
        "{what} ranges must be ordered and disjoint: {ranges:?}"
    );
    ranges
}

fn category_is_empty(indices: &Option<Vec<usize>>, ranges: &Option<Vec<IndexRange>>) -> bool {
    match (indices, ranges) {
        (Some(indices), _) => indices.is_empty(),
        (None, Some(ranges)) => ranges.is_empty(),
        (None, None) => true,
    }
}

fn reconcile(
    what: &str,
    indices: Option<Vec<usize>>,
    ranges: Option<Vec<IndexRange>>,
) -> (Vec<usize>, Vec<IndexRange>) {
    match (indices, ranges) {
        (Some(indices), Some(ranges)) => {
            let expanded = expand_ranges(&ranges);
            assert_eq!(
                expanded, indices,
                "{what} ranges {ranges:?} disagree with indices"
            );
            // Normalize adjacent native ranges into maximal ones.
            let ranges = ranges_from_indices(&indices);
            (indices, ranges)
        }
        (Some(indices), None) => {
            let ranges = ranges_from_indices(&indices);
            (indices, ranges)
        }
        (None, Some(ranges)) => {
            let indices = expand_ranges(&ranges);
            let ranges = ranges_from_indices(&indices);
            (indices, ranges)
        }
        (None, None) => (Vec::new(), Vec::new()),
    }
}
