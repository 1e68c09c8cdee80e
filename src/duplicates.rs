//! Duplicate record detection: pairwise similarity between rows, closed under transitivity.

use crate::{Relation, SimilarityMeasure};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::mem::swap;
use tracing::debug;

/// Two rows of the same relation that describe the same entity. The smaller row comes first.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Duplicate {
    /// The smaller row position.
    pub first: usize,
    /// The larger row position.
    pub second: usize,
}

impl Duplicate {
    /// Pairs two rows in either order. A row is never a duplicate of itself, so equal rows give
    /// `None`.
    pub fn new(a: usize, b: usize) -> Option<Self> {
        match a.cmp(&b) {
            Ordering::Less => Some(Duplicate {
                first: a,
                second: b,
            }),
            Ordering::Greater => Some(Duplicate {
                first: b,
                second: a,
            }),
            Ordering::Equal => None,
        }
    }
}

/// Union-find over dense row positions, with union by rank and path halving.
struct DisjointSets(Vec<(usize, u8)>);

impl DisjointSets {
    fn new() -> Self {
        DisjointSets(Vec::new())
    }

    fn grow(&mut self, x: usize) {
        if x >= self.0.len() {
            let len = self.0.len();
            self.0.extend((len..=x).map(|row| (row, 0)));
        }
    }

    fn find(&mut self, x: usize) -> usize {
        self.find_rank(x).0
    }

    fn find_rank(&mut self, mut x: usize) -> (usize, u8) {
        self.grow(x);
        let mut parent = self.0[x];
        while x != parent.0 {
            let grandparent = self.0[parent.0];
            self.0[x] = grandparent;
            x = parent.0;
            parent = grandparent;
        }
        parent
    }

    fn union(&mut self, a: usize, b: usize) {
        let mut a = self.find_rank(a);
        let mut b = self.find_rank(b);

        if a.0 == b.0 {
            return;
        }

        if a.1 < b.1 {
            swap(&mut a, &mut b);
        }

        self.0[b.0] = a;

        if a.1 == b.1 {
            a.1 += 1;
            self.0[a.0] = a;
        }
    }
}

/// Groups rows connected by a chain of duplicates. Each group is sorted and has at least two
/// rows; groups are ordered by their smallest row.
///
/// ```
/// use uccprofile::{duplicate_groups, Duplicate};
///
/// let pairs = [(4, 2), (0, 1), (2, 7)].map(|(a, b)| Duplicate::new(a, b).unwrap());
/// assert_eq!(duplicate_groups(pairs), [vec![0, 1], vec![2, 4, 7]]);
/// ```
pub fn duplicate_groups(duplicates: impl IntoIterator<Item = Duplicate>) -> Vec<Vec<usize>> {
    let mut sets = DisjointSets::new();
    let mut rows = Vec::new();
    for duplicate in duplicates {
        sets.union(duplicate.first, duplicate.second);
        rows.push(duplicate.first);
        rows.push(duplicate.second);
    }
    rows.sort_unstable();
    rows.dedup();

    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for row in rows {
        groups.entry(sets.find(row)).or_default().push(row);
    }
    let mut groups: Vec<Vec<usize>> = groups.into_values().collect();
    groups.sort_unstable_by_key(|group| group[0]);
    groups
}

/// Adds every duplicate that follows from the given ones by transitivity: if `a` duplicates `b`
/// and `b` duplicates `c`, then `a` duplicates `c`. The result is sorted.
///
/// ```
/// use uccprofile::{transitive_closure, Duplicate};
///
/// let pairs = [Duplicate::new(1, 2).unwrap(), Duplicate::new(3, 2).unwrap()];
/// let closed = transitive_closure(pairs);
/// let closed: Vec<_> = closed.iter().map(|d| (d.first, d.second)).collect();
/// assert_eq!(closed, [(1, 2), (1, 3), (2, 3)]);
/// ```
pub fn transitive_closure(duplicates: impl IntoIterator<Item = Duplicate>) -> Vec<Duplicate> {
    let mut closed = Vec::new();
    for group in duplicate_groups(duplicates) {
        for (i, &first) in group.iter().enumerate() {
            closed.extend(group[i + 1..].iter().map(|&second| Duplicate { first, second }));
        }
    }
    closed.sort_unstable();
    closed
}

/// Finds rows that are similar enough to count as duplicates.
///
/// Two rows are compared cell by cell with the chosen measure, and their similarity is the mean
/// over all columns. Cells holding the same value always score 1. Every pair of rows is
/// compared, so this takes time quadratic in the number of rows.
pub struct DuplicateDetector<'m> {
    measure: &'m dyn SimilarityMeasure,
    threshold: f64,
}

impl<'m> DuplicateDetector<'m> {
    /// Reports pairs whose similarity is at least `threshold`.
    pub fn new(measure: &'m dyn SimilarityMeasure, threshold: f64) -> Self {
        DuplicateDetector { measure, threshold }
    }

    /// The similarity of rows `a` and `b` of `relation`.
    pub fn row_similarity(&self, relation: &Relation, a: usize, b: usize) -> f64 {
        let columns = relation.column_count();
        if columns == 0 {
            return 0.0;
        }
        let total: f64 = (0..columns)
            .map(|column| {
                let cells = relation.column(column);
                if cells[a] == cells[b] {
                    1.0
                } else {
                    let left = relation.value(a, column).unwrap_or_default();
                    let right = relation.value(b, column).unwrap_or_default();
                    self.measure.similarity(left, right)
                }
            })
            .sum();
        total / columns as f64
    }

    /// Every pair of rows at or above the threshold, sorted.
    pub fn detect(&self, relation: &Relation) -> Vec<Duplicate> {
        let rows = relation.row_count();
        let mut found = Vec::new();
        for first in 0..rows {
            for second in first + 1..rows {
                if self.row_similarity(relation, first, second) >= self.threshold {
                    found.push(Duplicate { first, second });
                }
            }
        }
        debug!(relation = relation.name(), pairs = found.len(), "similar rows");
        found
    }

    /// The detected duplicates together with everything they imply by transitivity.
    ///
    /// ```
    /// use uccprofile::{DuplicateDetector, Levenshtein, Relation};
    ///
    /// let people = Relation::from_rows(
    ///     "people",
    ///     vec!["name".into()],
    ///     vec![vec!["jonathan"], vec!["jonathon"], vec!["jonathen"], vec!["maria"]],
    /// )?;
    /// let measure = Levenshtein::default();
    /// let detector = DuplicateDetector::new(&measure, 0.8);
    /// let pairs: Vec<_> = detector.resolve(&people).iter().map(|d| (d.first, d.second)).collect();
    /// assert_eq!(pairs, [(0, 1), (0, 2), (1, 2)]);
    /// # Ok::<(), uccprofile::Error>(())
    /// ```
    pub fn resolve(&self, relation: &Relation) -> Vec<Duplicate> {
        transitive_closure(self.detect(relation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Levenshtein;

    fn pairs(duplicates: &[Duplicate]) -> Vec<(usize, usize)> {
        duplicates.iter().map(|d| (d.first, d.second)).collect()
    }

    #[test]
    fn identity_pairs_are_rejected() {
        assert_eq!(Duplicate::new(3, 3), None);
        assert_eq!(Duplicate::new(5, 2), Duplicate::new(2, 5));
    }

    #[test]
    fn chains_are_closed() {
        let input = [(0, 1), (1, 2), (2, 3), (5, 6)].map(|(a, b)| Duplicate::new(a, b).unwrap());
        let closed = transitive_closure(input);
        assert_eq!(
            pairs(&closed),
            [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3), (5, 6)]
        );
    }

    #[test]
    fn closure_is_idempotent() {
        let input = [(4, 9), (9, 1), (7, 8)].map(|(a, b)| Duplicate::new(a, b).unwrap());
        let once = transitive_closure(input);
        let twice = transitive_closure(once.iter().copied());
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_input_has_no_duplicates() {
        assert!(transitive_closure(Vec::new()).is_empty());
        assert!(duplicate_groups(Vec::new()).is_empty());
    }

    #[test]
    fn transitivity_bridges_dissimilar_rows() {
        // "abcd" and "abyz" are too far apart directly, but both are close to "abcz".
        let relation = Relation::from_rows(
            "r",
            vec!["v".into()],
            vec![vec!["abcd"], vec!["abcz"], vec!["abyz"], vec!["qqqq"]],
        )
        .unwrap();
        let measure = Levenshtein::default();
        let detector = DuplicateDetector::new(&measure, 0.75);
        assert_eq!(pairs(&detector.detect(&relation)), [(0, 1), (1, 2)]);
        assert_eq!(pairs(&detector.resolve(&relation)), [(0, 1), (0, 2), (1, 2)]);
    }

    #[test]
    fn row_similarity_averages_columns() {
        let relation = Relation::from_rows(
            "r",
            vec!["a".into(), "b".into()],
            vec![vec!["same", "abcd"], vec!["same", "abcz"]],
        )
        .unwrap();
        let measure = Levenshtein::default();
        let detector = DuplicateDetector::new(&measure, 1.0);
        assert_eq!(detector.row_similarity(&relation, 0, 1), 0.875);
        assert!(detector.detect(&relation).is_empty());
    }
}
