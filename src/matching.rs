//! Schema matching: pairing up the attributes of two relations from their pairwise similarities.

use crate::{Precondition, Relation, Result, SimilarityMeasure};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use tracing::debug;

/// Pairwise similarities between the attributes of a source and a target relation: one row per
/// source attribute, one entry per target attribute.
#[derive(Clone, Debug, PartialEq)]
pub struct SimilarityMatrix {
    rows: Vec<Vec<f64>>,
    targets: usize,
}

impl SimilarityMatrix {
    /// Wraps precomputed similarities. Every row must have the same length.
    ///
    /// ```
    /// use uccprofile::{Error, Precondition, SimilarityMatrix};
    ///
    /// assert!(matches!(
    ///     SimilarityMatrix::new(vec![vec![0.5, 0.1], vec![0.2]]),
    ///     Err(Error::PreconditionViolation(Precondition::MatrixShape { row: 1, found: 1, expected: 2 }))
    /// ));
    /// ```
    pub fn new(rows: Vec<Vec<f64>>) -> Result<Self> {
        let targets = rows.first().map_or(0, Vec::len);
        if let Some((row, found)) = rows
            .iter()
            .map(Vec::len)
            .enumerate()
            .find(|&(_, len)| len != targets)
        {
            return Err(Precondition::MatrixShape {
                row,
                found,
                expected: targets,
            }
            .into());
        }
        Ok(SimilarityMatrix { rows, targets })
    }

    /// Compares attribute names with `measure`.
    pub fn of_names(
        source: &Relation,
        target: &Relation,
        measure: &dyn SimilarityMeasure,
    ) -> SimilarityMatrix {
        SimilarityMatrix {
            rows: source
                .attributes()
                .iter()
                .map(|left| {
                    target
                        .attributes()
                        .iter()
                        .map(|right| measure.similarity(left, right))
                        .collect()
                })
                .collect(),
            targets: target.column_count(),
        }
    }

    /// Compares columns by the Jaccard similarity of their distinct values.
    pub fn of_values(source: &Relation, target: &Relation) -> SimilarityMatrix {
        let distinct = |relation: &Relation| -> Vec<HashSet<String>> {
            (0..relation.column_count())
                .map(|column| relation.values(column).map(str::to_owned).collect())
                .collect()
        };
        let left = distinct(source);
        let right = distinct(target);
        SimilarityMatrix {
            rows: left
                .iter()
                .map(|left| {
                    right
                        .iter()
                        .map(|right| {
                            let union = left.union(right).count();
                            if union == 0 {
                                0.0
                            } else {
                                left.intersection(right).count() as f64 / union as f64
                            }
                        })
                        .collect()
                })
                .collect(),
            targets: target.column_count(),
        }
    }

    /// The entry-wise mean of two matrices of the same shape.
    pub fn average(&self, other: &SimilarityMatrix) -> Result<SimilarityMatrix> {
        let width = |matrix: &SimilarityMatrix, row: usize| matrix.rows.get(row).map(Vec::len);
        if let Some(row) = (0..self.sources().max(other.sources()))
            .find(|&row| width(self, row) != width(other, row))
        {
            return Err(Precondition::MatrixShape {
                row,
                found: width(other, row).unwrap_or(0),
                expected: width(self, row).unwrap_or(0),
            }
            .into());
        }
        let rows = self
            .rows
            .iter()
            .zip(other.rows.iter())
            .map(|(a, b)| a.iter().zip(b.iter()).map(|(x, y)| (x + y) / 2.0).collect())
            .collect();
        Ok(SimilarityMatrix {
            rows,
            targets: self.targets,
        })
    }

    /// Number of source attributes.
    pub fn sources(&self) -> usize {
        self.rows.len()
    }

    /// Number of target attributes.
    pub fn targets(&self) -> usize {
        self.targets
    }

    /// Similarity of source attribute `source` and target attribute `target`.
    ///
    /// # Panics
    ///
    /// This method panics if either position is out of range.
    pub fn get(&self, source: usize, target: usize) -> f64 {
        self.rows[source][target]
    }
}

/// A one-to-one assignment of source attributes to target attributes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CorrespondenceMatrix {
    assignment: Vec<Option<usize>>,
    targets: usize,
}

impl CorrespondenceMatrix {
    /// The target matched to `source`, if any.
    pub fn target_of(&self, source: usize) -> Option<usize> {
        self.assignment.get(source).copied().flatten()
    }

    /// Returns `true` if `source` and `target` correspond.
    pub fn contains(&self, source: usize, target: usize) -> bool {
        self.target_of(source) == Some(target)
    }

    /// The matched `(source, target)` pairs, by source.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.assignment
            .iter()
            .enumerate()
            .filter_map(|(source, target)| Some((source, (*target)?)))
    }

    /// The binary matrix form: one row per source attribute, with a 1 under its target.
    pub fn to_matrix(&self) -> Vec<Vec<u8>> {
        self.assignment
            .iter()
            .map(|target| {
                (0..self.targets)
                    .map(|column| u8::from(*target == Some(column)))
                    .collect()
            })
            .collect()
    }
}

/// Matches attributes with the Gale–Shapley stable marriage algorithm.
///
/// Source attributes propose to targets in order of decreasing similarity, and each target keeps
/// the most similar proposer so far; ties favour the earlier attribute. No two attributes would
/// both rather be matched to each other than to their assigned partners. When one side has more
/// attributes, the least wanted of them stay unmatched.
#[derive(Clone, Copy, Debug, Default)]
pub struct SchemaMatcher {
    min_similarity: f64,
}

impl SchemaMatcher {
    /// Never pairs attributes whose similarity is below `min_similarity`.
    pub fn new(min_similarity: f64) -> Self {
        SchemaMatcher { min_similarity }
    }

    /// Computes a stable matching.
    ///
    /// ```
    /// use uccprofile::{SchemaMatcher, SimilarityMatrix};
    ///
    /// let similarities = SimilarityMatrix::new(vec![
    ///     vec![0.9, 0.8, 0.1],
    ///     vec![0.95, 0.2, 0.3],
    /// ])?;
    /// let matching = SchemaMatcher::default().match_attributes(&similarities);
    /// assert_eq!(matching.pairs().collect::<Vec<_>>(), [(0, 1), (1, 0)]);
    /// assert_eq!(matching.to_matrix(), [[0, 1, 0], [1, 0, 0]]);
    /// # Ok::<(), uccprofile::Error>(())
    /// ```
    pub fn match_attributes(&self, similarities: &SimilarityMatrix) -> CorrespondenceMatrix {
        let sources = similarities.sources();
        let targets = similarities.targets();

        let preferences: Vec<Vec<usize>> = (0..sources)
            .map(|source| {
                let mut order: Vec<usize> = (0..targets)
                    .filter(|&target| similarities.get(source, target) >= self.min_similarity)
                    .collect();
                order.sort_by(|&a, &b| {
                    similarities
                        .get(source, b)
                        .total_cmp(&similarities.get(source, a))
                        .then(a.cmp(&b))
                });
                order
            })
            .collect();

        let mut next = vec![0; sources];
        let mut engaged: Vec<Option<usize>> = vec![None; targets];
        let mut free: VecDeque<usize> = (0..sources).collect();

        while let Some(source) = free.pop_front() {
            let Some(&target) = preferences[source].get(next[source]) else {
                continue;
            };
            next[source] += 1;
            match engaged[target] {
                None => engaged[target] = Some(source),
                Some(current) => {
                    let ours = similarities.get(source, target);
                    let theirs = similarities.get(current, target);
                    if ours > theirs || (ours == theirs && source < current) {
                        engaged[target] = Some(source);
                        free.push_back(current);
                    } else {
                        free.push_back(source);
                    }
                }
            }
        }

        let mut assignment = vec![None; sources];
        for (target, source) in engaged.into_iter().enumerate() {
            if let Some(source) = source {
                assignment[source] = Some(target);
            }
        }
        debug!(
            sources,
            targets,
            matched = assignment.iter().flatten().count(),
            "matched attributes"
        );
        CorrespondenceMatrix {
            assignment,
            targets,
        }
    }
}

/// One matched attribute pair between two relations.
#[derive(Clone, Copy, Debug)]
pub struct Correspondence<'r> {
    source: &'r Relation,
    source_column: usize,
    target: &'r Relation,
    target_column: usize,
    similarity: f64,
}

/// The external form of a [`Correspondence`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CorrespondenceRecord<'r> {
    /// Source relation name.
    pub source_relation: &'r str,
    /// Source attribute name.
    pub source: &'r str,
    /// Target relation name.
    pub target_relation: &'r str,
    /// Target attribute name.
    pub target: &'r str,
    /// How similar the two attributes are.
    pub similarity: f64,
}

impl<'r> Correspondence<'r> {
    /// Resolves every matched pair against the relations it was computed for.
    pub fn resolve(
        source: &'r Relation,
        target: &'r Relation,
        similarities: &SimilarityMatrix,
        matching: &CorrespondenceMatrix,
    ) -> Vec<Correspondence<'r>> {
        matching
            .pairs()
            .map(|(source_column, target_column)| Correspondence {
                source,
                source_column,
                target,
                target_column,
                similarity: similarities.get(source_column, target_column),
            })
            .collect()
    }

    /// Converts this correspondence to its serializable form.
    pub fn to_record(&self) -> CorrespondenceRecord<'r> {
        CorrespondenceRecord {
            source_relation: self.source.name(),
            source: self.source.attribute(self.source_column).unwrap_or_default(),
            target_relation: self.target.name(),
            target: self.target.attribute(self.target_column).unwrap_or_default(),
            similarity: self.similarity,
        }
    }
}

impl fmt::Display for Correspondence<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.to_record();
        write!(
            f,
            "{}.{} ~ {}.{} ({:.3})",
            record.source_relation,
            record.source,
            record.target_relation,
            record.target,
            record.similarity
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Levenshtein;

    fn matrix(rows: &[&[f64]]) -> SimilarityMatrix {
        SimilarityMatrix::new(rows.iter().map(|row| row.to_vec()).collect()).unwrap()
    }

    fn pairs(matching: &CorrespondenceMatrix) -> Vec<(usize, usize)> {
        matching.pairs().collect()
    }

    /// No source and target would both prefer each other over their assigned partners.
    fn is_stable(similarities: &SimilarityMatrix, matching: &CorrespondenceMatrix) -> bool {
        let partner_of_target = |target: usize| {
            (0..similarities.sources()).find(|&source| matching.contains(source, target))
        };
        (0..similarities.sources()).all(|source| {
            let mine = matching.target_of(source).map(|t| similarities.get(source, t));
            (0..similarities.targets()).all(|target| {
                let want = similarities.get(source, target);
                let source_prefers = mine.map_or(true, |mine| want > mine);
                let target_prefers = partner_of_target(target)
                    .map_or(true, |other| want > similarities.get(other, target));
                !(source_prefers && target_prefers)
            })
        })
    }

    #[test]
    fn square_matching_is_a_stable_permutation() {
        let similarities = matrix(&[&[0.1, 0.7, 0.3], &[0.6, 0.65, 0.2], &[0.5, 0.4, 0.9]]);
        let matching = SchemaMatcher::default().match_attributes(&similarities);
        assert_eq!(pairs(&matching), [(0, 1), (1, 0), (2, 2)]);
        assert!(is_stable(&similarities, &matching));
    }

    #[test]
    fn surplus_sources_stay_unmatched() {
        let similarities = matrix(&[&[0.2], &[0.9], &[0.5]]);
        let matching = SchemaMatcher::default().match_attributes(&similarities);
        assert_eq!(pairs(&matching), [(1, 0)]);
        assert_eq!(matching.target_of(0), None);
        assert_eq!(matching.to_matrix(), [[0], [1], [0]]);
    }

    #[test]
    fn threshold_leaves_weak_pairs_unmatched() {
        let similarities = matrix(&[&[0.9, 0.1], &[0.2, 0.3]]);
        let matching = SchemaMatcher::new(0.5).match_attributes(&similarities);
        assert_eq!(pairs(&matching), [(0, 0)]);
    }

    #[test]
    fn ties_favour_earlier_attributes() {
        let similarities = matrix(&[&[0.5, 0.5], &[0.5, 0.5]]);
        let matching = SchemaMatcher::default().match_attributes(&similarities);
        assert_eq!(pairs(&matching), [(0, 0), (1, 1)]);
    }

    #[test]
    fn empty_matrix_matches_nothing() {
        let similarities = SimilarityMatrix::new(Vec::new()).unwrap();
        let matching = SchemaMatcher::default().match_attributes(&similarities);
        assert!(pairs(&matching).is_empty());
    }

    #[test]
    fn relations_match_by_names_and_values() {
        let people = Relation::from_rows(
            "people",
            vec!["id".into(), "name".into(), "city".into()],
            vec![vec!["1", "ann", "oslo"], vec!["2", "bob", "rome"]],
        )
        .unwrap();
        let staff = Relation::from_rows(
            "staff",
            vec!["town".into(), "full_name".into(), "staff_id".into()],
            vec![vec!["rome", "bob", "2"], vec!["oslo", "cid", "3"]],
        )
        .unwrap();

        let measure = Levenshtein::default();
        let names = SimilarityMatrix::of_names(&people, &staff, &measure);
        let values = SimilarityMatrix::of_values(&people, &staff);
        assert_eq!(values.get(2, 0), 1.0);
        assert_eq!(values.get(1, 1), 1.0 / 3.0);

        let similarities = names.average(&values).unwrap();
        let matching = SchemaMatcher::default().match_attributes(&similarities);
        let found: Vec<String> = Correspondence::resolve(&people, &staff, &similarities, &matching)
            .iter()
            .map(|c| {
                let record = c.to_record();
                format!("{}->{}", record.source, record.target)
            })
            .collect();
        assert_eq!(found, ["id->staff_id", "name->full_name", "city->town"]);
    }

    #[test]
    fn average_requires_equal_shapes() {
        let small = matrix(&[&[0.5]]);
        let wide = matrix(&[&[0.5, 0.5]]);
        assert!(matches!(
            small.average(&wide),
            Err(crate::Error::PreconditionViolation(Precondition::MatrixShape { row: 0, .. }))
        ));
    }
}
