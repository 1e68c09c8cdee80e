use crate::Relation;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

/// One column of one relation.
#[derive(Clone, Copy)]
pub struct ColumnRef<'r> {
    relation: &'r Relation,
    column: usize,
}

impl<'r> ColumnRef<'r> {
    /// The relation the column belongs to.
    pub fn relation(&self) -> &'r Relation {
        self.relation
    }

    /// The column's position.
    pub fn column(&self) -> usize {
        self.column
    }

    /// The column's attribute name.
    pub fn name(&self) -> &'r str {
        self.relation.attribute(self.column).unwrap_or_default()
    }
}

impl fmt::Display for ColumnRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.relation.name(), self.name())
    }
}

impl fmt::Debug for ColumnRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A unary inclusion dependency: every value of the `dependent` column also occurs in the
/// `referenced` column.
#[derive(Clone, Copy, Debug)]
pub struct InclusionDependency<'r> {
    /// The column whose values are contained.
    pub dependent: ColumnRef<'r>,
    /// The column containing them.
    pub referenced: ColumnRef<'r>,
}

/// The external form of an [`InclusionDependency`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct InclusionRecord<'r> {
    /// Relation of the dependent column.
    pub dependent_relation: &'r str,
    /// Attribute name of the dependent column.
    pub dependent_column: &'r str,
    /// Relation of the referenced column.
    pub referenced_relation: &'r str,
    /// Attribute name of the referenced column.
    pub referenced_column: &'r str,
}

impl<'r> InclusionDependency<'r> {
    /// Converts this dependency to its serializable form.
    pub fn to_record(&self) -> InclusionRecord<'r> {
        InclusionRecord {
            dependent_relation: self.dependent.relation.name(),
            dependent_column: self.dependent.name(),
            referenced_relation: self.referenced.relation.name(),
            referenced_column: self.referenced.name(),
        }
    }
}

impl fmt::Display for InclusionDependency<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ⊆ {}", self.dependent, self.referenced)
    }
}

/// Finds unary inclusion dependencies between the columns of a group of relations.
///
/// Values are compared as strings, so columns of different relations can be related. A column is
/// never reported as included in itself, but two columns of the same relation can be.
///
/// ```
/// use uccprofile::{InclusionProfiler, Relation};
///
/// let orders = Relation::from_rows(
///     "orders",
///     vec!["id".into(), "customer".into()],
///     vec![vec!["1", "c1"], vec!["2", "c2"], vec!["3", "c1"]],
/// )?;
/// let customers = Relation::from_rows("customers", vec!["id".into()], vec![vec!["c1"], vec!["c2"]])?;
///
/// let found: Vec<String> = InclusionProfiler::default()
///     .profile(&[&orders, &customers])
///     .iter()
///     .map(|ind| ind.to_string())
///     .collect();
/// assert_eq!(found, ["orders.customer ⊆ customers.id", "customers.id ⊆ orders.customer"]);
/// # Ok::<(), uccprofile::Error>(())
/// ```
#[derive(Clone, Debug, Default)]
pub struct InclusionProfiler;

impl InclusionProfiler {
    /// Checks every ordered pair of distinct columns across `relations`.
    ///
    /// Results are ordered by dependent column, then referenced column, following the order of
    /// `relations` and of each relation's columns.
    pub fn profile<'r>(&self, relations: &[&'r Relation]) -> Vec<InclusionDependency<'r>> {
        let distinct: Vec<Vec<HashSet<&str>>> = relations
            .iter()
            .map(|relation| {
                (0..relation.column_count())
                    .map(|column| relation.values(column).collect())
                    .collect()
            })
            .collect();

        let mut dependencies = Vec::new();
        for (i, &dependent) in relations.iter().enumerate() {
            for (j, &referenced) in relations.iter().enumerate() {
                for (a, values) in distinct[i].iter().enumerate() {
                    for (b, targets) in distinct[j].iter().enumerate() {
                        if i == j && a == b {
                            continue;
                        }
                        // A bigger set can't fit inside a smaller one.
                        if values.len() > targets.len() {
                            continue;
                        }
                        if values.is_subset(targets) {
                            dependencies.push(InclusionDependency {
                                dependent: ColumnRef {
                                    relation: dependent,
                                    column: a,
                                },
                                referenced: ColumnRef {
                                    relation: referenced,
                                    column: b,
                                },
                            });
                        }
                    }
                }
            }
        }

        debug!(
            relations = relations.len(),
            dependencies = dependencies.len(),
            "checked inclusion dependencies"
        );
        dependencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_columns_include_each_other() {
        let relation = Relation::from_columns(
            "r",
            vec!["a".into(), "b".into(), "c".into()],
            vec![vec!["1", "2", "2"], vec!["2", "1", "1"], vec!["1", "1", "3"]],
        )
        .unwrap();

        let found: Vec<(usize, usize)> = InclusionProfiler
            .profile(&[&relation])
            .iter()
            .map(|ind| (ind.dependent.column(), ind.referenced.column()))
            .collect();
        // c holds {1, 3}, so it neither contains nor is contained in the others.
        assert_eq!(found, [(0, 1), (1, 0)]);
    }

    #[test]
    fn records_name_both_sides() {
        let left = Relation::from_rows("left", vec!["x".into()], vec![vec!["v"]]).unwrap();
        let right = Relation::from_rows("right", vec!["y".into()], vec![vec!["v"], vec!["w"]])
            .unwrap();

        let found = InclusionProfiler.profile(&[&left, &right]);
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].to_record(),
            InclusionRecord {
                dependent_relation: "left",
                dependent_column: "x",
                referenced_relation: "right",
                referenced_column: "y",
            }
        );
    }
}
