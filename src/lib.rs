#![warn(missing_docs)]
#![doc(test(no_crate_inject))]
#![doc(test(attr(deny(unused, future_incompatible))))]

//! This crate discovers the minimal unique column combinations (UCCs) of a relation: sets of
//! columns whose projection contains no duplicate row, where no proper subset has that property.
//!
//! The search walks the lattice of column combinations level by level, the way Apriori-style
//! profiling algorithms do, and validates every candidate by intersecting stripped partitions
//! ("position list indexes") instead of re-reading the data. The approach follows these papers:
//!
//! - Huhtala, Kärkkäinen, Porkka, Toivonen, *TANE: An Efficient Algorithm for Discovering
//!   Functional and Approximate Dependencies*, 1999
//! - Abedjan, Naumann, *Advancing the Discovery of Unique Column Combinations*, 2011
//!
//! Around the search sit smaller data-integration tools: unary inclusion dependencies
//! ([`InclusionProfiler`]), string [similarity measures](SimilarityMeasure), duplicate row
//! detection closed under transitivity ([`DuplicateDetector`]), and stable-marriage schema
//! matching ([`SchemaMatcher`]).
//!
//! ```
//! use uccprofile::{Relation, UccProfiler};
//!
//! let relation = Relation::from_rows(
//!     "staff",
//!     vec!["id".into(), "name".into(), "dept".into()],
//!     vec![vec!["1", "A", "X"], vec!["2", "B", "X"], vec!["3", "A", "Y"]],
//! )?;
//!
//! let profile = UccProfiler::default().profile::<u8>(&relation)?;
//! let found: Vec<String> = profile.uccs().iter().map(|ucc| ucc.to_string()).collect();
//! assert_eq!(found, ["staff[id]", "staff[name, dept]"]);
//! # Ok::<(), uccprofile::Error>(())
//! ```

pub use sorted_iter;

mod duplicates;
mod error;
mod inclusion;
mod matching;
mod profiler;
mod relation;
mod similarity;

pub use duplicates::{duplicate_groups, transitive_closure, Duplicate, DuplicateDetector};
pub use error::{Error, Precondition, Result};
pub use inclusion::{ColumnRef, InclusionDependency, InclusionProfiler, InclusionRecord};
pub use matching::{
    Correspondence, CorrespondenceMatrix, CorrespondenceRecord, SchemaMatcher, SimilarityMatrix,
};
pub use profiler::{
    LevelStats, Profile, ProfilerConfig, Stop, Ucc, UccIndex, UccProfiler, UccRecord,
};
pub use relation::{ReadOptions, Relation, Symbol};
pub use similarity::{Jaccard, Levenshtein, Measure, MinHash, SimilarityMeasure, Tokenizer};

use smallvec::SmallVec;
use sorted_iter::assume::AssumeSortedByItemExt;
use sorted_iter::sorted_iterator::SortedByItem;
use sorted_iter::SortedIterator;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::iter;
use std::sync::OnceLock;

/// Types which can be used as column indices in an [`AttributeList`].
pub trait ColumnId: Sized + Copy + Hash + Ord + Send + Sync {
    /// With smallvec's `union` feature, a SmallVec holds two `usize` fields which overlap with
    /// the inline vector, so attribute lists will have minimum size if this array occupies the
    /// same number of bytes.
    ///
    /// The array is shared between the worker threads of a lattice level, so it must be `Send`
    /// and `Sync` like the ids themselves.
    ///
    /// It can be declared like this for any implementation, or you can have the [`column_id!`]
    /// macro do it for you.
    ///
    /// ```ignore
    /// use std::mem::size_of;
    /// type SmallArray = [Self; 2 * size_of::<usize>() / size_of::<Self>()];
    /// ```
    type SmallArray: smallvec::Array<Item = Self>
        + Clone
        + std::fmt::Debug
        + Hash
        + Ord
        + Send
        + Sync;

    /// Converts a column position into this id type, or `None` if it can't be represented.
    fn from_index(index: usize) -> Option<Self>;

    /// The column position this id stands for.
    fn index(self) -> usize;
}

/// Generates implementations of the [`ColumnId`] trait for unsigned integer types, setting the
/// associated `SmallArray` type to the biggest array that will fit within a
/// [`SmallVec`][smallvec::SmallVec]'s minimum size.
///
/// It also generates a test with the given `$testname` that checks that the generated definition
/// is as small as the smallest `SmallVec`.
///
/// This library provides implementations for the basic unsigned integer types using this
/// declaration:
///
/// ```ignore
/// column_id![unsigned_id_size, u8, u16, u32, u64, usize];
/// ```
#[macro_export]
macro_rules! column_id {
    ($testname:ident, $($t:ty),*) => {
        $(
            impl $crate::ColumnId for $t {
                type SmallArray = [
                    Self;
                    2 * ::std::mem::size_of::<usize>() / ::std::mem::size_of::<Self>()
                ];

                fn from_index(index: usize) -> Option<Self> {
                    <Self as ::std::convert::TryFrom<usize>>::try_from(index).ok()
                }

                fn index(self) -> usize {
                    self as usize
                }
            }
        )*

        #[cfg(test)]
        #[test]
        fn $testname() {
            use $crate::AttributeList;
            use smallvec::SmallVec;
            use std::mem::size_of;
            $(
                assert_eq!(
                    size_of::<AttributeList<$t>>(),
                    size_of::<SmallVec<[(); 0]>>()
                );
            )*
        }
    };
}

column_id![unsigned_id_size, u8, u16, u32, u64, usize];

/// A canonical set of column indices: always sorted and free of duplicates.
///
/// This implementation avoids heap allocations for lists containing fewer columns than the length
/// of [`ColumnId::SmallArray`]. Lists are never changed in place; combining two lists produces a
/// new one.
///
/// The derived ordering is lexicographic over the sorted indices, so sorting a collection of
/// equal-length lists places every group of [prefix-compatible](AttributeList::same_prefix_as)
/// lists next to each other.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AttributeList<C: ColumnId>(SmallVec<C::SmallArray>);

impl<C: ColumnId> AttributeList<C> {
    /// Creates an attribute list containing the specified columns.
    ///
    /// It's okay if the provided slice contains duplicates or is out of order.
    pub fn new(ids: &[C]) -> Self {
        let mut v = SmallVec::from_slice(ids);
        v.sort_unstable();
        v.dedup();
        AttributeList(v)
    }

    /// Creates an attribute list from column positions, checking each one against the number of
    /// columns in the relation it will be used with.
    ///
    /// ```
    /// use uccprofile::{AttributeList, Error};
    ///
    /// let list = AttributeList::<u8>::for_relation(&[2, 0, 2], 3)?;
    /// assert_eq!(list.columns(), &[0, 2]);
    ///
    /// assert!(matches!(
    ///     AttributeList::<u8>::for_relation(&[3], 3),
    ///     Err(Error::InvalidInput { index: 3, columns: 3 })
    /// ));
    /// # Ok::<(), Error>(())
    /// ```
    pub fn for_relation(indices: &[usize], columns: usize) -> Result<Self> {
        indices
            .iter()
            .map(|&index| {
                C::from_index(index)
                    .filter(|_| index < columns)
                    .ok_or(Error::InvalidInput { index, columns })
            })
            .collect()
    }

    /// The number of columns in the list.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the list contains no columns.
    ///
    /// ```
    /// use uccprofile::AttributeList;
    ///
    /// assert!(AttributeList::<u8>::new(&[]).is_empty());
    /// assert!(!AttributeList::new(&[3u8, 3]).is_empty());
    /// assert_eq!(AttributeList::new(&[3u8, 3]).len(), 1);
    /// ```
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The columns in ascending order.
    pub fn columns(&self) -> &[C] {
        &self.0
    }

    /// Returns an iterator over the columns which appear in this list.
    ///
    /// ```
    /// use uccprofile::AttributeList;
    ///
    /// let abc = AttributeList::new(&[2u8, 3, 1]);
    /// let mut it = abc.iter();
    /// assert_eq!(it.next(), Some(1));
    /// assert_eq!(it.next(), Some(2));
    /// assert_eq!(it.next(), Some(3));
    /// assert_eq!(it.next(), None);
    /// ```
    pub fn iter(&self) -> impl Iterator<Item = C> + SortedByItem + Clone + '_ {
        self.0.iter().copied().assume_sorted_by_item()
    }

    /// Returns a new list containing every column of `self` and of `other`.
    ///
    /// ```
    /// use uccprofile::AttributeList;
    ///
    /// let ab = AttributeList::new(&[0u8, 1]);
    /// let ac = AttributeList::new(&[0u8, 2]);
    /// assert_eq!(ab.union(&ac), AttributeList::new(&[0, 1, 2]));
    /// ```
    pub fn union(&self, other: &Self) -> Self {
        AttributeList(self.iter().union(other.iter()).collect())
    }

    /// Returns `true` if `other` contains every column that `self` does.
    ///
    /// ```
    /// use uccprofile::AttributeList;
    /// let nil = AttributeList::<u8>::new(&[]);
    /// let one = AttributeList::new(&[1]);
    ///
    /// assert!(nil.is_subset(&one));
    /// assert!(nil.is_subset(&nil));
    /// assert!(one.is_subset(&one));
    /// assert!(!one.is_subset(&nil));
    /// ```
    pub fn is_subset(&self, other: &Self) -> bool {
        self.len() <= other.len() && self.iter().intersection(other.iter()).eq(self.iter())
    }

    /// Returns `true` if `self` contains every column that `other` does.
    ///
    /// ```
    /// use uccprofile::AttributeList;
    /// let nil = AttributeList::<u8>::new(&[]);
    /// let one = AttributeList::new(&[1]);
    /// let two = AttributeList::new(&[1, 2]);
    ///
    /// assert!(one.is_superset(&nil));
    /// assert!(two.is_superset(&one));
    /// assert!(two.is_superset(&two));
    /// assert!(!one.is_superset(&two));
    /// ```
    pub fn is_superset(&self, other: &Self) -> bool {
        other.is_subset(self)
    }

    /// Returns `true` if both lists have the same length and agree on everything except their
    /// last column.
    ///
    /// This is the join condition for building the next lattice level: two lists of `k` columns
    /// sharing their first `k - 1` columns combine into exactly one list of `k + 1` columns.
    ///
    /// ```
    /// use uccprofile::AttributeList;
    ///
    /// let ab = AttributeList::new(&[0u8, 1]);
    /// let ac = AttributeList::new(&[0u8, 2]);
    /// let bc = AttributeList::new(&[1u8, 2]);
    /// assert!(ab.same_prefix_as(&ac));
    /// assert!(!ab.same_prefix_as(&bc));
    ///
    /// // Every single-column list shares the empty prefix.
    /// assert!(AttributeList::new(&[4u8]).same_prefix_as(&AttributeList::new(&[1])));
    /// ```
    pub fn same_prefix_as(&self, other: &Self) -> bool {
        match self.len() {
            0 => false,
            len => len == other.len() && self.0[..len - 1] == other.0[..len - 1],
        }
    }
}

impl<C: ColumnId + std::fmt::Debug> std::fmt::Debug for AttributeList<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.0.iter()).finish()
    }
}

impl<C: ColumnId> iter::FromIterator<C> for AttributeList<C> {
    /// Creates an attribute list containing the specified columns.
    ///
    /// It's okay if the provided iterator contains duplicates.
    fn from_iter<I: IntoIterator<Item = C>>(iter: I) -> Self {
        let mut v = SmallVec::from_iter(iter);
        v.sort_unstable();
        v.dedup();
        AttributeList(v)
    }
}

/// A row position within a relation.
pub type Row = u32;

/// Where a value has been seen so far while grouping rows: once, at the given row, or often
/// enough to own a cluster at the given index.
#[derive(Clone, Copy)]
enum Slot {
    Single(Row),
    Cluster(usize),
}

/// Groups row positions by key, keeping only the groups with at least two rows.
///
/// Rows must arrive in ascending order; each resulting cluster is then sorted too. Singleton
/// groups never allocate.
fn group_rows<K, I>(rows: I, slots: &mut HashMap<K, Slot>, clusters: &mut Vec<Vec<Row>>)
where
    K: Hash + Eq,
    I: IntoIterator<Item = (K, Row)>,
{
    for (key, row) in rows {
        match slots.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(Slot::Single(row));
            }
            Entry::Occupied(mut entry) => match *entry.get() {
                Slot::Single(first) => {
                    entry.insert(Slot::Cluster(clusters.len()));
                    clusters.push(vec![first, row]);
                }
                Slot::Cluster(index) => clusters[index].push(row),
            },
        }
    }
}

/// A stripped partition of a relation's rows: rows are grouped when they hold equal values in
/// every column of [`attributes`](PositionListIndex::attributes), and groups with only one row
/// are dropped.
///
/// The column combination is unique exactly when no clusters remain.
///
/// Clusters are kept in a canonical order (by their smallest row, with rows ascending inside each
/// cluster), so two indexes describing the same partition compare equal.
#[derive(Clone)]
pub struct PositionListIndex<C: ColumnId> {
    attributes: AttributeList<C>,
    clusters: Vec<Vec<Row>>,
    // Row to cluster position, built the first time another index probes this one.
    probe: OnceLock<HashMap<Row, u32>>,
}

impl<C: ColumnId> PositionListIndex<C> {
    /// Builds the index for `attributes` from the value of every row, in row order.
    ///
    /// The values can be anything hashable: interned cells of a single column, or tuples for a
    /// combination of columns that has already been assembled.
    ///
    /// This takes time proportional to the number of rows. Fails with
    /// [`Precondition::TooManyRows`] if there are more values than a [`Row`] can number, the same
    /// limit [`Relation`] enforces.
    ///
    /// ```
    /// use uccprofile::{AttributeList, PositionListIndex};
    ///
    /// let pli = PositionListIndex::new(AttributeList::new(&[0u8]), ["a", "b", "a", "c", "b"])?;
    /// assert_eq!(pli.clusters(), &[vec![0, 2], vec![1, 4]]);
    /// assert!(!pli.is_unique());
    /// assert_eq!(pli.key_error(), 2);
    /// # Ok::<(), uccprofile::Error>(())
    /// ```
    pub fn new<K, I>(attributes: AttributeList<C>, values: I) -> Result<Self>
    where
        K: Hash + Eq,
        I: IntoIterator<Item = K>,
    {
        let values = values.into_iter();
        let (hinted, _) = values.size_hint();
        if hinted > Row::MAX as usize {
            return Err(Precondition::TooManyRows { rows: hinted }.into());
        }

        let mut slots = HashMap::new();
        let mut clusters = Vec::new();
        let mut seen = 0;
        let rows = values.enumerate().map_while(|(row, value)| {
            seen = row + 1;
            let row = Row::try_from(row).ok().filter(|&row| row < Row::MAX)?;
            Some((value, row))
        });
        group_rows(rows, &mut slots, &mut clusters);
        if seen > Row::MAX as usize {
            return Err(Precondition::TooManyRows { rows: seen }.into());
        }
        Ok(PositionListIndex::from_clusters(attributes, clusters))
    }

    /// Builds the single-column index for `column` of `relation`.
    pub fn for_column(relation: &Relation, column: usize) -> Result<Self> {
        let attributes = AttributeList::for_relation(&[column], relation.column_count())?;
        PositionListIndex::new(attributes, relation.column(column).iter().copied())
    }

    fn from_clusters(attributes: AttributeList<C>, mut clusters: Vec<Vec<Row>>) -> Self {
        debug_assert!(clusters.iter().all(|cluster| cluster.len() > 1));
        clusters.sort_unstable_by_key(|cluster| cluster[0]);
        PositionListIndex {
            attributes,
            clusters,
            probe: OnceLock::new(),
        }
    }

    /// The columns this index partitions the rows by.
    pub fn attributes(&self) -> &AttributeList<C> {
        &self.attributes
    }

    /// The groups of rows sharing equal values, each with at least two rows.
    pub fn clusters(&self) -> &[Vec<Row>] {
        &self.clusters
    }

    /// Returns `true` if no two rows agree on all of this index's columns.
    pub fn is_unique(&self) -> bool {
        self.clusters.is_empty()
    }

    /// The number of rows that appear in some cluster.
    pub fn covered_rows(&self) -> usize {
        self.clusters.iter().map(Vec::len).sum()
    }

    /// The number of rows that would have to be removed to make this column combination unique.
    pub fn key_error(&self) -> usize {
        self.covered_rows() - self.clusters.len()
    }

    fn probe(&self) -> &HashMap<Row, u32> {
        self.probe.get_or_init(|| {
            let mut probe = HashMap::with_capacity(self.covered_rows());
            for (id, cluster) in self.clusters.iter().enumerate() {
                probe.extend(cluster.iter().map(|&row| (row, id as u32)));
            }
            probe
        })
    }

    /// Computes the index of the union of both column sets without looking at the relation.
    ///
    /// Each cluster of `self` is split according to which cluster of `other` its rows belong to.
    /// Rows that `other` doesn't cluster at all hold a value nobody else has in `other`'s columns,
    /// so they become singletons and are dropped. Two rows end up together exactly when they
    /// agree on every column of both indexes.
    ///
    /// The work done is proportional to the rows covered by `self`, plus a one-time cost to build
    /// a lookup table for `other` that later intersections with `other` reuse.
    ///
    /// ```
    /// use uccprofile::{AttributeList, PositionListIndex};
    ///
    /// let name = PositionListIndex::new(AttributeList::new(&[1u8]), ["A", "B", "A", "A"])?;
    /// let dept = PositionListIndex::new(AttributeList::new(&[2u8]), ["X", "X", "Y", "X"])?;
    ///
    /// let both = name.intersect(&dept);
    /// assert_eq!(both.attributes(), &AttributeList::new(&[1, 2]));
    /// assert_eq!(both.clusters(), &[vec![0, 3]]);
    /// assert_eq!(both, dept.intersect(&name));
    /// # Ok::<(), uccprofile::Error>(())
    /// ```
    pub fn intersect(&self, other: &Self) -> Self {
        let probe = other.probe();
        let mut clusters = Vec::new();

        // Reuse the same map for every cluster to avoid hammering the allocator.
        let mut slots = HashMap::new();
        for cluster in self.clusters.iter() {
            let rows = cluster
                .iter()
                .filter_map(|row| probe.get(row).map(|&id| (id, *row)));
            group_rows(rows, &mut slots, &mut clusters);
            slots.clear();
        }

        PositionListIndex::from_clusters(self.attributes.union(&other.attributes), clusters)
    }
}

impl<C: ColumnId> PartialEq for PositionListIndex<C> {
    fn eq(&self, other: &Self) -> bool {
        self.attributes == other.attributes && self.clusters == other.clusters
    }
}

impl<C: ColumnId> Eq for PositionListIndex<C> {}

impl<C: ColumnId + std::fmt::Debug> std::fmt::Debug for PositionListIndex<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionListIndex")
            .field("attributes", &self.attributes)
            .field("clusters", &self.clusters)
            .finish()
    }
}
