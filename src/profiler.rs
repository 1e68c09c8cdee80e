use crate::{AttributeList, ColumnId, Error, PositionListIndex, Precondition, Relation, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// A unique column combination: a set of columns of `relation` on which no two rows agree.
///
/// Combinations produced by [`UccProfiler`] are also minimal, i.e. no proper subset is unique.
#[derive(Clone)]
pub struct Ucc<'r, C: ColumnId> {
    relation: &'r Relation,
    attributes: AttributeList<C>,
}

/// The external form of a [`Ucc`]: the relation's name, the attribute names, and their column
/// positions.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct UccRecord<'r> {
    /// Name of the profiled relation.
    pub relation: &'r str,
    /// Attribute names, in column order.
    pub columns: Vec<&'r str>,
    /// Column positions.
    pub indices: Vec<usize>,
}

impl<'r, C: ColumnId> Ucc<'r, C> {
    /// Pairs a relation with one of its column combinations.
    pub fn new(relation: &'r Relation, attributes: AttributeList<C>) -> Self {
        Ucc {
            relation,
            attributes,
        }
    }

    /// The relation this combination belongs to.
    ///
    /// ```
    /// use uccprofile::{AttributeList, Relation, Ucc};
    ///
    /// let relation = Relation::from_rows("r", vec!["a".into(), "b".into()], vec![vec!["1", "2"]])?;
    /// let ucc = Ucc::new(&relation, AttributeList::<u8>::new(&[1]));
    /// assert_eq!(ucc.relation().name(), "r");
    /// assert_eq!(ucc.to_string(), "r[b]");
    /// # Ok::<(), uccprofile::Error>(())
    /// ```
    pub fn relation(&self) -> &'r Relation {
        self.relation
    }

    /// The columns of the combination.
    pub fn attributes(&self) -> &AttributeList<C> {
        &self.attributes
    }

    /// The attribute names of the combination, in column order.
    pub fn column_names(&self) -> impl Iterator<Item = &'r str> + '_ {
        let relation = self.relation;
        self.attributes
            .iter()
            .filter_map(move |column| relation.attribute(column.index()))
    }

    /// Converts this combination to its serializable form.
    pub fn to_record(&self) -> UccRecord<'r> {
        UccRecord {
            relation: self.relation.name(),
            columns: self.column_names().collect(),
            indices: self.attributes.iter().map(ColumnId::index).collect(),
        }
    }
}

impl<C: ColumnId> fmt::Display for Ucc<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.relation.name())?;
        let mut names = self.column_names();
        if let Some(name) = names.next() {
            f.write_str(name)?;
        }
        for name in names {
            write!(f, ", {}", name)?;
        }
        f.write_str("]")
    }
}

impl<C: ColumnId + fmt::Debug> fmt::Debug for Ucc<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ucc")
            .field("relation", &self.relation.name())
            .field("attributes", &self.attributes)
            .finish()
    }
}

/// A set-trie over confirmed unique combinations, answering whether any of them lies entirely
/// inside a candidate.
///
/// A query only follows trie edges labelled with the candidate's own columns, so it never looks at
/// combinations that share no prefix with the candidate.
///
/// ```
/// use uccprofile::{AttributeList, UccIndex};
///
/// let mut index = UccIndex::new();
/// index.insert(&AttributeList::new(&[1u8, 3]));
/// index.insert(&AttributeList::new(&[2u8]));
///
/// assert!(index.contains_subset_of(&AttributeList::new(&[0, 1, 3])));
/// assert!(index.contains_subset_of(&AttributeList::new(&[2, 4])));
/// assert!(!index.contains_subset_of(&AttributeList::new(&[0, 1, 4])));
/// ```
#[derive(Debug)]
pub struct UccIndex<C: ColumnId> {
    root: Node<C>,
    len: usize,
}

#[derive(Debug)]
struct Node<C: ColumnId> {
    terminal: bool,
    children: HashMap<C, Node<C>>,
}

impl<C: ColumnId> Node<C> {
    fn new() -> Self {
        Node {
            terminal: false,
            children: HashMap::new(),
        }
    }

    fn has_subset_in(&self, columns: &[C]) -> bool {
        if self.terminal {
            return true;
        }
        // Stored lists are sorted too, so each child can only match at or after its column's
        // position in the candidate.
        columns.iter().enumerate().any(|(i, column)| {
            self.children
                .get(column)
                .map_or(false, |child| child.has_subset_in(&columns[i + 1..]))
        })
    }
}

impl<C: ColumnId> Default for UccIndex<C> {
    fn default() -> Self {
        UccIndex::new()
    }
}

impl<C: ColumnId> UccIndex<C> {
    /// Creates an empty index.
    pub fn new() -> Self {
        UccIndex {
            root: Node::new(),
            len: 0,
        }
    }

    /// Adds a combination. Returns `false` if it was already present.
    pub fn insert(&mut self, attributes: &AttributeList<C>) -> bool {
        let mut node = &mut self.root;
        for column in attributes.iter() {
            node = node.children.entry(column).or_insert_with(Node::new);
        }
        let added = !node.terminal;
        node.terminal = true;
        if added {
            self.len += 1;
        }
        added
    }

    /// Returns `true` if some stored combination is a subset of `candidate`, including being equal
    /// to it.
    pub fn contains_subset_of(&self, candidate: &AttributeList<C>) -> bool {
        self.root.has_subset_in(candidate.columns())
    }

    /// The number of stored combinations.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Tuning knobs for [`UccProfiler`].
#[derive(Clone, Debug)]
pub struct ProfilerConfig {
    threads: usize,
    max_level: Option<usize>,
    time_limit: Option<Duration>,
}

impl Default for ProfilerConfig {
    /// One worker per available CPU, and no limits.
    fn default() -> Self {
        ProfilerConfig {
            threads: thread::available_parallelism().map_or(1, NonZeroUsize::get),
            max_level: None,
            time_limit: None,
        }
    }
}

impl ProfilerConfig {
    /// Evaluates each lattice level with up to `threads` workers. Zero is treated as one.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Stops after combinations of `max_level` columns have been checked.
    ///
    /// Single columns are always checked, so a limit of zero behaves like a limit of one.
    pub fn max_level(mut self, max_level: Option<usize>) -> Self {
        self.max_level = max_level.map(|max| max.max(1));
        self
    }

    /// Doesn't start a new lattice level once `time_limit` has passed. A level that has started
    /// always runs to completion.
    pub fn time_limit(mut self, time_limit: Option<Duration>) -> Self {
        self.time_limit = time_limit;
        self
    }

    /// The configured number of workers.
    ///
    /// ```
    /// use uccprofile::ProfilerConfig;
    ///
    /// assert_eq!(ProfilerConfig::default().threads(0).thread_count(), 1);
    /// assert_eq!(ProfilerConfig::default().threads(6).thread_count(), 6);
    /// ```
    pub fn thread_count(&self) -> usize {
        self.threads
    }
}

/// Why a search ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stop {
    /// No non-unique combinations were left to extend, or every column was already combined.
    Exhausted,
    /// The configured maximum level was reached.
    LevelLimit,
    /// The configured time limit ran out.
    TimeLimit,
}

impl fmt::Display for Stop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stop::Exhausted => "search space exhausted",
            Stop::LevelLimit => "level limit reached",
            Stop::TimeLimit => "time limit reached",
        })
    }
}

/// Counters for one level of the lattice search.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LevelStats {
    /// Number of columns in this level's combinations.
    pub level: usize,
    /// Combinations considered.
    pub candidates: usize,
    /// Candidates skipped because they contain a known unique combination or were generated
    /// more than once.
    pub pruned: usize,
    /// New minimal unique combinations.
    pub uniques: usize,
    /// Non-unique combinations carried to the next level.
    pub frontier: usize,
}

impl std::ops::AddAssign for LevelStats {
    fn add_assign(&mut self, other: Self) {
        self.candidates += other.candidates;
        self.pruned += other.pruned;
        self.uniques += other.uniques;
        self.frontier += other.frontier;
    }
}

/// The outcome of [`UccProfiler::profile`].
#[derive(Debug)]
pub struct Profile<'r, C: ColumnId> {
    uccs: Vec<Ucc<'r, C>>,
    levels: Vec<LevelStats>,
    stop: Stop,
}

impl<'r, C: ColumnId> Profile<'r, C> {
    /// The minimal unique column combinations, ordered by size and then by columns.
    pub fn uccs(&self) -> &[Ucc<'r, C>] {
        &self.uccs
    }

    /// Takes the combinations out of the profile.
    ///
    /// ```
    /// use uccprofile::{Relation, UccProfiler};
    ///
    /// let relation = Relation::from_columns("r", vec!["a".into()], vec![vec!["x", "y"]])?;
    /// let uccs = UccProfiler::default().profile::<u8>(&relation)?.into_uccs();
    /// assert_eq!(uccs.len(), 1);
    /// assert_eq!(uccs[0].attributes().columns(), &[0]);
    /// # Ok::<(), uccprofile::Error>(())
    /// ```
    pub fn into_uccs(self) -> Vec<Ucc<'r, C>> {
        self.uccs
    }

    /// Statistics for each level that was searched, starting with single columns.
    pub fn levels(&self) -> &[LevelStats] {
        &self.levels
    }

    /// Why the search ended.
    pub fn stop(&self) -> Stop {
        self.stop
    }

    /// Returns `true` if the whole lattice was searched, so every minimal unique combination was
    /// found. A search cut short by a limit only misses larger combinations; everything it does
    /// report is still minimal.
    pub fn is_complete(&self) -> bool {
        self.stop == Stop::Exhausted
    }
}

/// One worker's share of a lattice level.
struct Candidates<C: ColumnId> {
    size: usize,
    uniques: Vec<AttributeList<C>>,
    frontier: Vec<PositionListIndex<C>>,
    stats: LevelStats,
}

impl<C: ColumnId> Candidates<C> {
    fn new(size: usize) -> Self {
        Candidates {
            size,
            uniques: Vec::new(),
            frontier: Vec::new(),
            stats: LevelStats {
                level: size,
                ..LevelStats::default()
            },
        }
    }

    /// Combines `frontier[left]` with every later entry sharing its prefix.
    ///
    /// `frontier` must be sorted by attributes, which puts those entries directly after it.
    fn combine_from(
        &mut self,
        frontier: &[PositionListIndex<C>],
        left: usize,
        known: &UccIndex<C>,
    ) {
        let pli = &frontier[left];
        let partners = frontier[left + 1..]
            .iter()
            .take_while(|other| pli.attributes().same_prefix_as(other.attributes()));

        for other in partners {
            self.stats.candidates += 1;
            let combined = pli.attributes().union(other.attributes());

            // A superset of a unique combination is unique but not minimal.
            if combined.len() != self.size || known.contains_subset_of(&combined) {
                self.stats.pruned += 1;
                continue;
            }

            let intersection = pli.intersect(other);
            if intersection.is_unique() {
                self.uniques.push(combined);
            } else {
                self.frontier.push(intersection);
            }
        }
    }

    fn merge(&mut self, other: Candidates<C>) {
        self.uniques.extend(other.uniques);
        self.frontier.extend(other.frontier);
        self.stats += other.stats;
    }

    /// Puts the level into canonical order and drops candidates that were produced more than
    /// once, by different workers or different pairs.
    fn finish(mut self) -> Self {
        self.uniques.sort_unstable();
        self.uniques.dedup();
        self.frontier
            .sort_unstable_by(|a, b| a.attributes().cmp(b.attributes()));
        self.frontier.dedup_by(|a, b| a.attributes() == b.attributes());

        let kept = self.uniques.len() + self.frontier.len();
        let evaluated = self.stats.candidates - self.stats.pruned;
        self.stats.pruned += evaluated - kept;
        self.stats.uniques = self.uniques.len();
        self.stats.frontier = self.frontier.len();
        self
    }
}

/// Discovers minimal unique column combinations by a breadth-first walk up the lattice of
/// column sets.
///
/// Level one builds a [`PositionListIndex`] for every column. Each following level joins pairs of
/// non-unique indexes whose columns differ only in the last position, skips any candidate that
/// contains a combination already known to be unique, and checks the rest by intersecting the two
/// indexes. Non-unique results become the next level's frontier.
///
/// Within a level, candidate pairs are independent, so they're spread over worker threads; each
/// worker collects its results locally and the level is merged and sorted before the next one
/// starts, which makes the output independent of the number of threads.
#[derive(Clone, Debug, Default)]
pub struct UccProfiler {
    config: ProfilerConfig,
}

impl UccProfiler {
    /// Creates a profiler with the given configuration.
    pub fn new(config: ProfilerConfig) -> Self {
        UccProfiler { config }
    }

    /// The profiler's configuration.
    ///
    /// ```
    /// use uccprofile::{ProfilerConfig, UccProfiler};
    ///
    /// let profiler = UccProfiler::new(ProfilerConfig::default().threads(3));
    /// assert_eq!(profiler.config().thread_count(), 3);
    /// ```
    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Finds the minimal unique column combinations of `relation`.
    ///
    /// `C` is the integer type used for column positions; it must be able to represent every
    /// column of the relation.
    ///
    /// Fails before doing any work if the relation has no columns, no rows, or too many columns
    /// for `C`. A relation containing two identical rows has no unique combination at all, and
    /// yields an empty result.
    #[tracing::instrument(skip_all, fields(relation = relation.name()))]
    pub fn profile<'r, C: ColumnId>(&self, relation: &'r Relation) -> Result<Profile<'r, C>> {
        let columns = relation.column_count();
        if columns == 0 {
            return Err(Precondition::NoColumns.into());
        }
        if relation.row_count() == 0 {
            return Err(Precondition::NoRows.into());
        }
        if C::from_index(columns - 1).is_none() {
            return Err(Error::PreconditionViolation(Precondition::TooManyColumns {
                columns,
            }));
        }

        let started = Instant::now();
        info!(
            rows = relation.row_count(),
            columns,
            threads = self.config.threads,
            "profiling unique column combinations"
        );

        let mut uccs = Vec::new();
        let mut known = UccIndex::new();
        let mut frontier = Vec::new();
        for column in 0..columns {
            let pli = PositionListIndex::<C>::for_column(relation, column)?;
            if pli.is_unique() {
                known.insert(pli.attributes());
                let ucc = Ucc::new(relation, pli.attributes().clone());
                trace!(%ucc, "unique column");
                uccs.push(ucc);
            } else {
                frontier.push(pli);
            }
        }

        let first = LevelStats {
            level: 1,
            candidates: columns,
            pruned: 0,
            uniques: uccs.len(),
            frontier: frontier.len(),
        };
        debug!(?first, "checked single columns");
        let mut levels = vec![first];

        // Single-column lists are already in sorted order.
        let mut level = 1;
        let stop = loop {
            if frontier.is_empty() || level >= columns {
                break Stop::Exhausted;
            }
            if self.config.max_level.map_or(false, |max| level >= max) {
                break Stop::LevelLimit;
            }
            if self
                .config
                .time_limit
                .map_or(false, |limit| started.elapsed() >= limit)
            {
                break Stop::TimeLimit;
            }

            let next = self.expand(&frontier, &known, level + 1);
            debug!(stats = ?next.stats, "checked lattice level");
            for attributes in next.uniques {
                known.insert(&attributes);
                let ucc = Ucc::new(relation, attributes);
                trace!(%ucc, "unique combination");
                uccs.push(ucc);
            }
            levels.push(next.stats);
            frontier = next.frontier;
            level += 1;
        };

        info!(
            uccs = uccs.len(),
            levels = levels.len(),
            elapsed = ?started.elapsed(),
            %stop,
            "finished profiling"
        );
        Ok(Profile { uccs, levels, stop })
    }

    /// Builds the next level, of combinations with `size` columns, from a sorted frontier.
    fn expand<C: ColumnId>(
        &self,
        frontier: &[PositionListIndex<C>],
        known: &UccIndex<C>,
        size: usize,
    ) -> Candidates<C> {
        let workers = self.config.threads.min(frontier.len()).max(1);
        let mut level = Candidates::new(size);

        if workers == 1 {
            for left in 0..frontier.len() {
                level.combine_from(frontier, left, known);
            }
            return level.finish();
        }

        // Early entries have the most partners, so hand out single entries on demand rather
        // than fixed ranges.
        let counter = AtomicUsize::new(0);
        let next = &counter;
        let parts = thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    s.spawn(move || {
                        let mut part = Candidates::new(size);
                        loop {
                            let left = next.fetch_add(1, Ordering::Relaxed);
                            if left >= frontier.len() {
                                break part;
                            }
                            part.combine_from(frontier, left, known);
                        }
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
                })
                .collect::<Vec<_>>()
        });

        for part in parts {
            level.merge(part);
        }
        level.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relation(columns: &[&[&str]]) -> Relation {
        let names = (0..columns.len()).map(|i| format!("c{}", i)).collect();
        Relation::from_columns("t", names, columns.iter().map(|c| c.iter())).unwrap()
    }

    fn found(profile: &Profile<'_, u8>) -> Vec<Vec<u8>> {
        profile
            .uccs()
            .iter()
            .map(|ucc| ucc.attributes().columns().to_vec())
            .collect()
    }

    #[test]
    fn trie_matches_equal_and_nested_sets() {
        let mut index = UccIndex::<u8>::new();
        assert!(!index.contains_subset_of(&AttributeList::new(&[0])));
        assert!(index.insert(&AttributeList::new(&[0, 2, 5])));
        assert!(!index.insert(&AttributeList::new(&[5, 2, 0])));
        assert_eq!(index.len(), 1);

        assert!(index.contains_subset_of(&AttributeList::new(&[0, 2, 5])));
        assert!(index.contains_subset_of(&AttributeList::new(&[0, 1, 2, 3, 4, 5])));
        assert!(!index.contains_subset_of(&AttributeList::new(&[0, 2])));
        assert!(!index.contains_subset_of(&AttributeList::new(&[2, 5, 6])));
    }

    #[test]
    fn finish_removes_duplicates() {
        let mut level = Candidates::<u8>::new(2);
        level.stats.candidates = 3;
        level.uniques.push(AttributeList::new(&[1, 2]));
        level.uniques.push(AttributeList::new(&[0, 1]));
        level.uniques.push(AttributeList::new(&[1, 2]));
        let level = level.finish();

        assert_eq!(
            level.uniques,
            [AttributeList::new(&[0, 1]), AttributeList::new(&[1, 2])]
        );
        assert_eq!(level.stats.pruned, 1);
        assert_eq!(level.stats.uniques, 2);
    }

    #[test]
    fn three_column_key() {
        // Every pair of columns repeats some combination, but all three together don't.
        let table = relation(&[
            &["0", "0", "0", "0", "1", "1", "1", "1"],
            &["0", "0", "1", "1", "0", "0", "1", "1"],
            &["0", "1", "0", "1", "0", "1", "0", "1"],
            &["a", "a", "a", "a", "a", "a", "a", "b"],
        ]);
        let profile = UccProfiler::default().profile::<u8>(&table).unwrap();
        assert_eq!(found(&profile), [vec![0, 1, 2]]);
        assert!(profile.is_complete());
        // The fourth level is visited but has no prefix-compatible pairs left.
        assert_eq!(profile.levels().len(), 4);
        assert_eq!(profile.levels()[3].candidates, 0);
        assert_eq!(profile.levels()[0].frontier, 4);
        assert_eq!(profile.levels()[1].candidates, 6);
    }

    #[test]
    fn supersets_of_found_keys_are_pruned() {
        let table = relation(&[
            &["k", "k", "k", "k"],
            &["0", "0", "1", "1"],
            &["0", "1", "0", "1"],
        ]);
        let profile = UccProfiler::new(ProfilerConfig::default().threads(1))
            .profile::<u8>(&table)
            .unwrap();
        assert_eq!(found(&profile), [vec![1, 2]]);

        // {0, 1} and {0, 2} join into {0, 1, 2}, which contains {1, 2}.
        let third = profile.levels()[2];
        assert_eq!(third.candidates, 1);
        assert_eq!(third.pruned, 1);
        assert_eq!(third.frontier, 0);
    }

    #[test]
    fn level_limit_stops_early() {
        let table = relation(&[&["0", "0", "1", "1"], &["0", "1", "0", "1"]]);
        let config = ProfilerConfig::default().max_level(Some(1));
        let profile = UccProfiler::new(config).profile::<u8>(&table).unwrap();
        assert!(profile.uccs().is_empty());
        assert_eq!(profile.stop(), Stop::LevelLimit);
        assert!(!profile.is_complete());
    }

    #[test]
    fn zero_level_limit_still_checks_single_columns() {
        let table = relation(&[&["0", "0", "1"], &["0", "1", "2"]]);
        let config = ProfilerConfig::default().max_level(Some(0));
        let profile = UccProfiler::new(config).profile::<u8>(&table).unwrap();
        assert_eq!(found(&profile), [vec![1]]);
        assert_eq!(profile.levels().len(), 1);
        assert_eq!(profile.stop(), Stop::LevelLimit);
    }

    #[test]
    fn workers_agree_on_a_wide_relation() {
        let table = relation(&[
            &["0", "0", "0", "1", "1", "1", "2", "2"],
            &["0", "1", "0", "1", "0", "1", "0", "1"],
            &["a", "a", "b", "b", "a", "a", "b", "b"],
            &["x", "x", "x", "x", "y", "y", "y", "y"],
            &["p", "q", "p", "q", "q", "p", "q", "p"],
            &["1", "1", "1", "1", "1", "1", "1", "2"],
        ]);
        let serial = UccProfiler::new(ProfilerConfig::default().threads(1))
            .profile::<u8>(&table)
            .unwrap();
        let parallel = UccProfiler::new(ProfilerConfig::default().threads(3))
            .profile::<u8>(&table)
            .unwrap();
        assert!(!found(&serial).is_empty());
        assert_eq!(found(&serial), found(&parallel));
        assert_eq!(serial.levels(), parallel.levels());
    }

    #[test]
    fn zero_time_limit_only_checks_single_columns() {
        let table = relation(&[&["0", "0", "1"], &["0", "1", "1"], &["1", "2", "3"]]);
        let config = ProfilerConfig::default().time_limit(Some(Duration::ZERO));
        let profile = UccProfiler::new(config).profile::<u8>(&table).unwrap();
        assert_eq!(found(&profile), [vec![2]]);
        assert_eq!(profile.stop(), Stop::TimeLimit);
    }

    #[test]
    fn records_carry_names_and_positions() {
        let table = relation(&[&["0", "0"], &["0", "1"]]);
        let profile = UccProfiler::default().profile::<u8>(&table).unwrap();
        let record = profile.uccs()[0].to_record();
        assert_eq!(
            record,
            UccRecord {
                relation: "t",
                columns: vec!["c1"],
                indices: vec![1],
            }
        );
        assert_eq!(profile.uccs()[0].to_string(), "t[c1]");
    }
}
