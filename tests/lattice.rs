use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use uccprofile::{AttributeList, PositionListIndex, ProfilerConfig, Relation, UccProfiler};

macro_rules! check_size {
    ($($name:ident)*) => {
        $(
        #[test]
        fn $name() {
            check((stringify!($name).as_bytes().last().unwrap() - b'0').into());
        }
        )*
    }
}

check_size! {
    lattice_over_1
    lattice_over_2
    lattice_over_3
    lattice_over_4
    lattice_over_5
    lattice_over_6
    lattice_over_7
    lattice_over_8
}

fn make_relation(columns: Vec<Vec<u8>>) -> Relation {
    let names = (0..columns.len()).map(|i| format!("c{}", i)).collect();
    let cells = columns
        .into_iter()
        .map(|column| column.into_iter().map(|v| v.to_string()));
    Relation::from_columns("generated", names, cells).unwrap()
}

fn profile(relation: &Relation, threads: usize) -> Vec<Vec<usize>> {
    UccProfiler::new(ProfilerConfig::default().threads(threads))
        .profile::<u8>(relation)
        .unwrap()
        .uccs()
        .iter()
        .map(|ucc| ucc.to_record().indices)
        .collect()
}

fn is_unique(relation: &Relation, columns: &[usize]) -> bool {
    let mut seen = HashSet::new();
    (0..relation.row_count()).all(|row| {
        let projected: Vec<_> = columns
            .iter()
            .map(|&column| relation.value(row, column))
            .collect();
        seen.insert(projected)
    })
}

/// Enumerates every column subset and keeps the unique ones that have no unique proper subset,
/// ordered the same way the profiler orders its results.
fn brute_force(relation: &Relation) -> Vec<Vec<usize>> {
    let columns = relation.column_count();
    let unique: Vec<u32> = (1u32..1 << columns)
        .filter(|mask| {
            let chosen: Vec<usize> = (0..columns).filter(|c| mask & (1 << c) != 0).collect();
            is_unique(relation, &chosen)
        })
        .collect();

    let mut minimal: Vec<Vec<usize>> = unique
        .iter()
        .filter(|&&mask| {
            !unique
                .iter()
                .any(|&other| other != mask && other & mask == other)
        })
        .map(|&mask| (0..columns).filter(|c| mask & (1 << c) != 0).collect())
        .collect();
    minimal.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    minimal
}

fn check(columns: usize) {
    let mut rng = StdRng::seed_from_u64(columns as u64);
    for domain in 2u8..5 {
        for rows in [1, 3, 6, 12, 20] {
            let data = (0..columns)
                .map(|_| (0..rows).map(|_| rng.gen_range(0..domain)).collect())
                .collect();
            let relation = make_relation(data);

            let expected = brute_force(&relation);
            assert_eq!(profile(&relation, 1), expected, "{:?}", relation);
            assert_eq!(profile(&relation, 4), expected, "{:?}", relation);
        }
    }
}

#[test]
fn duplicate_rows_have_no_key() {
    let relation = make_relation(vec![vec![1, 2, 1], vec![3, 4, 3], vec![5, 6, 5]]);
    assert!(profile(&relation, 1).is_empty());
    assert!(brute_force(&relation).is_empty());
}

#[test]
fn single_row_makes_every_column_a_key() {
    let relation = make_relation(vec![vec![1], vec![1], vec![2]]);
    assert_eq!(profile(&relation, 2), [vec![0], vec![1], vec![2]]);
}

fn relations() -> impl Strategy<Value = Vec<Vec<u8>>> {
    (1usize..=6, 1usize..=14).prop_flat_map(|(columns, rows)| {
        prop::collection::vec(prop::collection::vec(0u8..3, rows), columns)
    })
}

fn pli(column: u8, values: &[u8]) -> PositionListIndex<u8> {
    PositionListIndex::new(AttributeList::new(&[column]), values.iter().copied()).unwrap()
}

proptest! {
    #[test]
    fn complete_sound_and_minimal(data in relations()) {
        let relation = make_relation(data);
        let found = profile(&relation, 3);

        for ucc in found.iter() {
            prop_assert!(is_unique(&relation, ucc));
            for other in found.iter() {
                let proper_subset = other.len() < ucc.len() && other.iter().all(|c| ucc.contains(c));
                prop_assert!(!proper_subset, "{:?} contains {:?}", ucc, other);
            }
        }
        prop_assert_eq!(found, brute_force(&relation));
    }

    #[test]
    fn profiling_is_idempotent(data in relations()) {
        let relation = make_relation(data);
        let first: HashSet<_> = profile(&relation, 2).into_iter().collect();
        let second: HashSet<_> = profile(&relation, 2).into_iter().collect();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn intersection_commutes_and_associates(
        rows in prop::collection::vec((0u8..3, 0u8..3, 0u8..3), 1..40)
    ) {
        let a: Vec<u8> = rows.iter().map(|r| r.0).collect();
        let b: Vec<u8> = rows.iter().map(|r| r.1).collect();
        let c: Vec<u8> = rows.iter().map(|r| r.2).collect();
        let (a, b, c) = (pli(0, &a), pli(1, &b), pli(2, &c));

        prop_assert_eq!(a.intersect(&b), b.intersect(&a));

        let left = a.intersect(&b).intersect(&c);
        let right = a.intersect(&b.intersect(&c));
        prop_assert_eq!(&left, &right);

        let direct = PositionListIndex::new(AttributeList::new(&[0u8, 1, 2]), rows.iter()).unwrap();
        prop_assert_eq!(left, direct);
    }
}
