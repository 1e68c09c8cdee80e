use uccprofile::{
    transitive_closure, Correspondence, Duplicate, DuplicateDetector, Measure, ReadOptions,
    Relation, SchemaMatcher, SimilarityMatrix, UccProfiler,
};

fn read(name: &str, data: &str) -> Relation {
    Relation::read(name, data.as_bytes(), &ReadOptions::default()).unwrap()
}

#[test]
fn customers_and_clients_line_up() {
    let customers = read(
        "customers",
        "id,name,city\n1,Ann Lee,Oslo\n2,Bob Stone,Rome\n3,Cid Moss,Lima\n",
    );
    let clients = read(
        "clients",
        "client_name,client_id,town\nBob Stone,2,Rome\nAnn Lee,1,Oslo\nDee Park,4,Kyiv\n",
    );

    let measure = Measure::Jaccard.build();
    let names = SimilarityMatrix::of_names(&customers, &clients, measure.as_ref());
    let values = SimilarityMatrix::of_values(&customers, &clients);
    let similarities = names.average(&values).unwrap();
    let matching = SchemaMatcher::default().match_attributes(&similarities);

    let found: Vec<String> = Correspondence::resolve(&customers, &clients, &similarities, &matching)
        .iter()
        .map(|c| {
            let record = c.to_record();
            format!("{}->{}", record.source, record.target)
        })
        .collect();
    assert_eq!(found, ["id->client_id", "name->client_name", "city->town"]);
}

#[test]
fn near_duplicates_are_grouped() {
    let people = read(
        "people",
        "name,city\nJonathan Smith,Boston\nJonathon Smith,Boston\nMaria Garcia,Denver\n\
         Jonathan Smyth,Boston\nMaria Garcia,Dallas\n",
    );

    // Two people share a name, but never in the same city.
    let profile = UccProfiler::default().profile::<u8>(&people).unwrap();
    assert_eq!(profile.uccs()[0].to_string(), "people[name, city]");

    let measure = Measure::Levenshtein.build();
    let detector = DuplicateDetector::new(measure.as_ref(), 0.9);
    let pairs: Vec<_> = detector
        .resolve(&people)
        .iter()
        .map(|d| (d.first, d.second))
        .collect();
    assert_eq!(pairs, [(0, 1), (0, 3), (1, 3)]);
}

#[test]
fn closure_of_unordered_pairs() {
    let input = [(9, 3), (3, 5), (1, 2)]
        .into_iter()
        .filter_map(|(a, b)| Duplicate::new(a, b));
    let closed: Vec<_> = transitive_closure(input)
        .iter()
        .map(|d| (d.first, d.second))
        .collect();
    assert_eq!(closed, [(1, 2), (3, 5), (3, 9), (5, 9)]);
}
