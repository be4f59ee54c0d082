//! Benchmark utilities.

use rand::Rng;
use recollect_core::{Collection, CollectionOptions, Database, IndexOptions, MemoryEngine, Value};
use std::sync::Arc;

/// Teams a generated person can belong to.
pub const TEAMS: [&str; 4] = ["red", "blue", "green", "gold"];

/// Generate one person document with random fields.
pub fn random_person(rng: &mut impl Rng) -> Value {
    let name: String = (0..8)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect();
    let tags = (0..rng.gen_range(0..4))
        .map(|_| Value::from(format!("t{}", rng.gen_range(0..16))))
        .collect();
    Value::object([
        ("name", Value::from(name)),
        ("age", Value::from(rng.gen_range(0..100i64))),
        ("team", Value::from(TEAMS[rng.gen_range(0..TEAMS.len())])),
        ("tags", Value::Array(tags)),
    ])
}

/// Generate `count` person documents.
pub fn random_people(count: usize) -> Vec<Value> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| random_person(&mut rng)).collect()
}

/// An in-memory database with a `people` collection holding `count`
/// generated documents, indexed on `team` and `tags`.
pub fn people_collection(count: usize) -> (Database, Collection) {
    let db = Database::open(Arc::new(MemoryEngine::new()), "bench")
        .and_then(Database::initialize)
        .unwrap();
    let people = db
        .create_collection(
            CollectionOptions::new("people")
                .index("team", IndexOptions::new())
                .index("tags", IndexOptions::new().multi_entry(true)),
        )
        .unwrap();
    if count > 0 {
        people.insert_many(random_people(count)).unwrap();
    }
    (db, people)
}
