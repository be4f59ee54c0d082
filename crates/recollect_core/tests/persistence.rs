//! Collections kept in a data directory outlive the engine that wrote them.

use recollect_core::{
    CollectionOptions, Condition, Database, IndexOptions, MemoryEngine, Query, Value,
};
use std::sync::Arc;
use tempfile::TempDir;

fn open(dir: &TempDir) -> Database {
    let engine = MemoryEngine::open_dir(dir.path()).unwrap();
    Database::open(Arc::new(engine), "notes")
        .unwrap()
        .initialize()
        .unwrap()
}

#[test]
fn reopen_restores_collections_and_documents() {
    let dir = TempDir::new().unwrap();
    {
        let db = open(&dir);
        let notes = db
            .create_collection(
                CollectionOptions::new("notes")
                    .key_field("slug")
                    .auto_key(false)
                    .index("tag", IndexOptions::new()),
            )
            .unwrap();
        notes
            .insert_many(vec![
                Value::object([("slug", Value::from("a")), ("tag", Value::from("x"))]),
                Value::object([("slug", Value::from("b")), ("tag", Value::from("y"))]),
            ])
            .unwrap();
        notes
            .update(&Query::new().eq("slug", "b"), Value::object([("tag", Value::from("x"))]))
            .unwrap();
        db.create_collection(CollectionOptions::new("scratch"))
            .unwrap()
            .drop()
            .unwrap();
    }

    let db = open(&dir);
    assert_eq!(db.collection_names(), vec!["notes".to_string()]);
    let notes = db.collection("notes").unwrap();
    assert_eq!(notes.key_field(), "slug");
    assert!(!notes.auto_key());
    assert_eq!(notes.find_by_index("tag", "x", &Query::new()).unwrap().len(), 2);
    let touched = notes
        .find(&Query::new().field("$meta.modified", Condition::new().gt(0)))
        .unwrap();
    assert_eq!(touched.len(), 1);
    assert_eq!(touched[0].get("slug"), Some(&Value::from("b")));
}

#[test]
fn dropped_database_is_gone_after_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let db = open(&dir);
        db.create_collection(CollectionOptions::new("notes")).unwrap();
        db.drop().unwrap();
    }
    let db = open(&dir);
    assert!(db.collection_names().is_empty());
    assert_eq!(db.coordinator().store_names().unwrap(), vec!["_config"]);
}
