//! Document commands.

use super::{collection, parse_json, parse_key, parse_query, print_json, CommandResult};
use recollect_core::{Database, Value};
use std::io::Write;

/// Inserts a document, or each element of an array in one transaction.
/// Prints the new keys.
pub fn insert(db: &Database, name: &str, document: &str, out: &mut impl Write) -> CommandResult {
    let collection = collection(db, name)?;
    let keys = match parse_json(document)? {
        Value::Array(documents) => collection.insert_many(documents)?,
        document => vec![collection.insert_one(document)?],
    };
    let keys = keys.iter().map(|key| key.to_value()).collect();
    print_json(out, &Value::Array(keys))
}

/// Prints the documents matching `query`, optionally through an index
/// lookup `(field, value)`.
pub fn find(
    db: &Database,
    name: &str,
    query: &str,
    lookup: Option<(String, String)>,
    first: bool,
    out: &mut impl Write,
) -> CommandResult {
    let collection = collection(db, name)?;
    let query = parse_query(query)?;
    let found = match (lookup, first) {
        (Some((field, value)), false) => {
            collection.find_by_index(&field, parse_json(&value)?, &query)?
        }
        (Some((field, value)), true) => collection
            .find_one_by_index(&field, parse_json(&value)?, &query)?
            .into_iter()
            .collect(),
        (None, false) => collection.find(&query)?,
        (None, true) => collection.find_one(&query)?.into_iter().collect(),
    };
    tracing::debug!(collection = name, found = found.len(), "find finished");
    if first {
        return print_json(out, &found.into_iter().next().unwrap_or(Value::Null));
    }
    print_json(out, &Value::Array(found))
}

/// Merges `fields` into the matching documents and prints the count.
pub fn update(
    db: &Database,
    name: &str,
    query: &str,
    fields: &str,
    out: &mut impl Write,
) -> CommandResult {
    let collection = collection(db, name)?;
    let count = collection.update(&parse_query(query)?, parse_json(fields)?)?;
    let count = i64::try_from(count)?;
    print_json(out, &Value::object([("updated", Value::from(count))]))
}

/// Replaces the document stored under `key`.
pub fn replace(db: &Database, name: &str, key: &str, document: &str) -> CommandResult {
    collection(db, name)?.replace(parse_key(key)?, parse_json(document)?)?;
    Ok(())
}

/// Deletes the document stored under `key`.
pub fn delete(db: &Database, name: &str, key: &str) -> CommandResult {
    collection(db, name)?.delete(parse_key(key)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::collections::{self, CreateSpec};
    use super::*;
    use tempfile::TempDir;

    fn run(f: impl FnOnce(&mut Vec<u8>) -> CommandResult) -> serde_json::Value {
        let mut out = Vec::new();
        f(&mut out).unwrap();
        serde_json::from_slice(&out).unwrap()
    }

    #[test]
    fn commands_round_trip_through_a_directory() {
        let dir = TempDir::new().unwrap();
        {
            let db = super::super::open(dir.path(), "cli").unwrap();
            let spec = CreateSpec {
                name: "people".into(),
                indexes: vec!["team".into()],
                ..CreateSpec::default()
            };
            run(|out| collections::create(&db, spec, out));
            let keys = run(|out| {
                insert(
                    &db,
                    "people",
                    r#"[{"name": "ada", "team": "red"}, {"name": "bob", "team": "blue"}]"#,
                    out,
                )
            });
            assert_eq!(keys, serde_json::json!([1, 2]));
            let updated = run(|out| {
                update(&db, "people", r#"{"name": {"$regex": "^B", "$flags": "i"}}"#, r#"{"team": "red"}"#, out)
            });
            assert_eq!(updated, serde_json::json!({"updated": 1}));
            replace(&db, "people", "1", r#"{"name": "ada l."}"#).unwrap();
        }

        let db = super::super::open(dir.path(), "cli").unwrap();
        let names = run(|out| collections::list(&db, out));
        assert_eq!(names, serde_json::json!(["people"]));
        let red = run(|out| {
            find(&db, "people", "{}", Some(("team".into(), "\"red\"".into())), false, out)
        });
        assert_eq!(red, serde_json::json!([{"_id": 2, "name": "bob", "team": "red"}]));
        let ada = run(|out| find(&db, "people", r#"{"_id": 1}"#, None, true, out));
        assert_eq!(ada, serde_json::json!({"_id": 1, "name": "ada l."}));

        delete(&db, "people", "2").unwrap();
        let rest = run(|out| find(&db, "people", "{}", None, false, out));
        assert_eq!(rest.as_array().map(Vec::len), Some(1));

        collections::drop(&db, "people").unwrap();
        assert!(find(&db, "people", "{}", None, false, &mut Vec::new()).is_err());
    }
}
