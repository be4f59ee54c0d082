//! Stored record layout.
//!
//! Every document is stored wrapped:
//!
//! ```text
//! { "$data": <document>, "$meta": { "created": <ms>, "modified": <ms> | null } }
//! ```
//!
//! Callers address document fields by their plain keypath; the `$meta.`
//! prefix reaches the metadata instead.

use crate::query::Query;
use crate::types::Timestamp;
use recollect_codec::{Keypath, Value};

/// Root of the caller's document.
pub const DATA_ROOT: &str = "$data";
/// Root of the record metadata.
pub const META_ROOT: &str = "$meta";

const META_PREFIX: &str = "$meta.";
const CREATED: &str = "created";
const MODIFIED: &str = "modified";

/// Wraps a new document, stamping its creation time.
#[must_use]
pub fn wrap(data: Value, now: Timestamp) -> Value {
    Value::object([
        (DATA_ROOT, data),
        (
            META_ROOT,
            Value::object([(CREATED, now.into()), (MODIFIED, Value::Null)]),
        ),
    ])
}

/// Wraps a partial document for a merge update.
#[must_use]
pub fn wrap_update(partial: Value, now: Timestamp) -> Value {
    Value::object([
        (DATA_ROOT, partial),
        (META_ROOT, Value::object([(MODIFIED, now.into())])),
    ])
}

/// Builds the record that replaces `existing`, keeping its creation time.
#[must_use]
pub fn replacement(existing: &Value, data: Value, now: Timestamp) -> Value {
    let created = existing
        .get(META_ROOT)
        .and_then(|meta| meta.get(CREATED))
        .cloned()
        .unwrap_or_else(|| now.into());
    Value::object([
        (DATA_ROOT, data),
        (
            META_ROOT,
            Value::object([(CREATED, created), (MODIFIED, now.into())]),
        ),
    ])
}

/// Merges a [`wrap_update`] envelope into `record`.
///
/// Each root section is merged one level deep: a field of the partial
/// replaces the field of the same name, other fields stay.
pub fn merge(record: &mut Value, update: &Value) {
    let Some(sections) = update.as_map() else {
        return;
    };
    for (root, section) in sections {
        let Some(root) = root.as_text() else {
            continue;
        };
        let merged = match (record.get_mut(root), section.as_map()) {
            (Some(target @ Value::Map(_)), Some(fields)) => {
                for (field, value) in fields {
                    if let Some(field) = field.as_text() {
                        target.insert(field, value.clone());
                    }
                }
                true
            }
            _ => false,
        };
        if !merged {
            record.insert(root, section.clone());
        }
    }
}

/// Extracts the caller's document from a stored record.
#[must_use]
pub fn unwrap(record: Value) -> Value {
    match record {
        Value::Map(pairs) => pairs
            .into_iter()
            .find(|(k, _)| k.as_text() == Some(DATA_ROOT))
            .map_or(Value::Null, |(_, data)| data),
        _ => Value::Null,
    }
}

/// Rewrites a caller keypath to its stored location.
#[must_use]
pub fn physical_path(path: &str) -> String {
    if path.starts_with(META_PREFIX) {
        path.to_string()
    } else {
        format!("{DATA_ROOT}.{path}")
    }
}

/// Parsed stored location of a document field.
#[must_use]
pub fn data_keypath(field: &str) -> Keypath {
    Keypath::parse(field).prefixed(DATA_ROOT)
}

/// Rewrites every keypath of `query` to its stored location.
#[must_use]
pub fn map_query_keys(query: Query) -> Query {
    query.map_paths(physical_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn person(name: &str) -> Value {
        Value::object([("name", Value::from(name)), ("age", Value::from(30))])
    }

    #[test]
    fn wrap_and_unwrap() {
        let record = wrap(person("ada"), ts(5));
        assert_eq!(
            record.get(META_ROOT).unwrap().get(CREATED),
            Some(&Value::Integer(5))
        );
        assert_eq!(
            record.get(META_ROOT).unwrap().get(MODIFIED),
            Some(&Value::Null)
        );
        assert_eq!(unwrap(record), person("ada"));
        assert_eq!(unwrap(Value::from(1)), Value::Null);
    }

    #[test]
    fn merge_is_one_level_deep() {
        let mut record = wrap(person("ada"), ts(5));
        let update = wrap_update(Value::object([("name", Value::from("grace"))]), ts(9));
        merge(&mut record, &update);

        let data = record.get(DATA_ROOT).unwrap();
        assert_eq!(data.get("name"), Some(&Value::from("grace")));
        assert_eq!(data.get("age"), Some(&Value::from(30)));
        let meta = record.get(META_ROOT).unwrap();
        assert_eq!(meta.get(CREATED), Some(&Value::Integer(5)));
        assert_eq!(meta.get(MODIFIED), Some(&Value::Integer(9)));
    }

    #[test]
    fn merge_replaces_nested_fields_whole() {
        let mut record = wrap(
            Value::object([(
                "address",
                Value::object([("city", Value::from("x")), ("zip", Value::from(1))]),
            )]),
            ts(1),
        );
        let update = wrap_update(
            Value::object([("address", Value::object([("city", Value::from("y"))]))]),
            ts(2),
        );
        merge(&mut record, &update);
        let address = record.get(DATA_ROOT).unwrap().get("address").unwrap();
        assert_eq!(address.get("city"), Some(&Value::from("y")));
        assert_eq!(address.get("zip"), None);
    }

    #[test]
    fn replacement_keeps_created() {
        let existing = wrap(person("ada"), ts(5));
        let record = replacement(&existing, person("grace"), ts(8));
        let meta = record.get(META_ROOT).unwrap();
        assert_eq!(meta.get(CREATED), Some(&Value::Integer(5)));
        assert_eq!(meta.get(MODIFIED), Some(&Value::Integer(8)));
        assert_eq!(unwrap(record), person("grace"));
    }

    #[test]
    fn query_keys_move_under_data() {
        let query = map_query_keys(
            Query::new()
                .eq("name", "ada")
                .eq("$meta.created", 5)
                .eq("a\\.b", 1),
        );
        let paths: Vec<&str> = query.fields().iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["$data.name", "$meta.created", "$data.a\\.b"]);
        assert_eq!(
            Keypath::parse(paths[2]).segments(),
            &["$data".to_string(), "a.b".to_string()]
        );
    }

    #[test]
    fn data_keypath_prefixes() {
        assert_eq!(data_keypath("_id").encode(), "$data._id");
        assert_eq!(data_keypath("a.b").segments().len(), 3);
    }
}
