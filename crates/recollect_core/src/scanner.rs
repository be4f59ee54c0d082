//! Cursor-driven scans over one store.
//!
//! Every scan walks a single forward cursor. Reads filter with a compiled
//! [`Predicate`]; writes go back through the cursor that found the record.
//! A cursor failure ends the scan with [`CoreError::Cursor`].

use crate::envelope;
use crate::error::{CoreError, CoreResult};
use crate::query::Predicate;
use recollect_codec::{keypath, Keypath, Value};
use recollect_storage::{Cursor, CursorEntry, Key, KeyRange, Transaction};

/// Where a scan takes its records from.
#[derive(Debug, Clone)]
pub enum ScanSource<'a> {
    /// Every record, in ascending primary-key order.
    Primary,
    /// Records whose index value equals `value`, in primary-key order.
    Index {
        /// Physical index name.
        name: &'a str,
        /// Exact index key.
        value: Key,
    },
}

/// How many matches a read scan collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collect {
    /// Every match.
    All,
    /// The first match; the cursor is not advanced past it.
    First,
}

fn open<'t>(
    txn: &'t mut (dyn Transaction + '_),
    store: &str,
    source: ScanSource<'_>,
) -> CoreResult<Box<dyn Cursor + 't>> {
    match source {
        ScanSource::Primary => txn.open_cursor(store, KeyRange::all()),
        ScanSource::Index { name, value } => {
            txn.open_index_cursor(store, name, KeyRange::only(value))
        }
    }
    .map_err(|e| CoreError::cursor(format!("cannot open cursor on '{store}'"), e))
}

fn step(cursor: &mut (dyn Cursor + '_), store: &str) -> CoreResult<Option<CursorEntry>> {
    cursor
        .next()
        .map_err(|e| CoreError::cursor(format!("scan of '{store}' failed"), e))
}

/// Collects the stored records that satisfy `predicate`.
///
/// # Errors
///
/// Returns [`CoreError::Cursor`] if the cursor fails and
/// [`CoreError::Predicate`] if a `$fnUnsafe` function fails.
pub fn collect(
    txn: &mut (dyn Transaction + '_),
    store: &str,
    source: ScanSource<'_>,
    predicate: &Predicate,
    mode: Collect,
) -> CoreResult<Vec<Value>> {
    let mut cursor = open(txn, store, source)?;
    let mut found = Vec::new();
    let mut visited = 0usize;
    while let Some(entry) = step(cursor.as_mut(), store)? {
        visited += 1;
        if predicate.matches(&entry.value)? {
            found.push(entry.value);
            if mode == Collect::First {
                break;
            }
        }
    }
    tracing::trace!(store, visited, matched = found.len(), ?mode, "scan finished");
    Ok(found)
}

/// Merges `update` into every matching record. Returns how many changed.
///
/// Whatever the update says, each record keeps the key it had at
/// `key_path`.
///
/// # Errors
///
/// Returns [`CoreError::Cursor`] if the cursor fails or rejects a write.
pub fn merge_update(
    txn: &mut (dyn Transaction + '_),
    store: &str,
    predicate: &Predicate,
    update: &Value,
    key_path: &Keypath,
) -> CoreResult<usize> {
    let mut cursor = open(txn, store, ScanSource::Primary)?;
    let mut updated = 0usize;
    while let Some(entry) = step(cursor.as_mut(), store)? {
        if !predicate.matches(&entry.value)? {
            continue;
        }
        let mut record = entry.value;
        let key = keypath::get(&record, key_path).cloned();
        envelope::merge(&mut record, update);
        if let Some(key) = key {
            keypath::set(&mut record, key_path, key).map_err(|e| {
                CoreError::cursor(format!("cannot restore key in '{store}'"), e)
            })?;
        }
        cursor
            .update(record)
            .map_err(|e| CoreError::cursor(format!("update in '{store}' failed"), e))?;
        updated += 1;
    }
    tracing::trace!(store, updated, "merge update finished");
    Ok(updated)
}

/// Replaces the record stored under `key` with `build(existing)`, carrying
/// the existing key value over at `key_path`.
///
/// # Errors
///
/// Returns [`CoreError::ObjectNotFound`] if no record has `key`,
/// [`CoreError::InvalidArgument`] if the key cannot be placed in the new
/// record, and [`CoreError::Cursor`] on cursor failures.
pub fn replace<F>(
    txn: &mut (dyn Transaction + '_),
    store: &str,
    key: &Key,
    key_path: &Keypath,
    build: F,
) -> CoreResult<()>
where
    F: FnOnce(&Value) -> Value,
{
    let mut cursor = txn
        .open_cursor(store, KeyRange::only(key.clone()))
        .map_err(|e| CoreError::cursor(format!("cannot open cursor on '{store}'"), e))?;
    let Some(entry) = step(cursor.as_mut(), store)? else {
        return Err(CoreError::object_not_found(format!(
            "no record with key {key:?} in '{store}'"
        )));
    };

    let mut record = build(&entry.value);
    if let Some(existing) = keypath::get(&entry.value, key_path) {
        keypath::set(&mut record, key_path, existing.clone()).map_err(|e| {
            CoreError::invalid_argument(format!("replacement cannot hold key: {e}"))
        })?;
    }
    cursor
        .update(record)
        .map_err(|e| CoreError::cursor(format!("replace in '{store}' failed"), e))?;
    tracing::trace!(store, ?key, "record replaced");
    Ok(())
}

/// Deletes the records stored under `keys`. Missing keys are ignored.
///
/// # Errors
///
/// Returns [`CoreError::Transaction`] if a deletion fails.
pub fn delete_keys(
    txn: &mut (dyn Transaction + '_),
    store: &str,
    keys: &[Key],
) -> CoreResult<()> {
    for key in keys {
        txn.delete(store, key).map_err(|e| {
            CoreError::transaction(format!("delete of {key:?} in '{store}' failed"), e)
        })?;
    }
    tracing::trace!(store, count = keys.len(), "keys deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{wrap, wrap_update};
    use crate::query::{compile, Condition, Query};
    use crate::types::Timestamp;
    use recollect_storage::{
        Connection, IndexParams, MemoryEngine, SchemaEditor, StorageEngine, StorageResult,
        StoreParams, TransactionMode,
    };

    const STORE: &str = "people";

    fn key_path() -> Keypath {
        Keypath::parse("$data._id")
    }

    fn open_people(engine: &MemoryEngine) -> Box<dyn Connection> {
        let mut upgrade = |schema: &mut dyn SchemaEditor| -> StorageResult<()> {
            schema.create_store(
                STORE,
                StoreParams {
                    key_path: Some(key_path()),
                    auto_increment: true,
                },
            )?;
            schema.create_index(
                STORE,
                "$data.team",
                IndexParams {
                    key_path: Keypath::parse("$data.team"),
                    unique: false,
                    multi_entry: false,
                },
            )
        };
        let conn = engine.open("scan", Some(1), Some(&mut upgrade)).unwrap();
        {
            let mut txn = conn.transaction(&[STORE], TransactionMode::ReadWrite).unwrap();
            for (name, team) in [("a", "red"), ("b", "blue"), ("c", "red")] {
                let data = Value::object([("name", Value::from(name)), ("team", Value::from(team))]);
                txn.add(STORE, wrap(data, Timestamp::from_millis(1))).unwrap();
            }
            txn.commit().unwrap();
        }
        conn
    }

    fn names(records: &[Value]) -> Vec<String> {
        records
            .iter()
            .map(|r| {
                r.get("$data")
                    .and_then(|d| d.get("name"))
                    .and_then(Value::as_text)
                    .unwrap()
                    .to_string()
            })
            .collect()
    }

    fn team(name: &str) -> Predicate {
        compile(&Query::new().eq("$data.team", name)).unwrap()
    }

    #[test]
    fn collect_all_and_first() {
        let engine = MemoryEngine::new();
        let conn = open_people(&engine);
        let mut txn = conn.transaction(&[STORE], TransactionMode::ReadOnly).unwrap();

        let all = collect(txn.as_mut(), STORE, ScanSource::Primary, &team("red"), Collect::All)
            .unwrap();
        assert_eq!(names(&all), vec!["a", "c"]);

        let first = collect(txn.as_mut(), STORE, ScanSource::Primary, &team("red"), Collect::First)
            .unwrap();
        assert_eq!(names(&first), vec!["a"]);

        let none = collect(txn.as_mut(), STORE, ScanSource::Primary, &team("green"), Collect::First)
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn index_source_narrows_before_filtering() {
        let engine = MemoryEngine::new();
        let conn = open_people(&engine);
        let mut txn = conn.transaction(&[STORE], TransactionMode::ReadOnly).unwrap();
        let source = ScanSource::Index {
            name: "$data.team",
            value: Key::from("red"),
        };
        let not_a = compile(&Query::new().field("$data.name", Condition::new().neq("a"))).unwrap();
        let found = collect(txn.as_mut(), STORE, source, &not_a, Collect::All).unwrap();
        assert_eq!(names(&found), vec!["c"]);
    }

    #[test]
    fn merge_update_keeps_keys() {
        let engine = MemoryEngine::new();
        let conn = open_people(&engine);
        let mut txn = conn.transaction(&[STORE], TransactionMode::ReadWrite).unwrap();
        let update = wrap_update(
            Value::object([("team", Value::from("green")), ("_id", Value::from(99))]),
            Timestamp::from_millis(2),
        );
        let count = merge_update(txn.as_mut(), STORE, &team("red"), &update, &key_path()).unwrap();
        assert_eq!(count, 2);

        let green = collect(txn.as_mut(), STORE, ScanSource::Primary, &team("green"), Collect::All)
            .unwrap();
        let ids: Vec<_> = green
            .iter()
            .map(|r| keypath::get(r, &key_path()).cloned().unwrap())
            .collect();
        assert_eq!(ids, vec![Value::Integer(1), Value::Integer(3)]);
    }

    #[test]
    fn replace_missing_key_is_not_found() {
        let engine = MemoryEngine::new();
        let conn = open_people(&engine);
        let mut txn = conn.transaction(&[STORE], TransactionMode::ReadWrite).unwrap();
        let err = replace(txn.as_mut(), STORE, &Key::Integer(42), &key_path(), |_| {
            Value::empty_map()
        })
        .unwrap_err();
        assert!(matches!(err, CoreError::ObjectNotFound { .. }));
    }

    #[test]
    fn replace_carries_existing_key() {
        let engine = MemoryEngine::new();
        let conn = open_people(&engine);
        let mut txn = conn.transaction(&[STORE], TransactionMode::ReadWrite).unwrap();
        replace(txn.as_mut(), STORE, &Key::Integer(2), &key_path(), |existing| {
            envelope::replacement(
                existing,
                Value::object([("name", Value::from("z"))]),
                Timestamp::from_millis(3),
            )
        })
        .unwrap();
        let stored = txn.get(STORE, &Key::Integer(2)).unwrap().unwrap();
        assert_eq!(keypath::get(&stored, &key_path()), Some(&Value::Integer(2)));
        assert_eq!(
            keypath::get(&stored, &Keypath::parse("$data.name")),
            Some(&Value::from("z"))
        );
    }

    #[test]
    fn delete_keys_ignores_missing() {
        let engine = MemoryEngine::new();
        let conn = open_people(&engine);
        let mut txn = conn.transaction(&[STORE], TransactionMode::ReadWrite).unwrap();
        delete_keys(txn.as_mut(), STORE, &[Key::Integer(1), Key::Integer(7)]).unwrap();
        let left = collect(
            txn.as_mut(),
            STORE,
            ScanSource::Primary,
            &Predicate::always(),
            Collect::All,
        )
        .unwrap();
        assert_eq!(names(&left), vec!["b", "c"]);
    }

    #[test]
    fn cursor_failure_surfaces_as_cursor_error() {
        let engine = MemoryEngine::new();
        let conn = open_people(&engine);
        engine.fail_next_cursor(1);
        let mut txn = conn.transaction(&[STORE], TransactionMode::ReadOnly).unwrap();
        let err = collect(
            txn.as_mut(),
            STORE,
            ScanSource::Primary,
            &Predicate::always(),
            Collect::All,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Cursor { .. }));
    }
}
