//! The collection registry.
//!
//! Each database keeps one reserved store (`_config` by default) holding a
//! record per live collection:
//!
//! ```text
//! { osName, keyPath, autoIncrement, indexes: { "$data.<field>": { unique, multiEntry } },
//!   created, lastSynced: null }
//! ```
//!
//! The registry is read on [`crate::Database::initialize`] to rebuild the
//! set of collections.

use crate::config::IndexOptions;
use crate::coordinator::TransactionCoordinator;
use crate::envelope::{self, DATA_ROOT};
use crate::error::{CoreError, CoreResult};
use crate::query::Predicate;
use crate::scanner::{self, Collect, ScanSource};
use crate::types::Timestamp;
use recollect_codec::{Keypath, Value};
use recollect_storage::{IndexParams, Key, StoreParams};
use std::collections::BTreeMap;

const NAME: &str = "osName";
const KEY_PATH: &str = "keyPath";
const AUTO_INCREMENT: &str = "autoIncrement";
const INDEXES: &str = "indexes";
const UNIQUE: &str = "unique";
const MULTI_ENTRY: &str = "multiEntry";
const CREATED: &str = "created";
const LAST_SYNCED: &str = "lastSynced";

/// Definition of one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
    /// Collection name; also the store name.
    pub name: String,
    /// Keypath of the primary key inside each document.
    pub key_field: String,
    /// Whether keys are generated on insert.
    pub auto_key: bool,
    /// Indexed field keypath to index options.
    pub indexes: BTreeMap<String, IndexOptions>,
    /// When the collection was created.
    pub created: Timestamp,
}

impl CollectionSchema {
    /// Physical index name for a document field.
    #[must_use]
    pub fn index_name(field: &str) -> String {
        envelope::physical_path(field)
    }

    /// Where the primary key lives in a stored record.
    #[must_use]
    pub fn key_path(&self) -> Keypath {
        envelope::data_keypath(&self.key_field)
    }

    /// Where the primary key lives in a caller's document.
    #[must_use]
    pub fn document_key_path(&self) -> Keypath {
        Keypath::parse(&self.key_field)
    }

    /// Engine parameters of the backing store.
    #[must_use]
    pub fn store_params(&self) -> StoreParams {
        StoreParams {
            key_path: Some(self.key_path()),
            auto_increment: self.auto_key,
        }
    }

    /// Engine parameters of every index, by physical name.
    #[must_use]
    pub fn index_params(&self) -> Vec<(String, IndexParams)> {
        self.indexes
            .iter()
            .map(|(field, options)| {
                (
                    Self::index_name(field),
                    IndexParams {
                        key_path: envelope::data_keypath(field),
                        unique: options.unique,
                        multi_entry: options.multi_entry,
                    },
                )
            })
            .collect()
    }

    /// The registry record for this collection.
    #[must_use]
    pub fn to_record(&self) -> Value {
        let indexes = self
            .indexes
            .iter()
            .map(|(field, options)| {
                (
                    Value::from(Self::index_name(field)),
                    Value::object([
                        (UNIQUE, Value::Bool(options.unique)),
                        (MULTI_ENTRY, Value::Bool(options.multi_entry)),
                    ]),
                )
            })
            .collect();
        Value::object([
            (NAME, Value::from(self.name.as_str())),
            (KEY_PATH, Value::from(self.key_field.as_str())),
            (AUTO_INCREMENT, Value::Bool(self.auto_key)),
            (INDEXES, Value::map(indexes)),
            (CREATED, self.created.into()),
            (LAST_SYNCED, Value::Null),
        ])
    }

    /// Reads a registry record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Initialization`] if the record is malformed.
    pub fn from_record(record: &Value) -> CoreResult<Self> {
        let malformed = |what: &str| CoreError::initialization(format!("registry entry {what}"));
        let text = |field: &str| {
            record
                .get(field)
                .and_then(Value::as_text)
                .map(str::to_owned)
                .ok_or_else(|| malformed(&format!("has no text '{field}'")))
        };

        let name = text(NAME)?;
        let key_field = text(KEY_PATH)?;
        let auto_key = record
            .get(AUTO_INCREMENT)
            .and_then(Value::as_bool)
            .ok_or_else(|| malformed(&format!("'{name}' has no '{AUTO_INCREMENT}'")))?;
        let created = Timestamp::from_millis(
            record.get(CREATED).and_then(Value::as_integer).unwrap_or(0),
        );

        let mut indexes = BTreeMap::new();
        if let Some(entries) = record.get(INDEXES).and_then(Value::as_map) {
            for (index, options) in entries {
                let physical = index
                    .as_text()
                    .ok_or_else(|| malformed(&format!("'{name}' has a non-text index name")))?;
                let field = physical
                    .strip_prefix(DATA_ROOT)
                    .and_then(|rest| rest.strip_prefix('.'))
                    .unwrap_or(physical);
                let flag = |key: &str| options.get(key).and_then(Value::as_bool).unwrap_or(false);
                indexes.insert(
                    field.to_string(),
                    IndexOptions {
                        unique: flag(UNIQUE),
                        multi_entry: flag(MULTI_ENTRY),
                    },
                );
            }
        }

        Ok(Self {
            name,
            key_field,
            auto_key,
            indexes,
            created,
        })
    }
}

/// Reads and writes the registry store of one database.
#[derive(Debug, Clone, Copy)]
pub struct SchemaRegistry<'a> {
    coordinator: &'a TransactionCoordinator,
    store: &'a str,
}

impl<'a> SchemaRegistry<'a> {
    /// Creates a registry view over `store`.
    #[must_use]
    pub fn new(coordinator: &'a TransactionCoordinator, store: &'a str) -> Self {
        Self { coordinator, store }
    }

    /// The registry store name.
    #[must_use]
    pub fn store(&self) -> &str {
        self.store
    }

    /// Creates the registry store if it is missing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Connection`] if the database cannot be opened or
    /// upgraded.
    pub fn ensure(&self) -> CoreResult<()> {
        let params = StoreParams {
            key_path: Some(Keypath::parse(NAME)),
            auto_increment: false,
        };
        self.coordinator.ensure_store(self.store, &params, &[])
    }

    /// Every registered collection, in name order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cursor`] if the scan fails and
    /// [`CoreError::Initialization`] on a malformed entry.
    pub fn list(&self) -> CoreResult<Vec<CollectionSchema>> {
        let records = self.coordinator.read(&[self.store], |txn| {
            scanner::collect(
                txn,
                self.store,
                ScanSource::Primary,
                &Predicate::always(),
                Collect::All,
            )
        })?;
        records.iter().map(CollectionSchema::from_record).collect()
    }

    /// Adds the entry for a new collection.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transaction`] if an entry with that name exists.
    pub fn register(&self, schema: &CollectionSchema) -> CoreResult<()> {
        let record = schema.to_record();
        self.coordinator.write(&[self.store], |txn| {
            txn.add(self.store, record).map_err(|e| {
                CoreError::transaction(format!("cannot register '{}'", schema.name), e)
            })
        })?;
        tracing::debug!(collection = %schema.name, "collection registered");
        Ok(())
    }

    /// Removes the entry of a collection. A missing entry is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transaction`] if the deletion fails.
    pub fn unregister(&self, name: &str) -> CoreResult<()> {
        self.coordinator.write(&[self.store], |txn| {
            scanner::delete_keys(txn, self.store, &[Key::from(name)])
        })?;
        tracing::debug!(collection = name, "collection unregistered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recollect_storage::MemoryEngine;
    use std::sync::Arc;

    fn people() -> CollectionSchema {
        CollectionSchema {
            name: "people".to_string(),
            key_field: "_id".to_string(),
            auto_key: true,
            indexes: BTreeMap::from([
                ("age".to_string(), IndexOptions::new()),
                ("tags".to_string(), IndexOptions::new().multi_entry(true)),
            ]),
            created: Timestamp::from_millis(10),
        }
    }

    #[test]
    fn record_layout() {
        let record = people().to_record();
        assert_eq!(record.get(NAME), Some(&Value::from("people")));
        assert_eq!(record.get(KEY_PATH), Some(&Value::from("_id")));
        assert_eq!(record.get(LAST_SYNCED), Some(&Value::Null));
        let indexes = record.get(INDEXES).unwrap();
        assert!(indexes.get("$data.age").is_some());
        assert_eq!(
            indexes.get("$data.tags").unwrap().get(MULTI_ENTRY),
            Some(&Value::Bool(true))
        );
    }

    #[test]
    fn record_roundtrip() {
        let schema = people();
        assert_eq!(CollectionSchema::from_record(&schema.to_record()).unwrap(), schema);
    }

    #[test]
    fn malformed_record_is_initialization_error() {
        let err = CollectionSchema::from_record(&Value::object([(NAME, Value::from(1))]))
            .unwrap_err();
        assert!(matches!(err, CoreError::Initialization { .. }));
    }

    #[test]
    fn physical_paths() {
        let schema = people();
        assert_eq!(schema.key_path().encode(), "$data._id");
        let params = schema.index_params();
        assert_eq!(params[0].0, "$data.age");
        assert_eq!(params[0].1.key_path.encode(), "$data.age");
        assert!(params[1].1.multi_entry);
    }

    #[test]
    fn register_list_unregister() {
        let engine = MemoryEngine::new();
        let coordinator = TransactionCoordinator::new(Arc::new(engine.clone()), "reg");
        let registry = SchemaRegistry::new(&coordinator, "_config");
        registry.ensure().unwrap();
        assert!(registry.list().unwrap().is_empty());

        registry.register(&people()).unwrap();
        assert!(matches!(
            registry.register(&people()),
            Err(CoreError::Transaction { .. })
        ));
        assert_eq!(registry.list().unwrap(), vec![people()]);

        registry.unregister("people").unwrap();
        registry.unregister("people").unwrap();
        assert!(registry.list().unwrap().is_empty());
        assert_eq!(engine.stats().open_connections(), 0);
    }
}
