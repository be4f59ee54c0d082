//! Collection handles.

use crate::config::IndexOptions;
use crate::database::Shared;
use crate::envelope;
use crate::error::{CoreError, CoreResult};
use crate::query::{compile, Query};
use crate::scanner::{self, Collect, ScanSource};
use crate::schema::{CollectionSchema, SchemaRegistry};
use crate::types::Timestamp;
use recollect_codec::{keypath, Value};
use recollect_storage::Key;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A named collection of documents.
///
/// Handles are cheap to clone and share the database they came from. Each
/// operation runs in its own transaction and holds no connection afterwards.
///
/// Queries address document fields by keypath; `$meta.created` and
/// `$meta.modified` reach the record metadata.
///
/// # Example
///
/// ```rust
/// use recollect_core::{CollectionOptions, Condition, Database, MemoryEngine, Query, Value};
/// use std::sync::Arc;
///
/// let db = Database::open(Arc::new(MemoryEngine::new()), "app")?.initialize()?;
/// let people = db.create_collection(CollectionOptions::new("people"))?;
///
/// people.insert_one(Value::object([("name", Value::from("a"))]))?;
/// people.insert_one(Value::object([("name", Value::from("b"))]))?;
///
/// let others = people.find(&Query::new().field("name", Condition::new().neq("a")))?;
/// assert_eq!(others.len(), 1);
/// # Ok::<(), recollect_core::CoreError>(())
/// ```
#[derive(Clone)]
pub struct Collection {
    schema: Arc<CollectionSchema>,
    shared: Arc<Shared>,
}

impl Collection {
    pub(crate) fn new(schema: Arc<CollectionSchema>, shared: Arc<Shared>) -> Self {
        Self { schema, shared }
    }

    /// Collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// Keypath of the primary key inside documents.
    #[must_use]
    pub fn key_field(&self) -> &str {
        &self.schema.key_field
    }

    /// Whether keys are generated on insert.
    #[must_use]
    pub fn auto_key(&self) -> bool {
        self.schema.auto_key
    }

    /// Declared indexes by field.
    #[must_use]
    pub fn indexes(&self) -> &BTreeMap<String, IndexOptions> {
        &self.schema.indexes
    }

    /// The registry definition of this collection.
    #[must_use]
    pub fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    fn scan(
        &self,
        query: &Query,
        source: ScanSource<'_>,
        mode: Collect,
    ) -> CoreResult<Vec<Value>> {
        let predicate = compile(&envelope::map_query_keys(query.clone()))?;
        let store = self.name();
        let records = self.shared.coordinator.read(&[store], |txn| {
            scanner::collect(txn, store, source, &predicate, mode)
        })?;
        Ok(records.into_iter().map(envelope::unwrap).collect())
    }

    fn index_source<'f>(
        &self,
        field: &str,
        value: Value,
        index: &'f str,
    ) -> CoreResult<ScanSource<'f>> {
        if !self.schema.indexes.contains_key(field) {
            return Err(CoreError::invalid_argument(format!(
                "'{field}' is not indexed in '{}'",
                self.name()
            )));
        }
        let value = Key::from_value(&value)
            .map_err(|e| CoreError::invalid_argument(format!("bad index value: {e}")))?;
        Ok(ScanSource::Index { name: index, value })
    }

    /// Every document matching `query`, in key order.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidArgument`] if the query does not compile
    /// - [`CoreError::Cursor`] if the scan fails
    /// - [`CoreError::Predicate`] if a `$fnUnsafe` function fails
    pub fn find(&self, query: &Query) -> CoreResult<Vec<Value>> {
        self.scan(query, ScanSource::Primary, Collect::All)
    }

    /// The first document matching `query`, in key order.
    ///
    /// # Errors
    ///
    /// As [`Collection::find`].
    pub fn find_one(&self, query: &Query) -> CoreResult<Option<Value>> {
        Ok(self
            .scan(query, ScanSource::Primary, Collect::First)?
            .into_iter()
            .next())
    }

    /// Documents whose indexed `field` equals `value` and that match `query`.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidArgument`] if `field` has no index or `value`
    /// cannot be an index key; otherwise as [`Collection::find`].
    pub fn find_by_index(
        &self,
        field: &str,
        value: impl Into<Value>,
        query: &Query,
    ) -> CoreResult<Vec<Value>> {
        let index = CollectionSchema::index_name(field);
        let source = self.index_source(field, value.into(), &index)?;
        self.scan(query, source, Collect::All)
    }

    /// The first document found through an index.
    ///
    /// # Errors
    ///
    /// As [`Collection::find_by_index`].
    pub fn find_one_by_index(
        &self,
        field: &str,
        value: impl Into<Value>,
        query: &Query,
    ) -> CoreResult<Option<Value>> {
        let index = CollectionSchema::index_name(field);
        let source = self.index_source(field, value.into(), &index)?;
        Ok(self.scan(query, source, Collect::First)?.into_iter().next())
    }

    /// Checks that a new document fits the key policy.
    fn check_new(&self, document: &Value) -> CoreResult<()> {
        if !document.is_map() {
            return Err(CoreError::invalid_argument(format!(
                "documents must be maps, got {}",
                document.type_name()
            )));
        }
        let key = keypath::get(document, &self.schema.document_key_path());
        match (self.schema.auto_key, key) {
            (true, Some(_)) => Err(CoreError::invalid_argument(format!(
                "'{}' generates keys; documents cannot contain '{}'",
                self.name(),
                self.key_field()
            ))),
            (false, None) => Err(CoreError::invalid_argument(format!(
                "documents in '{}' must contain '{}'",
                self.name(),
                self.key_field()
            ))),
            (false, Some(key)) => Key::from_value(key).map(|_| ()).map_err(|e| {
                CoreError::invalid_argument(format!("bad '{}' value: {e}", self.key_field()))
            }),
            (true, None) => Ok(()),
        }
    }

    fn add_all(&self, documents: Vec<Value>) -> CoreResult<Vec<Key>> {
        let now = Timestamp::now();
        let store = self.name();
        self.shared.coordinator.write(&[store], |txn| {
            documents
                .into_iter()
                .map(|document| {
                    txn.add(store, envelope::wrap(document, now)).map_err(|e| {
                        CoreError::transaction(format!("insert into '{store}' failed"), e)
                    })
                })
                .collect()
        })
    }

    /// Inserts one document. Returns its key.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidArgument`] if `document` is not a map, carries a
    ///   key in an auto-key collection, or lacks one otherwise
    /// - [`CoreError::Transaction`] if the key or a unique index is taken
    pub fn insert_one(&self, document: Value) -> CoreResult<Key> {
        self.check_new(&document)?;
        let mut keys = self.add_all(vec![document])?;
        keys.pop().ok_or_else(|| CoreError::Transaction {
            message: format!("insert into '{}' returned no key", self.name()),
            source: None,
        })
    }

    /// Inserts documents in one transaction. Returns their keys in order.
    ///
    /// Either every document is stored or none is.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidArgument`] if `documents` is empty or any document
    /// fails the checks of [`Collection::insert_one`]; otherwise as
    /// [`Collection::insert_one`].
    pub fn insert_many(&self, documents: Vec<Value>) -> CoreResult<Vec<Key>> {
        if documents.is_empty() {
            return Err(CoreError::invalid_argument(
                "insert_many needs at least one document",
            ));
        }
        for document in &documents {
            self.check_new(document)?;
        }
        self.add_all(documents)
    }

    /// Merges `partial` into every document matching `query`. Returns how
    /// many documents changed.
    ///
    /// Top-level fields of `partial` replace the same fields of each match.
    /// The key field never changes.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidArgument`] if `partial` is not a map or the query
    /// does not compile; otherwise as [`Collection::find`].
    pub fn update(&self, query: &Query, partial: Value) -> CoreResult<usize> {
        if !partial.is_map() {
            return Err(CoreError::invalid_argument(format!(
                "update needs a map, got {}",
                partial.type_name()
            )));
        }
        let predicate = compile(&envelope::map_query_keys(query.clone()))?;
        let update = envelope::wrap_update(partial, Timestamp::now());
        let key_path = self.schema.key_path();
        let store = self.name();
        let count = self.shared.coordinator.write(&[store], |txn| {
            scanner::merge_update(txn, store, &predicate, &update, &key_path)
        })?;
        tracing::debug!(collection = store, count, "documents updated");
        Ok(count)
    }

    /// Replaces the document stored under `key`, keeping its key and
    /// creation time.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidArgument`] if `document` is not a map
    /// - [`CoreError::ObjectNotFound`] if nothing is stored under `key`
    pub fn replace(&self, key: impl Into<Key>, document: Value) -> CoreResult<()> {
        if !document.is_map() {
            return Err(CoreError::invalid_argument(format!(
                "replace needs a map, got {}",
                document.type_name()
            )));
        }
        let key = key.into();
        let key_path = self.schema.key_path();
        let now = Timestamp::now();
        let store = self.name();
        self.shared.coordinator.write(&[store], |txn| {
            scanner::replace(txn, store, &key, &key_path, |existing| {
                envelope::replacement(existing, document, now)
            })
        })
    }

    /// Deletes the document stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transaction`] if the deletion fails.
    pub fn delete(&self, key: impl Into<Key>) -> CoreResult<()> {
        let store = self.name();
        let keys = [key.into()];
        self.shared
            .coordinator
            .write(&[store], |txn| scanner::delete_keys(txn, store, &keys))
    }

    /// Deletes the collection, its documents and its registry entry.
    ///
    /// The name can be reused afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Connection`] if the store cannot be removed and
    /// [`CoreError::Transaction`] if the registry entry cannot.
    pub fn drop(self) -> CoreResult<()> {
        let name = self.name();
        self.shared.coordinator.drop_store(name)?;
        SchemaRegistry::new(&self.shared.coordinator, &self.shared.config.registry_store)
            .unregister(name)?;
        self.shared.collections.write().remove(name);
        tracing::debug!(collection = name, "collection dropped");
        Ok(())
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.schema.name)
            .field("key_field", &self.schema.key_field)
            .field("auto_key", &self.schema.auto_key)
            .finish_non_exhaustive()
    }
}
