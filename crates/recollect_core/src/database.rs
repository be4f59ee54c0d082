//! Database handle.

use crate::collection::Collection;
use crate::config::{CollectionOptions, Config};
use crate::coordinator::TransactionCoordinator;
use crate::error::{CoreError, CoreResult};
use crate::schema::{CollectionSchema, SchemaRegistry};
use crate::types::Timestamp;
use parking_lot::RwLock;
use recollect_storage::StorageEngine;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// State shared by a database handle and its collections.
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) coordinator: TransactionCoordinator,
    /// Collections attached to this handle.
    pub(crate) collections: RwLock<BTreeMap<String, Arc<CollectionSchema>>>,
}

impl Shared {
    fn registry(&self) -> SchemaRegistry<'_> {
        SchemaRegistry::new(&self.coordinator, &self.config.registry_store)
    }

    /// Adds a collection to the in-process cache.
    fn attach(&self, schema: CollectionSchema) -> CoreResult<Arc<CollectionSchema>> {
        let mut collections = self.collections.write();
        if collections.contains_key(&schema.name) {
            return Err(CoreError::initialization(format!(
                "collection '{}' is already attached to this handle",
                schema.name
            )));
        }
        let schema = Arc::new(schema);
        collections.insert(schema.name.clone(), Arc::clone(&schema));
        Ok(schema)
    }
}

/// The main database handle.
///
/// `Database` names one database of a [`StorageEngine`] and keeps the set of
/// collections it knows about. It holds no engine connection between
/// operations.
///
/// # Opening a Database
///
/// ```rust
/// use recollect_core::{CollectionOptions, Database, MemoryEngine};
/// use std::sync::Arc;
///
/// let engine = Arc::new(MemoryEngine::new());
/// let db = Database::open(engine.clone(), "app")?.initialize()?;
/// db.create_collection(CollectionOptions::new("notes"))?;
///
/// // a second handle rebuilds its collections from the registry
/// let again = Database::open(engine, "app")?.initialize()?;
/// assert_eq!(again.collection_names(), vec!["notes".to_string()]);
/// # Ok::<(), recollect_core::CoreError>(())
/// ```
pub struct Database {
    name: String,
    shared: Arc<Shared>,
}

impl Database {
    /// Creates a handle on database `name` with the default [`Config`].
    ///
    /// No engine work happens until [`Database::initialize`] or
    /// [`Database::create_collection`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if `name` is empty.
    pub fn open(engine: Arc<dyn StorageEngine>, name: &str) -> CoreResult<Self> {
        Self::open_with_config(engine, name, Config::default())
    }

    /// Creates a handle with a custom configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if `name`, the default key
    /// field or the registry store name is empty.
    pub fn open_with_config(
        engine: Arc<dyn StorageEngine>,
        name: &str,
        config: Config,
    ) -> CoreResult<Self> {
        if name.is_empty() {
            return Err(CoreError::invalid_argument("database name is required"));
        }
        if config.key_field.is_empty() {
            return Err(CoreError::invalid_argument("default key field is empty"));
        }
        if config.registry_store.is_empty() {
            return Err(CoreError::invalid_argument("registry store name is empty"));
        }
        Ok(Self {
            name: name.to_string(),
            shared: Arc::new(Shared {
                config,
                coordinator: TransactionCoordinator::new(engine, name),
                collections: RwLock::new(BTreeMap::new()),
            }),
        })
    }

    /// Database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration of this handle.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// The coordinator running this handle's transactions.
    #[must_use]
    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.shared.coordinator
    }

    /// Creates the registry if missing and attaches every registered
    /// collection.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Initialization`] if a registered collection is already
    ///   attached, for example on a second call
    /// - [`CoreError::Connection`] or [`CoreError::Cursor`] on engine failures
    pub fn initialize(self) -> CoreResult<Self> {
        let registry = self.shared.registry();
        registry.ensure()?;
        let schemas = registry.list()?;
        let mut attached = 0usize;
        for schema in schemas {
            if schema.name == registry.store() {
                continue;
            }
            self.shared.attach(schema)?;
            attached += 1;
        }
        tracing::debug!(db = %self.name, attached, "database initialized");
        Ok(self)
    }

    /// Creates a collection, its store and indexes, and its registry entry.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidArgument`] if the name is missing, reserved or
    ///   taken, or the key field or an index field is empty
    /// - [`CoreError::Connection`] if the store cannot be created
    /// - [`CoreError::Transaction`] if the registry already has the name
    pub fn create_collection(&self, options: CollectionOptions) -> CoreResult<Collection> {
        let config = &self.shared.config;
        if options.name.is_empty() {
            return Err(CoreError::invalid_argument("collection name is required"));
        }
        if options.name == config.registry_store {
            return Err(CoreError::invalid_argument(format!(
                "'{}' is reserved",
                options.name
            )));
        }
        if self.shared.collections.read().contains_key(&options.name) {
            return Err(CoreError::invalid_argument(format!(
                "collection '{}' already exists",
                options.name
            )));
        }
        let key_field = options
            .key_field
            .unwrap_or_else(|| config.key_field.clone());
        if key_field.is_empty() {
            return Err(CoreError::invalid_argument("key field is empty"));
        }
        if options.indexes.keys().any(String::is_empty) {
            return Err(CoreError::invalid_argument("index field is empty"));
        }

        let schema = CollectionSchema {
            name: options.name,
            key_field,
            auto_key: options.auto_key.unwrap_or(config.auto_key),
            indexes: options.indexes,
            created: Timestamp::now(),
        };

        let registry = self.shared.registry();
        registry.ensure()?;
        self.shared.coordinator.ensure_store(
            &schema.name,
            &schema.store_params(),
            &schema.index_params(),
        )?;
        registry.register(&schema)?;
        let schema = self.shared.attach(schema)?;
        tracing::debug!(db = %self.name, collection = %schema.name, "collection created");
        Ok(Collection::new(schema, Arc::clone(&self.shared)))
    }

    /// The attached collection called `name`.
    #[must_use]
    pub fn collection(&self, name: &str) -> Option<Collection> {
        self.shared
            .collections
            .read()
            .get(name)
            .map(|schema| Collection::new(Arc::clone(schema), Arc::clone(&self.shared)))
    }

    /// Names of the attached collections, sorted.
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        self.shared.collections.read().keys().cloned().collect()
    }

    /// Deletes the whole database.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Connection`] if the engine refuses, for example
    /// while another connection is open.
    pub fn drop(self) -> CoreResult<()> {
        self.shared.coordinator.delete_database()?;
        self.shared.collections.write().clear();
        Ok(())
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("collections", &self.collection_names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recollect_storage::MemoryEngine;

    fn open() -> (MemoryEngine, Database) {
        let engine = MemoryEngine::new();
        let db = Database::open(Arc::new(engine.clone()), "test")
            .unwrap()
            .initialize()
            .unwrap();
        (engine, db)
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = Database::open(Arc::new(MemoryEngine::new()), "").unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn initialize_creates_registry() {
        let (engine, db) = open();
        assert_eq!(db.coordinator().store_names().unwrap(), vec!["_config"]);
        assert!(db.collection_names().is_empty());
        assert_eq!(engine.stats().open_connections(), 0);
    }

    #[test]
    fn reinitialize_with_attached_collections_fails() {
        let (_engine, db) = open();
        db.create_collection(CollectionOptions::new("people")).unwrap();
        let err = db.initialize().unwrap_err();
        assert!(matches!(err, CoreError::Initialization { .. }));
    }

    #[test]
    fn create_collection_validation() {
        let (_engine, db) = open();
        let invalid = [
            CollectionOptions::new(""),
            CollectionOptions::new("_config"),
            CollectionOptions::new("x").key_field(""),
            CollectionOptions::new("x").index("", crate::IndexOptions::new()),
        ];
        for options in invalid {
            assert!(matches!(
                db.create_collection(options),
                Err(CoreError::InvalidArgument { .. })
            ));
        }
        db.create_collection(CollectionOptions::new("x")).unwrap();
        assert!(matches!(
            db.create_collection(CollectionOptions::new("x")),
            Err(CoreError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn defaults_come_from_config() {
        let engine = Arc::new(MemoryEngine::new());
        let config = Config::new().key_field("id").auto_key(false);
        let db = Database::open_with_config(engine, "cfg", config)
            .unwrap()
            .initialize()
            .unwrap();
        let people = db.create_collection(CollectionOptions::new("people")).unwrap();
        assert_eq!(people.key_field(), "id");
        assert!(!people.auto_key());
    }

    #[test]
    fn drop_deletes_everything() {
        let (engine, db) = open();
        db.create_collection(CollectionOptions::new("people")).unwrap();
        db.drop().unwrap();
        assert!(engine.database_names().unwrap().is_empty());
    }
}
