//! Storage engine traits.
//!
//! The engine is a versioned, ordered object store:
//!
//! - [`StorageEngine`] opens named databases and deletes them
//! - [`Connection`] is one open handle on a database at a given version
//! - [`SchemaEditor`] changes stores and indexes during a version upgrade
//! - [`Transaction`] reads and writes records inside a scope of stores
//! - [`Cursor`] walks records in key order and can rewrite or remove them
//!
//! All traits are object-safe so the document layer can run against any
//! engine through `Arc<dyn StorageEngine>`.

use crate::error::StorageResult;
use crate::key::{Key, KeyRange};
use recollect_codec::{Keypath, Value};

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Reads only; writes fail with [`crate::StorageError::ReadOnly`].
    ReadOnly,
    /// Reads and writes. Read-write transactions on one database are
    /// serialized.
    ReadWrite,
}

/// Parameters of an object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreParams {
    /// Where the primary key lives inside each record. `None` means keys are
    /// kept out of line and must be generated.
    pub key_path: Option<Keypath>,
    /// Generate integer keys for records that lack one.
    pub auto_increment: bool,
}

/// Parameters of a secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexParams {
    /// Where the indexed value lives inside each record.
    pub key_path: Keypath,
    /// Reject two records with the same index key.
    pub unique: bool,
    /// Index each element of an array value separately.
    pub multi_entry: bool,
}

/// Callback run while a database moves to a higher version.
pub type UpgradeHook<'a> = &'a mut dyn FnMut(&mut dyn SchemaEditor) -> StorageResult<()>;

/// Entry point of a storage engine.
pub trait StorageEngine: Send + Sync {
    /// Opens database `name`, creating it at version 0 if missing.
    ///
    /// With `version` set above the stored version, `upgrade` runs inside
    /// a version-change transaction; if it fails nothing changes. With
    /// `version` unset the current version is kept (1 for a new database).
    /// A version change waits for the other connections to close.
    ///
    /// # Errors
    ///
    /// - [`crate::StorageError::Version`] if `version` is lower than stored
    /// - [`crate::StorageError::Blocked`] if other connections stay open
    ///   longer than the engine is willing to wait
    /// - any error returned by `upgrade`
    fn open(
        &self,
        name: &str,
        version: Option<u64>,
        upgrade: Option<UpgradeHook<'_>>,
    ) -> StorageResult<Box<dyn Connection>>;

    /// Deletes database `name`. Deleting a missing database succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Blocked`] while connections are open.
    fn delete_database(&self, name: &str) -> StorageResult<()>;

    /// Names of every known database, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if persisted databases cannot be listed.
    fn database_names(&self) -> StorageResult<Vec<String>>;
}

/// An open handle on one database.
///
/// Dropping a connection closes it.
pub trait Connection {
    /// Database name.
    fn name(&self) -> &str;

    /// Version this connection was opened at.
    fn version(&self) -> u64;

    /// Names of the object stores, sorted.
    ///
    /// # Errors
    ///
    /// Fails once the connection is closed.
    fn store_names(&self) -> StorageResult<Vec<String>>;

    /// Starts a transaction over `stores`.
    ///
    /// # Errors
    ///
    /// Fails if the connection is closed or a store does not exist.
    fn transaction(
        &self,
        stores: &[&str],
        mode: TransactionMode,
    ) -> StorageResult<Box<dyn Transaction + '_>>;

    /// Closes the connection. Closing twice has no further effect.
    fn close(&mut self);

    /// Whether [`Connection::close`] has run.
    fn is_closed(&self) -> bool;
}

/// Schema operations available during a version upgrade.
pub trait SchemaEditor {
    /// Version the database had before the upgrade.
    fn old_version(&self) -> u64;

    /// Whether a store exists.
    fn contains_store(&self, name: &str) -> bool;

    /// Names of the object stores, sorted.
    fn store_names(&self) -> Vec<String>;

    /// Creates an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Constraint`] if it already exists.
    fn create_store(&mut self, name: &str, params: StoreParams) -> StorageResult<()>;

    /// Creates an index on an existing store, indexing current records.
    ///
    /// # Errors
    ///
    /// Fails if the store is missing, the index exists, or existing records
    /// violate a unique index.
    fn create_index(&mut self, store: &str, index: &str, params: IndexParams)
        -> StorageResult<()>;

    /// Deletes a store and its records.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NotFound`] if it does not exist.
    fn delete_store(&mut self, name: &str) -> StorageResult<()>;
}

/// One record visited by a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorEntry {
    /// Position key: the primary key, or the index key for index cursors.
    pub key: Key,
    /// Primary key of the record.
    pub primary_key: Key,
    /// The record.
    pub value: Value,
}

/// A transaction over a fixed set of stores.
///
/// Dropping a transaction without committing aborts it.
pub trait Transaction {
    /// Access mode.
    fn mode(&self) -> TransactionMode;

    /// Reads one record.
    ///
    /// # Errors
    ///
    /// Fails if the store is not in scope.
    fn get(&self, store: &str, key: &Key) -> StorageResult<Option<Value>>;

    /// Inserts a record, failing if its key exists. Returns the key used.
    ///
    /// # Errors
    ///
    /// [`crate::StorageError::Constraint`] on an existing key or unique index
    /// clash, [`crate::StorageError::InvalidKey`] if no key can be derived.
    fn add(&mut self, store: &str, value: Value) -> StorageResult<Key>;

    /// Inserts or overwrites a record. Returns the key used.
    ///
    /// # Errors
    ///
    /// As [`Transaction::add`], minus the existing-key case.
    fn put(&mut self, store: &str, value: Value) -> StorageResult<Key>;

    /// Deletes a record if present.
    ///
    /// # Errors
    ///
    /// Fails in read-only mode or if the store is not in scope.
    fn delete(&mut self, store: &str, key: &Key) -> StorageResult<()>;

    /// Opens a cursor over a store's primary keys.
    ///
    /// # Errors
    ///
    /// Fails if the store is not in scope.
    fn open_cursor(&mut self, store: &str, range: KeyRange)
        -> StorageResult<Box<dyn Cursor + '_>>;

    /// Opens a cursor over an index, ordered by index key then primary key.
    ///
    /// # Errors
    ///
    /// Fails if the store is not in scope or the index does not exist.
    fn open_index_cursor(
        &mut self,
        store: &str,
        index: &str,
        range: KeyRange,
    ) -> StorageResult<Box<dyn Cursor + '_>>;

    /// Publishes every write made in this transaction.
    ///
    /// # Errors
    ///
    /// Fails if the committed state cannot be persisted; nothing is
    /// published in that case.
    fn commit(self: Box<Self>) -> StorageResult<()>;

    /// Discards every write made in this transaction.
    fn abort(self: Box<Self>);
}

/// Ordered iteration over a store or index.
pub trait Cursor {
    /// Advances to the next record in range.
    ///
    /// # Errors
    ///
    /// Fails if the underlying store disappeared or a fault was injected.
    fn next(&mut self) -> StorageResult<Option<CursorEntry>>;

    /// Replaces the record at the current position.
    ///
    /// # Errors
    ///
    /// Fails with no current position, in read-only mode, or when the new
    /// value carries a different primary key.
    fn update(&mut self, value: Value) -> StorageResult<()>;

    /// Deletes the record at the current position.
    ///
    /// # Errors
    ///
    /// Fails with no current position or in read-only mode.
    fn delete(&mut self) -> StorageResult<()>;
}
