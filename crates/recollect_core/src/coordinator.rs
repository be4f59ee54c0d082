//! Connection and transaction lifecycle.
//!
//! Every operation opens its own connection, runs inside one transaction
//! and closes the connection before returning:
//!
//! ```text
//! Closed -> Opening -> [UpgradeNeeded -> Upgrading ->] Open -> InTransaction -> Closed
//! ```
//!
//! Any failure goes straight to `Closed` once the connection is released.
//! The connection is held by a guard, so release happens exactly once on
//! every exit path, including panics inside the unit of work.

use crate::error::{CoreError, CoreResult};
use recollect_storage::{
    Connection, IndexParams, SchemaEditor, StorageEngine, StorageResult, StoreParams,
    Transaction, TransactionMode, UpgradeHook,
};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// States of a coordinated connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection held.
    Closed,
    /// The engine is opening the database.
    Opening,
    /// The schema must change before work can start.
    UpgradeNeeded,
    /// The upgrade hook is running.
    Upgrading,
    /// Connected, no transaction running.
    Open,
    /// A unit of work is running.
    InTransaction,
}

/// An open connection that closes itself when dropped.
struct ConnectionGuard<'c> {
    connection: Box<dyn Connection>,
    state: ConnectionState,
    active: &'c AtomicUsize,
}

impl ConnectionGuard<'_> {
    fn transition(&mut self, to: ConnectionState) {
        tracing::trace!(db = self.connection.name(), from = ?self.state, ?to, "connection state");
        self.state = to;
    }

    fn run<T, F>(&mut self, stores: &[&str], mode: TransactionMode, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut (dyn Transaction + '_)) -> CoreResult<T>,
    {
        self.transition(ConnectionState::InTransaction);
        let mut txn = self.connection.transaction(stores, mode).map_err(|e| {
            CoreError::transaction(format!("cannot begin transaction on {stores:?}"), e)
        })?;
        match f(txn.as_mut()) {
            Ok(value) => {
                txn.commit()
                    .map_err(|e| CoreError::transaction(format!("commit on {stores:?} failed"), e))?;
                tracing::debug!(?stores, ?mode, "transaction committed");
                Ok(value)
            }
            Err(e) => {
                txn.abort();
                tracing::debug!(?stores, error = %e, "transaction aborted");
                Err(e)
            }
        }
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        if !self.connection.is_closed() {
            self.connection.close();
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
        self.transition(ConnectionState::Closed);
    }
}

/// Runs units of work against one database of a [`StorageEngine`].
///
/// The coordinator holds no connection between calls.
pub struct TransactionCoordinator {
    engine: Arc<dyn StorageEngine>,
    db_name: String,
    active: AtomicUsize,
}

impl TransactionCoordinator {
    /// Creates a coordinator for database `db_name`.
    pub fn new(engine: Arc<dyn StorageEngine>, db_name: impl Into<String>) -> Self {
        Self {
            engine,
            db_name: db_name.into(),
            active: AtomicUsize::new(0),
        }
    }

    /// The database name.
    #[must_use]
    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// Connections this coordinator currently holds.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn connect(
        &self,
        version: Option<u64>,
        upgrade: Option<UpgradeHook<'_>>,
    ) -> CoreResult<ConnectionGuard<'_>> {
        tracing::trace!(db = %self.db_name, ?version, state = ?ConnectionState::Opening, "connecting");
        let connection = self
            .engine
            .open(&self.db_name, version, upgrade)
            .map_err(|e| {
                CoreError::connection(format!("cannot open database '{}'", self.db_name), e)
            })?;
        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(ConnectionGuard {
            connection,
            state: ConnectionState::Open,
            active: &self.active,
        })
    }

    /// Runs `f` in a transaction over `stores`.
    ///
    /// The transaction commits if `f` succeeds and aborts if it fails.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Connection`] if the database cannot be opened
    /// - [`CoreError::Transaction`] if the transaction cannot begin or commit
    /// - any error returned by `f`
    pub fn run<T, F>(&self, stores: &[&str], mode: TransactionMode, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut (dyn Transaction + '_)) -> CoreResult<T>,
    {
        let mut guard = self.connect(None, None)?;
        guard.run(stores, mode, f)
    }

    /// Runs `f` in a read-only transaction.
    ///
    /// # Errors
    ///
    /// As [`TransactionCoordinator::run`].
    pub fn read<T, F>(&self, stores: &[&str], f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut (dyn Transaction + '_)) -> CoreResult<T>,
    {
        self.run(stores, TransactionMode::ReadOnly, f)
    }

    /// Runs `f` in a read-write transaction.
    ///
    /// # Errors
    ///
    /// As [`TransactionCoordinator::run`].
    pub fn write<T, F>(&self, stores: &[&str], f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut (dyn Transaction + '_)) -> CoreResult<T>,
    {
        self.run(stores, TransactionMode::ReadWrite, f)
    }

    /// Current database version.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Connection`] if the database cannot be opened.
    pub fn version(&self) -> CoreResult<u64> {
        Ok(self.connect(None, None)?.connection.version())
    }

    /// Names of the stores in the database.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Connection`] if the database cannot be opened.
    pub fn store_names(&self) -> CoreResult<Vec<String>> {
        let guard = self.connect(None, None)?;
        guard
            .connection
            .store_names()
            .map_err(|e| CoreError::connection("cannot list stores", e))
    }

    /// Moves the database one version up, running `change` as the upgrade.
    /// Returns the new version.
    ///
    /// Waits for connections held elsewhere to close. If another upgrade
    /// takes the next version first, `change` runs on the one after.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Connection`] if the upgrade stays blocked or
    /// `change` fails; the schema is then left as it was.
    pub fn upgrade<F>(&self, mut change: F) -> CoreResult<u64>
    where
        F: FnMut(&mut dyn SchemaEditor) -> StorageResult<()>,
    {
        loop {
            let current = self.version()?;
            tracing::trace!(db = %self.db_name, from = current, state = ?ConnectionState::Upgrading, "upgrading");
            let mut ran = false;
            let mut hook = |schema: &mut dyn SchemaEditor| {
                ran = true;
                change(schema)
            };
            let mut guard = self.connect(Some(current + 1), Some(&mut hook))?;
            if ran {
                guard.transition(ConnectionState::Open);
                return Ok(guard.connection.version());
            }
            tracing::debug!(db = %self.db_name, version = current + 1, "version taken by another upgrade");
        }
    }

    /// Makes sure store `name` exists, creating it with `indexes` through an
    /// upgrade if it does not.
    ///
    /// A brand-new database gets the store while it is first created.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Connection`] if opening or upgrading fails.
    pub fn ensure_store(
        &self,
        name: &str,
        params: &StoreParams,
        indexes: &[(String, IndexParams)],
    ) -> CoreResult<()> {
        let mut create = |schema: &mut dyn SchemaEditor| -> StorageResult<()> {
            if schema.contains_store(name) {
                return Ok(());
            }
            schema.create_store(name, params.clone())?;
            for (index, index_params) in indexes {
                schema.create_index(name, index, index_params.clone())?;
            }
            Ok(())
        };

        let present = {
            let mut guard = self.connect(None, Some(&mut create))?;
            let names = guard
                .connection
                .store_names()
                .map_err(|e| CoreError::connection("cannot list stores", e))?;
            let present = names.iter().any(|n| n == name);
            if !present {
                guard.transition(ConnectionState::UpgradeNeeded);
            }
            present
        };
        if present {
            return Ok(());
        }

        let version = self.upgrade(&mut create)?;
        tracing::debug!(db = %self.db_name, store = name, version, "store created");
        Ok(())
    }

    /// Deletes store `name` through an upgrade. A missing store is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Connection`] if the upgrade fails.
    pub fn drop_store(&self, name: &str) -> CoreResult<()> {
        let version = self.upgrade(|schema: &mut dyn SchemaEditor| {
            if schema.contains_store(name) {
                schema.delete_store(name)?;
            }
            Ok(())
        })?;
        tracing::debug!(db = %self.db_name, store = name, version, "store deleted");
        Ok(())
    }

    /// Deletes the whole database.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Connection`] if the engine refuses, for example
    /// while other connections are open.
    pub fn delete_database(&self) -> CoreResult<()> {
        self.engine.delete_database(&self.db_name).map_err(|e| {
            CoreError::connection(format!("cannot delete database '{}'", self.db_name), e)
        })?;
        tracing::debug!(db = %self.db_name, "database deleted");
        Ok(())
    }
}

impl fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("db_name", &self.db_name)
            .field("open_connections", &self.open_connections())
            .finish_non_exhaustive()
    }
}
