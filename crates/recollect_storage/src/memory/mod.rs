//! The reference object-store engine.
//!
//! Databases live in memory as immutable committed images. Read-only
//! transactions share the current image; read-write transactions take the
//! database's writer lock, work on a private copy and publish it on commit.
//! With [`MemoryEngine::open_dir`] every published image is also written to
//! disk.

mod image;
mod persist;
mod transaction;

use crate::engine::{Connection, StorageEngine, Transaction, TransactionMode, UpgradeHook};
use crate::error::{StorageError, StorageResult};
use image::DatabaseImage;
use parking_lot::{Condvar, Mutex, RwLock};
use persist::DataDir;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use transaction::{ImageEditor, MemoryTransaction};

/// Connection counters of a [`MemoryEngine`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Connections opened so far.
    pub opened: u64,
    /// Connections closed so far.
    pub closed: u64,
}

impl EngineStats {
    /// Connections currently open.
    #[must_use]
    pub fn open_connections(&self) -> u64 {
        self.opened.saturating_sub(self.closed)
    }
}

/// How long a version change waits for other connections by default.
pub const DEFAULT_UPGRADE_WAIT: Duration = Duration::from_secs(30);

pub(crate) struct DatabaseSlot {
    pub(crate) name: String,
    committed: RwLock<Arc<DatabaseImage>>,
    pub(crate) writer: Arc<Mutex<()>>,
    /// Open connections. Version changes run while holding this lock.
    connections: Mutex<usize>,
    /// Signalled when the last connection closes.
    idle: Condvar,
}

impl DatabaseSlot {
    fn new(name: &str, image: DatabaseImage) -> Self {
        Self {
            name: name.to_string(),
            committed: RwLock::new(Arc::new(image)),
            writer: Arc::new(Mutex::new(())),
            connections: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    pub(crate) fn committed(&self) -> Arc<DatabaseImage> {
        Arc::clone(&self.committed.read())
    }

    pub(crate) fn publish(&self, image: DatabaseImage) {
        *self.committed.write() = Arc::new(image);
    }
}

pub(crate) struct EngineShared {
    databases: Mutex<HashMap<String, Arc<DatabaseSlot>>>,
    dir: Option<DataDir>,
    opened: AtomicU64,
    closed: AtomicU64,
    cursor_fault: Mutex<Option<usize>>,
    upgrade_wait_ms: AtomicU64,
}

impl EngineShared {
    fn slot(&self, name: &str) -> StorageResult<Arc<DatabaseSlot>> {
        let mut databases = self.databases.lock();
        if let Some(slot) = databases.get(name) {
            return Ok(Arc::clone(slot));
        }
        let image = match &self.dir {
            Some(dir) => dir.load(name)?.unwrap_or_default(),
            None => DatabaseImage::default(),
        };
        let slot = Arc::new(DatabaseSlot::new(name, image));
        databases.insert(name.to_string(), Arc::clone(&slot));
        Ok(slot)
    }

    pub(crate) fn persist(&self, name: &str, image: &DatabaseImage) -> StorageResult<()> {
        match &self.dir {
            Some(dir) => dir.save(name, image),
            None => Ok(()),
        }
    }

    pub(crate) fn take_cursor_fault(&self) -> Option<usize> {
        self.cursor_fault.lock().take()
    }
}

/// In-memory implementation of [`StorageEngine`], optionally backed by a
/// directory of image files.
///
/// Cloning yields another handle on the same databases.
///
/// # Example
///
/// ```rust
/// use recollect_storage::{Connection, MemoryEngine, StorageEngine, StoreParams, Transaction, TransactionMode};
/// use recollect_codec::{Keypath, Value};
///
/// let engine = MemoryEngine::new();
/// let mut upgrade = |schema: &mut dyn recollect_storage::SchemaEditor| {
///     schema.create_store(
///         "notes",
///         StoreParams { key_path: Some(Keypath::parse("id")), auto_increment: true },
///     )
/// };
/// let conn = engine.open("app", Some(1), Some(&mut upgrade)).unwrap();
///
/// let mut txn = conn.transaction(&["notes"], TransactionMode::ReadWrite).unwrap();
/// let key = txn.add("notes", Value::object([("text", Value::from("hi"))])).unwrap();
/// txn.commit().unwrap();
///
/// let txn = conn.transaction(&["notes"], TransactionMode::ReadOnly).unwrap();
/// assert!(txn.get("notes", &key).unwrap().is_some());
/// ```
#[derive(Clone)]
pub struct MemoryEngine {
    shared: Arc<EngineShared>,
}

impl MemoryEngine {
    /// Creates an engine with no persistence.
    #[must_use]
    pub fn new() -> Self {
        Self::with_dir(None)
    }

    /// Creates an engine that keeps its databases in `path`.
    ///
    /// The directory is created if missing and locked for the lifetime of the
    /// engine.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another engine holds the directory,
    /// or an I/O error.
    pub fn open_dir(path: &Path) -> StorageResult<Self> {
        let dir = DataDir::open(path)?;
        tracing::debug!(path = %dir.path().display(), "opened storage directory");
        Ok(Self::with_dir(Some(dir)))
    }

    fn with_dir(dir: Option<DataDir>) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                databases: Mutex::new(HashMap::new()),
                dir,
                opened: AtomicU64::new(0),
                closed: AtomicU64::new(0),
                cursor_fault: Mutex::new(None),
                upgrade_wait_ms: AtomicU64::new(millis(DEFAULT_UPGRADE_WAIT)),
            }),
        }
    }

    /// Directory backing this engine, if any.
    #[must_use]
    pub fn dir(&self) -> Option<&Path> {
        self.shared.dir.as_ref().map(DataDir::path)
    }

    /// Connection counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            opened: self.shared.opened.load(Ordering::SeqCst),
            closed: self.shared.closed.load(Ordering::SeqCst),
        }
    }

    /// Arms a one-shot fault: the next cursor opened fails on its
    /// `after_steps + 1`-th call to `next`.
    pub fn fail_next_cursor(&self, after_steps: usize) {
        *self.shared.cursor_fault.lock() = Some(after_steps);
    }

    /// Sets how long a version change waits for other connections to close
    /// before failing with [`StorageError::Blocked`].
    pub fn set_upgrade_wait(&self, wait: Duration) {
        self.shared
            .upgrade_wait_ms
            .store(millis(wait), Ordering::SeqCst);
    }

    fn upgrade_deadline(&self) -> Instant {
        let wait = Duration::from_millis(self.shared.upgrade_wait_ms.load(Ordering::SeqCst));
        Instant::now() + wait
    }

    fn upgrade_image(
        &self,
        slot: &DatabaseSlot,
        current: u64,
        target: u64,
        upgrade: Option<UpgradeHook<'_>>,
    ) -> StorageResult<()> {
        let _writer = slot.writer.lock();
        let mut image = (*slot.committed()).clone();
        if let Some(hook) = upgrade {
            hook(&mut ImageEditor {
                old_version: current,
                image: &mut image,
            })?;
        }
        image.version = target;
        self.shared.persist(&slot.name, &image)?;
        slot.publish(image);
        tracing::debug!(db = %slot.name, from = current, to = target, "database upgraded");
        Ok(())
    }
}

fn millis(wait: Duration) -> u64 {
    u64::try_from(wait.as_millis()).unwrap_or(u64::MAX)
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("dir", &self.dir())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl StorageEngine for MemoryEngine {
    fn open(
        &self,
        name: &str,
        version: Option<u64>,
        upgrade: Option<UpgradeHook<'_>>,
    ) -> StorageResult<Box<dyn Connection>> {
        let slot = self.shared.slot(name)?;
        let mut upgrade = upgrade;
        let deadline = self.upgrade_deadline();
        let mut connections = slot.connections.lock();
        let target = loop {
            let current = slot.committed().version;
            let target = version.unwrap_or(current.max(1));
            if target < current {
                return Err(StorageError::Version {
                    requested: target,
                    current,
                });
            }
            if target == current {
                break target;
            }
            if *connections == 0 {
                self.upgrade_image(&slot, current, target, upgrade.take())?;
                break target;
            }
            tracing::debug!(db = name, open = *connections, "version change waiting for connections");
            if slot.idle.wait_until(&mut connections, deadline).timed_out() && *connections > 0 {
                return Err(StorageError::Blocked(name.to_string()));
            }
        };
        *connections += 1;
        drop(connections);

        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(db = name, version = target, "connection opened");
        Ok(Box::new(MemoryConnection {
            shared: Arc::clone(&self.shared),
            slot,
            version: target,
            closed: false,
        }))
    }

    fn delete_database(&self, name: &str) -> StorageResult<()> {
        let mut databases = self.shared.databases.lock();
        if let Some(slot) = databases.get(name) {
            if *slot.connections.lock() > 0 {
                return Err(StorageError::Blocked(name.to_string()));
            }
        }
        databases.remove(name);
        if let Some(dir) = &self.shared.dir {
            dir.remove(name)?;
        }
        tracing::debug!(db = name, "database deleted");
        Ok(())
    }

    fn database_names(&self) -> StorageResult<Vec<String>> {
        let mut names: BTreeSet<String> = self
            .shared
            .databases
            .lock()
            .iter()
            .filter(|(_, slot)| slot.committed().version > 0)
            .map(|(name, _)| name.clone())
            .collect();
        if let Some(dir) = &self.shared.dir {
            names.extend(dir.names()?);
        }
        Ok(names.into_iter().collect())
    }
}

struct MemoryConnection {
    shared: Arc<EngineShared>,
    slot: Arc<DatabaseSlot>,
    version: u64,
    closed: bool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Connection for MemoryConnection {
    fn name(&self) -> &str {
        &self.slot.name
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn store_names(&self) -> StorageResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.slot.committed().stores.keys().cloned().collect())
    }

    fn transaction(
        &self,
        stores: &[&str],
        mode: TransactionMode,
    ) -> StorageResult<Box<dyn Transaction + '_>> {
        self.ensure_open()?;
        let txn = MemoryTransaction::begin(
            Arc::clone(&self.shared),
            Arc::clone(&self.slot),
            stores,
            mode,
        )?;
        Ok(Box::new(txn))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        {
            let mut connections = self.slot.connections.lock();
            *connections = connections.saturating_sub(1);
            if *connections == 0 {
                self.slot.idle.notify_all();
            }
        }
        self.shared.closed.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(db = %self.slot.name, "connection closed");
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{IndexParams, SchemaEditor, StoreParams};
    use crate::key::{Key, KeyRange};
    use recollect_codec::{Keypath, Value};
    use tempfile::TempDir;

    fn people_schema(schema: &mut dyn SchemaEditor) -> StorageResult<()> {
        schema.create_store(
            "people",
            StoreParams {
                key_path: Some(Keypath::parse("id")),
                auto_increment: true,
            },
        )?;
        schema.create_index(
            "people",
            "age",
            IndexParams {
                key_path: Keypath::parse("age"),
                unique: false,
                multi_entry: false,
            },
        )
    }

    fn open_people(engine: &MemoryEngine) -> Box<dyn Connection> {
        let mut hook = people_schema;
        engine.open("db", Some(1), Some(&mut hook)).unwrap()
    }

    fn person(name: &str, age: i64) -> Value {
        Value::object([("name", Value::from(name)), ("age", Value::Integer(age))])
    }

    fn seed(conn: &dyn Connection, people: &[(&str, i64)]) {
        let mut txn = conn
            .transaction(&["people"], TransactionMode::ReadWrite)
            .unwrap();
        for (name, age) in people {
            txn.add("people", person(name, *age)).unwrap();
        }
        txn.commit().unwrap();
    }

    fn names_in(conn: &dyn Connection) -> Vec<String> {
        let mut txn = conn
            .transaction(&["people"], TransactionMode::ReadOnly)
            .unwrap();
        let mut cursor = txn.open_cursor("people", KeyRange::all()).unwrap();
        let mut out = Vec::new();
        while let Some(entry) = cursor.next().unwrap() {
            out.push(entry.value.get("name").unwrap().as_text().unwrap().to_string());
        }
        out
    }

    #[test]
    fn new_database_starts_at_version_one() {
        let engine = MemoryEngine::new();
        let conn = engine.open("fresh", None, None).unwrap();
        assert_eq!(conn.version(), 1);
        assert!(conn.store_names().unwrap().is_empty());
        assert_eq!(engine.database_names().unwrap(), vec!["fresh".to_string()]);
    }

    #[test]
    fn upgrade_runs_once_and_lower_version_fails() {
        let engine = MemoryEngine::new();
        drop(open_people(&engine));

        let mut calls = 0;
        let mut hook = |_: &mut dyn SchemaEditor| -> StorageResult<()> {
            calls += 1;
            Ok(())
        };
        drop(engine.open("db", Some(1), Some(&mut hook)).unwrap());
        assert_eq!(calls, 0);

        let mut hook = |schema: &mut dyn SchemaEditor| -> StorageResult<()> {
            assert_eq!(schema.old_version(), 1);
            assert!(schema.contains_store("people"));
            Ok(())
        };
        let conn = engine.open("db", Some(2), Some(&mut hook)).unwrap();
        assert_eq!(conn.version(), 2);
        drop(conn);

        assert!(matches!(
            engine.open("db", Some(1), None),
            Err(StorageError::Version {
                requested: 1,
                current: 2
            })
        ));
    }

    #[test]
    fn failed_upgrade_changes_nothing() {
        let engine = MemoryEngine::new();
        drop(open_people(&engine));
        let mut hook = |schema: &mut dyn SchemaEditor| -> StorageResult<()> {
            schema.delete_store("people")?;
            Err(StorageError::constraint("nope"))
        };
        assert!(engine.open("db", Some(2), Some(&mut hook)).is_err());
        let conn = engine.open("db", None, None).unwrap();
        assert_eq!(conn.version(), 1);
        assert_eq!(conn.store_names().unwrap(), vec!["people".to_string()]);
    }

    #[test]
    fn upgrade_blocked_by_open_connection() {
        let engine = MemoryEngine::new();
        engine.set_upgrade_wait(Duration::from_millis(20));
        let held = open_people(&engine);
        assert!(matches!(
            engine.open("db", Some(2), None),
            Err(StorageError::Blocked(_))
        ));
        assert_eq!(held.version(), 1);
        assert_eq!(engine.stats().open_connections(), 1);
    }

    #[test]
    fn upgrade_waits_for_connections_to_close() {
        let engine = MemoryEngine::new();
        let held = open_people(&engine);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        std::thread::scope(|s| {
            let waiter = s.spawn(|| {
                ready_tx.send(()).unwrap();
                let conn = engine.open("db", Some(2), None).unwrap();
                conn.version()
            });
            ready_rx.recv().unwrap();
            std::thread::sleep(Duration::from_millis(50));
            assert!(!waiter.is_finished());
            drop(held);
            assert_eq!(waiter.join().unwrap(), 2);
        });
        assert_eq!(engine.stats().open_connections(), 0);
        assert_eq!(engine.open("db", None, None).unwrap().version(), 2);
    }

    #[test]
    fn delete_database_blocked_until_closed() {
        let engine = MemoryEngine::new();
        let mut conn = open_people(&engine);
        assert!(matches!(
            engine.delete_database("db"),
            Err(StorageError::Blocked(_))
        ));
        conn.close();
        conn.close();
        assert!(conn.transaction(&["people"], TransactionMode::ReadOnly).is_err());
        engine.delete_database("db").unwrap();
        engine.delete_database("never-existed").unwrap();
        assert!(engine.database_names().unwrap().is_empty());
        assert_eq!(engine.stats().open_connections(), 0);
    }

    #[test]
    fn writes_visible_only_after_commit() {
        let engine = MemoryEngine::new();
        let conn = open_people(&engine);

        let mut txn = conn
            .transaction(&["people"], TransactionMode::ReadWrite)
            .unwrap();
        let key = txn.add("people", person("ada", 36)).unwrap();
        assert_eq!(key, Key::Integer(1));
        assert!(txn.get("people", &key).unwrap().is_some());
        txn.abort();
        assert!(names_in(conn.as_ref()).is_empty());

        seed(conn.as_ref(), &[("ada", 36), ("bob", 25)]);
        assert_eq!(names_in(conn.as_ref()), vec!["ada", "bob"]);
    }

    #[test]
    fn dropped_transaction_aborts() {
        let engine = MemoryEngine::new();
        let conn = open_people(&engine);
        {
            let mut txn = conn
                .transaction(&["people"], TransactionMode::ReadWrite)
                .unwrap();
            txn.add("people", person("ada", 36)).unwrap();
        }
        assert!(names_in(conn.as_ref()).is_empty());
        // the writer lock was released
        seed(conn.as_ref(), &[("bob", 25)]);
    }

    #[test]
    fn read_only_rejects_writes() {
        let engine = MemoryEngine::new();
        let conn = open_people(&engine);
        let mut txn = conn
            .transaction(&["people"], TransactionMode::ReadOnly)
            .unwrap();
        assert!(matches!(
            txn.add("people", person("x", 1)),
            Err(StorageError::ReadOnly)
        ));
    }

    #[test]
    fn scope_and_store_checks() {
        let engine = MemoryEngine::new();
        let conn = open_people(&engine);
        assert!(matches!(
            conn.transaction(&["ghosts"], TransactionMode::ReadOnly),
            Err(StorageError::NotFound(_))
        ));
        let mut txn = conn.transaction(&[], TransactionMode::ReadOnly).unwrap();
        assert!(txn.open_cursor("people", KeyRange::all()).is_err());
    }

    #[test]
    fn cursor_update_and_delete_while_walking() {
        let engine = MemoryEngine::new();
        let conn = open_people(&engine);
        seed(conn.as_ref(), &[("a", 1), ("b", 2), ("c", 3)]);

        let mut txn = conn
            .transaction(&["people"], TransactionMode::ReadWrite)
            .unwrap();
        {
            let mut cursor = txn.open_cursor("people", KeyRange::all()).unwrap();
            while let Some(entry) = cursor.next().unwrap() {
                if entry.primary_key == Key::Integer(2) {
                    cursor.delete().unwrap();
                } else {
                    let mut value = entry.value;
                    value.insert("name", Value::from("z"));
                    cursor.update(value).unwrap();
                }
            }
        }
        txn.commit().unwrap();
        assert_eq!(names_in(conn.as_ref()), vec!["z", "z"]);
    }

    #[test]
    fn cursor_update_must_keep_key() {
        let engine = MemoryEngine::new();
        let conn = open_people(&engine);
        seed(conn.as_ref(), &[("a", 1)]);
        let mut txn = conn
            .transaction(&["people"], TransactionMode::ReadWrite)
            .unwrap();
        let mut cursor = txn.open_cursor("people", KeyRange::all()).unwrap();
        assert!(cursor.update(person("early", 0)).is_err());
        let mut value = cursor.next().unwrap().unwrap().value;
        value.insert("id", Value::Integer(99));
        assert!(matches!(
            cursor.update(value),
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[test]
    fn index_cursor_orders_by_index_key() {
        let engine = MemoryEngine::new();
        let conn = open_people(&engine);
        seed(conn.as_ref(), &[("old", 70), ("young", 20), ("mid", 40), ("mid2", 40)]);

        let mut txn = conn
            .transaction(&["people"], TransactionMode::ReadOnly)
            .unwrap();
        let mut cursor = txn
            .open_index_cursor("people", "age", KeyRange::lower_bound(Key::Integer(40), false))
            .unwrap();
        let mut seen = Vec::new();
        while let Some(entry) = cursor.next().unwrap() {
            seen.push((entry.key, entry.primary_key));
        }
        assert_eq!(
            seen,
            vec![
                (Key::Integer(40), Key::Integer(3)),
                (Key::Integer(40), Key::Integer(4)),
                (Key::Integer(70), Key::Integer(1)),
            ]
        );
        drop(cursor);

        let mut only = txn
            .open_index_cursor("people", "age", KeyRange::only(Key::Integer(20)))
            .unwrap();
        assert_eq!(only.next().unwrap().unwrap().primary_key, Key::Integer(2));
        assert!(only.next().unwrap().is_none());
    }

    #[test]
    fn injected_cursor_fault_fires_once() {
        let engine = MemoryEngine::new();
        let conn = open_people(&engine);
        seed(conn.as_ref(), &[("a", 1), ("b", 2)]);
        engine.fail_next_cursor(1);

        let mut txn = conn
            .transaction(&["people"], TransactionMode::ReadOnly)
            .unwrap();
        {
            let mut cursor = txn.open_cursor("people", KeyRange::all()).unwrap();
            assert!(cursor.next().unwrap().is_some());
            assert!(matches!(
                cursor.next(),
                Err(StorageError::InjectedFault(_))
            ));
        }
        let mut cursor = txn.open_cursor("people", KeyRange::all()).unwrap();
        assert!(cursor.next().unwrap().is_some());
    }

    #[test]
    fn stats_track_connections() {
        let engine = MemoryEngine::new();
        let first = open_people(&engine);
        let second = engine.open("db", None, None).unwrap();
        assert_eq!(engine.stats().open_connections(), 2);
        drop(first);
        drop(second);
        let stats = engine.stats();
        assert_eq!(stats, EngineStats { opened: 2, closed: 2 });
    }

    #[test]
    fn directory_engine_persists_commits() {
        let temp = TempDir::new().unwrap();
        {
            let engine = MemoryEngine::open_dir(temp.path()).unwrap();
            assert!(matches!(
                MemoryEngine::open_dir(temp.path()),
                Err(StorageError::Locked)
            ));
            let conn = open_people(&engine);
            seed(conn.as_ref(), &[("ada", 36)]);
        }

        let engine = MemoryEngine::open_dir(temp.path()).unwrap();
        assert_eq!(engine.database_names().unwrap(), vec!["db".to_string()]);
        let conn = engine.open("db", None, None).unwrap();
        assert_eq!(conn.version(), 1);
        assert_eq!(names_in(conn.as_ref()), vec!["ada"]);

        // the key generator survives the reopen
        let mut txn = conn
            .transaction(&["people"], TransactionMode::ReadWrite)
            .unwrap();
        assert_eq!(txn.add("people", person("bob", 1)).unwrap(), Key::Integer(2));
        txn.commit().unwrap();
        drop(conn);

        engine.delete_database("db").unwrap();
        assert!(engine.database_names().unwrap().is_empty());
    }
}
