//! Transactions, cursors and the upgrade-time schema editor.

use super::image::{DatabaseImage, StoreImage};
use super::{DatabaseSlot, EngineShared};
use crate::engine::{
    Cursor, CursorEntry, IndexParams, SchemaEditor, StoreParams, Transaction, TransactionMode,
};
use crate::error::{StorageError, StorageResult};
use crate::key::{Key, KeyRange};
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::RawMutex;
use recollect_codec::{keypath, Value};
use std::ops::Bound;
use std::sync::Arc;

/// What a transaction reads from and writes to.
enum Workspace {
    /// A shared committed image.
    Snapshot(Arc<DatabaseImage>),
    /// A private copy published on commit. The guard serializes writers.
    Working {
        image: Box<DatabaseImage>,
        _writer: ArcMutexGuard<RawMutex, ()>,
    },
}

pub(crate) struct MemoryTransaction {
    shared: Arc<EngineShared>,
    slot: Arc<DatabaseSlot>,
    scope: Vec<String>,
    workspace: Workspace,
}

impl MemoryTransaction {
    pub(crate) fn begin(
        shared: Arc<EngineShared>,
        slot: Arc<DatabaseSlot>,
        stores: &[&str],
        mode: TransactionMode,
    ) -> StorageResult<Self> {
        let workspace = match mode {
            TransactionMode::ReadOnly => Workspace::Snapshot(slot.committed()),
            TransactionMode::ReadWrite => {
                let writer = slot.writer.lock_arc();
                let image = Box::new((*slot.committed()).clone());
                Workspace::Working {
                    image,
                    _writer: writer,
                }
            }
        };
        let txn = Self {
            shared,
            slot,
            scope: stores.iter().map(|s| (*s).to_string()).collect(),
            workspace,
        };
        for store in &txn.scope {
            txn.image().store(store)?;
        }
        tracing::trace!(db = %txn.slot.name, stores = ?txn.scope, ?mode, "transaction started");
        Ok(txn)
    }

    fn image(&self) -> &DatabaseImage {
        match &self.workspace {
            Workspace::Snapshot(image) => image.as_ref(),
            Workspace::Working { image, .. } => image.as_ref(),
        }
    }

    fn check_scope(&self, store: &str) -> StorageResult<()> {
        if self.scope.iter().any(|s| s == store) {
            Ok(())
        } else {
            Err(StorageError::not_found(format!(
                "object store '{store}' in transaction scope"
            )))
        }
    }

    fn store(&self, name: &str) -> StorageResult<&StoreImage> {
        self.check_scope(name)?;
        self.image().store(name)
    }

    fn store_mut(&mut self, name: &str) -> StorageResult<&mut StoreImage> {
        self.check_scope(name)?;
        match &mut self.workspace {
            Workspace::Snapshot(_) => Err(StorageError::ReadOnly),
            Workspace::Working { image, .. } => image.store_mut(name),
        }
    }

    fn insert(&mut self, store: &str, value: Value, overwrite: bool) -> StorageResult<Key> {
        let target = self.store_mut(store)?;
        let (key, value) = target.assign_key(value)?;
        target.write(key.clone(), &value, overwrite)?;
        Ok(key)
    }

    fn cursor(
        &mut self,
        store: &str,
        index: Option<&str>,
        range: KeyRange,
    ) -> StorageResult<Box<dyn Cursor + '_>> {
        let image = self.store(store)?;
        if let Some(index) = index {
            if !image.indexes.contains_key(index) {
                return Err(StorageError::not_found(format!(
                    "index '{index}' on object store '{store}'"
                )));
            }
        }
        let fault = self.shared.take_cursor_fault();
        Ok(Box::new(MemoryCursor {
            txn: self,
            store: store.to_string(),
            index: index.map(str::to_string),
            range,
            position: None,
            fault,
        }))
    }
}

impl Transaction for MemoryTransaction {
    fn mode(&self) -> TransactionMode {
        match self.workspace {
            Workspace::Snapshot(_) => TransactionMode::ReadOnly,
            Workspace::Working { .. } => TransactionMode::ReadWrite,
        }
    }

    fn get(&self, store: &str, key: &Key) -> StorageResult<Option<Value>> {
        self.store(store)?.read(key)
    }

    fn add(&mut self, store: &str, value: Value) -> StorageResult<Key> {
        self.insert(store, value, false)
    }

    fn put(&mut self, store: &str, value: Value) -> StorageResult<Key> {
        self.insert(store, value, true)
    }

    fn delete(&mut self, store: &str, key: &Key) -> StorageResult<()> {
        self.store_mut(store)?.remove(key).map(|_| ())
    }

    fn open_cursor(
        &mut self,
        store: &str,
        range: KeyRange,
    ) -> StorageResult<Box<dyn Cursor + '_>> {
        self.cursor(store, None, range)
    }

    fn open_index_cursor(
        &mut self,
        store: &str,
        index: &str,
        range: KeyRange,
    ) -> StorageResult<Box<dyn Cursor + '_>> {
        self.cursor(store, Some(index), range)
    }

    fn commit(self: Box<Self>) -> StorageResult<()> {
        let this = *self;
        match this.workspace {
            Workspace::Snapshot(_) => Ok(()),
            Workspace::Working { image, _writer } => {
                this.shared.persist(&this.slot.name, &image)?;
                this.slot.publish(*image);
                tracing::trace!(db = %this.slot.name, "transaction committed");
                Ok(())
            }
        }
    }

    fn abort(self: Box<Self>) {
        tracing::trace!(db = %self.slot.name, "transaction aborted");
    }
}

/// Cursor over a store or one of its indexes.
///
/// The position is remembered by key, so records written or deleted
/// through the cursor never disturb the walk.
struct MemoryCursor<'t> {
    txn: &'t mut MemoryTransaction,
    store: String,
    index: Option<String>,
    range: KeyRange,
    /// (position key, primary key) of the current record.
    position: Option<(Key, Key)>,
    /// Successful steps left before an injected failure.
    fault: Option<usize>,
}

impl MemoryCursor<'_> {
    fn next_primary(&self, store: &StoreImage) -> Option<Key> {
        let start = match &self.position {
            Some((last, _)) => Bound::Excluded(last),
            None => self.range.lower(),
        };
        store
            .records
            .range::<Key, _>((start, Bound::Unbounded))
            .next()
            .map(|(key, _)| key.clone())
            .filter(|key| self.range.below_upper(key))
    }

    fn next_indexed(&self, store: &StoreImage, index: &str) -> StorageResult<Option<(Key, Key)>> {
        let entries = &store
            .indexes
            .get(index)
            .ok_or_else(|| StorageError::not_found(format!("index '{index}'")))?
            .entries;
        let mut iter: Box<dyn Iterator<Item = &(Key, Key)> + '_> = match &self.position {
            Some(last) => Box::new(entries.range((Bound::Excluded(last.clone()), Bound::Unbounded))),
            None => match self.range.lower() {
                Bound::Unbounded => Box::new(entries.iter()),
                Bound::Included(lo) | Bound::Excluded(lo) => {
                    Box::new(entries.range((lo.clone(), Key::MIN)..))
                }
            },
        };
        Ok(iter
            .find(|(k, _)| self.range.above_lower(k))
            .filter(|(k, _)| self.range.below_upper(k))
            .cloned())
    }

    fn current(&self) -> StorageResult<&(Key, Key)> {
        self.position
            .as_ref()
            .ok_or_else(|| StorageError::not_found("cursor has no current record"))
    }
}

impl Cursor for MemoryCursor<'_> {
    fn next(&mut self) -> StorageResult<Option<CursorEntry>> {
        if let Some(left) = self.fault.as_mut() {
            if *left == 0 {
                self.fault = None;
                return Err(StorageError::InjectedFault(format!(
                    "cursor on '{}' failed",
                    self.store
                )));
            }
            *left -= 1;
        }

        let store = self.txn.store(&self.store)?;
        let found = match &self.index {
            None => self.next_primary(store).map(|k| (k.clone(), k)),
            Some(index) => self.next_indexed(store, index)?,
        };
        let Some((key, primary_key)) = found else {
            self.position = None;
            return Ok(None);
        };
        let value = store.read(&primary_key)?.ok_or_else(|| {
            StorageError::Corrupted(format!("index entry points at missing record {primary_key:?}"))
        })?;
        self.position = Some((key.clone(), primary_key.clone()));
        Ok(Some(CursorEntry {
            key,
            primary_key,
            value,
        }))
    }

    fn update(&mut self, value: Value) -> StorageResult<()> {
        let (_, primary) = self.current()?.clone();
        let store = self.txn.store_mut(&self.store)?;
        if let Some(path) = &store.params.key_path {
            let carried = keypath::get(&value, path).map(Key::from_value).transpose()?;
            if carried.as_ref() != Some(&primary) {
                return Err(StorageError::invalid_key(format!(
                    "updated record must keep key {primary:?} at '{path}'"
                )));
            }
        }
        store.write(primary, &value, true)
    }

    fn delete(&mut self) -> StorageResult<()> {
        let (_, primary) = self.current()?.clone();
        self.txn.store_mut(&self.store)?.remove(&primary).map(|_| ())
    }
}

/// Schema editor over the working image of an upgrade.
pub(crate) struct ImageEditor<'a> {
    pub(crate) old_version: u64,
    pub(crate) image: &'a mut DatabaseImage,
}

impl SchemaEditor for ImageEditor<'_> {
    fn old_version(&self) -> u64 {
        self.old_version
    }

    fn contains_store(&self, name: &str) -> bool {
        self.image.stores.contains_key(name)
    }

    fn store_names(&self) -> Vec<String> {
        self.image.stores.keys().cloned().collect()
    }

    fn create_store(&mut self, name: &str, params: StoreParams) -> StorageResult<()> {
        if self.image.stores.contains_key(name) {
            return Err(StorageError::constraint(format!(
                "object store '{name}' already exists"
            )));
        }
        tracing::debug!(store = name, "creating object store");
        self.image
            .stores
            .insert(name.to_string(), StoreImage::new(params));
        Ok(())
    }

    fn create_index(
        &mut self,
        store: &str,
        index: &str,
        params: IndexParams,
    ) -> StorageResult<()> {
        tracing::debug!(store, index, "creating index");
        self.image.store_mut(store)?.add_index(index, params)
    }

    fn delete_store(&mut self, name: &str) -> StorageResult<()> {
        tracing::debug!(store = name, "deleting object store");
        self.image
            .stores
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(format!("object store '{name}'")))
    }
}
