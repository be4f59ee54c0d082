//! In-memory state of one database.
//!
//! Records are held as canonical CBOR so that a committed image is immutable
//! and cheap to share between read transactions.

use crate::engine::{IndexParams, StoreParams};
use crate::error::{StorageError, StorageResult};
use crate::key::Key;
use recollect_codec::{from_cbor, keypath, to_canonical_cbor, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub(crate) struct DatabaseImage {
    pub(crate) version: u64,
    pub(crate) stores: BTreeMap<String, StoreImage>,
}

impl DatabaseImage {
    pub(crate) fn store(&self, name: &str) -> StorageResult<&StoreImage> {
        self.stores
            .get(name)
            .ok_or_else(|| StorageError::not_found(format!("object store '{name}'")))
    }

    pub(crate) fn store_mut(&mut self, name: &str) -> StorageResult<&mut StoreImage> {
        self.stores
            .get_mut(name)
            .ok_or_else(|| StorageError::not_found(format!("object store '{name}'")))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StoreImage {
    pub(crate) params: StoreParams,
    pub(crate) next_key: i64,
    pub(crate) records: BTreeMap<Key, Arc<[u8]>>,
    pub(crate) indexes: BTreeMap<String, IndexImage>,
}

#[derive(Debug, Clone)]
pub(crate) struct IndexImage {
    pub(crate) params: IndexParams,
    /// (index key, primary key)
    pub(crate) entries: BTreeSet<(Key, Key)>,
}

impl IndexImage {
    pub(crate) fn new(params: IndexParams) -> Self {
        Self {
            params,
            entries: BTreeSet::new(),
        }
    }

    /// Index keys a record contributes. Values that are not valid keys are
    /// skipped rather than rejected.
    fn keys_for(&self, record: &Value) -> Vec<Key> {
        let Some(found) = keypath::get(record, &self.params.key_path) else {
            return Vec::new();
        };
        match found {
            Value::Array(items) if self.params.multi_entry => {
                let unique: BTreeSet<Key> =
                    items.iter().filter_map(|v| Key::from_value(v).ok()).collect();
                unique.into_iter().collect()
            }
            other => Key::from_value(other).into_iter().collect(),
        }
    }

    fn has_other_owner(&self, index_key: &Key, primary: &Key) -> bool {
        self.entries
            .range((index_key.clone(), Key::MIN)..)
            .take_while(|(k, _)| k == index_key)
            .any(|(_, owner)| owner != primary)
    }
}

impl StoreImage {
    pub(crate) fn new(params: StoreParams) -> Self {
        Self {
            params,
            next_key: 1,
            records: BTreeMap::new(),
            indexes: BTreeMap::new(),
        }
    }

    pub(crate) fn read(&self, key: &Key) -> StorageResult<Option<Value>> {
        self.records
            .get(key)
            .map(|bytes| from_cbor(bytes).map_err(StorageError::from))
            .transpose()
    }

    /// Derives the primary key of `value`, generating and injecting one when
    /// the store allows it.
    pub(crate) fn assign_key(&mut self, mut value: Value) -> StorageResult<(Key, Value)> {
        let Some(path) = self.params.key_path.clone() else {
            if self.params.auto_increment {
                return Ok((self.generate_key()?, value));
            }
            return Err(StorageError::invalid_key(
                "store keeps keys out of line and does not generate them",
            ));
        };

        if let Some(found) = keypath::get(&value, &path) {
            let key = Key::from_value(found)?;
            if self.params.auto_increment {
                if let Key::Integer(n) = key {
                    if n >= self.next_key {
                        self.next_key = n.saturating_add(1);
                    }
                }
            }
            return Ok((key, value));
        }

        if !self.params.auto_increment {
            return Err(StorageError::invalid_key(format!(
                "record has no key at '{path}'"
            )));
        }
        let key = self.generate_key()?;
        keypath::set(&mut value, &path, key.to_value()).map_err(|e| {
            StorageError::invalid_key(format!("cannot inject generated key: {e}"))
        })?;
        Ok((key, value))
    }

    fn generate_key(&mut self) -> StorageResult<Key> {
        if self.next_key == i64::MAX {
            return Err(StorageError::constraint("key generator exhausted"));
        }
        let key = self.next_key;
        self.next_key += 1;
        Ok(Key::Integer(key))
    }

    /// Writes a record and maintains every index.
    pub(crate) fn write(&mut self, key: Key, value: &Value, overwrite: bool) -> StorageResult<()> {
        let previous = self.read(&key)?;
        if previous.is_some() && !overwrite {
            return Err(StorageError::constraint(format!(
                "a record with key {key:?} already exists"
            )));
        }

        let mut additions = Vec::with_capacity(self.indexes.len());
        for (name, index) in &self.indexes {
            let keys = index.keys_for(value);
            if index.params.unique {
                if let Some(clash) = keys.iter().find(|k| index.has_other_owner(k, &key)) {
                    return Err(StorageError::constraint(format!(
                        "unique index '{name}' already contains {clash:?}"
                    )));
                }
            }
            additions.push(keys);
        }

        let bytes: Arc<[u8]> = to_canonical_cbor(value)?.into();
        for (index, keys) in self.indexes.values_mut().zip(additions) {
            if let Some(old) = &previous {
                for old_key in index.keys_for(old) {
                    index.entries.remove(&(old_key, key.clone()));
                }
            }
            for index_key in keys {
                index.entries.insert((index_key, key.clone()));
            }
        }
        self.records.insert(key, bytes);
        Ok(())
    }

    /// Removes a record and its index entries. Returns whether it existed.
    pub(crate) fn remove(&mut self, key: &Key) -> StorageResult<bool> {
        let Some(old) = self.read(key)? else {
            return Ok(false);
        };
        for index in self.indexes.values_mut() {
            for old_key in index.keys_for(&old) {
                index.entries.remove(&(old_key, key.clone()));
            }
        }
        self.records.remove(key);
        Ok(true)
    }

    /// Creates an index and fills it from the current records.
    pub(crate) fn add_index(&mut self, name: &str, params: IndexParams) -> StorageResult<()> {
        if self.indexes.contains_key(name) {
            return Err(StorageError::constraint(format!(
                "index '{name}' already exists"
            )));
        }
        let mut index = IndexImage::new(params);
        for (primary, bytes) in &self.records {
            let record = from_cbor(bytes)?;
            for index_key in index.keys_for(&record) {
                if index.params.unique && index.has_other_owner(&index_key, primary) {
                    return Err(StorageError::constraint(format!(
                        "existing records violate unique index '{name}'"
                    )));
                }
                index.entries.insert((index_key, primary.clone()));
            }
        }
        self.indexes.insert(name.to_string(), index);
        Ok(())
    }
}
