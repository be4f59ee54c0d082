//! On-disk images for [`super::MemoryEngine::open_dir`].
//!
//! ```text
//! <dir>/
//! ├─ LOCK            # advisory lock, one engine per directory
//! └─ <name>.rcdb     # canonical CBOR image of database <name>
//! ```
//!
//! An image is rewritten whole on every commit through a temporary file and
//! a rename, so a crash leaves either the old or the new image.

use super::image::{DatabaseImage, StoreImage};
use crate::engine::{IndexParams, StoreParams};
use crate::error::{StorageError, StorageResult};
use crate::key::Key;
use fs2::FileExt;
use recollect_codec::{from_cbor, to_canonical_cbor, Keypath, Value};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const IMAGE_EXT: &str = "rcdb";
const TEMP_EXT: &str = "rcdb.tmp";

/// A locked directory of database images.
#[derive(Debug)]
pub(crate) struct DataDir {
    path: PathBuf,
    _lock_file: File,
}

impl DataDir {
    pub(crate) fn open(path: &Path) -> StorageResult<Self> {
        fs::create_dir_all(path)?;
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }
        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    fn image_path(&self, name: &str) -> PathBuf {
        self.path
            .join(format!("{}.{IMAGE_EXT}", encode_file_name(name)))
    }

    pub(crate) fn load(&self, name: &str) -> StorageResult<Option<DatabaseImage>> {
        let path = self.image_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        let value = from_cbor(&bytes)?;
        image_from_value(&value).map(Some)
    }

    pub(crate) fn save(&self, name: &str, image: &DatabaseImage) -> StorageResult<()> {
        let bytes = to_canonical_cbor(&image_to_value(image))?;
        let temp = self
            .path
            .join(format!("{}.{TEMP_EXT}", encode_file_name(name)));
        let mut file = File::create(&temp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp, self.image_path(name))?;
        Ok(())
    }

    pub(crate) fn remove(&self, name: &str) -> StorageResult<()> {
        match fs::remove_file(self.image_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn names(&self) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(IMAGE_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(decode_file_name(stem)?);
            }
        }
        Ok(names)
    }
}

/// Escapes everything outside `[A-Za-z0-9_-]` as `%XX`.
fn encode_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_file_name(stem: &str) -> StorageResult<String> {
    let corrupt = || StorageError::Corrupted(format!("bad image file name '{stem}'"));
    let mut bytes = Vec::with_capacity(stem.len());
    let mut rest = stem.as_bytes();
    while let Some((&first, tail)) = rest.split_first() {
        if first == b'%' {
            let hex = tail.get(..2).ok_or_else(corrupt)?;
            let hex = std::str::from_utf8(hex).map_err(|_| corrupt())?;
            bytes.push(u8::from_str_radix(hex, 16).map_err(|_| corrupt())?);
            rest = &tail[2..];
        } else {
            bytes.push(first);
            rest = tail;
        }
    }
    String::from_utf8(bytes).map_err(|_| corrupt())
}

fn image_to_value(image: &DatabaseImage) -> Value {
    let stores = image
        .stores
        .iter()
        .map(|(name, store)| (Value::from(name.as_str()), store_to_value(store)))
        .collect();
    Value::object([
        ("version", Value::Integer(i64::try_from(image.version).unwrap_or(i64::MAX))),
        ("stores", Value::map(stores)),
    ])
}

fn store_to_value(store: &StoreImage) -> Value {
    let records = store
        .records
        .iter()
        .map(|(key, bytes)| Value::Array(vec![key.to_value(), Value::Bytes(bytes.to_vec())]))
        .collect();
    let indexes = store
        .indexes
        .iter()
        .map(|(name, index)| {
            (
                Value::from(name.as_str()),
                Value::object([
                    ("keyPath", Value::from(index.params.key_path.encode())),
                    ("unique", Value::Bool(index.params.unique)),
                    ("multiEntry", Value::Bool(index.params.multi_entry)),
                ]),
            )
        })
        .collect();
    Value::object([
        (
            "keyPath",
            store
                .params
                .key_path
                .as_ref()
                .map_or(Value::Null, |p| Value::from(p.encode())),
        ),
        ("autoIncrement", Value::Bool(store.params.auto_increment)),
        ("nextKey", Value::Integer(store.next_key)),
        ("records", Value::Array(records)),
        ("indexes", Value::map(indexes)),
    ])
}

fn field<'v>(value: &'v Value, name: &str) -> StorageResult<&'v Value> {
    value
        .get(name)
        .ok_or_else(|| StorageError::Corrupted(format!("image is missing '{name}'")))
}

fn text_field(value: &Value, name: &str) -> StorageResult<String> {
    field(value, name)?
        .as_text()
        .map(str::to_owned)
        .ok_or_else(|| StorageError::Corrupted(format!("'{name}' is not text")))
}

fn bool_field(value: &Value, name: &str) -> StorageResult<bool> {
    field(value, name)?
        .as_bool()
        .ok_or_else(|| StorageError::Corrupted(format!("'{name}' is not a boolean")))
}

fn int_field(value: &Value, name: &str) -> StorageResult<i64> {
    field(value, name)?
        .as_integer()
        .ok_or_else(|| StorageError::Corrupted(format!("'{name}' is not an integer")))
}

fn image_from_value(value: &Value) -> StorageResult<DatabaseImage> {
    let version = u64::try_from(int_field(value, "version")?)
        .map_err(|_| StorageError::Corrupted("negative version".to_string()))?;
    let entries = field(value, "stores")?
        .as_map()
        .ok_or_else(|| StorageError::Corrupted("'stores' is not a map".to_string()))?;

    let mut stores = BTreeMap::new();
    for (name, store) in entries {
        let name = name
            .as_text()
            .ok_or_else(|| StorageError::Corrupted("store name is not text".to_string()))?;
        stores.insert(name.to_string(), store_from_value(store)?);
    }
    Ok(DatabaseImage { version, stores })
}

fn store_from_value(value: &Value) -> StorageResult<StoreImage> {
    let key_path = match field(value, "keyPath")? {
        Value::Null => None,
        Value::Text(path) => Some(Keypath::parse(path)),
        _ => return Err(StorageError::Corrupted("bad store keyPath".to_string())),
    };
    let mut store = StoreImage::new(StoreParams {
        key_path,
        auto_increment: bool_field(value, "autoIncrement")?,
    });
    store.next_key = int_field(value, "nextKey")?;

    let records = field(value, "records")?
        .as_array()
        .ok_or_else(|| StorageError::Corrupted("'records' is not an array".to_string()))?;
    for record in records {
        match record.as_array() {
            Some([key, Value::Bytes(bytes)]) => {
                store
                    .records
                    .insert(Key::from_value(key)?, bytes.clone().into());
            }
            _ => return Err(StorageError::Corrupted("bad record entry".to_string())),
        }
    }

    let indexes = field(value, "indexes")?
        .as_map()
        .ok_or_else(|| StorageError::Corrupted("'indexes' is not a map".to_string()))?;
    for (name, index) in indexes {
        let name = name
            .as_text()
            .ok_or_else(|| StorageError::Corrupted("index name is not text".to_string()))?;
        let params = IndexParams {
            key_path: Keypath::parse(&text_field(index, "keyPath")?),
            unique: bool_field(index, "unique")?,
            multi_entry: bool_field(index, "multiEntry")?,
        };
        store.add_index(name, params)?;
    }
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_names_roundtrip() {
        for name in ["plain", "with space", "dots.and/slashes", "ünïcode", ""] {
            let encoded = encode_file_name(name);
            assert!(encoded
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'%'));
            assert_eq!(decode_file_name(&encoded).unwrap(), name);
        }
    }

    #[test]
    fn image_survives_save_and_load() {
        let temp = TempDir::new().unwrap();
        let dir = DataDir::open(temp.path()).unwrap();

        let mut store = StoreImage::new(StoreParams {
            key_path: Some(Keypath::parse("$data._id")),
            auto_increment: true,
        });
        store
            .add_index(
                "$data.name",
                IndexParams {
                    key_path: Keypath::parse("$data.name"),
                    unique: false,
                    multi_entry: false,
                },
            )
            .unwrap();
        let (key, record) = store
            .assign_key(Value::object([(
                "$data",
                Value::object([("name", Value::from("a"))]),
            )]))
            .unwrap();
        store.write(key.clone(), &record, false).unwrap();

        let mut image = DatabaseImage {
            version: 3,
            ..DatabaseImage::default()
        };
        image.stores.insert("people".to_string(), store);
        dir.save("my db", &image).unwrap();

        let loaded = dir.load("my db").unwrap().unwrap();
        assert_eq!(loaded.version, 3);
        let people = loaded.store("people").unwrap();
        assert_eq!(people.next_key, 2);
        assert_eq!(people.read(&key).unwrap(), Some(record));
        assert_eq!(people.indexes["$data.name"].entries.len(), 1);
        assert_eq!(dir.names().unwrap(), vec!["my db".to_string()]);

        dir.remove("my db").unwrap();
        dir.remove("my db").unwrap();
        assert!(dir.load("my db").unwrap().is_none());
    }

    #[test]
    fn second_lock_is_refused() {
        let temp = TempDir::new().unwrap();
        let _first = DataDir::open(temp.path()).unwrap();
        assert!(matches!(
            DataDir::open(temp.path()),
            Err(StorageError::Locked)
        ));
    }
}
