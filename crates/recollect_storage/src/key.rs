//! Keys and key ranges.

use crate::error::{StorageError, StorageResult};
use recollect_codec::Value;
use std::ops::Bound;

/// A record or index key.
///
/// Keys are totally ordered: every integer sorts before every text, every
/// text before every byte string, and byte strings before arrays. Arrays
/// compare element by element.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    /// Integer key.
    Integer(i64),
    /// Text key.
    Text(String),
    /// Binary key.
    Bytes(Vec<u8>),
    /// Compound key.
    Array(Vec<Key>),
}

impl Key {
    /// The smallest possible key.
    pub const MIN: Key = Key::Integer(i64::MIN);

    /// Converts a document value into a key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] for null, booleans, maps and
    /// regular expressions, or arrays containing them.
    pub fn from_value(value: &Value) -> StorageResult<Self> {
        match value {
            Value::Integer(n) => Ok(Key::Integer(*n)),
            Value::Text(s) => Ok(Key::Text(s.clone())),
            Value::Bytes(b) => Ok(Key::Bytes(b.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_value)
                .collect::<StorageResult<_>>()
                .map(Key::Array),
            other => Err(StorageError::invalid_key(format!(
                "a {} cannot be used as a key",
                other.type_name()
            ))),
        }
    }

    /// Converts this key back into a document value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Key::Integer(n) => Value::Integer(*n),
            Key::Text(s) => Value::Text(s.clone()),
            Key::Bytes(b) => Value::Bytes(b.clone()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Integer(n)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Integer(i64::from(n))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

/// A contiguous range of keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Bound<Key>,
    upper: Bound<Key>,
}

impl KeyRange {
    /// Every key.
    #[must_use]
    pub fn all() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    /// Exactly one key.
    #[must_use]
    pub fn only(key: Key) -> Self {
        Self {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        }
    }

    /// Keys at or above `key` (strictly above when `open`).
    #[must_use]
    pub fn lower_bound(key: Key, open: bool) -> Self {
        Self {
            lower: if open {
                Bound::Excluded(key)
            } else {
                Bound::Included(key)
            },
            upper: Bound::Unbounded,
        }
    }

    /// Keys between two bounds.
    #[must_use]
    pub fn bounded(lower: Bound<Key>, upper: Bound<Key>) -> Self {
        Self { lower, upper }
    }

    /// The lower bound.
    #[must_use]
    pub fn lower(&self) -> Bound<&Key> {
        self.lower.as_ref()
    }

    /// Whether `key` is above the lower bound.
    #[must_use]
    pub fn above_lower(&self, key: &Key) -> bool {
        match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(lo) => key >= lo,
            Bound::Excluded(lo) => key > lo,
        }
    }

    /// Whether `key` is below the upper bound.
    #[must_use]
    pub fn below_upper(&self, key: &Key) -> bool {
        match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(hi) => key <= hi,
            Bound::Excluded(hi) => key < hi,
        }
    }

    /// Whether `key` lies in the range.
    #[must_use]
    pub fn contains(&self, key: &Key) -> bool {
        self.above_lower(key) && self.below_upper(key)
    }
}

impl Default for KeyRange {
    fn default() -> Self {
        Self::all()
    }
}
