//! Dynamic document value type.

use crate::pattern::Pattern;
use std::cmp::Ordering;

/// A dynamic document value.
///
/// This is the shape of every record, query reference value and key that
/// Recollect handles. Floats are intentionally not supported per the canonical
/// CBOR rules; numbers are 64-bit signed integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (supports full i64 range).
    Integer(i64),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Text string (UTF-8).
    Text(String),
    /// Array of values.
    Array(Vec<Value>),
    /// Map of key-value pairs (keys are sorted for canonical encoding).
    Map(Vec<(Value, Value)>),
    /// Regular expression, encoded as CBOR tag 35.
    Regex(Pattern),
}

impl Value {
    /// Create a map value with sorted keys.
    ///
    /// Keys are sorted by their canonical CBOR encoding (bytewise comparison).
    pub fn map(mut pairs: Vec<(Value, Value)>) -> Self {
        pairs.sort_by(|a, b| a.0.cmp_canonical(&b.0));
        Value::Map(pairs)
    }

    /// Create a map value from text keys.
    pub fn object<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::map(
            pairs
                .into_iter()
                .map(|(k, v)| (Value::Text(k.into()), v))
                .collect(),
        )
    }

    /// Create an empty map.
    #[must_use]
    pub fn empty_map() -> Self {
        Value::Map(Vec::new())
    }

    /// Compare two values for canonical ordering.
    ///
    /// This implements the bytewise comparison of canonical CBOR encodings,
    /// which is required for map key sorting.
    #[allow(clippy::match_same_arms)]
    pub fn cmp_canonical(&self, other: &Self) -> Ordering {
        // First compare by major type
        let self_type = self.major_type();
        let other_type = other.major_type();

        if self_type != other_type {
            return self_type.cmp(&other_type);
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => {
                // Positive (type 0) and negative (type 1) are already separated by
                // major type; within a sign, compare by encoded argument.
                #[allow(clippy::cast_sign_loss)]
                match (a.signum(), b.signum()) {
                    (s1, s2) if s1 >= 0 && s2 >= 0 => {
                        Self::cmp_unsigned_canonical(*a as u64, *b as u64)
                    }
                    (s1, s2) if s1 < 0 && s2 < 0 => {
                        // CBOR encodes -1-n as argument
                        let arg_a = (-1 - *a) as u64;
                        let arg_b = (-1 - *b) as u64;
                        Self::cmp_unsigned_canonical(arg_a, arg_b)
                    }
                    (s1, _) if s1 >= 0 => Ordering::Less,
                    _ => Ordering::Greater,
                }
            }
            (Value::Bytes(a), Value::Bytes(b)) => match a.len().cmp(&b.len()) {
                Ordering::Equal => a.cmp(b),
                ord => ord,
            },
            (Value::Text(a), Value::Text(b)) => match a.len().cmp(&b.len()) {
                Ordering::Equal => a.cmp(b),
                ord => ord,
            },
            (Value::Array(a), Value::Array(b)) => match a.len().cmp(&b.len()) {
                Ordering::Equal => {
                    for (av, bv) in a.iter().zip(b.iter()) {
                        let ord = av.cmp_canonical(bv);
                        if ord != Ordering::Equal {
                            return ord;
                        }
                    }
                    Ordering::Equal
                }
                ord => ord,
            },
            (Value::Map(a), Value::Map(b)) => match a.len().cmp(&b.len()) {
                Ordering::Equal => {
                    for ((ak, av), (bk, bv)) in a.iter().zip(b.iter()) {
                        let key_ord = ak.cmp_canonical(bk);
                        if key_ord != Ordering::Equal {
                            return key_ord;
                        }
                        let val_ord = av.cmp_canonical(bv);
                        if val_ord != Ordering::Equal {
                            return val_ord;
                        }
                    }
                    Ordering::Equal
                }
                ord => ord,
            },
            (Value::Regex(a), Value::Regex(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }

    /// Compare two unsigned integers by their canonical CBOR encoding.
    fn cmp_unsigned_canonical(a: u64, b: u64) -> Ordering {
        let len_a = Self::cbor_uint_encoded_len(a);
        let len_b = Self::cbor_uint_encoded_len(b);

        match len_a.cmp(&len_b) {
            Ordering::Equal => a.cmp(&b),
            ord => ord,
        }
    }

    /// Returns the encoded length (in bytes) of an unsigned integer in CBOR.
    fn cbor_uint_encoded_len(n: u64) -> usize {
        if n <= 23 {
            1
        } else if n <= 0xFF {
            2
        } else if n <= 0xFFFF {
            3
        } else if n <= 0xFFFF_FFFF {
            5
        } else {
            9
        }
    }

    /// Get the CBOR major type for this value.
    fn major_type(&self) -> u8 {
        match self {
            Value::Integer(n) if *n >= 0 => 0,
            Value::Integer(_) => 1,
            Value::Bytes(_) => 2,
            Value::Text(_) => 3,
            Value::Array(_) => 4,
            Value::Map(_) => 5,
            Value::Regex(_) => 6,
            Value::Bool(_) | Value::Null => 7,
        }
    }

    /// Structural equality that ignores map entry order.
    ///
    /// Maps built through [`Value::map`] or decoded from CBOR are already in
    /// canonical order; hand-built `Value::Map`s may not be.
    pub fn structurally_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.structurally_eq(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(key, val)| {
                        b.iter()
                            .find(|(other_key, _)| other_key.structurally_eq(key))
                            .is_some_and(|(_, other_val)| val.structurally_eq(other_val))
                    })
            }
            _ => self == other,
        }
    }

    /// Short name of this value's type, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "text",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Regex(_) => "regex",
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is a map.
    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as bytes, if it is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Get this value as a pattern, if it is a regular expression.
    pub fn as_pattern(&self) -> Option<&Pattern> {
        match self {
            Value::Regex(p) => Some(p),
            _ => None,
        }
    }

    /// Look up a key in this map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(pairs) => pairs
                .iter()
                .find(|(k, _)| k.as_text() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Look up a key in this map value for mutation.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        match self {
            Value::Map(pairs) => pairs
                .iter_mut()
                .find(|(k, _)| k.as_text() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Inserts `value` under a text key, keeping canonical key order.
    ///
    /// Returns the previous value for the key. Has no effect on non-map values.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let Value::Map(pairs) = self else {
            return None;
        };
        let key = Value::Text(key.into());
        match pairs.binary_search_by(|(k, _)| k.cmp_canonical(&key)) {
            Ok(pos) => Some(std::mem::replace(&mut pairs[pos].1, value)),
            Err(pos) => {
                pairs.insert(pos, (key, value));
                None
            }
        }
    }

    /// Removes a text key from this map value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let Value::Map(pairs) = self else {
            return None;
        };
        let pos = pairs.iter().position(|(k, _)| k.as_text() == Some(key))?;
        Some(pairs.remove(pos).1)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<Pattern> for Value {
    fn from(p: Pattern) -> Self {
        Value::Regex(p)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::PatternFlags;

    #[test]
    fn map_keys_are_sorted() {
        let map = Value::map(vec![
            (Value::Text("z".to_string()), Value::Integer(1)),
            (Value::Text("a".to_string()), Value::Integer(2)),
            (Value::Text("m".to_string()), Value::Integer(3)),
        ]);

        if let Value::Map(pairs) = map {
            assert_eq!(pairs[0].0, Value::Text("a".to_string()));
            assert_eq!(pairs[1].0, Value::Text("m".to_string()));
            assert_eq!(pairs[2].0, Value::Text("z".to_string()));
        } else {
            panic!("Expected Map");
        }
    }

    #[test]
    fn integer_ordering() {
        let mut sorted = vec![
            Value::Integer(-1),
            Value::Integer(0),
            Value::Integer(1),
            Value::Integer(-2),
            Value::Integer(2),
        ];
        sorted.sort_by(Value::cmp_canonical);

        assert_eq!(sorted[0], Value::Integer(0));
        assert_eq!(sorted[1], Value::Integer(1));
        assert_eq!(sorted[2], Value::Integer(2));
        assert_eq!(sorted[3], Value::Integer(-1));
        assert_eq!(sorted[4], Value::Integer(-2));
    }

    #[test]
    fn insert_keeps_canonical_order() {
        let mut map = Value::object([("name", Value::from("a"))]);
        assert_eq!(map.insert("_id", Value::Integer(1)), None);
        assert_eq!(map.insert("zz", Value::Null), None);
        assert_eq!(map.insert("name", Value::from("b")), Some(Value::from("a")));

        let rebuilt = Value::object([
            ("zz", Value::Null),
            ("name", Value::from("b")),
            ("_id", Value::Integer(1)),
        ]);
        assert_eq!(map, rebuilt);
    }

    #[test]
    fn insert_on_scalar_is_noop() {
        let mut scalar = Value::Integer(3);
        assert_eq!(scalar.insert("a", Value::Null), None);
        assert_eq!(scalar, Value::Integer(3));
    }

    #[test]
    fn remove_and_get_mut() {
        let mut map = Value::object([("a", Value::Integer(1)), ("b", Value::Integer(2))]);
        *map.get_mut("a").unwrap() = Value::Integer(10);
        assert_eq!(map.get("a"), Some(&Value::Integer(10)));
        assert_eq!(map.remove("b"), Some(Value::Integer(2)));
        assert_eq!(map.get("b"), None);
    }

    #[test]
    fn structural_equality_ignores_map_order() {
        let sorted = Value::object([("a", Value::Integer(1)), ("b", Value::Integer(2))]);
        let unsorted = Value::Map(vec![
            (Value::from("b"), Value::Integer(2)),
            (Value::from("a"), Value::Integer(1)),
        ]);
        assert_ne!(sorted, unsorted);
        assert!(sorted.structurally_eq(&unsorted));
        assert!(!sorted.structurally_eq(&Value::object([("a", Value::Integer(1))])));
    }

    #[test]
    fn regex_values_compare_by_source_and_flags() {
        let a = Value::Regex(Pattern::new("x+"));
        let b = Value::Regex(Pattern::with_flags("x+", PatternFlags::parse("i").unwrap()));
        assert!(a.structurally_eq(&a.clone()));
        assert!(!a.structurally_eq(&b));
    }

    #[test]
    fn value_accessors() {
        assert!(Value::Null.is_null());
        assert!(!Value::Bool(true).is_null());
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Integer(42).as_integer(), Some(42));
        assert_eq!(Value::Text("hello".to_string()).as_text(), Some("hello"));
        assert_eq!(Value::Bytes(vec![1, 2, 3]).as_bytes(), Some(&[1, 2, 3][..]));
        assert_eq!(Value::empty_map().type_name(), "map");
    }

    #[test]
    fn from_impls() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(42i64), Value::Integer(42));
        assert_eq!(Value::from("hello"), Value::Text("hello".to_string()));
        assert_eq!(Value::from(vec![1u8, 2, 3]), Value::Bytes(vec![1, 2, 3]));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(()), Value::Null);
    }
}
