//! Dotted field paths.
//!
//! A keypath such as `profile.address.city` names a value nested inside a
//! document. Segments are separated by `.`; a segment containing a literal
//! dot writes it as `\.`. Any other backslash is kept as-is.
//!
//! ```
//! use recollect_codec::{Keypath, Value};
//!
//! let path: Keypath = "it.can.skip\\.escaped.delimiters".parse().unwrap();
//! assert_eq!(path.segments(), ["it", "can", "skip.escaped", "delimiters"]);
//!
//! let mut doc = Value::empty_map();
//! recollect_codec::keypath::set(&mut doc, &"a.b".parse().unwrap(), Value::Integer(1)).unwrap();
//! assert_eq!(recollect_codec::keypath::get(&doc, &"a.b".parse().unwrap()), Some(&Value::Integer(1)));
//! ```

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

const DELIMITER: char = '.';
const ESCAPE: char = '\\';

/// A parsed dotted path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Keypath {
    segments: Vec<String>,
}

impl Keypath {
    /// Parses a dotted path, honoring `\.` escapes.
    ///
    /// Parsing never fails; the empty string is a single empty segment.
    #[must_use]
    pub fn parse(path: &str) -> Self {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = path.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                ESCAPE if chars.peek() == Some(&DELIMITER) => {
                    current.push(DELIMITER);
                    chars.next();
                }
                DELIMITER => segments.push(std::mem::take(&mut current)),
                other => current.push(other),
            }
        }
        segments.push(current);
        Self { segments }
    }

    /// Builds a keypath from raw segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns the escaped dotted form.
    #[must_use]
    pub fn encode(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.replace(DELIMITER, "\\."))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Returns a new keypath with `segment` in front.
    #[must_use]
    pub fn prefixed(&self, segment: impl Into<String>) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.push(segment.into());
        segments.extend(self.segments.iter().cloned());
        Self { segments }
    }

    /// Returns the first segment.
    #[must_use]
    pub fn first(&self) -> &str {
        self.segments.first().map_or("", String::as_str)
    }
}

impl FromStr for Keypath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for Keypath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn array_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

/// Resolves `path` inside `value`.
///
/// Maps are indexed by text key and arrays by decimal position. Returns
/// `None` as soon as a step is missing or lands on a scalar.
pub fn get<'v>(value: &'v Value, path: &Keypath) -> Option<&'v Value> {
    path.segments.iter().try_fold(value, |node, segment| match node {
        Value::Map(_) => node.get(segment),
        Value::Array(items) => array_index(segment).and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Writes `new_value` at `path`, creating intermediate maps as needed.
///
/// # Errors
///
/// Returns [`CodecError::KeypathConflict`] if a step lands on a scalar, or on
/// an array with a non-numeric segment or an index past its end. An index
/// equal to the array length appends.
pub fn set(value: &mut Value, path: &Keypath, new_value: Value) -> CodecResult<()> {
    let conflict = |reason: String| CodecError::keypath_conflict(path.encode(), reason);
    let Some((last, parents)) = path.segments.split_last() else {
        return Err(conflict("empty keypath".to_string()));
    };

    let mut node = value;
    for segment in parents {
        node = match node {
            Value::Map(_) => {
                if node.get(segment).is_none() {
                    node.insert(segment.clone(), Value::empty_map());
                }
                node.get_mut(segment)
                    .ok_or_else(|| conflict(format!("lost segment '{segment}'")))?
            }
            Value::Array(items) => {
                let index = array_index(segment)
                    .ok_or_else(|| conflict(format!("'{segment}' is not an array index")))?;
                if index == items.len() {
                    items.push(Value::empty_map());
                }
                items
                    .get_mut(index)
                    .ok_or_else(|| conflict(format!("index {index} is past the end")))?
            }
            other => {
                return Err(conflict(format!(
                    "segment '{segment}' lands on a {}",
                    other.type_name()
                )))
            }
        };
    }

    match node {
        Value::Map(_) => {
            node.insert(last.clone(), new_value);
            Ok(())
        }
        Value::Array(items) => {
            let index = array_index(last)
                .ok_or_else(|| conflict(format!("'{last}' is not an array index")))?;
            match index.cmp(&items.len()) {
                std::cmp::Ordering::Less => items[index] = new_value,
                std::cmp::Ordering::Equal => items.push(new_value),
                std::cmp::Ordering::Greater => {
                    return Err(conflict(format!("index {index} is past the end")))
                }
            }
            Ok(())
        }
        other => Err(conflict(format!(
            "segment '{last}' lands on a {}",
            other.type_name()
        ))),
    }
}
