//! Canonical CBOR encoder.

use crate::error::{CodecError, CodecResult};
use crate::pattern::Pattern;
use crate::value::Value;

/// CBOR tag for regular expressions (RFC 8949 §3.4, tag 35).
pub(crate) const TAG_REGEX: u64 = 35;

/// Deepest container nesting either direction of the codec accepts.
pub(crate) const MAX_NESTING_DEPTH: usize = 256;

pub(crate) const MAJOR_UNSIGNED: u8 = 0;
pub(crate) const MAJOR_NEGATIVE: u8 = 1;
pub(crate) const MAJOR_BYTES: u8 = 2;
pub(crate) const MAJOR_TEXT: u8 = 3;
pub(crate) const MAJOR_ARRAY: u8 = 4;
pub(crate) const MAJOR_MAP: u8 = 5;
pub(crate) const MAJOR_TAG: u8 = 6;

/// Encode a value to canonical CBOR bytes.
///
/// Output follows RFC 8949 §4.2.1: shortest-form heads, definite lengths
/// only, and map entries ordered by their encoded keys (length first, then
/// bytewise). Regular expressions are written as tag 35 over a two-element
/// array `[source, flags]`.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if containers nest deeper than the
/// codec allows.
pub fn to_canonical_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut encoder = CanonicalEncoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

/// A canonical CBOR encoder writing into an owned buffer.
#[derive(Debug, Default)]
pub struct CanonicalEncoder {
    buffer: Vec<u8>,
    depth: usize,
}

impl CanonicalEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            depth: 0,
        }
    }

    /// Append the encoding of `value` to the buffer.
    ///
    /// # Errors
    ///
    /// Fails if containers nest too deeply.
    pub fn encode(&mut self, value: &Value) -> CodecResult<()> {
        match value {
            Value::Null => self.buffer.push(0xf6),
            Value::Bool(false) => self.buffer.push(0xf4),
            Value::Bool(true) => self.buffer.push(0xf5),
            Value::Integer(n) => self.write_integer(*n),
            Value::Bytes(bytes) => {
                self.write_head(MAJOR_BYTES, bytes.len() as u64);
                self.buffer.extend_from_slice(bytes);
            }
            Value::Text(text) => self.write_text(text),
            Value::Regex(pattern) => self.write_pattern(pattern),
            Value::Array(items) => {
                self.enter()?;
                self.write_head(MAJOR_ARRAY, items.len() as u64);
                for item in items {
                    self.encode(item)?;
                }
                self.depth -= 1;
            }
            Value::Map(pairs) => {
                self.enter()?;
                self.write_map(pairs)?;
                self.depth -= 1;
            }
        }
        Ok(())
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    fn enter(&mut self) -> CodecResult<()> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(CodecError::encoding_failed(format!(
                "containers nested deeper than {MAX_NESTING_DEPTH}"
            )));
        }
        self.depth += 1;
        Ok(())
    }

    #[allow(clippy::cast_sign_loss)]
    fn write_integer(&mut self, n: i64) {
        if n >= 0 {
            self.write_head(MAJOR_UNSIGNED, n as u64);
        } else {
            // -1 - n is in [0, i64::MAX] for every negative n
            self.write_head(MAJOR_NEGATIVE, (-1 - n) as u64);
        }
    }

    fn write_text(&mut self, text: &str) {
        self.write_head(MAJOR_TEXT, text.len() as u64);
        self.buffer.extend_from_slice(text.as_bytes());
    }

    fn write_pattern(&mut self, pattern: &Pattern) {
        self.write_head(MAJOR_TAG, TAG_REGEX);
        self.write_head(MAJOR_ARRAY, 2);
        self.write_text(pattern.source());
        self.write_text(&pattern.flags().as_string());
    }

    fn write_map(&mut self, pairs: &[(Value, Value)]) -> CodecResult<()> {
        let mut entries = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let mut key_encoder = CanonicalEncoder {
                buffer: Vec::new(),
                depth: self.depth,
            };
            key_encoder.encode(key)?;
            entries.push((key_encoder.into_bytes(), value));
        }
        entries.sort_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| a.0.cmp(&b.0)));

        self.write_head(MAJOR_MAP, entries.len() as u64);
        for (key_bytes, value) in entries {
            self.buffer.extend_from_slice(&key_bytes);
            self.encode(value)?;
        }
        Ok(())
    }

    /// Writes a major type and argument using the shortest head.
    #[allow(clippy::cast_possible_truncation)]
    fn write_head(&mut self, major: u8, arg: u64) {
        let mt = major << 5;
        if arg < 24 {
            self.buffer.push(mt | arg as u8);
        } else if arg <= u64::from(u8::MAX) {
            self.buffer.extend_from_slice(&[mt | 24, arg as u8]);
        } else if arg <= u64::from(u16::MAX) {
            self.buffer.push(mt | 25);
            self.buffer.extend_from_slice(&(arg as u16).to_be_bytes());
        } else if arg <= u64::from(u32::MAX) {
            self.buffer.push(mt | 26);
            self.buffer.extend_from_slice(&(arg as u32).to_be_bytes());
        } else {
            self.buffer.push(mt | 27);
            self.buffer.extend_from_slice(&arg.to_be_bytes());
        }
    }
}
