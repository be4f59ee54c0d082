//! Canonical CBOR decoder.

use crate::encoder::{
    MAJOR_ARRAY, MAJOR_BYTES, MAJOR_MAP, MAJOR_NEGATIVE, MAJOR_TAG, MAJOR_TEXT, MAJOR_UNSIGNED,
    MAX_NESTING_DEPTH, TAG_REGEX,
};
use crate::error::{CodecError, CodecResult};
use crate::pattern::{Pattern, PatternFlags};
use crate::value::Value;
use std::cmp::Ordering;

/// Largest element count accepted for arrays and maps.
const MAX_CONTAINER_ELEMENTS: u64 = 16 * 1024 * 1024;

/// Largest byte or text string accepted.
const MAX_BYTES_LENGTH: u64 = 256 * 1024 * 1024;

/// Decode exactly one value from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not canonical CBOR, contain a float or
/// an indefinite-length item, or have bytes left over after the value.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let mut decoder = CanonicalDecoder::new(bytes);
    let value = decoder.decode()?;
    if !decoder.is_empty() {
        return Err(CodecError::decoding_failed(format!(
            "{} trailing bytes after value",
            decoder.remaining().len()
        )));
    }
    Ok(value)
}

/// A validating CBOR decoder over a byte slice.
///
/// Rejects non-shortest heads, unsorted or duplicate map keys, floats and
/// indefinite lengths. Tag 35 decodes to [`Value::Regex`]; other tags are
/// stripped and their content decoded in place.
pub struct CanonicalDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> CanonicalDecoder<'a> {
    /// Create a new decoder for the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            depth: 0,
        }
    }

    /// Decode the next value.
    ///
    /// # Errors
    ///
    /// Fails on malformed or non-canonical input.
    pub fn decode(&mut self) -> CodecResult<Value> {
        let initial = self.read_byte()?;
        let major = initial >> 5;
        let info = initial & 0x1f;

        match major {
            MAJOR_UNSIGNED => {
                let n = self.read_argument(info)?;
                i64::try_from(n).map(Value::Integer).map_err(|_| {
                    CodecError::unsupported_type(format!("unsigned integer {n} exceeds i64"))
                })
            }
            MAJOR_NEGATIVE => {
                let n = self.read_argument(info)?;
                i64::try_from(n)
                    .map(|n| Value::Integer(-1 - n))
                    .map_err(|_| CodecError::unsupported_type("negative integer below i64::MIN"))
            }
            MAJOR_BYTES => {
                let len = self.read_length(info, MAX_BYTES_LENGTH)?;
                Ok(Value::Bytes(self.read_bytes(len)?.to_vec()))
            }
            MAJOR_TEXT => self.read_text(info).map(Value::Text),
            MAJOR_ARRAY => {
                let len = self.read_length(info, MAX_CONTAINER_ELEMENTS)?;
                self.enter()?;
                let mut items = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    items.push(self.decode()?);
                }
                self.depth -= 1;
                Ok(Value::Array(items))
            }
            MAJOR_MAP => {
                let len = self.read_length(info, MAX_CONTAINER_ELEMENTS)?;
                self.enter()?;
                let map = self.read_map(len)?;
                self.depth -= 1;
                Ok(map)
            }
            MAJOR_TAG => {
                let tag = self.read_argument(info)?;
                if tag == TAG_REGEX {
                    self.read_pattern().map(Value::Regex)
                } else {
                    self.decode()
                }
            }
            _ => self.read_simple(info),
        }
    }

    /// Check if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Get remaining bytes.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    fn enter(&mut self) -> CodecResult<()> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(CodecError::invalid_structure(format!(
                "containers nested deeper than {MAX_NESTING_DEPTH}"
            )));
        }
        self.depth += 1;
        Ok(())
    }

    fn read_byte(&mut self) -> CodecResult<u8> {
        let byte = *self.data.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(CodecError::UnexpectedEof)?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_be<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_argument(&mut self, info: u8) -> CodecResult<u64> {
        let (value, floor) = match info {
            0..=23 => return Ok(u64::from(info)),
            24 => (u64::from(self.read_byte()?), 24),
            25 => (u64::from(u16::from_be_bytes(self.read_be()?)), 0x100),
            26 => (u64::from(u32::from_be_bytes(self.read_be()?)), 0x1_0000),
            27 => (u64::from_be_bytes(self.read_be()?), 0x1_0000_0000),
            31 => return Err(CodecError::IndefiniteLengthForbidden),
            _ => return Err(CodecError::invalid_structure("reserved additional info")),
        };
        if value < floor {
            return Err(CodecError::invalid_structure(
                "non-canonical: value could be encoded in fewer bytes",
            ));
        }
        Ok(value)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read_length(&mut self, info: u8, max: u64) -> CodecResult<usize> {
        let claimed = self.read_argument(info)?;
        if claimed > max {
            return Err(CodecError::SizeLimitExceeded {
                claimed,
                max_allowed: max,
            });
        }
        Ok(claimed as usize)
    }

    fn read_text(&mut self, info: u8) -> CodecResult<String> {
        let len = self.read_length(info, MAX_BYTES_LENGTH)?;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    fn read_map(&mut self, len: usize) -> CodecResult<Value> {
        let data = self.data;
        let mut pairs = Vec::with_capacity(len.min(1024));
        let mut prev_key: Option<&'a [u8]> = None;
        for _ in 0..len {
            let start = self.pos;
            let key = self.decode()?;
            let key_bytes = &data[start..self.pos];
            if let Some(prev) = prev_key {
                let order = prev.len().cmp(&key_bytes.len()).then_with(|| prev.cmp(key_bytes));
                if order != Ordering::Less {
                    return Err(CodecError::invalid_structure(
                        "non-canonical: map keys not in sorted order",
                    ));
                }
            }
            prev_key = Some(key_bytes);
            let value = self.decode()?;
            pairs.push((key, value));
        }
        Ok(Value::Map(pairs))
    }

    /// Reads the content of a tag 35 item: `[source, flags]` or bare source.
    fn read_pattern(&mut self) -> CodecResult<Pattern> {
        let initial = self.read_byte()?;
        let major = initial >> 5;
        let info = initial & 0x1f;
        match major {
            MAJOR_TEXT => Ok(Pattern::new(self.read_text(info)?)),
            MAJOR_ARRAY if info == 2 => {
                let source = self.read_tagged_text()?;
                let flags = PatternFlags::parse(&self.read_tagged_text()?)?;
                Ok(Pattern::with_flags(source, flags))
            }
            _ => Err(CodecError::invalid_pattern(
                "tag 35 must wrap a text or [source, flags] array",
            )),
        }
    }

    fn read_tagged_text(&mut self) -> CodecResult<String> {
        let initial = self.read_byte()?;
        if initial >> 5 != MAJOR_TEXT {
            return Err(CodecError::invalid_pattern("pattern parts must be text"));
        }
        self.read_text(initial & 0x1f)
    }

    fn read_simple(&mut self, info: u8) -> CodecResult<Value> {
        match info {
            20 => Ok(Value::Bool(false)),
            21 => Ok(Value::Bool(true)),
            // undefined decodes as null
            22 | 23 => Ok(Value::Null),
            24 => {
                let simple = self.read_byte()?;
                if simple < 32 {
                    Err(CodecError::invalid_structure(
                        "non-canonical: simple value should use direct encoding",
                    ))
                } else {
                    Err(CodecError::unsupported_type(format!("simple value {simple}")))
                }
            }
            25..=27 => Err(CodecError::FloatForbidden),
            31 => Err(CodecError::invalid_structure("break without indefinite")),
            28..=30 => Err(CodecError::invalid_structure("reserved additional info")),
            _ => Err(CodecError::unsupported_type(format!("simple value {info}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::to_canonical_cbor;

    #[test]
    fn scalars() {
        assert_eq!(from_cbor(&[0xf6]).unwrap(), Value::Null);
        assert_eq!(from_cbor(&[0xf7]).unwrap(), Value::Null);
        assert_eq!(from_cbor(&[0xf5]).unwrap(), Value::Bool(true));
        assert_eq!(from_cbor(&[0x19, 0x01, 0x00]).unwrap(), Value::Integer(256));
        assert_eq!(from_cbor(&[0x38, 99]).unwrap(), Value::Integer(-100));
        assert_eq!(
            from_cbor(&[0x62, b'h', b'i']).unwrap(),
            Value::Text("hi".to_string())
        );
    }

    #[test]
    fn integer_out_of_range() {
        assert!(matches!(
            from_cbor(&[0x1b, 0x80, 0, 0, 0, 0, 0, 0, 0]),
            Err(CodecError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn map_with_text_keys() {
        assert_eq!(
            from_cbor(&[0xa1, 0x61, b'a', 0x01]).unwrap(),
            Value::object([("a", Value::Integer(1))])
        );
    }

    #[test]
    fn reject_float() {
        assert!(matches!(
            from_cbor(&[0xf9, 0x00, 0x00]),
            Err(CodecError::FloatForbidden)
        ));
        assert!(matches!(
            from_cbor(&[0xfb, 0, 0, 0, 0, 0, 0, 0, 0]),
            Err(CodecError::FloatForbidden)
        ));
    }

    #[test]
    fn reject_indefinite_length() {
        assert!(matches!(
            from_cbor(&[0x9f, 0x01, 0xff]),
            Err(CodecError::IndefiniteLengthForbidden)
        ));
        assert!(matches!(
            from_cbor(&[0x7f, 0x61, b'a', 0xff]),
            Err(CodecError::IndefiniteLengthForbidden)
        ));
    }

    #[test]
    fn reject_non_shortest_head() {
        assert!(matches!(
            from_cbor(&[0x18, 23]),
            Err(CodecError::InvalidStructure { .. })
        ));
        assert!(matches!(
            from_cbor(&[0x19, 0x00, 0xff]),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn reject_unsorted_and_duplicate_keys() {
        assert!(matches!(
            from_cbor(&[0xa2, 0x61, b'b', 0x01, 0x61, b'a', 0x02]),
            Err(CodecError::InvalidStructure { .. })
        ));
        assert!(matches!(
            from_cbor(&[0xa2, 0x61, b'a', 0x01, 0x61, b'a', 0x02]),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn reject_trailing_bytes_and_eof() {
        assert!(matches!(
            from_cbor(&[0x01, 0x02]),
            Err(CodecError::DecodingFailed { .. })
        ));
        assert!(matches!(from_cbor(&[]), Err(CodecError::UnexpectedEof)));
        assert!(matches!(
            from_cbor(&[0x43, 1]),
            Err(CodecError::UnexpectedEof)
        ));
    }

    #[test]
    fn invalid_utf8_rejected() {
        assert!(matches!(
            from_cbor(&[0x62, 0xff, 0xfe]),
            Err(CodecError::InvalidUtf8)
        ));
    }

    #[test]
    fn regex_tag_forms() {
        let bare = from_cbor(&[0xd8, 35, 0x62, b'a', b'b']).unwrap();
        assert_eq!(bare, Value::Regex(Pattern::new("ab")));

        let pattern = Pattern::with_flags("^x", PatternFlags::parse("gm").unwrap());
        let bytes = to_canonical_cbor(&Value::Regex(pattern.clone())).unwrap();
        assert_eq!(from_cbor(&bytes).unwrap(), Value::Regex(pattern));

        assert!(matches!(
            from_cbor(&[0xd8, 35, 0x01]),
            Err(CodecError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn unknown_tags_are_stripped() {
        // tag 1 (epoch time) around an integer
        assert_eq!(from_cbor(&[0xc1, 0x05]).unwrap(), Value::Integer(5));
    }

    #[test]
    fn oversized_length_rejected() {
        assert!(matches!(
            from_cbor(&[0x9b, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]),
            Err(CodecError::SizeLimitExceeded { .. })
        ));
    }
}
