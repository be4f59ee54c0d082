//! # Recollect Codec
//!
//! The value model shared by every Recollect crate, together with its
//! canonical CBOR encoding and the dotted keypaths used to address fields
//! inside documents.
//!
//! ## Canonical CBOR Rules
//!
//! - Maps are sorted by key (bytewise comparison of encoded keys)
//! - Integers use shortest encoding
//! - No floats
//! - Strings must be UTF-8
//! - No indefinite-length items
//! - Regular expressions use tag 35
//!
//! ## Usage
//!
//! ```
//! use recollect_codec::{from_cbor, to_canonical_cbor, Keypath, Value};
//!
//! let doc = Value::object([("name", Value::from("Ada")), ("age", Value::Integer(36))]);
//! let bytes = to_canonical_cbor(&doc).unwrap();
//! assert_eq!(from_cbor(&bytes).unwrap(), doc);
//!
//! let path = Keypath::parse("name");
//! assert_eq!(recollect_codec::keypath::get(&doc, &path), Some(&Value::from("Ada")));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
pub mod keypath;
mod pattern;
mod serde_impl;
mod value;

pub use decoder::{from_cbor, CanonicalDecoder};
pub use encoder::{to_canonical_cbor, CanonicalEncoder};
pub use error::{CodecError, CodecResult};
pub use keypath::Keypath;
pub use pattern::{Pattern, PatternFlags};
pub use value::Value;

/// Trait for types that can be encoded to canonical CBOR.
pub trait Encode {
    /// Encode this value to canonical CBOR bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Trait for types that can be decoded from CBOR.
pub trait Decode: Sized {
    /// Decode this value from CBOR bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for Value {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_canonical_cbor(self)
    }
}

impl Decode for Value {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}
