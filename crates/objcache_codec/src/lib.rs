//! # objcache codec
//!
//! Field values and canonical CBOR encoding for objcache.
//!
//! Every record field, identity key, index key component and query selector
//! is a [`Value`]. The canonical encoding guarantees that equal values
//! produce equal bytes, so it doubles as the serialization used for
//! query-shape memoization and as the wire format between sessions and the
//! authority.
//!
//! ## Canonical CBOR Rules
//!
//! - Maps are sorted by key (length-first, then bytewise on encoded keys)
//! - Integers use shortest encoding
//! - No floats, no indefinite-length items
//! - Timestamps are tag 0 over RFC 3339 text with millisecond precision
//!
//! JSON conversion (`from_json`/`to_json`) is provided for fixtures and
//! command-line input.
//!
//! ## Usage
//!
//! ```
//! use objcache_codec::{from_cbor, to_canonical_cbor, Value};
//!
//! let value = Value::map(vec![(Value::from("id"), Value::Integer(42))]);
//! let bytes = to_canonical_cbor(&value);
//! assert_eq!(from_cbor(&bytes).unwrap(), value);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod json;
mod timestamp;
mod value;

pub use decoder::{from_cbor, CanonicalDecoder};
pub use encoder::{to_canonical_cbor, CanonicalEncoder};
pub use error::{CodecError, CodecResult};
pub use json::{from_json, to_json};
pub use timestamp::Timestamp;
pub use value::Value;
