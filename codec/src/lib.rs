//! Value codecs for coordkv.
//!
//! A [`Codec`] turns application values into the opaque byte payloads stored
//! in a coordination backend and back again:
//!
//! - [`JsonCodec`]: any serde type, encoded as JSON
//! - [`MsgpackCodec`]: any serde type, encoded as MessagePack
//! - [`StringCodec`]: UTF-8 text
//! - [`RawCodec`]: bytes passed through unchanged
//!
//! Every codec decodes an empty payload into the zero value of its type.
//! Compare-and-swap on a key that does not exist yet relies on this.
//!
//! # Example
//!
//! ```rust
//! use coordkv_codec::{Codec, JsonCodec};
//!
//! let codec = JsonCodec::<Vec<u32>>::new();
//! let bytes = codec.encode(&vec![1, 2, 3]).unwrap();
//! assert_eq!(bytes, b"[1,2,3]");
//! assert_eq!(codec.decode(&bytes).unwrap(), vec![1, 2, 3]);
//! assert!(codec.decode(b"").unwrap().is_empty());
//! ```

mod json;
mod msgpack;
mod raw;

pub use json::JsonCodec;
pub use msgpack::MsgpackCodec;
pub use raw::{RawCodec, StringCodec};

use thiserror::Error;

/// Errors produced while encoding or decoding a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("codec {codec}: encode: {message}")]
    Encode { codec: &'static str, message: String },

    #[error("codec {codec}: decode: {message}")]
    Decode { codec: &'static str, message: String },
}

impl CodecError {
    /// Creates an encode error for the named codec.
    pub fn encode(codec: &'static str, message: impl ToString) -> Self {
        CodecError::Encode {
            codec,
            message: message.to_string(),
        }
    }

    /// Creates a decode error for the named codec.
    pub fn decode(codec: &'static str, message: impl ToString) -> Self {
        CodecError::Decode {
            codec,
            message: message.to_string(),
        }
    }
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Encodes application values to bytes and decodes them back.
///
/// Implementations must round-trip: `decode(encode(v)) == v` for every
/// valid `v`, and `decode(&[])` must return a well-defined zero value
/// rather than an error.
pub trait Codec: Send + Sync + 'static {
    /// The decoded application value.
    type Value: Send + 'static;

    /// Encodes a value into a payload.
    fn encode(&self, value: &Self::Value) -> CodecResult<Vec<u8>>;

    /// Decodes a payload into a value.
    fn decode(&self, data: &[u8]) -> CodecResult<Self::Value>;

    /// Short name used in error messages and logs.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests;
