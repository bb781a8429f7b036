//! Error types for coordkv operations.

use coordkv_codec::CodecError;
use thiserror::Error;

/// Boxed error returned by a CAS transform.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for KV operations.
pub type KVResult<T> = Result<T, KVError>;

/// Errors that can occur in KV operations.
///
/// A lost compare-and-swap race is not an error: `cas` returns `Ok(false)`.
#[derive(Error, Debug)]
pub enum KVError {
    /// The value could not be encoded; nothing was written.
    #[error("kv: encode: {0}")]
    Encode(#[source] CodecError),

    /// The stored payload is malformed for the current codec.
    #[error("kv: decode: {0}")]
    Decode(#[source] CodecError),

    /// The backend could not be reached.
    #[error("kv: backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with a non-success status.
    #[error("kv: backend error (status={status}): {message}")]
    Backend { status: u16, message: String },

    /// The backend answered with a body we could not understand.
    #[error("kv: protocol error: {0}")]
    Protocol(String),

    /// The key does not exist.
    ///
    /// Not produced by the bundled backends or the facade, which report a
    /// missing key as `Ok(None)`. Available to third-party [`Backend`]
    /// implementations that need it internally.
    ///
    /// [`Backend`]: crate::Backend
    #[error("kv: not found: {0}")]
    NotFound(String),

    /// The CAS transform failed; nothing was written.
    #[error("kv: transform: {0}")]
    Transform(#[source] BoxError),

    #[error("kv: invalid key: {0}")]
    InvalidKey(String),

    #[error("kv: invalid configuration: {0}")]
    Config(String),

    /// The store was closed.
    #[error("kv: closed")]
    Closed,
}

impl KVError {
    /// Creates a backend status error.
    pub fn backend(status: u16, message: impl Into<String>) -> Self {
        KVError::Backend {
            status,
            message: message.into(),
        }
    }

    /// Returns true if retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            KVError::Unavailable(_) | KVError::Protocol(_) | KVError::Decode(_) => true,
            KVError::Backend { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns true if a watch loop must stop on this error.
    pub fn is_terminal(&self) -> bool {
        matches!(self, KVError::Closed | KVError::InvalidKey(_))
    }
}

impl From<reqwest::Error> for KVError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            KVError::Protocol(e.to_string())
        } else if let Some(status) = e.status() {
            KVError::backend(status.as_u16(), e.to_string())
        } else {
            KVError::Unavailable(e.to_string())
        }
    }
}

impl From<serde_json::Error> for KVError {
    fn from(e: serde_json::Error) -> Self {
        KVError::Protocol(e.to_string())
    }
}
