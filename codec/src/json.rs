//! JSON codec.

use std::fmt;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};

use crate::{Codec, CodecError, CodecResult};

/// Encodes values of type `T` as JSON.
///
/// An empty payload decodes to `T::default()`.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Creates a new JSON codec.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JsonCodec<{}>", std::any::type_name::<T>())
    }
}

impl<T> Codec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Default + Send + 'static,
{
    type Value = T;

    fn encode(&self, value: &T) -> CodecResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| CodecError::encode(self.name(), e))
    }

    fn decode(&self, data: &[u8]) -> CodecResult<T> {
        if data.is_empty() {
            return Ok(T::default());
        }
        serde_json::from_slice(data).map_err(|e| CodecError::decode(self.name(), e))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}
