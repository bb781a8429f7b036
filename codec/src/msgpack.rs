//! MessagePack codec.

use std::fmt;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};

use crate::{Codec, CodecError, CodecResult};

/// Encodes values of type `T` as MessagePack.
///
/// Structs are written as maps with field names so payloads survive field
/// reordering. An empty payload decodes to `T::default()`.
pub struct MsgpackCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> MsgpackCodec<T> {
    /// Creates a new MessagePack codec.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for MsgpackCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for MsgpackCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for MsgpackCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MsgpackCodec<{}>", std::any::type_name::<T>())
    }
}

impl<T> Codec for MsgpackCodec<T>
where
    T: Serialize + DeserializeOwned + Default + Send + 'static,
{
    type Value = T;

    fn encode(&self, value: &T) -> CodecResult<Vec<u8>> {
        rmp_serde::to_vec_named(value).map_err(|e| CodecError::encode(self.name(), e))
    }

    fn decode(&self, data: &[u8]) -> CodecResult<T> {
        if data.is_empty() {
            return Ok(T::default());
        }
        rmp_serde::from_slice(data).map_err(|e| CodecError::decode(self.name(), e))
    }

    fn name(&self) -> &'static str {
        "msgpack"
    }
}
