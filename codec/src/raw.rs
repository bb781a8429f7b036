//! Pass-through codecs for plain text and raw bytes.

use crate::{Codec, CodecError, CodecResult};

/// Stores UTF-8 strings as their bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl Codec for StringCodec {
    type Value = String;

    fn encode(&self, value: &String) -> CodecResult<Vec<u8>> {
        Ok(value.as_bytes().to_vec())
    }

    fn decode(&self, data: &[u8]) -> CodecResult<String> {
        String::from_utf8(data.to_vec()).map_err(|e| CodecError::decode(self.name(), e))
    }

    fn name(&self) -> &'static str {
        "string"
    }
}

/// Stores bytes unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
    type Value = Vec<u8>;

    fn encode(&self, value: &Vec<u8>) -> CodecResult<Vec<u8>> {
        Ok(value.clone())
    }

    fn decode(&self, data: &[u8]) -> CodecResult<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn name(&self) -> &'static str {
        "raw"
    }
}
