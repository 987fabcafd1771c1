//! Application codecs.
//!
//! The streaming core never looks inside message payloads. A [`Codec`] turns
//! application values into payload bytes and back; decode failures surface as
//! [`RpcError::Decode`] and terminate only the call that received the message.

use bytes::Bytes;

use crate::RpcError;

pub trait Codec: Send + Sync {
    type Value;

    fn encode(&self, value: &Self::Value) -> Bytes;

    fn decode(&self, payload: &[u8]) -> Result<Self::Value, RpcError>;
}

/// UTF-8 text messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Codec;

impl Codec for Utf8Codec {
    type Value = String;

    fn encode(&self, value: &String) -> Bytes {
        Bytes::copy_from_slice(value.as_bytes())
    }

    fn decode(&self, payload: &[u8]) -> Result<String, RpcError> {
        std::str::from_utf8(payload)
            .map(str::to_owned)
            .map_err(|e| RpcError::Decode(e.to_string()))
    }
}

/// Raw bytes, passed through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    type Value = Bytes;

    fn encode(&self, value: &Bytes) -> Bytes {
        value.clone()
    }

    fn decode(&self, payload: &[u8]) -> Result<Bytes, RpcError> {
        Ok(Bytes::copy_from_slice(payload))
    }
}
