//! # Encoded Values
//!
//! Values stored through `set_encoded`/`get_encoded` carry their own binary
//! encoding. Serde types get MessagePack through the `MsgPack` adapter or the
//! `msgpack_*` helpers.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ClientError, ClientResult};

/// Capability to serialize a value to bytes and back.
pub trait CacheValue: Sized {
    fn encode(&self) -> ClientResult<Vec<u8>>;

    fn decode(bytes: &[u8]) -> ClientResult<Self>;
}

/// MessagePack adapter for any serde type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MsgPack<T>(pub T);

impl<T> MsgPack<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: Serialize + DeserializeOwned> CacheValue for MsgPack<T> {
    fn encode(&self) -> ClientResult<Vec<u8>> {
        msgpack_encode(&self.0)
    }

    fn decode(bytes: &[u8]) -> ClientResult<Self> {
        msgpack_decode(bytes).map(MsgPack)
    }
}

impl CacheValue for Vec<u8> {
    fn encode(&self) -> ClientResult<Vec<u8>> {
        Ok(self.clone())
    }

    fn decode(bytes: &[u8]) -> ClientResult<Self> {
        Ok(bytes.to_vec())
    }
}

impl CacheValue for String {
    fn encode(&self) -> ClientResult<Vec<u8>> {
        Ok(self.as_bytes().to_vec())
    }

    fn decode(bytes: &[u8]) -> ClientResult<Self> {
        String::from_utf8(bytes.to_vec()).map_err(|err| ClientError::Encoding(err.to_string()))
    }
}

/// Encodes a serde value as MessagePack with named fields.
pub fn msgpack_encode<T: Serialize + ?Sized>(value: &T) -> ClientResult<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(|err| ClientError::Encoding(err.to_string()))
}

/// Decodes a MessagePack payload.
pub fn msgpack_decode<T: DeserializeOwned>(bytes: &[u8]) -> ClientResult<T> {
    rmp_serde::from_slice(bytes).map_err(|err| ClientError::Encoding(err.to_string()))
}
