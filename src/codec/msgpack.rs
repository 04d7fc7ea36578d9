//! MsgPack codec using `rmp-serde`.
//!
//! Structs are always written with `to_vec_named` so peers see maps keyed by
//! field name instead of positional arrays.

use bytes::Bytes;
use serde_json::Value;

use super::Codec;
use crate::error::{Result, TriggerError};
use crate::handler::BoxFuture;

/// Codec for raw input carrying a MessagePack document.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Serialize a value to MsgPack bytes (struct-as-map format).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn to_vec<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        // to_vec_named, NOT to_vec
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Deserialize MsgPack bytes into a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn from_slice<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

impl Codec for MsgPackCodec {
    fn encode<'a>(&'a self, raw: &'a Bytes) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            Self::from_slice::<Value>(raw).map_err(|e| TriggerError::Encode(e.to_string()))
        })
    }
}
