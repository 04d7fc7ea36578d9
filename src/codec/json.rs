//! JSON codec using `serde_json`.

use bytes::Bytes;
use serde_json::Value;

use super::Codec;
use crate::error::{Result, TriggerError};
use crate::handler::BoxFuture;

/// Codec for raw input carrying JSON text.
///
/// Empty input is rejected rather than treated as `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Parse JSON bytes into a value.
    ///
    /// # Errors
    ///
    /// Returns [`TriggerError::Encode`] if the input is empty or not valid JSON.
    pub fn parse(raw: &[u8]) -> Result<Value> {
        if raw.is_empty() {
            return Err(TriggerError::Encode("empty input".to_string()));
        }
        serde_json::from_slice(raw).map_err(|e| TriggerError::Encode(e.to_string()))
    }
}

impl Codec for JsonCodec {
    fn encode<'a>(&'a self, raw: &'a Bytes) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move { Self::parse(raw) })
    }
}
