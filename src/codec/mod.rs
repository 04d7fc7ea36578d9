//! Codec module - turning raw input into requests and values back into text.
//!
//! The pipeline calls [`Codec::encode`] exactly once per invocation, before any
//! routing happens. [`Codec::decode`] is never called by the pipeline itself;
//! handlers reach it through [`Context::decode`](crate::handler::Context::decode).
//!
//! - [`JsonCodec`] - raw input is JSON text (the default)
//! - [`MsgPackCodec`] - raw input is MessagePack, using `rmp-serde`
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use trigger_pipeline::codec::{Codec, JsonCodec};
//!
//! let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! rt.block_on(async {
//!     let codec = JsonCodec;
//!     let raw = Bytes::from_static(br#"{"x":1}"#);
//!     let request = codec.encode(&raw).await.unwrap();
//!     assert_eq!(request["x"], 1);
//!     assert_eq!(codec.decode(&request).await.unwrap(), r#"{"x":1}"#);
//! });
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use bytes::Bytes;
use serde_json::Value;

use crate::error::{Result, TriggerError};
use crate::handler::BoxFuture;

/// Encode/decode provider supplied to a [`Pipeline`](crate::Pipeline).
pub trait Codec: Send + Sync + 'static {
    /// Turn raw input into a decoded request.
    fn encode<'a>(&'a self, raw: &'a Bytes) -> BoxFuture<'a, Result<Value>>;

    /// Render a value as text.
    ///
    /// Strings are returned as-is; every other value is rendered as JSON.
    fn decode<'a>(&'a self, data: &'a Value) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move { render_text(data) })
    }
}

fn render_text(data: &Value) -> Result<String> {
    match data {
        Value::String(s) => Ok(s.clone()),
        other => serde_json::to_string(other).map_err(|e| TriggerError::Decode(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_text_string_passthrough() {
        assert_eq!(render_text(&json!("hello")).unwrap(), "hello");
    }

    #[test]
    fn test_render_text_structured() {
        assert_eq!(render_text(&json!({"a": [1, 2]})).unwrap(), r#"{"a":[1,2]}"#);
        assert_eq!(render_text(&Value::Null).unwrap(), "null");
    }
}
