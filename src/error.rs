//! Error types for trigger-pipeline.

use std::fmt;

use thiserror::Error;

/// Lifecycle stage an error was captured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Raw input encoding via the codec.
    Encode,
    /// A handler's `validate` step.
    Validate,
    /// A handler's `handle` step.
    Handle,
    /// A handler's `post` step.
    Post,
    /// The send provider's `start` or `done`.
    Send,
    /// An error-fallback handler.
    Fallback,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Encode => "encode",
            Stage::Validate => "validate",
            Stage::Handle => "handle",
            Stage::Post => "post",
            Stage::Send => "send",
            Stage::Fallback => "fallback",
        };
        f.write_str(name)
    }
}

/// Main error type for all pipeline operations.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// The codec could not turn the raw input into a request.
    #[error("Encode error: {0}")]
    Encode(String),

    /// The codec could not turn a value back into text.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A handler rejected the request during validation.
    #[error("Validate error in handler '{handler}': {message}")]
    Validate { handler: String, message: String },

    /// A handler failed while handling the request.
    #[error("Handle error in handler '{handler}': {message}")]
    Handle { handler: String, message: String },

    /// The send provider failed.
    #[error("Send error: {0}")]
    Send(String),

    /// A stage panicked and the unwind was caught.
    #[error("Panic during {stage}: {message}")]
    Panicked { stage: Stage, message: String },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Anything else a handler wants to report.
    #[error("{0}")]
    Other(String),
}

impl TriggerError {
    /// Build a [`TriggerError::Handle`] for the given handler.
    pub fn handle(handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handle {
            handler: handler.into(),
            message: message.into(),
        }
    }

    /// Build a [`TriggerError::Validate`] for the given handler.
    pub fn validate(handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validate {
            handler: handler.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error came from a caught panic.
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked { .. })
    }
}

/// Result type alias using TriggerError.
pub type Result<T> = std::result::Result<T, TriggerError>;
