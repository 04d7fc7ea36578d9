//! Invocation context for handlers.
//!
//! One [`Context`] is created per call to
//! [`Pipeline::trigger`](crate::Pipeline::trigger). Cheap clones of it are
//! handed to every stage; the pipeline layers per-stage state on top of the
//! shared part:
//!
//! - the validated value, for `handle` and `post`
//! - the hash of the handler being run
//! - the captured error, only on the error path
//!
//! # Example
//!
//! ```ignore
//! let handler = Handler::new("echo", |ctx| async move {
//!     let text = ctx.decode(ctx.validated().unwrap()).await?;
//!     ctx.send(serde_json::json!({ "text": text })).await?;
//!     Ok(ControlSignal::Continue)
//! });
//! ```

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use serde_json::Value;

use crate::codec::{Codec, JsonCodec};
use crate::error::{Result, TriggerError};
use crate::send::InstrumentedSender;
use crate::stats::{Clock, Recorder, Stats};

/// State shared by every clone of one invocation's context.
struct Shared {
    invocation_id: u64,
    input: Bytes,
    request: OnceLock<Value>,
    codec: Arc<dyn Codec>,
    sender: Option<InstrumentedSender>,
    recorder: Recorder,
}

/// Context passed to every handler stage and to the send provider.
///
/// # Thread Safety
///
/// `Context` is `Clone` and can be moved into spawned tasks; clones share the
/// decoded request and the stats model.
#[derive(Clone)]
pub struct Context {
    shared: Arc<Shared>,
    validated: Option<Arc<Value>>,
    handler: Option<Arc<str>>,
    error: Option<Arc<TriggerError>>,
}

impl Context {
    pub(crate) fn new(
        invocation_id: u64,
        input: Bytes,
        codec: Arc<dyn Codec>,
        recorder: Recorder,
        sender: Option<InstrumentedSender>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                invocation_id,
                input,
                request: OnceLock::new(),
                codec,
                sender,
                recorder,
            }),
            validated: None,
            handler: None,
            error: None,
        }
    }

    /// Create a context with no send provider and empty input (for testing).
    ///
    /// `send` on a detached context returns `Ok(Value::Null)`.
    pub fn detached() -> Self {
        Self::new(
            0,
            Bytes::new(),
            Arc::new(JsonCodec),
            Recorder::new(Clock::start()),
            None,
        )
    }

    /// Sequence number of this invocation within its pipeline.
    #[inline]
    pub fn invocation_id(&self) -> u64 {
        self.shared.invocation_id
    }

    /// Raw input as handed to `trigger`.
    #[inline]
    pub fn input(&self) -> &Bytes {
        &self.shared.input
    }

    /// Decoded request, once the codec has produced it.
    #[inline]
    pub fn request(&self) -> Option<&Value> {
        self.shared.request.get()
    }

    /// Value returned by the current handler's `validate` step.
    #[inline]
    pub fn validated(&self) -> Option<&Value> {
        self.validated.as_deref()
    }

    /// Hash of the handler currently running.
    #[inline]
    pub fn handler_hash(&self) -> Option<&str> {
        self.handler.as_deref()
    }

    /// Captured error. Only set for error-fallback handlers.
    #[inline]
    pub fn error(&self) -> Option<&TriggerError> {
        self.error.as_deref()
    }

    /// Codec this invocation was encoded with.
    #[inline]
    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.shared.codec
    }

    /// Snapshot of the stats recorded so far.
    pub fn stats(&self) -> Stats {
        self.shared.recorder.snapshot()
    }

    /// Send a payload through the instrumented send provider.
    ///
    /// On the error path this may run before any `start`; see
    /// [`SendProvider`](crate::SendProvider).
    pub async fn send(&self, payload: Value) -> Result<Value> {
        match &self.shared.sender {
            Some(sender) => sender.send(self, payload).await,
            // No provider configured (testing mode)
            None => Ok(Value::Null),
        }
    }

    /// Render a value as text using this invocation's codec.
    pub async fn decode(&self, data: &Value) -> Result<String> {
        self.shared.codec.decode(data).await
    }

    pub(crate) fn sender(&self) -> Option<&InstrumentedSender> {
        self.shared.sender.as_ref()
    }

    pub(crate) fn recorder(&self) -> &Recorder {
        &self.shared.recorder
    }

    /// Store the decoded request. Later calls are ignored.
    pub(crate) fn set_request(&self, request: Value) {
        let _ = self.shared.request.set(request);
    }

    pub(crate) fn for_handler(&self, hash: &str) -> Self {
        Self {
            shared: self.shared.clone(),
            validated: None,
            handler: Some(Arc::from(hash)),
            error: None,
        }
    }

    pub(crate) fn with_validated(mut self, validated: Arc<Value>) -> Self {
        self.validated = Some(validated);
        self
    }

    /// Context for the error path: keeps whatever validated state existed at
    /// failure time.
    pub(crate) fn with_error(&self, error: Arc<TriggerError>) -> Self {
        Self {
            shared: self.shared.clone(),
            validated: self.validated.clone(),
            handler: self.handler.clone(),
            error: Some(error),
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("invocation_id", &self.shared.invocation_id)
            .field("handler", &self.handler)
            .field("validated", &self.validated)
            .field("error", &self.error)
            .finish()
    }
}
