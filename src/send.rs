//! Send provider and its instrumented wrapper.
//!
//! The pipeline never talks to a transport directly. Callers hand in a
//! [`SendProvider`] per invocation; the pipeline wraps it in an
//! [`InstrumentedSender`] that timestamps `start`/`done` and records one
//! [`SendItem`] per `send` call.
//!
//! ```text
//! Handler ─► Context::send ─► InstrumentedSender ─► SendProvider
//!                                   │
//!                                   └─► stats.send.items
//! ```

use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::handler::{BoxFuture, Context};
use crate::stats::{Recorder, SendItem, Span};

/// Outbound side of an invocation.
///
/// `start` is called once before the first matched handler runs and `done`
/// once at the very end, and only if `start` was called.
///
/// Error-fallback handlers may still call `send` when nothing matched (an
/// encode failure, or a validate failure before any match). Those sends
/// arrive without a surrounding `start`/`done`.
pub trait SendProvider: Send + Sync + 'static {
    /// Prepare for outbound traffic (typing indicator, open stream, ...).
    fn start<'a>(&'a self, _ctx: &'a Context) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Deliver one payload and return the transport's response.
    fn send<'a>(&'a self, ctx: &'a Context, payload: Value) -> BoxFuture<'a, Result<Value>>;

    /// Finish outbound traffic.
    fn done<'a>(&'a self, _ctx: &'a Context) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Pass-through wrapper adding per-call timing.
///
/// No retries, no buffering: every call maps to exactly one provider call.
#[derive(Clone)]
pub struct InstrumentedSender {
    provider: Arc<dyn SendProvider>,
    recorder: Recorder,
}

impl InstrumentedSender {
    pub(crate) fn new(provider: Arc<dyn SendProvider>, recorder: Recorder) -> Self {
        Self { provider, recorder }
    }

    /// Call the provider's `start`, recording `send.start`.
    pub async fn start(&self, ctx: &Context) -> Result<()> {
        let at = self.recorder.now();
        self.recorder.record(|stats| stats.send.span = Span::opened(at));
        self.provider.start(ctx).await
    }

    /// Call the provider's `send`, recording a timed item.
    ///
    /// The provider's result is returned unchanged.
    pub async fn send(&self, ctx: &Context, payload: Value) -> Result<Value> {
        let mut span = Span::opened(self.recorder.now());
        let result = self.provider.send(ctx, payload).await;
        span.close(self.recorder.now());

        let item = SendItem {
            span,
            ok: result.is_ok(),
            error: result.as_ref().err().map(|e| e.to_string()),
        };
        self.recorder.record(|stats| stats.send.items.push(item));

        result
    }

    /// Call the provider's `done`, recording `send.end`.
    pub async fn done(&self, ctx: &Context) -> Result<()> {
        let result = self.provider.done(ctx).await;
        let at = self.recorder.now();
        self.recorder.record(|stats| stats.send.span.close(at));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TriggerError;
    use crate::stats::Clock;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<String>>,
    }

    impl SendProvider for Recording {
        fn start<'a>(&'a self, _ctx: &'a Context) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push("start".to_string());
                Ok(())
            })
        }

        fn send<'a>(&'a self, _ctx: &'a Context, payload: Value) -> BoxFuture<'a, Result<Value>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(format!("send {}", payload));
                if payload["fail"] == true {
                    return Err(TriggerError::Send("rejected".to_string()));
                }
                Ok(json!({"echo": payload}))
            })
        }

        fn done<'a>(&'a self, _ctx: &'a Context) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push("done".to_string());
                Ok(())
            })
        }
    }

    struct SendOnly;

    impl SendProvider for SendOnly {
        fn send<'a>(&'a self, _ctx: &'a Context, payload: Value) -> BoxFuture<'a, Result<Value>> {
            Box::pin(async move { Ok(payload) })
        }
    }

    #[tokio::test]
    async fn test_pass_through_and_recording() {
        let provider = Arc::new(Recording::default());
        let recorder = Recorder::new(Clock::start());
        let sender = InstrumentedSender::new(provider.clone(), recorder.clone());
        let ctx = Context::detached();

        sender.start(&ctx).await.unwrap();
        let response = sender.send(&ctx, json!({"n": 1})).await.unwrap();
        assert_eq!(response, json!({"echo": {"n": 1}}));
        sender.done(&ctx).await.unwrap();

        let stats = recorder.snapshot();
        assert!(stats.send.span.is_complete());
        assert_eq!(stats.send.items.len(), 1);
        assert!(stats.send.items[0].ok);
        assert!(stats.send.items[0].span.is_complete());

        let calls = provider.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["start", r#"send {"n":1}"#, "done"]);
    }

    #[tokio::test]
    async fn test_failed_send_is_recorded_and_returned() {
        let recorder = Recorder::new(Clock::start());
        let sender = InstrumentedSender::new(Arc::new(Recording::default()), recorder.clone());
        let ctx = Context::detached();

        let err = sender.send(&ctx, json!({"fail": true})).await.unwrap_err();
        assert!(matches!(err, TriggerError::Send(_)));

        let stats = recorder.snapshot();
        assert_eq!(stats.failed_sends(), 1);
        assert_eq!(stats.send.items[0].error.as_deref(), Some("Send error: rejected"));
    }

    #[tokio::test]
    async fn test_default_start_and_done() {
        let recorder = Recorder::new(Clock::start());
        let sender = InstrumentedSender::new(Arc::new(SendOnly), recorder.clone());
        let ctx = Context::detached();

        assert!(sender.start(&ctx).await.is_ok());
        assert_eq!(sender.send(&ctx, json!(3)).await.unwrap(), json!(3));
        assert!(sender.done(&ctx).await.is_ok());
        assert_eq!(recorder.snapshot().send.items.len(), 1);
    }
}
