//! Pipeline builder and dispatch loop.
//!
//! The [`PipelineBuilder`] configures the codec, registry and isolation
//! settings. [`Pipeline::trigger`] runs one invocation:
//! 1. Encode the raw input
//! 2. Snapshot the registry
//! 3. Regular tier pass, then the wildcard tier if nothing matched
//! 4. Post phase for every matched handler
//! 5. Error path, if anything failed
//! 6. `done`, if `start` was called
//!
//! # Example
//!
//! ```ignore
//! use trigger_pipeline::{ControlSignal, Handler, Invocation, Pipeline};
//!
//! let pipeline = Pipeline::builder().log_stats(true).build();
//! pipeline.push([Handler::new("echo", |ctx| async move {
//!     let request = ctx.validated().cloned().unwrap_or_default();
//!     ctx.send(request).await?;
//!     Ok(ControlSignal::Stop)
//! })]);
//!
//! let report = pipeline
//!     .trigger(Invocation::new(MySender::default(), r#"{"text":"hi"}"#))
//!     .await;
//! assert!(report.matched);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::codec::{Codec, JsonCodec};
use crate::error::{Stage, TriggerError};
use crate::guard::{best_effort, guarded, Guarded};
use crate::handler::{Context, ControlSignal, Handler, InsertOp, Registry, Tier, UnregisterToken};
use crate::send::{InstrumentedSender, SendProvider};
use crate::stats::{Clock, HandlerStats, Recorder, Span, Stats};

/// Default for [`PipelineConfig::catch_panics`].
pub const DEFAULT_CATCH_PANICS: bool = true;

/// Default for [`PipelineConfig::log_stats`].
pub const DEFAULT_LOG_STATS: bool = false;

/// Pipeline configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Catch panics in encode/validate/handle and treat them as thrown
    /// failures. When off, those panics propagate out of `trigger`. Panics in
    /// `post` are always caught and discarded.
    pub catch_panics: bool,
    /// Emit a debug-level stats summary after every invocation.
    pub log_stats: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            catch_panics: DEFAULT_CATCH_PANICS,
            log_stats: DEFAULT_LOG_STATS,
        }
    }
}

/// Input to one [`Pipeline::trigger`] call.
pub struct Invocation {
    /// Outbound side for this invocation.
    pub send: Arc<dyn SendProvider>,
    /// Raw input, handed to the codec.
    pub request: Bytes,
}

impl Invocation {
    /// Create an invocation from a provider and raw input.
    pub fn new(send: impl SendProvider, request: impl Into<Bytes>) -> Self {
        Self {
            send: Arc::new(send),
            request: request.into(),
        }
    }

    /// Create an invocation sharing an existing provider.
    pub fn shared(send: Arc<dyn SendProvider>, request: impl Into<Bytes>) -> Self {
        Self {
            send,
            request: request.into(),
        }
    }
}

/// What a finished invocation produced.
#[derive(Debug, Clone)]
pub struct TriggerReport {
    /// Timing for every stage.
    pub stats: Stats,
    /// The error routed to the error path, if any.
    pub error: Option<Arc<TriggerError>>,
    /// At least one handler matched.
    pub matched: bool,
    /// Last control signal returned by a successful `handle`.
    pub signal: Option<ControlSignal>,
}

impl TriggerReport {
    /// True if no error reached the error path.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Builder for configuring and creating a [`Pipeline`].
pub struct PipelineBuilder {
    registry: Registry,
    codec: Arc<dyn Codec>,
    config: PipelineConfig,
}

impl PipelineBuilder {
    /// Create a new pipeline builder.
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            codec: Arc::new(JsonCodec),
            config: PipelineConfig::default(),
        }
    }

    /// Set the codec used to encode raw input.
    ///
    /// Default: [`JsonCodec`]
    pub fn codec(mut self, codec: impl Codec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Use an existing registry (shared with other pipelines or owners).
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Catch panics in encode, validate and handle.
    ///
    /// `post` panics are swallowed regardless.
    ///
    /// Default: true
    pub fn catch_panics(mut self, enabled: bool) -> Self {
        self.config.catch_panics = enabled;
        self
    }

    /// Log a stats summary after each invocation.
    ///
    /// Default: false
    pub fn log_stats(mut self, enabled: bool) -> Self {
        self.config.log_stats = enabled;
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the pipeline.
    pub fn build(self) -> Pipeline {
        Pipeline {
            registry: self.registry,
            codec: self.codec,
            config: self.config,
            next_invocation: AtomicU64::new(1),
        }
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler-dispatch engine.
///
/// Invocations are independent; they share only the registry.
pub struct Pipeline {
    registry: Registry,
    codec: Arc<dyn Codec>,
    config: PipelineConfig,
    next_invocation: AtomicU64,
}

/// A handler that reached the matched state, with the context it ran under.
struct Matched {
    handler: Arc<Handler>,
    ctx: Context,
    run_post: bool,
}

/// How a tier pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassEnd {
    Exhausted,
    Stopped,
    Failed,
}

/// Mutable state of one invocation's dispatch.
struct Dispatch {
    ctx: Context,
    catch_panics: bool,
    started: bool,
    matched: Vec<Matched>,
    signal: Option<ControlSignal>,
    failure: Option<(TriggerError, Context)>,
}

impl Dispatch {
    fn fail(&mut self, error: TriggerError, at: Context) {
        self.failure = Some((error, at));
    }

    async fn start_send(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        if let Some(sender) = self.ctx.sender() {
            let outcome = guarded(Stage::Send, self.catch_panics, sender.start(&self.ctx)).await;
            if let Err(e) = outcome.flatten() {
                tracing::warn!("Send provider start failed: {}", e);
            }
        }
    }

    async fn done_send(&self) {
        if !self.started {
            return;
        }
        if let Some(sender) = self.ctx.sender() {
            let outcome = guarded(Stage::Send, self.catch_panics, sender.done(&self.ctx)).await;
            if let Err(e) = outcome.flatten() {
                tracing::warn!("Send provider done failed: {}", e);
            }
        }
    }

    /// Run one tier pass over `handlers`.
    async fn run_tier(&mut self, tier: Tier, handlers: &[Arc<Handler>]) -> PassEnd {
        let recorder = self.ctx.recorder().clone();
        tracing::debug!(
            invocation = self.ctx.invocation_id(),
            "Starting {:?} tier pass over {} handlers",
            tier,
            handlers.len()
        );

        for handler in handlers {
            let hctx = self.ctx.for_handler(handler.hash());

            let validated_start = recorder.now();
            let validated = match handler.call_validate(hctx.clone()) {
                Some(fut) => guarded(Stage::Validate, self.catch_panics, fut).await.flatten(),
                // No validate step: the decoded request is the validated value.
                None => Ok(self.ctx.request().cloned()),
            };
            let validated_end = recorder.now();

            let value = match validated {
                Ok(Some(value)) => Arc::new(value),
                Ok(None) => continue,
                Err(e) => {
                    self.fail(e, hctx);
                    return PassEnd::Failed;
                }
            };

            tracing::debug!(
                invocation = self.ctx.invocation_id(),
                handler = handler.hash(),
                "Handler matched"
            );
            self.start_send().await;

            let hctx = hctx.with_validated(value);
            let index = recorder.push_handler(HandlerStats {
                handler_hash: handler.hash().to_string(),
                validated: Span {
                    start: Some(validated_start),
                    end: Some(validated_end),
                },
                handled: Span::opened(recorder.now()),
                total: Span::opened(validated_start),
            });
            self.matched.push(Matched {
                handler: handler.clone(),
                ctx: hctx.clone(),
                run_post: true,
            });

            let outcome = guarded(
                Stage::Handle,
                self.catch_panics,
                handler.call_handle(hctx.clone()),
            )
            .await;

            match outcome {
                Guarded::Returned(Ok(signal)) => {
                    recorder.close_handler(index);
                    self.signal = Some(signal);
                    if signal == ControlSignal::Stop {
                        return PassEnd::Stopped;
                    }
                }
                Guarded::Returned(Err(e)) => {
                    self.fail(e, hctx);
                    return PassEnd::Failed;
                }
                Guarded::Panicked(e) => {
                    if let Some(last) = self.matched.last_mut() {
                        last.run_post = false;
                    }
                    self.fail(e, hctx);
                    return PassEnd::Failed;
                }
            }
        }

        PassEnd::Exhausted
    }

    /// Run `post` for every matched handler, in match order.
    async fn post_phase(&self) {
        for matched in self.matched.iter().filter(|m| m.run_post) {
            if let Some(fut) = matched.handler.call_post(matched.ctx.clone()) {
                best_effort(matched.handler.hash(), fut).await;
            }
        }
    }
}

impl Pipeline {
    /// Create a new pipeline builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Create a pipeline with the default codec and configuration.
    pub fn new() -> Self {
        PipelineBuilder::new().build()
    }

    /// The registry this pipeline dispatches from.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Active configuration.
    pub fn config(&self) -> PipelineConfig {
        self.config
    }

    /// Register a handler. See [`Registry::register`].
    pub fn register(&self, op: InsertOp, tier: Tier, handler: Handler) -> UnregisterToken {
        self.registry.register(op, tier, handler)
    }

    /// Append handlers. See [`Registry::push`].
    pub fn push(&self, handlers: impl IntoIterator<Item = Handler>) -> Vec<UnregisterToken> {
        self.registry.push(handlers)
    }

    /// Prepend handlers. See [`Registry::unshift`].
    pub fn unshift(&self, handlers: impl IntoIterator<Item = Handler>) -> Vec<UnregisterToken> {
        self.registry.unshift(handlers)
    }

    /// Run one invocation to completion.
    ///
    /// Never fails: failures are routed to the error-fallback tier and
    /// reported in [`TriggerReport::error`]. A panic inside an error-fallback
    /// handler is not caught and propagates to the caller.
    pub async fn trigger(&self, invocation: Invocation) -> TriggerReport {
        let invocation_id = self.next_invocation.fetch_add(1, Ordering::Relaxed);
        let recorder = Recorder::new(Clock::start());
        let sender = InstrumentedSender::new(invocation.send, recorder.clone());
        let ctx = Context::new(
            invocation_id,
            invocation.request,
            self.codec.clone(),
            recorder.clone(),
            Some(sender),
        );

        let mut dispatch = Dispatch {
            ctx: ctx.clone(),
            catch_panics: self.config.catch_panics,
            started: false,
            matched: Vec::new(),
            signal: None,
            failure: None,
        };

        // 1. Encode
        let at = recorder.now();
        recorder.record(|stats| {
            stats.request = Span::opened(at);
            stats.encode = Span::opened(at);
        });
        let encoded = guarded(
            Stage::Encode,
            self.config.catch_panics,
            self.codec.encode(ctx.input()),
        )
        .await
        .flatten();
        let at = recorder.now();
        recorder.record(|stats| stats.encode.close(at));

        // 2. Snapshot
        let snapshot = self.registry.snapshot();

        match encoded {
            Ok(request) => {
                ctx.set_request(request);
                let at = recorder.now();
                recorder.record(|stats| stats.request.close(at));

                // 3. Tier passes
                let regular = dispatch.run_tier(Tier::Regular, &snapshot.regular).await;
                if regular == PassEnd::Exhausted && dispatch.matched.is_empty() {
                    dispatch.run_tier(Tier::Wildcard, &snapshot.wildcard).await;
                }
                if dispatch.matched.is_empty() && dispatch.failure.is_none() {
                    tracing::debug!(invocation = invocation_id, "No handler matched");
                }

                // 4. Post phase
                dispatch.post_phase().await;
            }
            Err(e) => dispatch.fail(e, ctx.clone()),
        }

        // 5. Error path
        let error = match dispatch.failure.take() {
            Some((error, at)) => {
                let error = Arc::new(error);
                tracing::error!(
                    invocation = invocation_id,
                    handler = at.handler_hash().unwrap_or("-"),
                    "Trigger failed, running {} error fallbacks: {}",
                    snapshot.fallback.len(),
                    error
                );
                let error_ctx = at.with_error(error.clone());
                for fallback in &snapshot.fallback {
                    if let Err(e) = fallback.call_handle(error_ctx.clone()).await {
                        tracing::warn!(
                            "Ignoring {} failure in handler {}: {}",
                            Stage::Fallback,
                            fallback.hash(),
                            e
                        );
                    }
                }
                Some(error)
            }
            None => None,
        };

        // 6. Done
        dispatch.done_send().await;

        let stats = recorder.snapshot();
        if self.config.log_stats {
            tracing::debug!(invocation = invocation_id, stats = ?stats, "Trigger finished");
        }

        TriggerReport {
            stats,
            error,
            matched: !dispatch.matched.is_empty(),
            signal: dispatch.signal,
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
