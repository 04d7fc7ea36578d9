//! Handler definitions.
//!
//! A [`Handler`] bundles up to three async steps under a stable `hash`:
//!
//! - `validate` (optional) - decide whether this handler wants the request
//! - `handle` (mandatory) - do the work, optionally sending responses
//! - `post` (optional) - best-effort cleanup after tier processing
//!
//! Each step receives an owned [`Context`] and returns a `'static` boxed
//! future, so plain `async move` closures can be registered directly.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use super::Context;
use crate::error::Result;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Validation step: `Ok(Some(v))` matches, `Ok(None)` passes on the request.
pub type ValidateFn = Arc<dyn Fn(Context) -> BoxFuture<'static, Result<Option<Value>>> + Send + Sync>;

/// Handling step.
pub type HandleFn = Arc<dyn Fn(Context) -> BoxFuture<'static, Result<ControlSignal>> + Send + Sync>;

/// Cleanup step. Failures are discarded by the pipeline.
pub type PostFn = Arc<dyn Fn(Context) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Which ordered group a handler belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Specific routes, always attempted first.
    #[default]
    Regular,
    /// Fallback routes, attempted only when no regular handler matched.
    Wildcard,
    /// Failure handlers, run unconditionally on the error path.
    ErrorFallback,
}

/// Returned by `handle` to steer tier iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlSignal {
    /// Proceed to the next handler in the current tier.
    Continue,
    /// Halt tier processing.
    Stop,
}

/// A registrable unit of request handling.
///
/// # Example
///
/// ```
/// use trigger_pipeline::{ControlSignal, Handler, Tier};
///
/// let handler = Handler::new("greet", |ctx| async move {
///     ctx.send(serde_json::json!({"text": "hello"})).await?;
///     Ok(ControlSignal::Continue)
/// })
/// .validate(|ctx| async move {
///     let request = ctx.request().cloned().unwrap_or_default();
///     Ok((request["kind"] == "greet").then_some(request))
/// })
/// .tier(Tier::Regular);
///
/// assert_eq!(handler.hash(), "greet");
/// assert!(handler.has_validate());
/// ```
#[derive(Clone)]
pub struct Handler {
    hash: String,
    tier: Tier,
    validate: Option<ValidateFn>,
    handle: HandleFn,
    post: Option<PostFn>,
}

impl Handler {
    /// Create a regular-tier handler with only a `handle` step.
    pub fn new<F, Fut>(hash: impl Into<String>, handle: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ControlSignal>> + Send + 'static,
    {
        Self {
            hash: hash.into(),
            tier: Tier::default(),
            validate: None,
            handle: Arc::new(move |ctx| Box::pin(handle(ctx))),
            post: None,
        }
    }

    /// Create an error-fallback handler.
    ///
    /// The context passed to `handle` carries the captured error.
    pub fn fallback<F, Fut>(hash: impl Into<String>, handle: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ControlSignal>> + Send + 'static,
    {
        Self::new(hash, handle).tier(Tier::ErrorFallback)
    }

    /// Set the tier this handler registers into by default.
    pub fn tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    /// Attach a `validate` step.
    pub fn validate<F, Fut>(mut self, validate: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>>> + Send + 'static,
    {
        self.validate = Some(Arc::new(move |ctx| Box::pin(validate(ctx))));
        self
    }

    /// Attach a `post` step.
    pub fn post<F, Fut>(mut self, post: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.post = Some(Arc::new(move |ctx| Box::pin(post(ctx))));
        self
    }

    /// Identity key in the registry.
    #[inline]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Tier this handler was declared for.
    #[inline]
    pub fn declared_tier(&self) -> Tier {
        self.tier
    }

    /// Whether a `validate` step is attached.
    #[inline]
    pub fn has_validate(&self) -> bool {
        self.validate.is_some()
    }

    /// Whether a `post` step is attached.
    #[inline]
    pub fn has_post(&self) -> bool {
        self.post.is_some()
    }

    /// Run `validate`, or `None` when the handler has no validate step.
    pub(crate) fn call_validate(&self, ctx: Context) -> Option<BoxFuture<'static, Result<Option<Value>>>> {
        self.validate.as_ref().map(|f| f(ctx))
    }

    pub(crate) fn call_handle(&self, ctx: Context) -> BoxFuture<'static, Result<ControlSignal>> {
        (self.handle)(ctx)
    }

    pub(crate) fn call_post(&self, ctx: Context) -> Option<BoxFuture<'static, Result<()>>> {
        self.post.as_ref().map(|f| f(ctx))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("hash", &self.hash)
            .field("tier", &self.tier)
            .field("validate", &self.validate.is_some())
            .field("post", &self.post.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let handler = Handler::new("h", |_ctx| async { Ok(ControlSignal::Continue) });
        assert_eq!(handler.hash(), "h");
        assert_eq!(handler.declared_tier(), Tier::Regular);
        assert!(!handler.has_validate());
        assert!(!handler.has_post());
    }

    #[test]
    fn test_builder_chaining() {
        let handler = Handler::new("h", |_ctx| async { Ok(ControlSignal::Stop) })
            .validate(|_ctx| async { Ok(None) })
            .post(|_ctx| async { Ok(()) })
            .tier(Tier::Wildcard);

        assert_eq!(handler.declared_tier(), Tier::Wildcard);
        assert!(handler.has_validate());
        assert!(handler.has_post());
    }

    #[test]
    fn test_fallback_constructor() {
        let handler = Handler::fallback("err", |_ctx| async { Ok(ControlSignal::Continue) });
        assert_eq!(handler.declared_tier(), Tier::ErrorFallback);
    }

    #[test]
    fn test_debug_hides_closures() {
        let handler = Handler::new("dbg", |_ctx| async { Ok(ControlSignal::Continue) });
        let text = format!("{:?}", handler);
        assert!(text.contains("dbg"));
        assert!(text.contains("validate: false"));
    }

    #[tokio::test]
    async fn test_handle_invocation() {
        let handler = Handler::new("h", |_ctx| async { Ok(ControlSignal::Stop) });
        let signal = handler.call_handle(Context::detached()).await.unwrap();
        assert_eq!(signal, ControlSignal::Stop);
        assert!(handler.call_validate(Context::detached()).is_none());
        assert!(handler.call_post(Context::detached()).is_none());
    }
}
