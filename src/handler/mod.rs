//! Handler module - definitions, registry and per-invocation context.
//!
//! Provides:
//! - [`Handler`] - hash-identified unit with `validate`/`handle`/`post` steps
//! - [`Registry`] - ordered, hash-keyed store for the three [`Tier`]s
//! - [`Context`] - what every stage sees: request, validated value, send, stats
//!
//! # Example
//!
//! ```
//! use trigger_pipeline::handler::{ControlSignal, Handler, InsertOp, Registry, Tier};
//!
//! let registry = Registry::new();
//!
//! // Specific route
//! registry.register(
//!     InsertOp::Append,
//!     Tier::Regular,
//!     Handler::new("ping", |ctx| async move {
//!         ctx.send(serde_json::json!("pong")).await?;
//!         Ok(ControlSignal::Stop)
//!     })
//!     .validate(|ctx| async move {
//!         Ok(ctx.request().filter(|r| r["cmd"] == "ping").cloned())
//!     }),
//! );
//!
//! // Failure handler
//! registry.push([Handler::fallback("log-error", |ctx| async move {
//!     eprintln!("trigger failed: {:?}", ctx.error());
//!     Ok(ControlSignal::Continue)
//! })]);
//!
//! assert_eq!(registry.len(Tier::Regular), 1);
//! assert_eq!(registry.len(Tier::ErrorFallback), 1);
//! ```

mod context;
mod definition;
mod registry;

pub use context::Context;
pub use definition::{BoxFuture, ControlSignal, HandleFn, Handler, PostFn, Tier, ValidateFn};
pub use registry::{InsertOp, Registry, Snapshot, UnregisterToken};
