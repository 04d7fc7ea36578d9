//! # trigger-pipeline
//!
//! Handler-dispatch engine: one incoming request is routed through an ordered
//! set of registered handlers, with failures isolated into a dedicated
//! error-handling path and every stage timed.
//!
//! ## Architecture
//!
//! - **Registry**: three ordered, hash-keyed tiers: regular, wildcard and
//!   error fallback
//! - **Dispatch loop**: regular tier first, wildcard only if nothing matched;
//!   `validate` → `handle` → `post` per handler
//! - **Error path**: every error-fallback handler runs, in order
//! - **Instrumented send**: `start`/`send`/`done` timing around the caller's
//!   provider
//!
//! ## Example
//!
//! ```ignore
//! use trigger_pipeline::{ControlSignal, Handler, Invocation, Pipeline, Tier};
//!
//! #[tokio::main]
//! async fn main() {
//!     let pipeline = Pipeline::builder().build();
//!
//!     pipeline.push([
//!         Handler::new("hello", |ctx| async move {
//!             ctx.send(serde_json::json!({ "text": "hello!" })).await?;
//!             Ok(ControlSignal::Stop)
//!         })
//!         .validate(|ctx| async move {
//!             Ok(ctx.request().filter(|r| r["text"] == "hi").cloned())
//!         }),
//!         Handler::fallback("report", |ctx| async move {
//!             eprintln!("failed: {:?}", ctx.error());
//!             Ok(ControlSignal::Continue)
//!         }),
//!     ]);
//!
//!     let report = pipeline
//!         .trigger(Invocation::new(ConsoleSender, r#"{"text":"hi"}"#))
//!         .await;
//!     println!("{:?}", report.stats);
//! }
//! ```

pub mod codec;
pub mod error;
pub mod handler;
pub mod send;
pub mod stats;

mod guard;
mod pipeline;

pub use error::{Result, Stage, TriggerError};
pub use handler::{
    Context, ControlSignal, Handler, InsertOp, Registry, Snapshot, Tier, UnregisterToken,
};
pub use pipeline::{
    Invocation, Pipeline, PipelineBuilder, PipelineConfig, TriggerReport, DEFAULT_CATCH_PANICS,
    DEFAULT_LOG_STATS,
};
pub use send::{InstrumentedSender, SendProvider};
pub use stats::Stats;
