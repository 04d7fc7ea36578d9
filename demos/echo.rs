//! Echo pipeline - simple request/response example.
//!
//! This example demonstrates:
//! - Building a pipeline with the builder pattern
//! - A regular handler with a typed `validate` step
//! - A wildcard handler catching everything else
//! - Reading the stats of a finished invocation
//!
//! ```text
//! RUST_LOG=trigger_pipeline=debug cargo run --example echo
//! ```

use serde::Deserialize;
use serde_json::{json, Value};
use trigger_pipeline::handler::BoxFuture;
use trigger_pipeline::{
    Context, ControlSignal, Handler, Invocation, Pipeline, Result, SendProvider, Tier,
};

/// Input accepted by the echo handler.
#[derive(Deserialize, Debug)]
struct EchoInput {
    message: String,
}

/// Prints every outbound payload to stdout.
struct StdoutSender;

impl SendProvider for StdoutSender {
    fn start<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            println!("[{}] start", ctx.invocation_id());
            Ok(())
        })
    }

    fn send<'a>(&'a self, ctx: &'a Context, payload: Value) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            println!("[{}] send {}", ctx.invocation_id(), payload);
            Ok(json!({ "delivered": true }))
        })
    }

    fn done<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            println!("[{}] done", ctx.invocation_id());
            Ok(())
        })
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let pipeline = Pipeline::builder().log_stats(true).build();

    pipeline.push([
        // Only requests shaped like EchoInput
        Handler::new("echo", |ctx| async move {
            let validated = ctx.validated().cloned().unwrap_or_default();
            let input: EchoInput = serde_json::from_value(validated)?;
            ctx.send(json!({ "echo": input.message })).await?;
            Ok(ControlSignal::Stop)
        })
        .validate(|ctx| async move {
            let request = ctx.request().cloned().unwrap_or_default();
            Ok(serde_json::from_value::<EchoInput>(request.clone())
                .ok()
                .map(|_| request))
        }),
        // Everything else
        Handler::new("unknown", |ctx| async move {
            let request = ctx.request().cloned().unwrap_or_default();
            let text = ctx.decode(&request).await?;
            ctx.send(json!({ "error": format!("cannot handle {}", text) })).await?;
            Ok(ControlSignal::Continue)
        })
        .tier(Tier::Wildcard),
    ]);

    for raw in [r#"{"message":"hello"}"#, r#"{"other":1}"#] {
        let report = pipeline.trigger(Invocation::new(StdoutSender, raw)).await;
        println!("stats: {}", serde_json::to_string(&report.stats)?);
    }

    Ok(())
}
