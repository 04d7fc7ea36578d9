//! Error path example.
//!
//! A handler fails on purpose; every error-fallback handler then runs with
//! the captured error and the shared context.
//!
//! ```text
//! RUST_LOG=trigger_pipeline=debug cargo run --example fallback
//! ```

use serde_json::{json, Value};
use trigger_pipeline::handler::BoxFuture;
use trigger_pipeline::{
    Context, ControlSignal, Handler, Invocation, Pipeline, Result, SendProvider, TriggerError,
};

struct StdoutSender;

impl SendProvider for StdoutSender {
    fn send<'a>(&'a self, _ctx: &'a Context, payload: Value) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            println!("send {}", payload);
            Ok(Value::Null)
        })
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let pipeline = Pipeline::new();

    pipeline.push([
        Handler::new("divide", |ctx| async move {
            let request = ctx.request().cloned().unwrap_or_default();
            let divisor = request["divisor"].as_i64().unwrap_or(0);
            if divisor == 0 {
                return Err(TriggerError::handle("divide", "division by zero"));
            }
            ctx.send(json!({ "result": 100 / divisor })).await?;
            Ok(ControlSignal::Stop)
        })
        .post(|_ctx| async move {
            println!("divide: cleanup");
            Ok(())
        }),
        Handler::fallback("apologize", |ctx| async move {
            let reason = ctx.error().map(|e| e.to_string()).unwrap_or_default();
            ctx.send(json!({ "error": reason })).await?;
            Ok(ControlSignal::Continue)
        }),
        Handler::fallback("audit", |ctx| async move {
            println!("audit: invocation {} failed", ctx.invocation_id());
            Ok(ControlSignal::Continue)
        }),
    ]);

    for raw in [r#"{"divisor":4}"#, r#"{"divisor":0}"#, "not json"] {
        let report = pipeline.trigger(Invocation::new(StdoutSender, raw)).await;
        match &report.error {
            Some(err) => println!("{} -> failed: {}", raw, err),
            None => println!("{} -> ok ({} handlers)", raw, report.stats.handlers.len()),
        }
    }
}
