//! Failure isolation combinators.
//!
//! - [`guarded`] runs a stage and tells a returned error apart from a panic.
//! - [`best_effort`] runs a cleanup stage and discards any failure.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use crate::error::{Result, Stage, TriggerError};

/// How a guarded stage ended.
#[derive(Debug)]
pub(crate) enum Guarded<T> {
    /// The stage completed and returned a result (possibly `Err`).
    Returned(Result<T>),
    /// The stage panicked; the unwind was caught.
    Panicked(TriggerError),
}

impl<T> Guarded<T> {
    /// Collapse into a plain result, treating a panic as an error.
    pub(crate) fn flatten(self) -> Result<T> {
        match self {
            Guarded::Returned(result) => result,
            Guarded::Panicked(err) => Err(err),
        }
    }
}

/// Run `fut`, catching panics when `catch_panics` is set.
///
/// With `catch_panics` off, a panic propagates to the caller unchanged.
pub(crate) async fn guarded<T, F>(stage: Stage, catch_panics: bool, fut: F) -> Guarded<T>
where
    F: Future<Output = Result<T>>,
{
    if !catch_panics {
        return Guarded::Returned(fut.await);
    }

    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => Guarded::Returned(result),
        Err(payload) => Guarded::Panicked(TriggerError::Panicked {
            stage,
            message: panic_message(&*payload),
        }),
    }
}

/// Run a cleanup future; errors and panics are logged and discarded.
///
/// Nothing a cleanup step does can reach the caller: panics are caught here
/// whatever the pipeline's `catch_panics` setting.
pub(crate) async fn best_effort<F>(label: &str, fut: F)
where
    F: Future<Output = Result<()>>,
{
    if let Err(e) = guarded(Stage::Post, true, fut).await.flatten() {
        tracing::warn!("Discarding {} failure for handler {}: {}", Stage::Post, label, e);
    }
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn explode(message: &str) -> Result<()> {
        panic!("{}", message)
    }

    #[tokio::test]
    async fn test_returned_ok_and_err() {
        let ok = guarded(Stage::Handle, true, async { Ok(5) }).await;
        assert!(matches!(ok, Guarded::Returned(Ok(5))));

        let err = guarded::<(), _>(Stage::Handle, true, async {
            Err(TriggerError::Other("no".into()))
        })
        .await;
        assert!(matches!(err, Guarded::Returned(Err(TriggerError::Other(_)))));
    }

    #[tokio::test]
    async fn test_panic_is_caught() {
        let outcome = guarded(Stage::Validate, true, explode("validator exploded")).await;

        match outcome {
            Guarded::Panicked(TriggerError::Panicked { stage, message }) => {
                assert_eq!(stage, Stage::Validate);
                assert_eq!(message, "validator exploded");
            }
            other => panic!("expected caught panic, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_formatted_panic_message() {
        let outcome = guarded(Stage::Encode, true, explode(&format!("code {}", 42))).await;
        let err = outcome.flatten().unwrap_err();
        assert_eq!(err.to_string(), "Panic during encode: code 42");
    }

    #[tokio::test]
    #[should_panic(expected = "not caught")]
    async fn test_panic_propagates_when_disabled() {
        let _ = guarded(Stage::Handle, false, explode("not caught")).await;
    }

    #[tokio::test]
    async fn test_best_effort_swallows_everything() {
        best_effort("h", async { Err(TriggerError::Other("cleanup".into())) }).await;
        best_effort("h", explode("cleanup panic")).await;
        best_effort("h", async { Ok(()) }).await;
    }

    #[test]
    fn test_panic_message_unknown_payload() {
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*payload), "unknown panic payload");
    }
}
