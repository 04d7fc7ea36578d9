//! Timing instrumentation for a single invocation.
//!
//! Every timestamp is an offset from the invocation's [`Clock`] epoch, taken
//! from a monotonic source. The model is append-only: the dispatch loop and the
//! instrumented sender record into it, everyone else reads snapshots.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Monotonic clock anchored at the start of an invocation.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    /// Start a clock at the current instant.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Offset since the epoch.
    #[inline]
    pub fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

/// A `{start, end}` timing record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Span {
    /// Offset at which the span opened.
    pub start: Option<Duration>,
    /// Offset at which the span closed.
    pub end: Option<Duration>,
}

impl Span {
    /// A span opened at `at`.
    pub fn opened(at: Duration) -> Self {
        Self {
            start: Some(at),
            end: None,
        }
    }

    /// Close the span at `at`.
    #[inline]
    pub fn close(&mut self, at: Duration) {
        self.end = Some(at);
    }

    /// Both ends are recorded.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.start.is_some() && self.end.is_some()
    }

    /// Time between start and end, if both are recorded.
    pub fn elapsed(&self) -> Option<Duration> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        }
    }
}

/// Timings for one handler that reached the handle stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HandlerStats {
    /// Hash of the handler.
    pub handler_hash: String,
    /// The `validate` step.
    pub validated: Span,
    /// The `handle` step.
    pub handled: Span,
    /// From the start of validation to the end of handling.
    pub total: Span,
}

/// One outbound `send` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SendItem {
    /// When the provider call began and returned.
    #[serde(flatten)]
    pub span: Span,
    /// Whether the provider returned `Ok`.
    pub ok: bool,
    /// Provider error text when `ok` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Send provider activity: `start` to `done`, plus every `send`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SendStats {
    /// From `start` to `done`. Open if `done` never ran.
    #[serde(flatten)]
    pub span: Span,
    /// Every `send` call, in call order.
    pub items: Vec<SendItem>,
}

/// Stats for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Whole request, from trigger until the request was decoded.
    pub request: Span,
    /// The codec's `encode` call.
    pub encode: Span,
    /// Handlers that reached the handle stage, in match order.
    pub handlers: Vec<HandlerStats>,
    /// Send provider activity.
    pub send: SendStats,
}

impl Stats {
    /// Look up the entry for a handler hash.
    pub fn handler(&self, hash: &str) -> Option<&HandlerStats> {
        self.handlers.iter().find(|h| h.handler_hash == hash)
    }

    /// Number of `send` calls that failed.
    pub fn failed_sends(&self) -> usize {
        self.send.items.iter().filter(|item| !item.ok).count()
    }
}

/// Shared, mutable stats for an in-flight invocation.
#[derive(Debug, Clone)]
pub(crate) struct Recorder {
    clock: Clock,
    stats: Arc<Mutex<Stats>>,
}

impl Recorder {
    pub(crate) fn new(clock: Clock) -> Self {
        Self {
            clock,
            stats: Arc::new(Mutex::new(Stats::default())),
        }
    }

    #[inline]
    pub(crate) fn now(&self) -> Duration {
        self.clock.now()
    }

    fn lock(&self) -> MutexGuard<'_, Stats> {
        // Stats stay readable after a caught panic.
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mutate the stats under the lock.
    pub(crate) fn record<R>(&self, f: impl FnOnce(&mut Stats) -> R) -> R {
        f(&mut self.lock())
    }

    pub(crate) fn snapshot(&self) -> Stats {
        self.lock().clone()
    }

    /// Append a handler entry and return its index.
    pub(crate) fn push_handler(&self, entry: HandlerStats) -> usize {
        self.record(|stats| {
            stats.handlers.push(entry);
            stats.handlers.len() - 1
        })
    }

    /// Close the handled and total spans of a handler entry.
    pub(crate) fn close_handler(&self, index: usize) {
        let at = self.now();
        self.record(|stats| {
            if let Some(entry) = stats.handlers.get_mut(index) {
                entry.handled.close(at);
                entry.total.close(at);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_elapsed() {
        let mut span = Span::opened(Duration::from_millis(5));
        assert!(!span.is_complete());
        assert_eq!(span.elapsed(), None);

        span.close(Duration::from_millis(12));
        assert!(span.is_complete());
        assert_eq!(span.elapsed(), Some(Duration::from_millis(7)));
    }

    #[test]
    fn test_default_span_is_empty() {
        let span = Span::default();
        assert_eq!(span.start, None);
        assert_eq!(span.end, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_is_monotonic() {
        let clock = Clock::start();
        let first = clock.now();
        tokio::time::advance(Duration::from_millis(40)).await;
        let second = clock.now();
        assert_eq!(second - first, Duration::from_millis(40));
    }

    #[test]
    fn test_recorder_handler_entries() {
        let recorder = Recorder::new(Clock::start());
        let idx = recorder.push_handler(HandlerStats {
            handler_hash: "a".to_string(),
            ..Default::default()
        });
        recorder.record(|s| s.handlers[idx].handled = Span::opened(Duration::ZERO));
        recorder.close_handler(idx);

        let stats = recorder.snapshot();
        assert_eq!(stats.handlers.len(), 1);
        assert!(stats.handler("a").unwrap().handled.is_complete());
        assert!(stats.handler("missing").is_none());
    }

    #[test]
    fn test_close_unknown_index_is_ignored() {
        let recorder = Recorder::new(Clock::start());
        recorder.close_handler(3);
        assert!(recorder.snapshot().handlers.is_empty());
    }

    #[test]
    fn test_failed_sends_and_serialization() {
        let mut stats = Stats::default();
        stats.send.items.push(SendItem {
            span: Span::opened(Duration::ZERO),
            ok: true,
            error: None,
        });
        stats.send.items.push(SendItem {
            span: Span::opened(Duration::ZERO),
            ok: false,
            error: Some("down".to_string()),
        });
        assert_eq!(stats.failed_sends(), 1);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["send"]["items"][1]["error"], "down");
        assert!(json["send"]["items"][0].get("error").is_none());
    }
}
