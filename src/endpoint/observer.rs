//! Page-observer protocol model (§4.2, §9).
//!
//! Modeled as two cooperating components connected by a strictly-typed event
//! channel, per the Design Notes' re-architecting guidance for the source's
//! "dual-world page injection": [`Observer`] holds completion-detection
//! state, the worker (in [`crate::endpoint::worker`]) holds the outbound
//! frame capability. Neither reaches into the other's state; they only
//! exchange [`ObserverEvent`].

use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;

/// How completion was detected, carried in the terminal milestone's `data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSource {
    /// The page's completion-confirmation endpoint fired (canonical signal).
    CompletionEndpoint,
    /// DOM content stopped growing for the stability window (fallback).
    DomStabilityFallback,
}

/// An event posted from the observer to the worker.
#[derive(Debug, Clone)]
pub enum ObserverEvent {
    /// The observed operation completed.
    Completed {
        /// How completion was detected.
        source: CompletionSource,
        /// Any partial result captured alongside the completion signal.
        partial_result: Option<serde_json::Value>,
    },
    /// No completion signal arrived before the observer's own timeout.
    TimedOut,
}

/// DOM stability is declared after this much time with no content growth and
/// no visible stop/cancel control (§4.2).
pub const DOM_STABILITY_WINDOW: Duration = Duration::from_secs(2);

/// Tracks one in-progress page observation. The completion-endpoint signal
/// is canonical; DOM stability is consulted only as a fallback once the
/// stability window elapses with no endpoint signal (§9 open question:
/// resolved in favor of the spec's stated precedence).
pub struct Observer {
    last_growth_at: SystemTime,
    stop_control_visible: bool,
    completion_endpoint_fired: Option<serde_json::Value>,
    events: mpsc::Sender<ObserverEvent>,
}

impl Observer {
    /// Starts observing, with a channel the worker listens on for events.
    #[must_use]
    pub fn new(now: SystemTime, events: mpsc::Sender<ObserverEvent>) -> Self {
        Self {
            last_growth_at: now,
            stop_control_visible: true,
            completion_endpoint_fired: None,
            events,
        }
    }

    /// Records DOM content growth, resetting the stability clock.
    pub fn record_content_growth(&mut self, now: SystemTime) {
        self.last_growth_at = now;
    }

    /// Records whether a stop/cancel control is currently visible.
    pub fn set_stop_control_visible(&mut self, visible: bool) {
        self.stop_control_visible = visible;
    }

    /// Records that the canonical completion endpoint fired. This takes
    /// precedence over the DOM-stability fallback whenever both would
    /// otherwise be consulted at the same poll.
    pub async fn record_completion_endpoint(&mut self, result: serde_json::Value) {
        self.completion_endpoint_fired = Some(result.clone());
        let _ = self
            .events
            .send(ObserverEvent::Completed {
                source: CompletionSource::CompletionEndpoint,
                partial_result: Some(result),
            })
            .await;
    }

    /// Polls DOM stability; call on a fixed cadence while no completion
    /// endpoint signal has fired. Fires the fallback at most once.
    pub async fn poll_stability(&mut self, now: SystemTime, partial_result: Option<serde_json::Value>) {
        if self.completion_endpoint_fired.is_some() {
            return;
        }
        let stable_for = now
            .duration_since(self.last_growth_at)
            .unwrap_or(Duration::ZERO);
        if stable_for >= DOM_STABILITY_WINDOW && !self.stop_control_visible {
            let _ = self
                .events
                .send(ObserverEvent::Completed {
                    source: CompletionSource::DomStabilityFallback,
                    partial_result,
                })
                .await;
        }
    }

    /// Signals that the observer itself gave up waiting (`observer_timeout`).
    pub async fn time_out(&mut self) {
        let _ = self.events.send(ObserverEvent::TimedOut).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completion_endpoint_is_canonical_over_stability() {
        let (tx, mut rx) = mpsc::channel(4);
        let now = SystemTime::now();
        let mut observer = Observer::new(now, tx);
        observer.set_stop_control_visible(false);
        observer
            .record_completion_endpoint(serde_json::json!({"text": "done"}))
            .await;
        // A stability poll after the endpoint already fired must not emit a
        // second event.
        observer
            .poll_stability(now + DOM_STABILITY_WINDOW, None)
            .await;
        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            ObserverEvent::Completed {
                source: CompletionSource::CompletionEndpoint,
                ..
            }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stability_fallback_fires_after_window_with_no_growth() {
        let (tx, mut rx) = mpsc::channel(4);
        let now = SystemTime::now();
        let mut observer = Observer::new(now, tx);
        observer.set_stop_control_visible(false);
        observer
            .poll_stability(now + DOM_STABILITY_WINDOW, Some(serde_json::json!({})))
            .await;
        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            ObserverEvent::Completed {
                source: CompletionSource::DomStabilityFallback,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn stability_fallback_withheld_while_stop_control_visible() {
        let (tx, mut rx) = mpsc::channel(4);
        let now = SystemTime::now();
        let mut observer = Observer::new(now, tx);
        observer
            .poll_stability(now + DOM_STABILITY_WINDOW, None)
            .await;
        assert!(rx.try_recv().is_err());
    }
}
