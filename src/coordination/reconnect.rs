//! Reconnect backoff and outbound-queue replay (§4.4).
//!
//! Grounded in the teacher's `time_provider` injection pattern: backoff
//! duration is computed here, actually sleeping is delegated to a
//! [`SharedTimeProvider`] so tests can skip the wait.

use crate::time_provider::SharedTimeProvider;
use rand::Rng;
use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const JITTER_FRACTION: f64 = 0.2;
/// Frames older than this are dropped from the replay queue with a warning.
pub const STALE_FRAME_AGE: Duration = Duration::from_secs(60);

/// Tracks the exponential backoff state across repeated reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    attempt: u32,
}

impl ReconnectBackoff {
    /// Starts a fresh backoff sequence.
    #[must_use]
    pub fn new() -> Self {
        Self { attempt: 0 }
    }

    /// Computes the next delay: `1s * 2^attempt`, capped at 30s, with ±20%
    /// uniform jitter, and advances the internal attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let base = INITIAL_BACKOFF
            .checked_mul(1u32.checked_shl(self.attempt).unwrap_or(u32::MAX))
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF);
        self.attempt = self.attempt.saturating_add(1);
        jitter(base)
    }

    /// Resets the sequence after a successful reconnect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Sleeps for [`Self::next_delay`] using the given time provider.
    pub async fn wait(&mut self, time_provider: &SharedTimeProvider) {
        let delay = self.next_delay();
        time_provider.sleep(delay).await;
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new()
    }
}

fn jitter(base: Duration) -> Duration {
    let jitter_range = base.as_secs_f64() * JITTER_FRACTION;
    let offset = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
    let seconds = (base.as_secs_f64() + offset).max(0.0);
    Duration::from_secs_f64(seconds)
}

/// A frame queued for delivery while the connection was down, with the time
/// it was enqueued so staleness can be judged at flush time.
pub struct QueuedFrame<F> {
    /// The queued frame itself.
    pub frame: F,
    /// When the frame was enqueued, used to judge staleness at flush time.
    pub enqueued_at: SystemTime,
}

/// Outbound queue that survives a disconnect and replays in enqueue order on
/// reconnect, dropping anything older than [`STALE_FRAME_AGE`].
pub struct ReplayQueue<F> {
    frames: VecDeque<QueuedFrame<F>>,
}

impl<F> ReplayQueue<F> {
    /// Creates an empty replay queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: VecDeque::new(),
        }
    }

    /// Enqueues a frame produced while disconnected.
    pub fn push(&mut self, frame: F, now: SystemTime) {
        self.frames.push_back(QueuedFrame {
            frame,
            enqueued_at: now,
        });
    }

    /// Drains the queue in enqueue order, dropping frames older than
    /// [`STALE_FRAME_AGE`] and returning how many were dropped.
    pub fn flush(&mut self, now: SystemTime) -> (Vec<F>, usize) {
        let mut fresh = Vec::with_capacity(self.frames.len());
        let mut dropped = 0;
        for queued in self.frames.drain(..) {
            let age = now
                .duration_since(queued.enqueued_at)
                .unwrap_or(Duration::ZERO);
            if age > STALE_FRAME_AGE {
                dropped += 1;
            } else {
                fresh.push(queued.frame);
            }
        }
        (fresh, dropped)
    }

    /// Current queue depth.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl<F> Default for ReplayQueue<F> {
    fn default() -> Self {
        Self::new()
    }
}
