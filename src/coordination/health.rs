//! Passive connection health, derived from observed message flow (§3.7, §4.4).
//!
//! No ping frames: every component that owns a connection (RF per client,
//! EG, TSC) keeps one [`ConnectionHealth`] and calls [`ConnectionHealth::record_sent`]
//! / [`record_received`](ConnectionHealth::record_received) on the wire path;
//! classification is computed on demand, never pushed.

use std::time::{Duration, SystemTime};

/// Idleness bucket reported to admin clients via `health.report`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthClassification {
    /// Activity within the last 5 seconds.
    Active,
    /// Idle for at least 5s but less than 30s.
    IdleSeconds,
    /// Idle for 30s or more.
    IdleMinutes,
    /// No socket at all.
    Disconnected,
}

impl HealthClassification {
    /// The wire symbol used in `health.report` payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::IdleSeconds => "idle-seconds",
            Self::IdleMinutes => "idle-minutes",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Per-connection counters and derived idleness (§3.7).
#[derive(Debug, Clone)]
pub struct ConnectionHealth {
    connected_at: SystemTime,
    last_activity_at: SystemTime,
    messages_received: u64,
    messages_sent: u64,
    reconnect_count: u64,
    queue_length: usize,
    connected: bool,
}

const ACTIVE_THRESHOLD: Duration = Duration::from_secs(5);
const IDLE_SECONDS_THRESHOLD: Duration = Duration::from_secs(30);

impl ConnectionHealth {
    /// Starts tracking a freshly-established connection.
    #[must_use]
    pub fn new(now: SystemTime) -> Self {
        Self {
            connected_at: now,
            last_activity_at: now,
            messages_received: 0,
            messages_sent: 0,
            reconnect_count: 0,
            queue_length: 0,
            connected: true,
        }
    }

    /// Records an outbound frame, touching `lastActivityAt`.
    pub fn record_sent(&mut self, now: SystemTime) {
        self.messages_sent += 1;
        self.last_activity_at = now;
    }

    /// Records an inbound frame, touching `lastActivityAt`.
    pub fn record_received(&mut self, now: SystemTime) {
        self.messages_received += 1;
        self.last_activity_at = now;
    }

    /// Updates the current outbound queue depth, for reporting only.
    pub fn set_queue_length(&mut self, queue_length: usize) {
        self.queue_length = queue_length;
    }

    /// Marks this connection as re-established after an outage.
    pub fn record_reconnect(&mut self, now: SystemTime) {
        self.reconnect_count += 1;
        self.connected = true;
        self.connected_at = now;
        self.last_activity_at = now;
    }

    /// Marks the socket as gone; classification becomes `Disconnected`
    /// regardless of how recently there was activity.
    pub fn record_disconnect(&mut self) {
        self.connected = false;
    }

    /// Classifies idleness at `now`, relative to `last_activity_at`.
    #[must_use]
    pub fn classify(&self, now: SystemTime) -> HealthClassification {
        if !self.connected {
            return HealthClassification::Disconnected;
        }
        let idle = now
            .duration_since(self.last_activity_at)
            .unwrap_or(Duration::ZERO);
        if idle < ACTIVE_THRESHOLD {
            HealthClassification::Active
        } else if idle < IDLE_SECONDS_THRESHOLD {
            HealthClassification::IdleSeconds
        } else {
            HealthClassification::IdleMinutes
        }
    }

    /// Seconds since the last send or receive.
    #[must_use]
    pub fn idle_seconds(&self, now: SystemTime) -> u64 {
        now.duration_since(self.last_activity_at)
            .unwrap_or(Duration::ZERO)
            .as_secs()
    }

    /// Total frames received.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }

    /// Total frames sent.
    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    /// Number of reconnects observed.
    #[must_use]
    pub fn reconnect_count(&self) -> u64 {
        self.reconnect_count
    }

    /// Current outbound queue depth.
    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.queue_length
    }

    /// When this connection (or its current incarnation) was established.
    #[must_use]
    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_connection_is_active() {
        let now = SystemTime::now();
        let health = ConnectionHealth::new(now);
        assert_eq!(health.classify(now), HealthClassification::Active);
    }

    #[test]
    fn idle_for_ten_seconds_is_idle_seconds() {
        let now = SystemTime::now();
        let health = ConnectionHealth::new(now);
        let later = now + Duration::from_secs(10);
        assert_eq!(health.classify(later), HealthClassification::IdleSeconds);
    }

    #[test]
    fn idle_for_a_minute_is_idle_minutes() {
        let now = SystemTime::now();
        let health = ConnectionHealth::new(now);
        let later = now + Duration::from_secs(60);
        assert_eq!(health.classify(later), HealthClassification::IdleMinutes);
    }

    #[test]
    fn disconnected_overrides_recency() {
        let now = SystemTime::now();
        let mut health = ConnectionHealth::new(now);
        health.record_disconnect();
        assert_eq!(health.classify(now), HealthClassification::Disconnected);
    }

    #[test]
    fn activity_resets_idle_classification() {
        let now = SystemTime::now();
        let mut health = ConnectionHealth::new(now);
        let later = now + Duration::from_secs(40);
        health.record_received(later);
        assert_eq!(health.classify(later), HealthClassification::Active);
    }

    proptest::proptest! {
        /// Classification is a pure function of elapsed idle seconds: for any
        /// non-negative gap, exactly one of the three connected buckets
        /// applies, matching the thresholds in `classify` directly.
        #[test]
        fn classification_matches_threshold_for_any_idle_gap(idle_secs in 0u64..3600) {
            let now = SystemTime::now();
            let health = ConnectionHealth::new(now);
            let later = now + Duration::from_secs(idle_secs);
            let classification = health.classify(later);
            let expected = if idle_secs < ACTIVE_THRESHOLD.as_secs() {
                HealthClassification::Active
            } else if idle_secs < IDLE_SECONDS_THRESHOLD.as_secs() {
                HealthClassification::IdleSeconds
            } else {
                HealthClassification::IdleMinutes
            };
            proptest::prop_assert_eq!(classification, expected);
        }
    }
}
