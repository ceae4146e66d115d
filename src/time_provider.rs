//! Injected clock used by the two places tabrelay actually waits on wall time:
//! [`crate::coordination::reconnect::ReconnectBackoff::wait`] (so a relay
//! reconnect test doesn't sit through a real 30s backoff cap) and
//! [`crate::coordination::tab_lock::TabLockTable`]'s acquire/expiry-sweep
//! timestamps (so a lock's `max_hold` window can be pushed past in a test
//! without sleeping). Only `sleep` and `now` are needed at either call site,
//! so the trait carries only those two methods.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::sleep as tokio_sleep;

/// Dependency-injected clock: real time in production, a collapsed clock in
/// tests.
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Waits for `duration` before returning.
    async fn sleep(&self, duration: Duration);

    /// The current wall-clock time.
    #[must_use]
    fn now(&self) -> SystemTime;
}

/// Sleeps and reads the clock for real; used by every production role.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealTimeProvider;

impl RealTimeProvider {
    /// Builds a real time provider.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeProvider for RealTimeProvider {
    async fn sleep(&self, duration: Duration) {
        tokio_sleep(duration).await;
    }

    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Collapses every `sleep` to at most 1ms (still yielding to the scheduler,
/// so code relying on a sleep to hand off to another task still behaves),
/// so tests exercising `ReconnectBackoff`'s full 1s-to-30s range or
/// `TabLockTable`'s expiry sweep don't wait in real time for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockTimeProvider;

impl MockTimeProvider {
    /// Builds a collapsed-delay time provider.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeProvider for MockTimeProvider {
    async fn sleep(&self, duration: Duration) {
        tokio_sleep(duration.min(Duration::from_millis(1))).await;
    }

    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Shared handle to an injected clock.
pub type SharedTimeProvider = Arc<dyn TimeProvider>;

/// The clock every production role (relay, endpoint, tool-server) uses.
#[must_use]
pub fn production_time_provider() -> SharedTimeProvider {
    Arc::new(RealTimeProvider::new())
}

/// The clock every test uses, so backoff and sweep delays collapse to
/// near-zero instead of stalling the test.
#[must_use]
pub fn test_time_provider() -> SharedTimeProvider {
    Arc::new(MockTimeProvider::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test]
    async fn mock_provider_collapses_long_sleeps() {
        let provider = MockTimeProvider::new();
        let start = Instant::now();
        provider.sleep(Duration::from_secs(30)).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn real_provider_actually_sleeps() {
        let provider = RealTimeProvider::new();
        let start = Instant::now();
        provider.sleep(Duration::from_millis(50)).await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
