//! Per-tab FIFO lock with expiry sweep (§3.4, §4.4).
//!
//! One [`TabLockTable`] is held by the Endpoint Gateway; it owns one
//! [`TabLock`] per `resourceId` (tab). Structured like the teacher's
//! `DashMap`-backed registries in `message_router::router`: a concurrent map
//! of small per-key state machines, each protected only by the map's own
//! sharded locking.

use crate::domain_types::TabId;
use crate::time_provider::SharedTimeProvider;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;
use tracing::{debug, instrument, warn};

/// Outcome of [`TabLockTable::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The caller now owns the lock.
    Acquired,
    /// The lock is held by another operation; the caller was enqueued.
    Queued,
    /// `max_wait_ms` was `0` and the lock was already held.
    Rejected,
}

struct Waiter {
    operation_id: String,
    deadline: SystemTime,
}

struct LockState {
    owner: Option<String>,
    acquired_at: SystemTime,
    expires_at: SystemTime,
    queue: VecDeque<Waiter>,
    /// Fired on every ownership change so [`TabLockTable::acquire`]'s waiters
    /// can recheck whether they were just promoted, instead of polling.
    promoted: Arc<Notify>,
}

/// A single resource's lock state, snapshotted for callers that need to
/// inspect ownership without holding the table's internal guard.
#[derive(Debug, Clone)]
pub struct TabLockSnapshot {
    /// The tab this lock guards.
    pub resource_id: TabId,
    /// Current owner, if any.
    pub owner_operation_id: Option<String>,
    /// Number of operations queued behind the current owner.
    pub queue_len: usize,
}

/// Maximum duration a lock may be held before the expiry sweep reclaims it.
pub const DEFAULT_MAX_HOLD: Duration = Duration::from_secs(30);

/// [`TabLockTable`]'s one tunable, following the same dev/production/testing
/// preset shape as [`crate::relay::config::RelayConfig`].
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct TabLockConfig {
    /// Maximum duration a lock may be held before the expiry sweep reclaims
    /// it from an owner that never released.
    pub max_hold: Duration,
}

impl TabLockConfig {
    /// Development preset: the spec's stated default.
    #[must_use]
    pub fn development() -> Self {
        Self { max_hold: DEFAULT_MAX_HOLD }
    }

    /// Production preset: identical to development.
    #[must_use]
    pub fn production() -> Self {
        Self::development()
    }

    /// Testing preset: a short hold window so expiry sweeps are exercisable
    /// without sleeping for 30 seconds.
    #[must_use]
    pub fn testing() -> Self {
        Self { max_hold: Duration::from_millis(200) }
    }
}

/// Table of per-tab FIFO locks.
pub struct TabLockTable {
    locks: DashMap<TabId, LockState>,
    max_hold: Duration,
    time_provider: SharedTimeProvider,
}

impl TabLockTable {
    /// Builds an empty table.
    #[must_use]
    pub fn new(max_hold: Duration, time_provider: SharedTimeProvider) -> Self {
        Self {
            locks: DashMap::new(),
            max_hold,
            time_provider,
        }
    }

    /// Attempts to acquire the lock on `resource_id` for `operation_id`.
    ///
    /// `max_wait_ms == 0` never returns [`AcquireOutcome::Queued`] (§8
    /// boundary behavior): the caller either wins immediately or is
    /// rejected.
    #[instrument(skip(self), fields(%resource_id, %operation_id))]
    pub fn try_acquire(
        &self,
        resource_id: &TabId,
        operation_id: &str,
        max_wait_ms: u64,
    ) -> AcquireOutcome {
        let now = self.time_provider.now();
        let mut entry = self.locks.entry(resource_id.clone()).or_insert_with(|| LockState {
            owner: None,
            acquired_at: now,
            expires_at: now,
            queue: VecDeque::new(),
            promoted: Arc::new(Notify::new()),
        });

        if entry.owner.is_none() {
            entry.owner = Some(operation_id.to_string());
            entry.acquired_at = now;
            entry.expires_at = now + self.max_hold;
            debug!("lock acquired immediately");
            return AcquireOutcome::Acquired;
        }

        if max_wait_ms == 0 {
            return AcquireOutcome::Rejected;
        }

        entry.queue.push_back(Waiter {
            operation_id: operation_id.to_string(),
            deadline: now + Duration::from_millis(max_wait_ms),
        });
        AcquireOutcome::Queued
    }

    /// Acquires the lock on `resource_id` for `operation_id`, waiting for
    /// promotion if the caller must queue behind the current owner (§4.2, §8
    /// Scenario 3) rather than failing immediately. Resolves once
    /// `operation_id` becomes owner, or once `max_wait_ms` elapses with no
    /// promotion — unlike [`Self::try_acquire`], this never itself returns
    /// [`AcquireOutcome::Queued`].
    #[instrument(skip(self), fields(%resource_id, %operation_id))]
    pub async fn acquire(
        &self,
        resource_id: &TabId,
        operation_id: &str,
        max_wait_ms: u64,
    ) -> AcquireOutcome {
        match self.try_acquire(resource_id, operation_id, max_wait_ms) {
            AcquireOutcome::Queued => {}
            outcome => return outcome,
        }

        let deadline = self.time_provider.now() + Duration::from_millis(max_wait_ms);
        loop {
            let Some(promoted) = self.locks.get(resource_id).map(|entry| entry.promoted.clone()) else {
                return AcquireOutcome::Rejected;
            };
            let remaining = deadline
                .duration_since(self.time_provider.now())
                .unwrap_or(Duration::ZERO);
            if remaining.is_zero() {
                self.fail(resource_id, operation_id);
                return AcquireOutcome::Rejected;
            }

            tokio::select! {
                () = promoted.notified() => {
                    if let Some(entry) = self.locks.get(resource_id) {
                        if entry.owner.as_deref() == Some(operation_id) {
                            return AcquireOutcome::Acquired;
                        }
                    }
                }
                () = self.time_provider.sleep(remaining) => {}
            }
        }
    }

    /// Releases the lock if held by `operation_id`. Releasing a non-owner
    /// (or a lock with no owner) is a no-op; idempotent by design (§8).
    #[instrument(skip(self), fields(%resource_id, %operation_id))]
    pub fn release(&self, resource_id: &TabId, operation_id: &str) {
        let Some(mut entry) = self.locks.get_mut(resource_id) else {
            return;
        };
        if entry.owner.as_deref() != Some(operation_id) {
            warn!("release() called by non-owner, ignoring");
            return;
        }
        self.promote_next(&mut entry);
    }

    /// Removes `operation_id` from the queue, or forces a release if it is
    /// the current owner, regardless of reason.
    pub fn fail(&self, resource_id: &TabId, operation_id: &str) {
        let Some(mut entry) = self.locks.get_mut(resource_id) else {
            return;
        };
        if entry.owner.as_deref() == Some(operation_id) {
            self.promote_next(&mut entry);
        } else {
            entry.queue.retain(|w| w.operation_id != operation_id);
        }
    }

    /// Tears a lock down entirely: fails the current owner (if any) and
    /// every queued waiter, without promoting the next waiter to ownership.
    /// For the tab-teardown path (§4.2 step 5), which must end with no owner
    /// at all — `fail`/`release`'s single-caller promotion semantics are the
    /// wrong tool here, since they would hand the lock to a waiter for a tab
    /// that no longer exists. Returns every operation id that was holding or
    /// waiting on the lock, in owner-then-arrival order.
    pub fn fail_all(&self, resource_id: &TabId) -> Vec<String> {
        let Some(mut entry) = self.locks.get_mut(resource_id) else {
            return Vec::new();
        };
        let mut failed: Vec<String> = entry.owner.take().into_iter().collect();
        failed.extend(entry.queue.drain(..).map(|waiter| waiter.operation_id));
        entry.promoted.notify_waiters();
        failed
    }

    fn promote_next(&self, entry: &mut LockState) {
        let now = self.time_provider.now();
        match entry.queue.pop_front() {
            Some(next) => {
                entry.owner = Some(next.operation_id);
                entry.acquired_at = now;
                entry.expires_at = now + self.max_hold;
            }
            None => {
                entry.owner = None;
            }
        }
        entry.promoted.notify_waiters();
    }

    /// Evicts owners whose hold expired and expires stale waiters, returning
    /// the operation ids that lost the lock (owner) or their wait (waiter)
    /// this sweep, tagged by resource.
    ///
    /// Run every second per §4.4.
    pub fn expire_sweep(&self) -> Vec<(TabId, String, ExpiryReason)> {
        let now = self.time_provider.now();
        let mut expired = Vec::new();
        for mut entry in self.locks.iter_mut() {
            let resource_id = entry.key().clone();
            if let Some(owner) = entry.owner.clone() {
                if now >= entry.expires_at {
                    expired.push((resource_id.clone(), owner, ExpiryReason::LockExpired));
                    self.promote_next(&mut entry);
                }
            }
            let stale: Vec<String> = entry
                .queue
                .iter()
                .filter(|w| now >= w.deadline)
                .map(|w| w.operation_id.clone())
                .collect();
            entry.queue.retain(|w| now < w.deadline);
            if !stale.is_empty() {
                entry.promoted.notify_waiters();
            }
            for operation_id in stale {
                expired.push((
                    resource_id.clone(),
                    operation_id,
                    ExpiryReason::WaiterDeadlineElapsed,
                ));
            }
        }
        expired
    }

    /// Returns a snapshot of a tab's lock state, if it has ever been touched.
    #[must_use]
    pub fn snapshot(&self, resource_id: &TabId) -> Option<TabLockSnapshot> {
        self.locks.get(resource_id).map(|entry| TabLockSnapshot {
            resource_id: resource_id.clone(),
            owner_operation_id: entry.owner.clone(),
            queue_len: entry.queue.len(),
        })
    }
}

/// Why an expiry sweep reclaimed a lock or dropped a waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryReason {
    /// The owner's hold exceeded `max_hold`.
    LockExpired,
    /// A queued waiter's `max_wait_ms` deadline elapsed.
    WaiterDeadlineElapsed,
}
