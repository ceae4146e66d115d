//! Operation Manager (OM): owns operation records end to end (§4.3).
//!
//! Structured like the teacher's `message_router::traits::RouterError` /
//! `MessageRouterImpl` pairing: a `thiserror` enum for the taxonomy plus a
//! `DashMap`-backed concurrent store, one entry per operation, each mutated
//! under its own lock — "single-writer-per-record discipline" via
//! `DashMap`'s per-shard locking rather than one global mutex.

use crate::tool_server::domain_types::{OperationId, OperationRecord, OperationStatus};
use crate::tool_server::persistence::{OperationStore, PersistenceError};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Errors produced by the Operation Manager.
#[derive(Debug, Error)]
pub enum OperationError {
    /// A milestone arrived whose `operationId` is not tracked by this OM.
    /// Per §4.3 this is an invariant violation to be logged and dropped,
    /// not retried.
    #[error("unknown operation id: {operation_id}")]
    UnknownOperation {
        /// The operation id that was not found.
        operation_id: OperationId,
    },

    /// Persisting a snapshot failed.
    #[error("persistence error: {source}")]
    Persistence {
        /// The underlying persistence error.
        #[from]
        source: PersistenceError,
    },
}

/// Default grace window recovered operations get before `recovery_timeout`.
pub const DEFAULT_RECOVERY_GRACE: Duration = Duration::from_secs(30);
/// Default per-operation deadline (§5).
pub const DEFAULT_OPERATION_DEADLINE: Duration = Duration::from_secs(180);
/// Default purge window past a terminal `completedAt` (§3.3).
pub const DEFAULT_PURGE_AFTER: Duration = Duration::from_secs(600);

/// The three sweep windows the background loop in
/// [`crate::tool_server::client::ToolServerClient::run`] enforces, following
/// the same dev/production/testing-preset shape as
/// [`crate::relay::config::RelayConfig`] one level down.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct OperationManagerConfig {
    /// Grace window recovered operations get before `recovery_timeout`.
    pub recovery_grace: Duration,
    /// Per-operation deadline past which a non-terminal record times out.
    pub operation_deadline: Duration,
    /// How long a terminal record stays in memory after completing.
    pub purge_after: Duration,
}

impl OperationManagerConfig {
    /// Development preset: the spec's stated defaults.
    #[must_use]
    pub fn development() -> Self {
        Self {
            recovery_grace: DEFAULT_RECOVERY_GRACE,
            operation_deadline: DEFAULT_OPERATION_DEADLINE,
            purge_after: DEFAULT_PURGE_AFTER,
        }
    }

    /// Production preset: identical to development — these windows are
    /// protocol-level defaults (§5), not environment-tuned.
    #[must_use]
    pub fn production() -> Self {
        Self::development()
    }

    /// Testing preset: short windows so sweep behavior is exercisable
    /// without sleeping for minutes.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            recovery_grace: Duration::from_millis(200),
            operation_deadline: Duration::from_secs(2),
            purge_after: Duration::from_secs(1),
        }
    }
}

/// Tracks every operation this TSC has created, in memory, with a durable
/// snapshot on every mutation.
pub struct OperationManager {
    records: DashMap<OperationId, OperationRecord>,
    store: Arc<OperationStore>,
}

impl OperationManager {
    /// Builds an empty manager over `store`; call [`Self::recover`] after
    /// construction to load any snapshots left by a previous process.
    #[must_use]
    pub fn new(store: Arc<OperationStore>) -> Self {
        Self {
            records: DashMap::new(),
            store,
        }
    }

    /// Creates a new operation record in `Queued`, persists it immediately,
    /// and returns its id (§4.3 step 1).
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::Persistence`] if the initial snapshot write
    /// fails.
    #[instrument(skip(self))]
    pub async fn create(&self, command: &str) -> Result<OperationId, OperationError> {
        let record = OperationRecord::new(OperationId::mint(command), command);
        let id = record.id.clone();
        self.store.save(&record).await?;
        self.records.insert(id.clone(), record);
        Ok(id)
    }

    /// Applies an incoming milestone, persisting the updated record.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::UnknownOperation`] if `operation_id` is not
    /// tracked (logged by the caller and dropped per §4.3's invariant), or
    /// [`OperationError::Persistence`] if the snapshot write fails.
    #[instrument(skip(self, data))]
    pub async fn apply_milestone(
        &self,
        operation_id: &OperationId,
        name: &str,
        data: Option<serde_json::Value>,
    ) -> Result<(), OperationError> {
        let mut entry = self
            .records
            .get_mut(operation_id)
            .ok_or_else(|| OperationError::UnknownOperation {
                operation_id: operation_id.clone(),
            })?;
        entry.apply_milestone(name, data);
        self.store.save(&entry).await?;
        Ok(())
    }

    /// Returns a clone of the current record state, if tracked.
    #[must_use]
    pub fn get(&self, operation_id: &OperationId) -> Option<OperationRecord> {
        self.records.get(operation_id).map(|r| r.clone())
    }

    /// Sweeps every non-terminal record whose deadline has elapsed,
    /// transitioning it to `TimedOut` and persisting the change. Returns the
    /// ids transitioned this sweep, so the caller can send best-effort
    /// `cancel` frames.
    #[instrument(skip(self))]
    pub async fn sweep_deadlines(&self, deadline: Duration) -> Vec<OperationId> {
        let now = now_millis();
        let mut timed_out = Vec::new();
        let candidates: Vec<OperationId> = self
            .records
            .iter()
            .filter(|entry| {
                !entry.status.is_terminal()
                    && now.saturating_sub(entry.created_at) >= deadline.as_millis() as u64
            })
            .map(|entry| entry.key().clone())
            .collect();
        for id in candidates {
            if let Some(mut entry) = self.records.get_mut(&id) {
                entry.apply_milestone("timed_out", None);
                if let Err(error) = self.store.save(&entry).await {
                    warn!(%error, "failed to persist timed-out operation");
                }
                timed_out.push(id);
            }
        }
        timed_out
    }

    /// Purges terminal records whose `completedAt` is older than
    /// `purge_after`, deleting their snapshot too.
    #[instrument(skip(self))]
    pub async fn purge_completed(&self, purge_after: Duration) {
        let now = now_millis();
        let expired: Vec<OperationId> = self
            .records
            .iter()
            .filter(|entry| {
                entry
                    .completed_at
                    .is_some_and(|completed_at| now.saturating_sub(completed_at) >= purge_after.as_millis() as u64)
            })
            .map(|entry| entry.key().clone())
            .collect();
        for id in expired {
            self.records.remove(&id);
            self.store.delete(&id).await;
        }
    }

    /// Loads every snapshot from disk, marking non-terminal records
    /// `Recovered` so [`Self::sweep_recovery_grace`] can later time them out
    /// if nothing arrives (§4.3 recovery semantics).
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::Persistence`] if the directory cannot be
    /// listed.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize, OperationError> {
        let records = self.store.load_all().await?;
        let mut recovered = 0;
        for mut record in records {
            if !record.status.is_terminal() {
                record.status = OperationStatus::Recovered;
                recovered += 1;
            }
            self.records.insert(record.id.clone(), record);
        }
        info!(recovered, "loaded operation snapshots from disk");
        Ok(recovered)
    }

    /// Fails every still-`Recovered` record past its grace window with
    /// `recovery_timeout` (§4.3, §8 scenario 5).
    #[instrument(skip(self))]
    pub async fn sweep_recovery_grace(&self, grace: Duration, recovered_at: SystemTime) {
        let elapsed = SystemTime::now()
            .duration_since(recovered_at)
            .unwrap_or(Duration::ZERO);
        if elapsed < grace {
            return;
        }
        let stale: Vec<OperationId> = self
            .records
            .iter()
            .filter(|entry| entry.status == OperationStatus::Recovered)
            .map(|entry| entry.key().clone())
            .collect();
        for id in stale {
            if let Some(mut entry) = self.records.get_mut(&id) {
                entry.apply_milestone(
                    "failed",
                    Some(serde_json::json!({
                        "code": "transport",
                        "message": "recovery_timeout",
                    })),
                );
                let _ = self.store.save(&entry).await;
            }
        }
    }

    /// Number of operations currently tracked in memory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no operations are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn now_millis() -> u64 {
    u64::try_from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis(),
    )
    .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn manager() -> (OperationManager, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(OperationStore::new(dir.path()));
        store.ensure_dir().await.unwrap();
        (OperationManager::new(store), dir)
    }

    #[tokio::test]
    async fn create_then_apply_milestones_reaches_completed() {
        let (om, _dir) = manager().await;
        let id = om.create("debug_echo").await.unwrap();
        om.apply_milestone(&id, "started", None).await.unwrap();
        om.apply_milestone(
            &id,
            "response_completed",
            Some(serde_json::json!({"text": "x"})),
        )
        .await
        .unwrap();

        let record = om.get(&id).unwrap();
        assert_eq!(record.status, OperationStatus::Completed);
        assert_eq!(record.milestones.len(), 2);
    }

    #[tokio::test]
    async fn milestone_for_unknown_operation_is_an_error() {
        let (om, _dir) = manager().await;
        let bogus = OperationId::mint("debug_echo");
        let result = om.apply_milestone(&bogus, "started", None).await;
        assert!(matches!(
            result,
            Err(OperationError::UnknownOperation { .. })
        ));
    }

    #[tokio::test]
    async fn recover_marks_non_terminal_records_recovered() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(OperationStore::new(dir.path()));
        store.ensure_dir().await.unwrap();

        let om = OperationManager::new(store.clone());
        let id = om.create("send_message").await.unwrap();
        om.apply_milestone(&id, "dispatched", None).await.unwrap();

        let fresh_om = OperationManager::new(store);
        fresh_om.recover().await.unwrap();
        let record = fresh_om.get(&id).unwrap();
        assert_eq!(record.status, OperationStatus::Recovered);
    }

    #[tokio::test]
    async fn recovery_grace_elapsed_fails_with_recovery_timeout() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(OperationStore::new(dir.path()));
        store.ensure_dir().await.unwrap();

        let om = OperationManager::new(store.clone());
        let id = om.create("send_message").await.unwrap();
        om.apply_milestone(&id, "dispatched", None).await.unwrap();

        let fresh_om = OperationManager::new(store);
        fresh_om.recover().await.unwrap();
        let long_ago = SystemTime::now() - Duration::from_secs(31);
        fresh_om
            .sweep_recovery_grace(DEFAULT_RECOVERY_GRACE, long_ago)
            .await;

        let record = fresh_om.get(&id).unwrap();
        assert_eq!(record.status, OperationStatus::Failed);
        assert_eq!(
            record.error.unwrap().message,
            "recovery_timeout"
        );
    }

    #[tokio::test]
    async fn purge_removes_terminal_records_past_window() {
        let (om, _dir) = manager().await;
        let id = om.create("debug_echo").await.unwrap();
        om.apply_milestone(&id, "response_completed", Some(serde_json::json!({})))
            .await
            .unwrap();
        if let Some(mut record) = om.records.get_mut(&id) {
            record.completed_at = Some(0);
        }
        om.purge_completed(DEFAULT_PURGE_AFTER).await;
        assert!(om.get(&id).is_none());
    }
}
