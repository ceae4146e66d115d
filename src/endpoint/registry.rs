//! Unified resource registry (§9 Design Notes: "Scattered resource maps...
//! unify behind a `ResourceRegistry`").
//!
//! Holds tab locks, the injected-script registry, captured-event buffers,
//! and debug sessions behind one type with a single [`ResourceRegistry::destroy_tab`]
//! method that encodes the exact five-step teardown order from §4.2. Handler
//! code never reaches into the underlying maps directly.

use crate::coordination::tab_lock::TabLockTable;
use crate::domain_types::TabId;
use crate::endpoint::domain_types::{
    CapturedEvent, CapturedEventBuffer, DebugSession, InjectedScriptRegistry,
    DEFAULT_CAPTURE_CAPACITY,
};
use dashmap::DashMap;
use std::sync::Mutex;
use tracing::{info, instrument};

/// Outcome of a teardown, reporting which in-flight operation (if any) was
/// failed so the worker can emit its terminal milestone.
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    /// The operation that held the tab lock at teardown time, if any.
    pub failed_operation_id: Option<String>,
    /// Operations that were queued for the lock and are now failed.
    pub failed_queued_operation_ids: Vec<String>,
    /// Whether a network capture was active and got stopped.
    pub capture_stopped: bool,
    /// Whether a debug session was attached and got detached.
    pub debug_session_detached: bool,
}

/// All Endpoint-Gateway-owned per-tab resources, unified behind one type.
pub struct ResourceRegistry {
    tab_locks: TabLockTable,
    scripts: Mutex<InjectedScriptRegistry>,
    captures: DashMap<TabId, CapturedEventBuffer>,
    debug_sessions: DashMap<TabId, DebugSession>,
    /// Tracks which operation currently owns an active capture/session so
    /// teardown can report which operation was cancelled.
    active_operations: DashMap<TabId, String>,
}

impl ResourceRegistry {
    /// Builds an empty registry over the given tab-lock table.
    #[must_use]
    pub fn new(tab_locks: TabLockTable) -> Self {
        Self {
            tab_locks,
            scripts: Mutex::new(InjectedScriptRegistry::new()),
            captures: DashMap::new(),
            debug_sessions: DashMap::new(),
            active_operations: DashMap::new(),
        }
    }

    /// The tab lock table, for handlers that need `try_acquire`/`release`
    /// directly (teardown itself goes through [`Self::destroy_tab`]).
    #[must_use]
    pub fn tab_locks(&self) -> &TabLockTable {
        &self.tab_locks
    }

    /// Records that `operation_id` is the current active operation on
    /// `tab_id`, so a later teardown can report it as cancelled.
    pub fn set_active_operation(&self, tab_id: TabId, operation_id: String) {
        self.active_operations.insert(tab_id, operation_id);
    }

    /// Whether a tab's observer script has already signaled ready (§4.2
    /// idempotent injection).
    #[must_use]
    pub fn script_ready(&self, tab_id: &TabId) -> bool {
        self.scripts
            .lock()
            .expect("script registry mutex poisoned")
            .is_ready(tab_id)
    }

    /// Records an injection attempt; idempotent when already ready.
    pub fn record_script_injected(&self, tab_id: TabId, version: String) {
        self.scripts
            .lock()
            .expect("script registry mutex poisoned")
            .record_injected(tab_id, version, std::time::SystemTime::now());
    }

    /// Marks a tab's script ready.
    pub fn mark_script_ready(&self, tab_id: &TabId) {
        self.scripts
            .lock()
            .expect("script registry mutex poisoned")
            .mark_ready(tab_id);
    }

    /// Starts (or ensures) a capture buffer exists for `tab_id`.
    pub fn start_capture(&self, tab_id: TabId) {
        self.captures
            .entry(tab_id)
            .or_insert_with(|| CapturedEventBuffer::new(DEFAULT_CAPTURE_CAPACITY));
    }

    /// Appends a captured event, if capture is active for the tab.
    pub fn push_captured_event(&self, tab_id: &TabId, event: CapturedEvent) {
        if let Some(mut buffer) = self.captures.get_mut(tab_id) {
            buffer.push(event);
        }
    }

    /// Attaches a debug session.
    pub fn attach_debug_session(&self, tab_id: TabId) {
        self.debug_sessions.insert(
            tab_id.clone(),
            DebugSession {
                tab_id,
                attached_at: std::time::SystemTime::now(),
            },
        );
    }

    /// Executes the five-step teardown order from §4.2 for `tab_id`. Does
    /// not skip steps on intermediate errors — each step here is infallible
    /// bookkeeping, so strict sequencing is free to preserve.
    ///
    /// 1. Stop in-progress capture.
    /// 2. Detach debug session.
    /// 3. Cancel and fail the in-flight operation holding the lock.
    /// 4. Remove the script registry entry.
    /// 5. Release the lock; fail queued waiters with `resource_gone`.
    #[instrument(skip(self), fields(%tab_id))]
    pub fn destroy_tab(&self, tab_id: &TabId) -> TeardownReport {
        let mut report = TeardownReport::default();

        // 1. Stop capture.
        if self.captures.remove(tab_id).is_some() {
            report.capture_stopped = true;
        }

        // 2. Detach debug session.
        if self.debug_sessions.remove(tab_id).is_some() {
            report.debug_session_detached = true;
        }

        // 3. Cancel and fail the in-flight operation.
        if let Some((_, operation_id)) = self.active_operations.remove(tab_id) {
            report.failed_operation_id = Some(operation_id);
        }

        // 4. Remove script registry entry.
        self.scripts
            .lock()
            .expect("script registry mutex poisoned")
            .purge(tab_id);

        // 5. Release the lock and fail queued waiters with resource_gone,
        // without promoting any of them to owner of a tab that no longer
        // exists.
        let mut failed = self.tab_locks.fail_all(tab_id).into_iter();
        if report.failed_operation_id.is_none() {
            report.failed_operation_id = failed.next();
        } else {
            failed.next();
        }
        report.failed_queued_operation_ids = failed.collect();

        info!(?report, "tab torn down");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::tab_lock::{TabLockTable, DEFAULT_MAX_HOLD};
    use crate::time_provider::test_time_provider;

    fn registry() -> ResourceRegistry {
        ResourceRegistry::new(TabLockTable::new(DEFAULT_MAX_HOLD, test_time_provider()))
    }

    fn tab(id: &str) -> TabId {
        TabId::try_from(id.to_string()).unwrap()
    }

    #[test]
    fn destroy_tab_reports_capture_and_debug_cleanup() {
        let registry = registry();
        registry.start_capture(tab("7"));
        registry.attach_debug_session(tab("7"));
        registry.set_active_operation(tab("7"), "op_a".to_string());

        let report = registry.destroy_tab(&tab("7"));
        assert!(report.capture_stopped);
        assert!(report.debug_session_detached);
        assert_eq!(report.failed_operation_id.as_deref(), Some("op_a"));
    }

    #[test]
    fn destroy_tab_fails_queued_waiters_without_promoting_them() {
        let registry = registry();
        registry.set_active_operation(tab("7"), "op_a".to_string());
        registry.tab_locks().try_acquire(&tab("7"), "op_a", 5_000);
        registry
            .tab_locks()
            .try_acquire(&tab("7"), "op_b", 5_000);
        registry
            .tab_locks()
            .try_acquire(&tab("7"), "op_c", 5_000);

        let report = registry.destroy_tab(&tab("7"));
        assert_eq!(report.failed_operation_id.as_deref(), Some("op_a"));
        assert_eq!(report.failed_queued_operation_ids, vec!["op_b", "op_c"]);

        let snapshot = registry.tab_locks().snapshot(&tab("7")).unwrap();
        assert!(snapshot.owner_operation_id.is_none());
        assert_eq!(snapshot.queue_len, 0);
    }

    #[test]
    fn destroy_tab_on_untouched_tab_is_harmless() {
        let registry = registry();
        let report = registry.destroy_tab(&tab("99"));
        assert!(!report.capture_stopped);
        assert!(!report.debug_session_detached);
        assert!(report.failed_operation_id.is_none());
    }

    #[test]
    fn destroy_tab_purges_script_registry() {
        let registry = registry();
        registry.record_script_injected(tab("7"), "v1".to_string());
        registry.mark_script_ready(&tab("7"));
        assert!(registry.script_ready(&tab("7")));
        registry.destroy_tab(&tab("7"));
        assert!(!registry.script_ready(&tab("7")));
    }
}
