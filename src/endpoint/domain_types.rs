//! Domain types owned by the Endpoint Gateway: injected-script registry
//! entries, captured-event ring buffers, and debug sessions (§3.5, §3.6).

use crate::domain_types::TabId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::SystemTime;

/// One entry in the injected-script registry (§3.5). Purged when the tab
/// navigates, closes, or the endpoint restarts (registry is in-memory only).
#[derive(Debug, Clone)]
pub struct InjectedScriptEntry {
    /// When the script was injected.
    pub injected_at: SystemTime,
    /// Version string of the injected script.
    pub script_version: String,
    /// Whether the script has signaled it finished initializing.
    pub ready: bool,
}

/// Tracks which tabs have a ready observer script, keyed by tab.
///
/// Injection is idempotent: [`InjectedScriptRegistry::mark_ready`] followed
/// by a second injection attempt must be a no-op that does not reset
/// per-tab state (§4.2, §8).
#[derive(Debug, Clone, Default)]
pub struct InjectedScriptRegistry {
    entries: HashMap<TabId, InjectedScriptEntry>,
}

impl InjectedScriptRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `tab_id` already has a ready script injected.
    #[must_use]
    pub fn is_ready(&self, tab_id: &TabId) -> bool {
        self.entries.get(tab_id).is_some_and(|e| e.ready)
    }

    /// Records a fresh injection attempt as not-yet-ready.
    pub fn record_injected(&mut self, tab_id: TabId, script_version: String, now: SystemTime) {
        self.entries
            .entry(tab_id)
            .or_insert_with(|| InjectedScriptEntry {
                injected_at: now,
                script_version,
                ready: false,
            });
    }

    /// Marks a previously-injected script as ready.
    pub fn mark_ready(&mut self, tab_id: &TabId) {
        if let Some(entry) = self.entries.get_mut(tab_id) {
            entry.ready = true;
        }
    }

    /// Removes a tab's entry entirely (navigation, close, or teardown).
    pub fn purge(&mut self, tab_id: &TabId) {
        self.entries.remove(tab_id);
    }
}

/// A single captured network event (§3.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedEvent {
    /// `"request"` or `"response"`.
    pub kind: String,
    /// Producer-side timestamp, milliseconds since epoch.
    pub timestamp: u64,
    /// Structured event body.
    pub data: serde_json::Value,
}

/// A bounded per-tab ring of captured network events. Oldest entry evicted
/// on overflow; size never exceeds `capacity`.
#[derive(Debug, Clone)]
pub struct CapturedEventBuffer {
    events: VecDeque<CapturedEvent>,
    capacity: usize,
}

/// Default captured-event ring capacity (§3.6).
pub const DEFAULT_CAPTURE_CAPACITY: usize = 500;

impl CapturedEventBuffer {
    /// Creates a buffer bounded at `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Pushes a new event, evicting the oldest if at capacity.
    pub fn push(&mut self, event: CapturedEvent) {
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Current entries, oldest first.
    #[must_use]
    pub fn events(&self) -> &VecDeque<CapturedEvent> {
        &self.events
    }

    /// Current buffer length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the buffer holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for CapturedEventBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTURE_CAPACITY)
    }
}

/// A debug session attached to a tab. Opaque beyond its identity: the actual
/// debug protocol is a browser-automation primitive and out of scope (§1).
#[derive(Debug, Clone)]
pub struct DebugSession {
    /// Tab this session is attached to.
    pub tab_id: TabId,
    /// When the session was attached.
    pub attached_at: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tab(id: &str) -> TabId {
        TabId::try_from(id.to_string()).unwrap()
    }

    #[test]
    fn reinjection_while_ready_is_a_noop() {
        let mut registry = InjectedScriptRegistry::new();
        let now = SystemTime::now();
        registry.record_injected(tab("1"), "v1".to_string(), now);
        registry.mark_ready(&tab("1"));
        assert!(registry.is_ready(&tab("1")));
        // Re-injection attempt with a different version string is ignored
        // while already ready; per-tab state does not reset.
        registry.record_injected(tab("1"), "v2".to_string(), now);
        assert!(registry.is_ready(&tab("1")));
    }

    #[test]
    fn purge_clears_entry() {
        let mut registry = InjectedScriptRegistry::new();
        registry.record_injected(tab("1"), "v1".to_string(), SystemTime::now());
        registry.purge(&tab("1"));
        assert!(!registry.is_ready(&tab("1")));
    }

    #[test]
    fn buffer_evicts_oldest_at_capacity() {
        let mut buffer = CapturedEventBuffer::new(2);
        buffer.push(CapturedEvent {
            kind: "request".to_string(),
            timestamp: 1,
            data: serde_json::json!({}),
        });
        buffer.push(CapturedEvent {
            kind: "request".to_string(),
            timestamp: 2,
            data: serde_json::json!({}),
        });
        buffer.push(CapturedEvent {
            kind: "request".to_string(),
            timestamp: 3,
            data: serde_json::json!({}),
        });
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.events().front().unwrap().timestamp, 2);
    }
}
