//! Domain types owned by the Tool-Server Client's Operation Manager.
//!
//! Mirrors the teacher's `message_router/domain_types.rs` style: every
//! identifier and bounded numeric is a validated `nutype` newtype.

use nutype::nutype;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Operation identifier, minted only by the TSC: `op_<command>_<ms>_<rand>`.
///
/// Deliberately a validated string, not a bare UUID — the format is part of
/// the wire contract (§4.3) and the EG echoes it verbatim rather than
/// inventing its own.
#[nutype(
    validate(predicate = is_well_formed_operation_id),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct OperationId(String);

/// `op_<command>_<ms>_<rand>`: at least four underscore-separated segments,
/// the trailing two purely numeric/alphanumeric and non-empty.
fn is_well_formed_operation_id(value: &str) -> bool {
    let Some(rest) = value.strip_prefix("op_") else {
        return false;
    };
    let segments: Vec<&str> = rest.rsplitn(2, '_').collect();
    let [rand, remainder] = segments.as_slice() else {
        return false;
    };
    let Some((_command, ms)) = remainder.rsplit_once('_') else {
        return false;
    };
    !rand.is_empty()
        && !ms.is_empty()
        && ms.chars().all(|c| c.is_ascii_digit())
        && rand.chars().all(|c| c.is_ascii_alphanumeric())
}

impl OperationId {
    /// Mints a fresh operation id for `command`, with at least 64 bits of
    /// entropy in the random suffix.
    ///
    /// # Panics
    ///
    /// Panics only if the constructed string somehow fails its own format
    /// validation, which cannot happen given the template used here.
    #[must_use]
    pub fn mint(command: &str) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let suffix: u64 = rand::thread_rng().r#gen();
        let sanitized_command: String = command
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        Self::try_new(format!("op_{sanitized_command}_{millis}_{suffix:016x}"))
            .expect("mint() always builds a well-formed operation id")
    }
}

/// The terminal and non-terminal states an [`OperationRecord`] passes through.
///
/// Transitions are monotone: once in a terminal variant (`Completed`,
/// `Failed`, `TimedOut`, `Cancelled`) a record never moves again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Created, not yet dispatched.
    Queued,
    /// Dispatched to the endpoint, awaiting milestones.
    InFlight,
    /// Loaded from a persisted snapshot after a restart, awaiting the grace
    /// window (§4.3 recovery).
    Recovered,
    /// Terminal: completed successfully.
    Completed,
    /// Terminal: failed with a taxonomy error.
    Failed,
    /// Terminal: exceeded its deadline with no terminal milestone.
    TimedOut,
    /// Terminal: cancel was honored.
    Cancelled,
}

impl OperationStatus {
    /// Whether this status is one of the four terminal states.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }
}

/// One entry in an operation's append-only milestone history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneEntry {
    /// Milestone name (`started`, `dispatched`, `response_completed`, ...).
    pub name: String,
    /// Producer-side timestamp, milliseconds since epoch.
    pub timestamp: u64,
    /// Optional structured payload carried with the milestone.
    pub data: Option<serde_json::Value>,
}

/// A durable record of one long-running command (§3.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Globally unique (within this TSC) operation id.
    pub id: OperationId,
    /// The tool name this operation invokes.
    pub command: String,
    /// Current lifecycle state.
    pub status: OperationStatus,
    /// Append-only milestone history; `milestones[0].name == "started"` for
    /// any operation that reached the endpoint.
    pub milestones: Vec<MilestoneEntry>,
    /// Creation time, milliseconds since epoch.
    pub created_at: u64,
    /// Last mutation time, milliseconds since epoch.
    pub updated_at: u64,
    /// Set on transition into a terminal state.
    pub completed_at: Option<u64>,
    /// Present when `status == Completed`.
    pub result: Option<serde_json::Value>,
    /// Present when `status` is `Failed`, `TimedOut`, or `Cancelled`.
    pub error: Option<OperationErrorPayload>,
}

/// The `{code, message}` shape surfaced to a synchronous tool caller (§7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationErrorPayload {
    /// One of the taxonomy tags from §7 (`validation`, `resource_busy`, ...).
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

impl OperationRecord {
    /// Creates a new record in `Queued` status with no milestones yet.
    #[must_use]
    pub fn new(id: OperationId, command: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id,
            command: command.into(),
            status: OperationStatus::Queued,
            milestones: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// Appends a milestone and advances status, enforcing monotonicity.
    ///
    /// No-op (besides logging, left to the caller) if the record is already
    /// terminal — invariant: "once terminal, record is immutable except for
    /// GC deletion."
    pub fn apply_milestone(&mut self, name: &str, data: Option<serde_json::Value>) {
        if self.status.is_terminal() {
            return;
        }
        let now = now_millis();
        self.milestones.push(MilestoneEntry {
            name: name.to_string(),
            timestamp: now,
            data: data.clone(),
        });
        self.updated_at = now;
        match name {
            "dispatched" | "message_sent" | "response_started" => {
                self.status = OperationStatus::InFlight;
            }
            "response_completed" => {
                self.status = OperationStatus::Completed;
                self.completed_at = Some(now);
                self.result = data;
            }
            "failed" => {
                self.status = OperationStatus::Failed;
                self.completed_at = Some(now);
                self.error = data.and_then(|value| serde_json::from_value(value).ok());
            }
            "timed_out" => {
                self.status = OperationStatus::TimedOut;
                self.completed_at = Some(now);
                self.error = Some(OperationErrorPayload {
                    code: "transport".to_string(),
                    message: "operation deadline elapsed".to_string(),
                });
            }
            "cancelled" => {
                self.status = OperationStatus::Cancelled;
                self.completed_at = Some(now);
            }
            _ => {}
        }
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

    #[test]
    fn mint_produces_well_formed_id() {
        let id = OperationId::mint("send_message");
        assert!(id.into_inner().starts_with("op_send_message_"));
    }

    #[test]
    fn mint_ids_are_unique() {
        let a = OperationId::mint("debug_echo");
        let b = OperationId::mint("debug_echo");
        assert_ne!(a, b);
    }

    #[test]
    fn new_record_starts_queued_with_no_milestones() {
        let record = OperationRecord::new(OperationId::mint("debug_echo"), "debug_echo");
        assert_eq!(record.status, OperationStatus::Queued);
        assert!(record.milestones.is_empty());
    }

    #[test]
    fn terminal_milestone_is_final() {
        let mut record = OperationRecord::new(OperationId::mint("debug_echo"), "debug_echo");
        record.apply_milestone("started", None);
        record.apply_milestone("response_completed", Some(serde_json::json!({"text": "x"})));
        assert_eq!(record.status, OperationStatus::Completed);
        assert_eq!(record.milestones.len(), 2);
        record.apply_milestone("failed", None);
        assert_eq!(record.status, OperationStatus::Completed);
        assert_eq!(record.milestones.len(), 2);
    }
}
