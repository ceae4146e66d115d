//! Endpoint Gateway worker: command dispatch, tab-lock acquisition, and
//! milestone emission (§4.2).
//!
//! Command handler bodies for actual browser-automation primitives are out
//! of scope (§1); each cataloged command (§6.3) gets a typed dispatch arm
//! here, the ones this crate can execute without a browser binding (notably
//! `debug_echo`, exercised by the §8 scenario 1 round trip) do real work, and
//! the rest return [`WorkerError::ResourceMissing`] until a real browser
//! binding is injected, exactly as SPEC_FULL.md's §6 note describes.

use crate::domain_types::{ClientId, TabId};
use crate::endpoint::registry::ResourceRegistry;
use crate::relay::domain_types::{CommandAckPayload, CommandPayload, Frame, FrameTarget, FrameType, MilestonePayload};
use crate::tool_server::domain_types::OperationId;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{instrument, warn};

/// The nine-entry error taxonomy from §7, carried in milestone `data.error`.
#[derive(Debug, Error, Clone)]
pub enum WorkerError {
    /// Malformed parameters; not retried.
    #[error("validation error: {reason}")]
    Validation {
        /// Explanation of what failed validation.
        reason: String,
    },

    /// Routing fallthrough: no handler for the command name.
    #[error("unknown command: {command}")]
    UnknownCommand {
        /// The command name that had no handler.
        command: String,
    },

    /// Tab or session no longer exists.
    #[error("resource missing")]
    ResourceMissing,

    /// Lock unattainable within the caller's deadline.
    #[error("resource busy")]
    ResourceBusy,

    /// Operation exceeded its lock hold; cleanup already ran.
    #[error("lock expired")]
    LockExpired,

    /// Page-level completion signal never arrived.
    #[error("observer timeout")]
    ObserverTimeout,

    /// Temporary transport failure; not surfaced until the operation
    /// deadline elapses.
    #[error("transport error")]
    Transport,

    /// User-initiated cancel honored by the handler.
    #[error("cancelled")]
    Cancelled,

    /// Unexpected exception, trapped and logged.
    #[error("internal error: {reason}")]
    Internal {
        /// Explanation of the unexpected exception.
        reason: String,
    },
}

impl WorkerError {
    /// The wire tag for `data.error` (§7).
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::UnknownCommand { .. } => "unknown_command",
            Self::ResourceMissing => "resource_missing",
            Self::ResourceBusy => "resource_busy",
            Self::LockExpired => "lock_expired",
            Self::ObserverTimeout => "observer_timeout",
            Self::Transport => "transport",
            Self::Cancelled => "cancelled",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Command names this worker recognizes as tab-targeted (§6.3): take
/// `tabId` and therefore go through the tab lock before dispatch.
const TAB_TARGETED_COMMANDS: &[&str] = &[
    "create_tab",
    "close_tab",
    "send_message",
    "fetch_response",
    "query_response_status",
    "forward_response",
    "extract_conversation",
    "export_conversation",
    "debug_snapshot",
];

/// The full command catalog (§6.3), beyond the tab-targeted subset above.
/// `batch_tab_commands` is deliberately not in [`TAB_TARGETED_COMMANDS`]: it
/// carries a list of per-tab sub-items rather than one top-level `tabId`, so
/// it acquires its locks per sub-item once dispatched rather than up front.
const OTHER_KNOWN_COMMANDS: &[&str] = &[
    "batch_tab_commands",
    "report_health",
    "wait_for_operation",
    "fetch_endpoint_logs",
    "toggle_debug_logging",
    "set_log_level",
    "force_relay_takeover",
    "reload_endpoint",
    "attach_debug_session",
    "detach_debug_session",
    "execute_script",
    "fetch_dom_subset",
    "start_capture",
    "stop_capture",
    "fetch_captured_events",
    "list_tabs",
    "list_conversations",
    "search_conversations",
    "conversation_metadata",
    "delete_conversation",
    "resolve_conversation_url",
    "debug_echo",
];

fn is_known_command(command: &str) -> bool {
    TAB_TARGETED_COMMANDS.contains(&command) || OTHER_KNOWN_COMMANDS.contains(&command)
}

/// Dispatches commands arriving from the relay, acquiring tab locks as
/// needed and emitting milestones back through an outbound channel.
pub struct Worker {
    registry: Arc<ResourceRegistry>,
    outbound: mpsc::Sender<Frame>,
}

impl Worker {
    /// Builds a worker bound to a resource registry and an outbound sink for
    /// frames headed back to the relay.
    #[must_use]
    pub fn new(registry: Arc<ResourceRegistry>, outbound: mpsc::Sender<Frame>) -> Self {
        Self { registry, outbound }
    }

    /// Runs the dispatch loop until `inbound` closes.
    pub async fn run(self, mut inbound: mpsc::Receiver<Frame>) {
        while let Some(frame) = inbound.recv().await {
            if frame.frame_type != FrameType::Command {
                continue;
            }
            let Some(origin) = frame.from else {
                continue;
            };
            let Ok(command) = serde_json::from_value::<CommandPayload>(frame.payload) else {
                warn!("received malformed command frame");
                continue;
            };
            self.handle_command(origin, command).await;
        }
    }

    #[instrument(skip(self, command), fields(operation_id = %command.operation_id, command = %command.command))]
    async fn handle_command(&self, origin: ClientId, command: CommandPayload) {
        self.send_to(origin, FrameType::CommandAck, serde_json::json!(CommandAckPayload {
            operation_id: command.operation_id.clone(),
        }))
        .await;
        self.send_milestone(origin, &command.operation_id, "started", None)
            .await;

        let tab_id = command
            .params
            .get("tabId")
            .and_then(Value::as_str)
            .and_then(|raw| TabId::try_from(raw.to_string()).ok());

        let lock_guard = if TAB_TARGETED_COMMANDS.contains(&command.command.as_str()) {
            match tab_id.as_ref() {
                Some(tab_id) => {
                    let max_wait_ms = command
                        .params
                        .get("maxWaitMs")
                        .and_then(Value::as_u64)
                        .unwrap_or(5_000);
                    match self
                        .registry
                        .tab_locks()
                        .acquire(
                            tab_id,
                            command.operation_id.clone().into_inner().as_str(),
                            max_wait_ms,
                        )
                        .await
                    {
                        crate::coordination::tab_lock::AcquireOutcome::Acquired => {
                            self.registry.set_active_operation(
                                tab_id.clone(),
                                command.operation_id.clone().into_inner(),
                            );
                            true
                        }
                        crate::coordination::tab_lock::AcquireOutcome::Rejected => {
                            self.fail(origin, &command.operation_id, WorkerError::ResourceBusy)
                                .await;
                            return;
                        }
                        crate::coordination::tab_lock::AcquireOutcome::Queued => {
                            unreachable!("TabLockTable::acquire resolves Queued internally")
                        }
                    }
                }
                None => {
                    self.fail(
                        origin,
                        &command.operation_id,
                        WorkerError::Validation {
                            reason: "missing tabId".to_string(),
                        },
                    )
                    .await;
                    return;
                }
            }
        } else {
            false
        };

        self.send_milestone(origin, &command.operation_id, "dispatched", None)
            .await;

        let result = self.dispatch(&command.command, &command.params).await;

        if lock_guard {
            if let Some(tab_id) = tab_id {
                self.registry
                    .tab_locks()
                    .release(&tab_id, command.operation_id.clone().into_inner().as_str());
            }
        }

        match result {
            Ok(value) => {
                self.send_milestone(origin, &command.operation_id, "response_completed", Some(value))
                    .await;
            }
            Err(error) => {
                self.fail(origin, &command.operation_id, error).await;
            }
        }
    }

    async fn dispatch(&self, command: &str, params: &Value) -> Result<Value, WorkerError> {
        match command {
            "debug_echo" => Ok(params.clone()),
            "report_health" => Ok(serde_json::json!({"status": "ok"})),
            // `batch_tab_commands`: a real implementation loops `params.items`,
            // dispatches each sub-command, and resolves with a single
            // `response_completed` milestone carrying one result vector
            // rather than splitting into per-item operations — each
            // sub-item still goes through its own tab lock as it runs.
            _ if is_known_command(command) => Err(WorkerError::ResourceMissing),
            _ => Err(WorkerError::UnknownCommand {
                command: command.to_string(),
            }),
        }
    }

    async fn fail(&self, origin: ClientId, operation_id: &OperationId, error: WorkerError) {
        self.send_milestone(
            origin,
            operation_id,
            "failed",
            Some(serde_json::json!({"error": error.code(), "message": error.to_string()})),
        )
        .await;
    }

    async fn send_milestone(
        &self,
        origin: ClientId,
        operation_id: &OperationId,
        name: &str,
        data: Option<Value>,
    ) {
        let payload = MilestonePayload {
            operation_id: operation_id.clone(),
            name: name.to_string(),
            data,
        };
        self.send_to(origin, FrameType::Milestone, serde_json::json!(payload))
            .await;
    }

    async fn send_to(&self, origin: ClientId, frame_type: FrameType, payload: Value) {
        let frame = Frame::new(
            frame_type,
            None,
            Some(FrameTarget::Client(origin)),
            payload,
        );
        let _ = self.outbound.send(frame).await;
    }
}
