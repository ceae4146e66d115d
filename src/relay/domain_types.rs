//! Domain types for the relay fabric.
//!
//! Mirrors the shape of `message_router::domain_types` in the teacher repo:
//! strongly-typed wire values kept separate from the generic crate-wide types
//! in [`crate::domain_types`].

use crate::domain_types::{ClientId, ClientType, FrameTimestamp, RequestId};
use crate::tool_server::domain_types::OperationId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::SystemTime;

/// The destination of an addressed frame: either a concrete client or an
/// entire type class (`"endpoint"`, `"tool-server"`, `"admin"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrameTarget {
    /// A concrete, server-assigned client id.
    Client(ClientId),
    /// An entire type class, resolved to its unique member if there is one.
    TypeClass(String),
}

impl FrameTarget {
    /// Builds a type-class target from a [`ClientType`].
    #[must_use]
    pub fn type_class(client_type: ClientType) -> Self {
        Self::TypeClass(client_type.as_symbol().to_string())
    }
}

/// The `type` tag on a wire frame. Exactly the set in spec §6.2; anything else
/// is treated as an unrecognized extension and rejected by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    /// Handshake: client -> server.
    Identify,
    /// Handshake ack: server -> client.
    #[serde(rename = "identify.ack")]
    IdentifyAck,
    /// Full client list: server -> all.
    #[serde(rename = "roster.update")]
    RosterUpdate,
    /// Dispatch a command: TSC -> EG.
    Command,
    /// Confirms dispatch: EG -> TSC.
    #[serde(rename = "command.ack")]
    CommandAck,
    /// Progress/terminal event: EG -> TSC.
    Milestone,
    /// Best-effort cancel: TSC -> EG.
    Cancel,
    /// On-demand metrics: admin <-> any.
    #[serde(rename = "health.report")]
    HealthReport,
    /// Delivery failure: server -> sender.
    #[serde(rename = "route.error")]
    RouteError,
    /// Broadcast after a successful post-election bind: server -> all.
    #[serde(rename = "relay.ready")]
    RelayReady,
}

/// The unit of transport on the relay (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// The frame's wire type tag.
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    /// Sender client id. Absent/empty before the sender has identified.
    pub from: Option<ClientId>,
    /// Destination: a concrete client id or a type-class symbol.
    pub to: Option<FrameTarget>,
    /// Correlation token, required for request/response pairs.
    pub request_id: Option<RequestId>,
    /// Type-specific structured body.
    pub payload: Value,
    /// Producer-side timestamp.
    pub timestamp: FrameTimestamp,
}

impl Frame {
    /// Builds a frame with a freshly generated timestamp.
    #[must_use]
    pub fn new(frame_type: FrameType, from: Option<ClientId>, to: Option<FrameTarget>, payload: Value) -> Self {
        Self {
            frame_type,
            from,
            to,
            request_id: None,
            payload,
            timestamp: FrameTimestamp::now(),
        }
    }

    /// Attaches a request id for request/response correlation.
    #[must_use]
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

/// Payload of an `identify` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    /// Declared client type.
    #[serde(rename = "type")]
    pub client_type: ClientType,
    /// Human-readable process name.
    pub name: String,
    /// Client-reported version string.
    pub version: String,
    /// Declared capability set.
    #[serde(default)]
    pub capabilities: HashSet<String>,
    /// OS process id, present for tool-servers.
    pub pid: Option<u32>,
}

/// Payload of an `identify.ack` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyAckPayload {
    /// Server-assigned id for this connection, unique for the relay's lifetime.
    pub id: ClientId,
    /// Whether this client was accepted as addressable.
    pub accepted: bool,
    /// Present when `accepted` is false (e.g. a second endpoint connected).
    pub reason: Option<String>,
}

/// A single entry in the roster broadcast to all clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Server-assigned id.
    pub id: ClientId,
    /// Declared type.
    #[serde(rename = "type")]
    pub client_type: ClientType,
    /// Human-readable name.
    pub name: String,
    /// Client-reported version.
    pub version: String,
    /// Declared capability set.
    pub capabilities: HashSet<String>,
    /// When the relay accepted this connection.
    pub connected_at: FrameTimestamp,
    /// Most recent send or receive on this connection.
    pub last_activity_at: FrameTimestamp,
    /// OS process id, present for tool-servers.
    pub pid: Option<u32>,
}

impl ClientRecord {
    /// Creates a new record from a successful `identify` handshake.
    #[must_use]
    pub fn from_identify(id: ClientId, identify: &IdentifyPayload, now: SystemTime) -> Self {
        let timestamp = FrameTimestamp::now();
        let _ = now;
        Self {
            id,
            client_type: identify.client_type,
            name: identify.name.clone(),
            version: identify.version.clone(),
            capabilities: identify.capabilities.clone(),
            connected_at: timestamp,
            last_activity_at: timestamp,
            pid: identify.pid,
        }
    }

    /// Records activity, used both on send and receive per §3.7.
    pub fn touch(&mut self) {
        self.last_activity_at = FrameTimestamp::now();
    }
}

/// Payload of a `roster.update` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterUpdatePayload {
    /// Every currently connected client.
    pub clients: Vec<ClientRecord>,
}

/// Payload of a `route.error` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteErrorPayload {
    /// Machine-readable reason.
    pub reason: String,
    /// The `to` value that could not be resolved or delivered to.
    pub target: Option<FrameTarget>,
}

/// Payload of a `command` frame (TSC -> EG), §6.2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPayload {
    /// The operation this dispatch belongs to; minted by the TSC.
    pub operation_id: OperationId,
    /// The tool name to invoke.
    pub command: String,
    /// Command-specific parameters.
    pub params: Value,
}

/// Payload of a `command.ack` frame (EG -> TSC), confirms dispatch only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandAckPayload {
    /// Echoes the dispatched operation id.
    pub operation_id: OperationId,
}

/// Payload of a `milestone` frame (EG -> TSC), correlated by `operationId`
/// rather than `requestId` (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestonePayload {
    /// The operation this milestone belongs to.
    pub operation_id: OperationId,
    /// Milestone name (`started`, `dispatched`, `response_completed`, ...).
    pub name: String,
    /// Optional structured detail.
    pub data: Option<Value>,
}

/// Payload of a `cancel` frame (TSC -> EG), best-effort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelPayload {
    /// The operation to attempt to cancel.
    pub operation_id: OperationId,
}

/// Payload of a `health.report` frame (admin <-> any), §4.4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReportPayload {
    /// Per-connection health snapshot, keyed by client id.
    pub connections: Vec<HealthSummary>,
}

/// One connection's passively-derived health, reported on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSummary {
    /// Which client this summary describes.
    pub client_id: ClientId,
    /// `active`, `idle-seconds`, `idle-minutes`, or `disconnected`.
    pub classification: String,
    /// Seconds since the last send or receive.
    pub idle_seconds: u64,
    /// Total frames received from this client.
    pub messages_received: u64,
    /// Total frames sent to this client.
    pub messages_sent: u64,
    /// Number of times this connection has been re-established.
    pub reconnect_count: u64,
    /// Current outbound queue depth.
    pub queue_length: usize,
}
