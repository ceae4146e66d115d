//! Tool-Server Client (TSC): dials the relay as a `tool-server` participant,
//! issues commands through the [`OperationManager`], and feeds incoming
//! milestones back into it (§4.3).
//!
//! Mirrors the teacher's agent-loop pattern of one task owning the socket and
//! a background sweep task enforcing deadlines, generalized to frame-based
//! dispatch instead of direct function calls.

use crate::domain_types::ClientType;
use crate::relay::client::ReconnectingRelayClient;
use crate::relay::domain_types::{CancelPayload, CommandPayload, Frame, FrameTarget, FrameType, MilestonePayload};
use crate::time_provider::SharedTimeProvider;
use crate::tool_server::domain_types::{OperationId, OperationRecord};
use crate::tool_server::operation_manager::{OperationManager, OperationManagerConfig};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{instrument, warn};

/// How often the background sweep checks deadlines, recovery grace, and
/// purge eligibility while the connection is up.
const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// Sends `command` frames to the endpoint and applies returned milestones to
/// the shared [`OperationManager`] until the relay connection closes for
/// good (caller decides process lifetime; this loop itself reconnects
/// forever).
pub struct ToolServerClient {
    manager: Arc<OperationManager>,
    reconnecting: ReconnectingRelayClient,
    config: OperationManagerConfig,
}

impl ToolServerClient {
    /// Builds a client that will identify to the relay at `port` as a
    /// `tool-server` participant.
    #[must_use]
    pub fn new(
        port: u16,
        manager: Arc<OperationManager>,
        time_provider: SharedTimeProvider,
        config: OperationManagerConfig,
    ) -> Self {
        let reconnecting = ReconnectingRelayClient::new(
            port,
            ClientType::ToolServer,
            "tool-server-client",
            env!("CARGO_PKG_VERSION"),
            HashSet::new(),
            time_provider,
        );
        Self {
            manager,
            reconnecting,
            config,
        }
    }

    /// Creates an operation record, dispatches its `command` frame to the
    /// endpoint, and returns the minted id immediately — the caller awaits
    /// completion by polling [`OperationManager::get`] or via an external
    /// notification channel (§4.3 leaves the upstream wait mechanism to the
    /// embedding tool server).
    ///
    /// # Errors
    ///
    /// Returns the manager's error if the initial record cannot be
    /// persisted.
    #[instrument(skip(self, params, relay))]
    pub async fn dispatch(
        &self,
        relay: &mut crate::relay::client::RelayClient,
        command: &str,
        params: Value,
    ) -> Result<OperationId, crate::tool_server::operation_manager::OperationError> {
        let operation_id = self.manager.create(command).await?;
        let frame = Frame::new(
            FrameType::Command,
            None,
            Some(FrameTarget::type_class(ClientType::Endpoint)),
            serde_json::json!(CommandPayload {
                operation_id: operation_id.clone(),
                command: command.to_string(),
                params,
            }),
        );
        if relay.send(&frame).await.is_err() {
            warn!(%operation_id, "failed to send command frame, operation will recover on reconnect");
        }
        Ok(operation_id)
    }

    /// Sends a best-effort `cancel` frame for `operation_id`; does not wait
    /// for acknowledgement (§6.3).
    pub async fn cancel(&self, relay: &mut crate::relay::client::RelayClient, operation_id: OperationId) {
        let frame = Frame::new(
            FrameType::Cancel,
            None,
            Some(FrameTarget::type_class(ClientType::Endpoint)),
            serde_json::json!(CancelPayload { operation_id }),
        );
        let _ = relay.send(&frame).await;
    }

    /// Runs forever: connects with backoff, applies every `milestone` frame
    /// to the operation manager, and on disconnect loops back to reconnect.
    /// A parallel background sweep (deadlines, purge) is the caller's
    /// responsibility via [`Self::run_sweeper`].
    pub async fn run(mut self) {
        loop {
            let (mut relay, _replayed) = self.reconnecting.connect_with_backoff().await;
            self.manager.recover().await.ok();
            let recovered_at = SystemTime::now();
            loop {
                tokio::select! {
                    maybe_frame = relay.recv() => {
                        match maybe_frame {
                            Some(frame) if frame.frame_type == FrameType::Milestone => {
                                self.apply_milestone(frame).await;
                            }
                            Some(_) => {}
                            None => break,
                        }
                    }
                    () = tokio::time::sleep(SWEEP_INTERVAL) => {
                        self.manager
                            .sweep_recovery_grace(self.config.recovery_grace, recovered_at)
                            .await;
                        for timed_out in self.manager.sweep_deadlines(self.config.operation_deadline).await {
                            self.cancel(&mut relay, timed_out).await;
                        }
                        self.manager.purge_completed(self.config.purge_after).await;
                    }
                }
            }
        }
    }

    async fn apply_milestone(&self, frame: Frame) {
        let Ok(milestone) = serde_json::from_value::<MilestonePayload>(frame.payload) else {
            warn!("received malformed milestone frame");
            return;
        };
        if let Err(error) = self
            .manager
            .apply_milestone(&milestone.operation_id, &milestone.name, milestone.data)
            .await
        {
            warn!(%error, operation_id = %milestone.operation_id, "failed to apply milestone");
        }
    }

    /// Current snapshot of an operation, if tracked.
    #[must_use]
    pub fn operation(&self, operation_id: &OperationId) -> Option<OperationRecord> {
        self.manager.get(operation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::config::RelayConfig;
    use crate::relay::server::RelayServerImpl;
    use crate::time_provider::test_time_provider;
    use crate::tool_server::persistence::OperationStore;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn dispatch_creates_and_persists_a_queued_operation() {
        let server = RelayServerImpl::new(RelayConfig::testing(), test_time_provider());
        let listener = server.bind().await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shutdown = CancellationToken::new();
        let server_for_task = server.clone();
        let shutdown_for_task = shutdown.clone();
        tokio::spawn(async move {
            let _ = server_for_task.serve(listener, shutdown_for_task).await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(OperationStore::new(dir.path()));
        store.ensure_dir().await.unwrap();
        let manager = Arc::new(OperationManager::new(store));
        let tsc = ToolServerClient::new(
            port,
            manager.clone(),
            test_time_provider(),
            crate::tool_server::operation_manager::OperationManagerConfig::testing(),
        );

        let mut relay = crate::relay::client::RelayClient::connect(
            port,
            crate::relay::domain_types::IdentifyPayload {
                client_type: ClientType::ToolServer,
                name: "tsc".to_string(),
                version: "0.0.0".to_string(),
                capabilities: HashSet::new(),
                pid: None,
            },
        )
        .await
        .unwrap();

        let operation_id = tsc
            .dispatch(&mut relay, "debug_echo", serde_json::json!({"text": "x"}))
            .await
            .unwrap();

        let record = manager.get(&operation_id).unwrap();
        assert_eq!(record.command, "debug_echo");
        shutdown.cancel();
    }
}
