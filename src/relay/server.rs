//! Relay fabric server: leader election, the `identify` handshake, frame
//! routing, and per-connection backpressure.
//!
//! Structured the way the teacher's `message_router::router::MessageRouterImpl`
//! is: a `DashMap`-backed connection registry, background tasks spawned with
//! `tokio::spawn`, and `tracing` spans around every state transition. The
//! transport itself reuses the teacher's `axum::serve` / graceful-shutdown
//! pattern from its old `server.rs`, upgraded to a websocket route.

use crate::domain_types::{ClientId, ClientType};
use crate::relay::config::RelayConfig;
use crate::relay::domain_types::{
    ClientRecord, Frame, FrameTarget, FrameType, IdentifyAckPayload, IdentifyPayload,
    RosterUpdatePayload,
};
use crate::relay::traits::{RelayError, RelayRouter};
use crate::time_provider::SharedTimeProvider;
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, span, warn, Level};

/// A single connected client's routable state.
struct Connection {
    record: ClientRecord,
    outbound: mpsc::Sender<Frame>,
}

/// Shared state behind every clone of the relay server handle.
struct Inner {
    config: RelayConfig,
    connections: DashMap<ClientId, Connection>,
    endpoint_connected: AtomicBool,
    time_provider: SharedTimeProvider,
}

/// Websocket-backed relay server, elected leader of the loopback port.
///
/// Cloning is cheap (`Arc` internally) so the same handle can be held by the
/// supervisor, passed into the axum router state, and handed to
/// [`RelayRouter`] consumers.
#[derive(Clone)]
pub struct RelayServerImpl {
    inner: Arc<Inner>,
}

impl RelayServerImpl {
    /// Builds a server handle. Does not bind a socket; see [`Self::elect_and_serve`].
    #[must_use]
    pub fn new(config: RelayConfig, time_provider: SharedTimeProvider) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connections: DashMap::new(),
                endpoint_connected: AtomicBool::new(false),
                time_provider,
            }),
        }
    }

    /// Attempts to win leadership of the loopback port by binding it.
    ///
    /// On `AddrInUse`, this process is not the leader: it waits out a
    /// jittered delay (per §3.4) and returns [`RelayError::LostElection`] so
    /// the caller can fall back to dialing the existing leader as a client.
    /// Any other bind failure is fatal and returned as
    /// [`RelayError::BindFailed`].
    ///
    /// # Errors
    ///
    /// See above.
    #[instrument(skip(self), fields(port = self.inner.config.port))]
    pub async fn bind(&self) -> Result<TcpListener, RelayError> {
        let addr = SocketAddr::from(([127, 0, 0, 1], self.inner.config.port));
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                info!("won relay leader election");
                Ok(listener)
            }
            Err(source) if source.kind() == std::io::ErrorKind::AddrInUse => {
                let jitter = rand::thread_rng().gen_range(
                    self.inner.config.rebind_jitter_min_ms..self.inner.config.rebind_jitter_max_ms,
                );
                debug!(jitter_ms = jitter, "lost election, backing off");
                self.inner
                    .time_provider
                    .sleep(std::time::Duration::from_millis(jitter))
                    .await;
                Err(RelayError::LostElection {
                    port: self.inner.config.port,
                })
            }
            Err(source) => Err(RelayError::BindFailed {
                port: self.inner.config.port,
                source,
            }),
        }
    }

    /// Builds the axum router exposing the `/ws` upgrade route plus a
    /// `/health` endpoint for operational parity with a plain HTTP check
    /// (§6.1): liveness and connection count without dialing a websocket.
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_upgrade_handler))
            .route("/health", get(health_handler))
            .with_state(self.inner.clone())
    }

    /// Serves `listener` until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying accept loop fails.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), std::io::Error> {
        let router = self.router();
        let shutdown_signal = async move { shutdown.cancelled().await };
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
    }

    /// Number of milliseconds to wait before closing a rejected endpoint's
    /// socket, giving the `identify.ack` frame time to flush.
    #[must_use]
    pub fn endpoint_reject_close_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.inner.config.endpoint_reject_close_delay_ms)
    }
}

#[async_trait]
impl RelayRouter for RelayServerImpl {
    #[instrument(skip(self, frame), fields(frame_type = ?frame.frame_type))]
    async fn route(&self, frame: Frame) -> Result<(), RelayError> {
        let targets = resolve_targets(&self.inner.connections, frame.to.as_ref());
        if targets.is_empty() {
            return Err(RelayError::NoRoute {
                target: frame.to.clone(),
            });
        }
        let mut delivered = false;
        for client_id in targets {
            if let Some(mut conn) = self.inner.connections.get_mut(&client_id) {
                conn.record.touch();
                if conn.outbound.try_send(frame.clone()).is_ok() {
                    delivered = true;
                } else {
                    warn!(%client_id, "outbound queue full, dropping frame");
                }
            }
        }
        if delivered {
            Ok(())
        } else {
            Err(RelayError::TargetUnreachable {
                client_id: ClientId::generate(),
            })
        }
    }

    async fn broadcast(&self, frame: Frame) {
        for mut entry in self.inner.connections.iter_mut() {
            entry.record.touch();
            let _ = entry.outbound.try_send(frame.clone());
        }
    }

    fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }
}

fn resolve_targets(
    connections: &DashMap<ClientId, Connection>,
    target: Option<&FrameTarget>,
) -> Vec<ClientId> {
    match target {
        None => Vec::new(),
        Some(FrameTarget::Client(id)) => {
            if connections.contains_key(id) {
                vec![*id]
            } else {
                Vec::new()
            }
        }
        Some(FrameTarget::TypeClass(symbol)) => {
            let matches: Vec<ClientId> = connections
                .iter()
                .filter(|entry| entry.record.client_type.as_symbol() == symbol)
                .map(|entry| *entry.key())
                .collect();
            // §4.1 rule (c): a type symbol resolving to more than one
            // connected member is ambiguous and must fail the route rather
            // than fan out to every member.
            if matches.len() > 1 {
                Vec::new()
            } else {
                matches
            }
        }
    }
}

async fn ws_upgrade_handler(
    State(inner): State<Arc<Inner>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(inner, socket))
}

async fn health_handler(State(inner): State<Arc<Inner>>) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "connections": inner.connections.len(),
        "endpointConnected": inner.endpoint_connected.load(Ordering::SeqCst),
    }))
}

#[instrument(skip(inner, socket))]
async fn handle_connection(inner: Arc<Inner>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();

    let identify = match tokio::time::timeout(
        std::time::Duration::from_millis(inner.config.identify_timeout_ms),
        stream.next(),
    )
    .await
    {
        Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str::<Frame>(&text)
            .ok()
            .filter(|frame| frame.frame_type == FrameType::Identify)
            .and_then(|frame| serde_json::from_value::<IdentifyPayload>(frame.payload).ok()),
        _ => None,
    };

    let Some(identify) = identify else {
        warn!("connection failed to identify in time");
        let _ = sink.close().await;
        return;
    };

    if identify.client_type == ClientType::Endpoint
        && inner
            .endpoint_connected
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
    {
        let ack = IdentifyAckPayload {
            id: ClientId::generate(),
            accepted: false,
            reason: Some("an endpoint is already connected".to_string()),
        };
        let frame = Frame::new(FrameType::IdentifyAck, None, None, serde_json::json!(ack));
        if let Ok(text) = serde_json::to_string(&frame) {
            let _ = sink.send(Message::Text(text.into())).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(
            inner.config.endpoint_reject_close_delay_ms,
        ))
        .await;
        let _ = sink.close().await;
        return;
    }

    let client_id = ClientId::generate();
    let span = span!(Level::INFO, "connection", %client_id, client_type = ?identify.client_type);
    let _enter = span.enter();

    let record = ClientRecord::from_identify(client_id, &identify, SystemTime::now());
    let (outbound_tx, mut outbound_rx) = mpsc::channel(inner.config.outbound_queue_capacity.as_usize());
    inner.connections.insert(
        client_id,
        Connection {
            record: record.clone(),
            outbound: outbound_tx,
        },
    );

    let ack = IdentifyAckPayload {
        id: client_id,
        accepted: true,
        reason: None,
    };
    let ack_frame = Frame::new(FrameType::IdentifyAck, None, None, serde_json::json!(ack));
    if let Ok(text) = serde_json::to_string(&ack_frame) {
        let _ = sink.send(Message::Text(text.into())).await;
    }

    broadcast_roster(&inner).await;
    info!("client connected");

    let write_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            match serde_json::to_string(&frame) {
                Ok(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(error) => warn!(%error, "failed to serialize outbound frame"),
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if let Some(mut conn) = inner.connections.get_mut(&client_id) {
                    conn.record.touch();
                }
                match serde_json::from_str::<Frame>(&text) {
                    Ok(mut frame) => {
                        frame.from = Some(client_id);
                        route_inbound(&inner, frame).await;
                    }
                    Err(error) => warn!(%error, "received malformed frame"),
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    write_task.abort();
    inner.connections.remove(&client_id);
    if identify.client_type == ClientType::Endpoint {
        inner.endpoint_connected.store(false, Ordering::SeqCst);
    }
    broadcast_roster(&inner).await;
    info!("client disconnected");
}

async fn route_inbound(inner: &Arc<Inner>, frame: Frame) {
    let targets = resolve_targets(&inner.connections, frame.to.as_ref());
    if targets.is_empty() {
        if let Some(sender) = frame.from.and_then(|id| inner.connections.get(&id)) {
            let error_frame = Frame::new(
                FrameType::RouteError,
                None,
                Some(FrameTarget::Client(*sender.key())),
                serde_json::json!(crate::relay::domain_types::RouteErrorPayload {
                    reason: "no_route".to_string(),
                    target: frame.to.clone(),
                }),
            );
            let _ = sender.outbound.try_send(error_frame);
        }
        return;
    }
    for client_id in targets {
        if let Some(conn) = inner.connections.get(&client_id) {
            let _ = conn.outbound.try_send(frame.clone());
        }
    }
}

async fn broadcast_roster(inner: &Arc<Inner>) {
    let clients: Vec<ClientRecord> = inner
        .connections
        .iter()
        .map(|entry| entry.record.clone())
        .collect();
    let frame = Frame::new(
        FrameType::RosterUpdate,
        None,
        None,
        serde_json::json!(RosterUpdatePayload { clients }),
    );
    for entry in inner.connections.iter() {
        let _ = entry.outbound.try_send(frame.clone());
    }
}
