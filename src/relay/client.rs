//! Relay client role: used by every participant that loses the election
//! (§4.1) and, regardless of outcome, by the Endpoint Gateway and
//! Tool-Server Client to talk to whichever process is the active router.
//!
//! Owns the `identify` handshake, reconnect-with-backoff
//! ([`crate::coordination::reconnect`]), and a typed inbound frame stream.

use crate::coordination::reconnect::{ReconnectBackoff, ReplayQueue};
use crate::domain_types::{ClientId, ClientType};
use crate::relay::domain_types::{Frame, FrameType, IdentifyAckPayload, IdentifyPayload};
use crate::relay::traits::RelayError;
use crate::time_provider::SharedTimeProvider;
use futures::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::time::SystemTime;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{info, instrument, warn};

/// A connected relay client: the handshake has completed and `id` is the
/// server-assigned identifier for this connection's lifetime.
pub struct RelayClient {
    id: ClientId,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl RelayClient {
    /// Dials the relay at `port` on loopback and completes the `identify`
    /// handshake.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] if the socket cannot be reached, or
    /// [`RelayError::MalformedFrame`] if the server's `identify.ack` cannot
    /// be parsed.
    #[instrument(skip(identify))]
    pub async fn connect(port: u16, identify: IdentifyPayload) -> Result<Self, RelayError> {
        let url = format!("ws://127.0.0.1:{port}/ws");
        let (mut stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|source| RelayError::Transport {
                source: std::io::Error::other(source),
            })?;

        let frame = Frame::new(
            FrameType::Identify,
            None,
            None,
            serde_json::json!(identify),
        );
        let text = serde_json::to_string(&frame).map_err(|source| RelayError::MalformedFrame {
            reason: source.to_string(),
        })?;
        stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|source| RelayError::Transport {
                source: std::io::Error::other(source),
            })?;

        let ack = match stream.next().await {
            Some(Ok(Message::Text(text))) => serde_json::from_str::<Frame>(&text)
                .ok()
                .and_then(|f| serde_json::from_value::<IdentifyAckPayload>(f.payload).ok()),
            _ => None,
        };
        let Some(ack) = ack else {
            return Err(RelayError::MalformedFrame {
                reason: "expected identify.ack".to_string(),
            });
        };
        if !ack.accepted {
            return Err(RelayError::EndpointAlreadyConnected);
        }

        info!(id = %ack.id, "identified with relay");
        Ok(Self {
            id: ack.id,
            stream,
        })
    }

    /// The id this connection was assigned by the relay.
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Sends one frame.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] if the send fails.
    pub async fn send(&mut self, frame: &Frame) -> Result<(), RelayError> {
        let text = serde_json::to_string(frame).map_err(|source| RelayError::MalformedFrame {
            reason: source.to_string(),
        })?;
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|source| RelayError::Transport {
                source: std::io::Error::other(source),
            })
    }

    /// Receives the next frame, or `None` on clean close.
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => match serde_json::from_str::<Frame>(&text) {
                    Ok(frame) => return Some(frame),
                    Err(error) => {
                        warn!(%error, "received malformed frame");
                        continue;
                    }
                },
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }
}

/// Connects with reconnect-with-backoff and replays anything queued during
/// the outage once the handshake completes (§4.4).
pub struct ReconnectingRelayClient {
    port: u16,
    identify: IdentifyPayload,
    backoff: ReconnectBackoff,
    replay: ReplayQueue<Frame>,
    time_provider: SharedTimeProvider,
}

impl ReconnectingRelayClient {
    /// Builds a client that will (re)connect to `port`, identifying with the
    /// given capabilities every time.
    #[must_use]
    pub fn new(
        port: u16,
        client_type: ClientType,
        name: impl Into<String>,
        version: impl Into<String>,
        capabilities: HashSet<String>,
        time_provider: SharedTimeProvider,
    ) -> Self {
        Self {
            port,
            identify: IdentifyPayload {
                client_type,
                name: name.into(),
                version: version.into(),
                capabilities,
                pid: Some(std::process::id()),
            },
            backoff: ReconnectBackoff::new(),
            replay: ReplayQueue::new(),
            time_provider,
        }
    }

    /// Queues a frame for delivery once connected; used while disconnected.
    pub fn queue_while_down(&mut self, frame: Frame, now: SystemTime) {
        self.replay.push(frame, now);
    }

    /// Retries [`RelayClient::connect`] with exponential backoff until it
    /// succeeds, then flushes anything queued during the outage (dropping
    /// frames older than 60s, per §4.4) in enqueue order.
    pub async fn connect_with_backoff(&mut self) -> (RelayClient, Vec<Frame>) {
        loop {
            match RelayClient::connect(self.port, self.identify.clone()).await {
                Ok(mut client) => {
                    self.backoff.reset();
                    let (fresh, dropped) = self.replay.flush(SystemTime::now());
                    if dropped > 0 {
                        warn!(dropped, "dropped stale queued frames on reconnect");
                    }
                    for frame in &fresh {
                        let _ = client.send(frame).await;
                    }
                    return (client, fresh);
                }
                Err(error) => {
                    warn!(%error, "relay connect failed, backing off");
                    self.backoff.wait(&self.time_provider).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::config::RelayConfig;
    use crate::relay::server::RelayServerImpl;
    use crate::relay::traits::RelayRouter;
    use crate::time_provider::test_time_provider;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn connects_and_identifies() {
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

        let client = RelayClient::connect(
            port,
            IdentifyPayload {
                client_type: ClientType::ToolServer,
                name: "test".to_string(),
                version: "0.0.0".to_string(),
                capabilities: HashSet::new(),
                pid: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(server.connection_count(), 1);
        drop(client);
        shutdown.cancel();
    }
}
