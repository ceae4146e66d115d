//! Persistent connection holder (§4.2, §9).
//!
//! Re-architects the source's "service-worker eviction with a surviving
//! connection holder" idiom as a holder/worker split: the holder is a
//! long-lived task that owns the relay socket and buffers inbound frames
//! (bounded, backpressure applied symmetrically to §4.1) while the worker is
//! reviving. The worker signals readiness over an internal channel, not a
//! wire frame — the `worker.ready` name in §4.2 refers to this internal
//! signal, scoped to a single process here rather than across eviction
//! boundaries.

use crate::domain_types::{ClientType, OutboundQueueCapacity};
use crate::relay::client::ReconnectingRelayClient;
use crate::relay::domain_types::Frame;
use crate::time_provider::SharedTimeProvider;
use std::collections::{HashSet, VecDeque};
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

/// Sent by the worker to the holder once it is ready to receive buffered and
/// live frames.
pub struct WorkerReady;

/// The holder's half of the holder/worker split: owns the socket, buffers
/// inbound frames while the worker is not yet ready, and forwards outbound
/// frames from the worker to the relay.
pub struct ConnectionHolder {
    port: u16,
    capabilities: HashSet<String>,
    time_provider: SharedTimeProvider,
    buffer_capacity: usize,
}

impl ConnectionHolder {
    /// Builds a holder that will dial the relay at `port`.
    #[must_use]
    pub fn new(
        port: u16,
        capabilities: HashSet<String>,
        buffer_capacity: OutboundQueueCapacity,
        time_provider: SharedTimeProvider,
    ) -> Self {
        Self {
            port,
            capabilities,
            time_provider,
            buffer_capacity: buffer_capacity.as_usize(),
        }
    }

    /// Runs the holder loop: connects (with reconnect-with-backoff), reads
    /// inbound frames and either buffers them (worker not ready) or forwards
    /// them, and writes outbound frames the worker produces. Runs until
    /// `outbound_rx` closes.
    #[instrument(skip(self, worker_ready_rx, to_worker, outbound_rx))]
    pub async fn run(
        self,
        mut worker_ready_rx: mpsc::Receiver<WorkerReady>,
        to_worker: mpsc::Sender<Frame>,
        mut outbound_rx: mpsc::Receiver<Frame>,
    ) {
        let mut buffer: VecDeque<Frame> = VecDeque::new();
        let mut worker_ready = false;
        let mut reconnecting = ReconnectingRelayClient::new(
            self.port,
            ClientType::Endpoint,
            "endpoint-gateway",
            env!("CARGO_PKG_VERSION"),
            self.capabilities.clone(),
            self.time_provider.clone(),
        );
        let (mut client, _) = reconnecting.connect_with_backoff().await;

        loop {
            tokio::select! {
                Some(WorkerReady) = worker_ready_rx.recv() => {
                    worker_ready = true;
                    while let Some(frame) = buffer.pop_front() {
                        let _ = to_worker.send(frame).await;
                    }
                }
                maybe_frame = client.recv() => {
                    match maybe_frame {
                        Some(frame) => {
                            if worker_ready {
                                let _ = to_worker.send(frame).await;
                            } else {
                                if buffer.len() >= self.buffer_capacity {
                                    warn!("inbound buffer full while worker reviving, dropping oldest");
                                    buffer.pop_front();
                                }
                                buffer.push_back(frame);
                            }
                        }
                        None => {
                            warn!("relay connection lost, reconnecting");
                            let (new_client, _) = reconnecting.connect_with_backoff().await;
                            client = new_client;
                        }
                    }
                }
                maybe_outbound = outbound_rx.recv() => {
                    match maybe_outbound {
                        Some(frame) => {
                            if client.send(&frame).await.is_err() {
                                reconnecting.queue_while_down(frame, self.time_provider.now());
                            }
                        }
                        None => {
                            info!("outbound channel closed, holder shutting down");
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_capacity_matches_outbound_queue_default() {
        let capacity = OutboundQueueCapacity::default();
        assert_eq!(capacity.as_usize(), 256);
    }
}
