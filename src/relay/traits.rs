//! Traits and error types for the relay fabric.
//!
//! Shaped like the teacher's `message_router::traits`: a structured
//! `thiserror` error enum plus a small async trait the server implementation
//! satisfies, so callers (the supervisor, tests) can depend on the trait
//! instead of the concrete type.

use crate::domain_types::ClientId;
use crate::relay::domain_types::{Frame, FrameTarget};
use async_trait::async_trait;
use thiserror::Error;

/// Errors produced while routing or serving the relay fabric.
#[derive(Debug, Error)]
pub enum RelayError {
    /// No relay process currently owns the loopback port and this process
    /// lost the election (someone else bound first).
    #[error("lost leader election for port {port}")]
    LostElection {
        /// The loopback port that was already bound by another process.
        port: u16,
    },

    /// Binding the loopback port failed for a reason other than the address
    /// already being in use.
    #[error("failed to bind relay port {port}: {source}")]
    BindFailed {
        /// The loopback port the bind was attempted on.
        port: u16,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// `to` named a client id or type class with no connected member.
    #[error("no route to target")]
    NoRoute {
        /// The target that had no matching route, if one was specified.
        target: Option<FrameTarget>,
    },

    /// The target client's outbound queue has no room and the frame was not
    /// eligible for oldest-frame eviction.
    #[error("target {client_id} is not accepting frames")]
    TargetUnreachable {
        /// The client whose outbound queue was full.
        client_id: ClientId,
    },

    /// A second connection identified as `endpoint` while one was already
    /// connected.
    #[error("an endpoint is already connected")]
    EndpointAlreadyConnected,

    /// The connection did not send a valid `identify` frame within the
    /// configured timeout.
    #[error("identify handshake timed out")]
    IdentifyTimeout,

    /// A frame failed to deserialize or violated the wire schema.
    #[error("malformed frame: {reason}")]
    MalformedFrame {
        /// Explanation of why the frame was rejected.
        reason: String,
    },

    /// The frame exceeded the configured maximum size.
    #[error("frame of {actual} bytes exceeds the {limit} byte limit")]
    FrameTooLarge {
        /// The frame's actual size in bytes.
        actual: usize,
        /// The configured maximum size in bytes.
        limit: usize,
    },

    /// An I/O error occurred on the underlying transport.
    #[error("transport error: {source}")]
    Transport {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

/// The relay fabric's server-side responsibilities: routing and broadcast.
///
/// Implemented by [`crate::relay::server::RelayServerImpl`]; exists as a
/// trait so the endpoint/tool-server layers and tests can depend on an
/// `Arc<dyn RelayRouter>` rather than the concrete websocket server.
#[async_trait]
pub trait RelayRouter: Send + Sync {
    /// Delivers `frame` to the client(s) resolved from `frame.to`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NoRoute`] if `to` resolves to nobody, or
    /// [`RelayError::TargetUnreachable`] if delivery could not be queued.
    async fn route(&self, frame: Frame) -> Result<(), RelayError>;

    /// Broadcasts `frame` to every connected client.
    async fn broadcast(&self, frame: Frame);

    /// Returns the number of currently connected clients.
    fn connection_count(&self) -> usize;
}
