//! Top-level error type for the `tabrelay` binaries.
//!
//! Individual components keep their own `thiserror` enums (`relay::traits::RelayError`,
//! `tool_server::operation_manager::OperationError`, ...) the way the teacher's
//! `message_router::traits` does; this aggregator exists only for the binary
//! entry points, which need a single `anyhow`-compatible error to bubble up to
//! `main`.

use thiserror::Error;

/// Errors surfaced at the supervisor/binary boundary.
#[derive(Debug, Error)]
pub enum TabrelayError {
    /// The relay fabric could not be started or crashed fatally.
    #[error("relay fabric error: {0}")]
    Relay(#[from] crate::relay::traits::RelayError),

    /// The endpoint gateway worker failed in a way it could not recover from.
    #[error("endpoint gateway error: {0}")]
    Endpoint(#[from] crate::endpoint::worker::WorkerError),

    /// The tool-server client or its operation manager failed fatally.
    #[error("tool-server error: {0}")]
    ToolServer(#[from] crate::tool_server::operation_manager::OperationError),

    /// Configuration failed to load or validate.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// An I/O error occurred outside of a more specific component.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
