//! # tabrelay
//!
//! `tabrelay` bridges several tool-server client processes to one shared
//! browser-automation endpoint over a local loopback message router. Four
//! components compose the system, in dependency order:
//!
//! - **Relay Fabric** ([`relay`]) — the loopback router. Exactly one process
//!   on the machine holds the well-known port and serves as the active
//!   router; every other participant connects as a client.
//! - **Endpoint Gateway** ([`endpoint`]) — the single privileged client
//!   holding browser-automation capabilities, split into a persistent
//!   connection holder and an evictable worker.
//! - **Tool-Server Client + Operation Manager** ([`tool_server`]) — embeds a
//!   relay client plus the durable operation tracker each upstream agent's
//!   tool calls flow through.
//! - **Coordination & Health Layer** ([`coordination`]) — per-tab FIFO locks,
//!   passive health classification, and reconnect backoff, shared by EG and
//!   TSC.

pub use crate::domain_types::*;
pub use crate::error::*;

pub mod config;
pub mod coordination;
pub mod domain_types;
pub mod endpoint;
pub mod error;
pub mod observability;
pub mod relay;
pub mod time_provider;
pub mod tool_server;

// Common imports, matching the density of the teacher's re-export block.
pub use ::tracing::{debug, error, info, instrument, warn};
pub use serde::{Deserialize, Serialize};
pub use std::time::Duration;
pub use thiserror::Error;
pub use tokio::time::timeout;
