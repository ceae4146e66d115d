//! Crate-wide domain types shared across the relay fabric, endpoint gateway,
//! tool-server client, and coordination layer.
//!
//! These newtypes prevent primitive obsession (a raw `String` standing in for
//! a client id, a bare `u64` standing in for a millisecond duration) and give
//! every bounded configuration value its own validated constructor.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Identifier assigned by the relay server to a connection on successful
/// `identify` handshake. Unique for the lifetime of the relay process.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct ClientId(Uuid);

impl ClientId {
    /// Generates a new random client id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Opaque correlation token carried by request/response frame pairs.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a new random request id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Identifier for a browser tab, scoped to the endpoint gateway's lifetime.
#[nutype(
    validate(len_char_min = 1, len_char_max = 128),
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
pub struct TabId(String);

/// The type class a relay client identifies as during the `identify` handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientType {
    /// The single client holding browser-automation capabilities.
    Endpoint,
    /// A tool-server process embedding a relay client and an Operation Manager.
    ToolServer,
    /// An out-of-band observability/control client.
    Admin,
}

impl ClientType {
    /// The wire symbol used to address an entire type class (`to: "endpoint"`).
    #[must_use]
    pub fn as_symbol(self) -> &'static str {
        match self {
            Self::Endpoint => "endpoint",
            Self::ToolServer => "tool-server",
            Self::Admin => "admin",
        }
    }
}

/// Monotonic-ish producer timestamp carried on every frame, expressed as
/// milliseconds since the Unix epoch.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    Into
))]
pub struct FrameTimestamp(u64);

impl FrameTimestamp {
    /// Captures the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self::new(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Converts back to a `SystemTime` for arithmetic against other clocks.
    #[must_use]
    pub fn as_system_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.into_inner())
    }
}

/// Maximum size, in bytes, of a single wire frame (default 4 MiB per §6.1).
#[nutype(
    validate(greater_or_equal = 1024, less_or_equal = 67_108_864),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 4_194_304
)]
pub struct MaxFrameBytes(usize);

impl MaxFrameBytes {
    /// Value as `usize` for comparison against an encoded frame's length.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Number of frames a per-receiver outbound queue holds before the oldest
/// non-response frame is dropped (default 256 per §4.1).
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 256
)]
pub struct OutboundQueueCapacity(usize);

impl OutboundQueueCapacity {
    /// Value as `usize` for use with bounded channel constructors.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}
