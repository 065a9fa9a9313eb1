//! Connection State
//!
//! Lifecycle states of the single upstream connection owned by the feed
//! multiplexer.
//!
//! ```text
//! Disconnected --connect ok--> Connected --stall--> Reconnecting --connect ok--> Connected
//!      ^                                                 |
//!      +------------------- stop() from any state -------+
//! ```

use serde::Serialize;

/// Upstream connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No connection and no attempt in flight.
    #[default]
    Disconnected,
    /// Initial connection attempt (or retry after a failed start).
    Connecting,
    /// Connected and subscribed.
    Connected,
    /// Recovering from a stalled connection.
    Reconnecting,
}

impl ConnectionState {
    /// Check if the feed is connected.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Get the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }

    /// Numeric encoding for the connection state gauge.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
            Self::Reconnecting => 3.0,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
