//! Connection state and status snapshots.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Camera connection state. Exactly one value is live at any time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the service for external consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub connected: bool,
    pub state: ConnectionState,
    pub paused: bool,
    /// Discovered photo folder on the device, if known.
    pub folder: Option<String>,
    /// Identifiers handled in the current session.
    pub downloaded: usize,
    /// Identifiers waiting to be transferred.
    pub queued: usize,
    pub reconnect_pending: bool,
}
