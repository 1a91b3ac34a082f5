//! Connection state and disconnect reasons.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a [`Client`](crate::Client).
///
/// ```text
/// Idle ──connect──► Connecting ──ok──► Connected
///                      │  ▲                │
///                 fail │  │ timer     drop │
///                      ▼  │                ▼
///                   Disconnected ◄─────────┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Never connected.
    #[default]
    Idle,
    /// An attempt is in flight.
    Connecting,
    /// A session is live.
    Connected,
    /// Was connecting or connected, and is not anymore.
    Disconnected,
}

impl ConnectionState {
    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// DisconnectReason
// ============================================================================

/// Why `on_disconnect` listeners were notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// [`Client::disconnect`](crate::Client::disconnect) was called.
    Manual,
    /// A live session was lost.
    Dropped,
    /// Automatic reconnection gave up.
    ReconnectExhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

impl DisconnectReason {
    /// Returns `true` if the client will not try again on its own.
    #[inline]
    #[must_use]
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Dropped)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => f.write_str("disconnected by caller"),
            Self::Dropped => f.write_str("connection dropped"),
            Self::ReconnectExhausted { attempts } => {
                write!(f, "gave up after {attempts} reconnect attempts")
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
