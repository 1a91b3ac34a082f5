//! Error types for the STOMP relay client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use stomp_relay::{Client, Result};
//!
//! async fn example(client: &Client) -> Result<()> {
//!     client.connect().await?;
//!     client.send("/app/trade", Default::default(), &serde_json::json!({"qty": 1})).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidDestination`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::Handshake`], [`Error::TransportDropped`] |
//! | Lifecycle | [`Error::NotConnected`], [`Error::Superseded`], [`Error::ReconnectExhausted`], [`Error::ConnectFailed`] |
//! | Protocol | [`Error::Frame`], [`Error::Broker`] |
//! | External | [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;
use std::sync::Arc;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when client configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Destination is empty or not an absolute path.
    #[error("Invalid destination: {destination:?}")]
    InvalidDestination {
        /// The rejected destination.
        destination: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport could not be opened.
    ///
    /// Returned when the socket or the STOMP handshake never completed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection timeout waiting for the CONNECTED frame.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Broker answered CONNECT with an ERROR frame.
    #[error("Handshake rejected by broker: {message}")]
    Handshake {
        /// The `message` header or body of the ERROR frame.
        message: String,
    },

    /// Transport closed after a successful handshake.
    #[error("Transport dropped: {reason}")]
    TransportDropped {
        /// Why the session ended.
        reason: String,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// Operation requires a live session.
    #[error("Not connected")]
    NotConnected,

    /// Connect attempt was cancelled by a manual disconnect.
    #[error("Connect attempt superseded")]
    Superseded,

    /// Automatic reconnection gave up.
    #[error("Reconnect budget exhausted after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// Shared outcome of a connect attempt.
    ///
    /// Every caller joined to the same in-flight attempt receives the same
    /// underlying error.
    #[error("Connect failed: {0}")]
    ConnectFailed(#[source] Arc<Error>),

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed STOMP frame.
    #[error("Frame error: {message}")]
    Frame {
        /// Description of the framing violation.
        message: String,
    },

    /// Broker sent an ERROR frame on an established session.
    #[error("Broker error: {message}")]
    Broker {
        /// The `message` header or body of the ERROR frame.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Endpoint URL could not be parsed.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid destination error.
    #[inline]
    pub fn invalid_destination(destination: impl Into<String>) -> Self {
        Self::InvalidDestination {
            destination: destination.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a handshake error.
    #[inline]
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    /// Creates a transport dropped error.
    #[inline]
    pub fn transport_dropped(reason: impl Into<String>) -> Self {
        Self::TransportDropped {
            reason: reason.into(),
        }
    }

    /// Creates a frame error.
    #[inline]
    pub fn frame(message: impl Into<String>) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    /// Creates a broker error.
    #[inline]
    pub fn broker(message: impl Into<String>) -> Self {
        Self::Broker {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::ConnectionTimeout { .. } => true,
            Self::ConnectFailed(inner) => inner.is_timeout(),
            _ => false,
        }
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection { .. }
            | Self::ConnectionTimeout { .. }
            | Self::Handshake { .. }
            | Self::TransportDropped { .. }
            | Self::NotConnected
            | Self::WebSocket(_) => true,
            Self::ConnectFailed(inner) => inner.is_connection_error(),
            _ => false,
        }
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on a later connect attempt.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Connection { .. }
            | Self::ConnectionTimeout { .. }
            | Self::TransportDropped { .. }
            | Self::NotConnected
            | Self::WebSocket(_) => true,
            Self::ConnectFailed(inner) => inner.is_recoverable(),
            _ => false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::connection("refused");
        assert_eq!(err.to_string(), "Connection failed: refused");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("max_delay below base_delay");
        assert_eq!(
            err.to_string(),
            "Configuration error: max_delay below base_delay"
        );
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::connection_timeout(5000);
        let other_err = Error::connection("test");

        assert!(timeout_err.is_timeout());
        assert!(!other_err.is_timeout());
        assert!(Error::ConnectFailed(Arc::new(timeout_err)).is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection("test").is_connection_error());
        assert!(Error::transport_dropped("eof").is_connection_error());
        assert!(Error::NotConnected.is_connection_error());
        assert!(!Error::config("test").is_connection_error());
        assert!(!Error::Superseded.is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::transport_dropped("heartbeat").is_recoverable());
        assert!(!Error::handshake("bad credentials").is_recoverable());
        assert!(!Error::ReconnectExhausted { attempts: 5 }.is_recoverable());
    }

    #[test]
    fn test_connect_failed_keeps_source() {
        use std::error::Error as _;

        let err = Error::ConnectFailed(Arc::new(Error::connection("refused")));
        assert_eq!(err.to_string(), "Connect failed: Connection failed: refused");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
