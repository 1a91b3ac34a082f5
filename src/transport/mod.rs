//! Transport layer.
//!
//! This module opens physical connections to the broker and runs one STOMP
//! session over each of them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Client (Rust)  │                              │  Broker         │
//! │                 │     WebSocket / SockJS       │                 │
//! │  Connector      │◄────────────────────────────►│  /ws endpoint   │
//! │  → Session      │      STOMP text frames       │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Session Lifecycle
//!
//! 1. `Connector::connect` - Open the duplex text channel
//! 2. `Session::open` - Send CONNECT, wait for CONNECTED
//! 3. `Session` - Subscribe, send, receive routed messages
//! 4. `Session::close` - DISCONNECT and close (also on drop)
//! 5. End callback - Fired once with the reason the channel went away
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connector` | Transport factory trait and duplex channel |
//! | `session` | STOMP session and event loop |
//! | `sockjs` | SockJS envelope codec |
//! | `websocket` | `tokio-tungstenite` connector |

// ============================================================================
// Submodules
// ============================================================================

/// Transport factory trait.
pub mod connector;

/// STOMP session and event loop.
pub mod session;

/// SockJS envelope codec.
pub mod sockjs;

/// WebSocket connector.
pub mod websocket;

/// In-process broker used by tests.
#[cfg(test)]
pub(crate) mod memory;

// ============================================================================
// Re-exports
// ============================================================================

pub use connector::{Connector, Duplex, TextSink, TextStream};
pub use session::{EndCallback, MessageHandler, Session, SessionConfig, SessionEnd, WriteReceipt};
pub use websocket::{TransportKind, WebSocketConnector};
