//! STOMP Relay - Resilient publish/subscribe client.
//!
//! This library keeps one logical STOMP connection to a message broker alive
//! over WebSocket or SockJS, reconnecting with bounded backoff and replaying
//! topic subscriptions transparently.
//!
//! # Architecture
//!
//! Two layers, bottom-up:
//!
//! - **Transport Session**: one physical connection attempt. Opens the
//!   socket, completes the STOMP handshake, routes MESSAGE frames to
//!   handlers, keeps heartbeats, and reports exactly once when it ends.
//! - **Connection Manager** ([`Client`]): owns the logical connection across
//!   many sessions. Serializes `connect()` calls into one in-flight attempt,
//!   replays the subscription registry on every connect, schedules
//!   reconnects, and fans out lifecycle events to listeners.
//!
//! Key design principles:
//!
//! - At most one current session; late events from stale sessions are ignored
//! - Subscriptions live in one registry keyed by topic
//! - Sends are never queued while disconnected
//! - Listener and handler panics are caught and logged
//!
//! # Quick Start
//!
//! ```no_run
//! use stomp_relay::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .endpoint("http://localhost:8080/ws")
//!         .build()?;
//!
//!     client
//!         .on_connect(|| println!("connected"))
//!         .on_disconnect(|reason| println!("disconnected: {reason}"));
//!
//!     client.subscribe_prices(|update| {
//!         println!("{} -> {}", update.symbol, update.new_price);
//!     })?;
//!
//!     client.connect().await?;
//!     tokio::signal::ctrl_c().await?;
//!     client.disconnect();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Connection manager, builder, reconnect policy |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`feed`] | Typed price and notice helpers |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | STOMP frames, messages, destinations |
//! | [`transport`] | Connectors and transport sessions |

// ============================================================================
// Modules
// ============================================================================

/// Connection manager.
///
/// Use [`Client::builder()`] to create a configured client.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Typed feed helpers.
pub mod feed;

/// Type-safe identifiers for sessions and subscriptions.
pub mod identifiers;

/// STOMP protocol types.
///
/// Frame codec, delivered messages and destination addressing.
pub mod protocol;

/// Transport layer.
///
/// Connectors open the physical channel; sessions run STOMP over it.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{
    Client, ClientBuilder, ClientOptions, ConnectionState, DisconnectReason, ReconnectPolicy,
};

// Error types
pub use error::{Error, Result};

// Feed types
pub use feed::PriceUpdate;

// Identifier types
pub use identifiers::{SessionId, SubscriptionId};

// Protocol types
pub use protocol::{Destination, Heartbeat, Message, Outbound, Payload};

// Transport types
pub use transport::{Connector, Duplex, TransportKind, WebSocketConnector};
