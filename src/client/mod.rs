//! Connection manager module.
//!
//! This module owns the logical broker connection that outlives individual
//! transport sessions.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Client`] | Connect/reconnect sequencing, subscription replay, sends |
//! | [`ClientBuilder`] | Fluent configuration builder |
//! | [`ClientOptions`] | Endpoint, transport and handshake settings |
//! | [`ReconnectPolicy`] | Backoff parameters |
//! | [`ReconnectPlan`] | Attempt counter and delay computation |
//! | [`ConnectionState`] | Lifecycle state |
//! | [`DisconnectReason`] | Argument to `on_disconnect` listeners |
//!
//! # Example
//!
//! ```no_run
//! use stomp_relay::{Client, DisconnectReason, Result};
//!
//! # async fn example() -> Result<()> {
//! let client = Client::builder().endpoint("ws://localhost:8080/ws").build()?;
//!
//! client.on_disconnect(|reason| {
//!     if let DisconnectReason::ReconnectExhausted { attempts } = reason {
//!         eprintln!("giving up after {attempts} attempts");
//!     }
//! });
//!
//! client.subscribe("/topic/updates", |message| println!("{:?}", message.payload))?;
//! client.connect().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Reconnect attempt tracking.
pub mod backoff;

/// Fluent builder for client configuration.
pub mod builder;

/// Lifecycle listener registry.
pub mod listeners;

/// Connection manager implementation.
pub mod manager;

/// Client options and reconnect policy.
pub mod options;

/// Connection state and disconnect reasons.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use backoff::ReconnectPlan;
pub use builder::ClientBuilder;
pub use listeners::{ConnectListener, DisconnectListener, ErrorListener};
pub use manager::Client;
pub use options::{ClientOptions, ReconnectPolicy};
pub use state::{ConnectionState, DisconnectReason};
