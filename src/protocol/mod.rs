//! STOMP protocol types.
//!
//! This module defines the text framing layered on the socket transport
//! and the message shape handed to subscribers.
//!
//! # Protocol Overview
//!
//! | Frame | Direction | Purpose |
//! |-------|-----------|---------|
//! | `CONNECT` | Client → Broker | Handshake, version and heartbeat offer |
//! | `CONNECTED` | Broker → Client | Handshake accepted |
//! | `SUBSCRIBE` / `UNSUBSCRIBE` | Client → Broker | Topic registration |
//! | `SEND` | Client → Broker | Publish to a destination |
//! | `MESSAGE` | Broker → Client | Delivery on a subscription |
//! | `ERROR` | Broker → Client | Fatal protocol error |
//! | `DISCONNECT` | Client → Broker | Graceful shutdown |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Frame model, encoder, streaming decoder |
//! | `message` | Delivered message and payload parsing |
//! | `destination` | Topic addressing helpers |

// ============================================================================
// Submodules
// ============================================================================

/// Frame model and codec.
pub mod frame;

/// Delivered message types.
pub mod message;

/// Destination validation and address families.
pub mod destination;

// ============================================================================
// Re-exports
// ============================================================================

pub use destination::Destination;
pub use frame::{Command, Decoded, Frame, FrameDecoder, Heartbeat, Incoming, MAX_FRAME_SIZE};
pub use message::{Message, Outbound, Payload};
