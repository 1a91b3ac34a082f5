//! SockJS framing over a raw WebSocket.
//!
//! The broker endpoint speaks SockJS, whose WebSocket transport wraps
//! application messages in its own envelope:
//!
//! | Server frame | Meaning |
//! |--------------|---------|
//! | `o` | Session open |
//! | `h` | Heartbeat |
//! | `a["m1","m2"]` | Array of messages |
//! | `c[3000,"Go away!"]` | Close with code and reason |
//!
//! Client messages are sent as a JSON array of strings.

// ============================================================================
// Imports
// ============================================================================

use rand::Rng;
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::SessionId;

// ============================================================================
// SockJsFrame
// ============================================================================

/// Decoded server frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SockJsFrame {
    /// Session opened.
    Open,
    /// Keep-alive.
    Heartbeat,
    /// Application messages.
    Messages(Vec<String>),
    /// Server closed the session.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Decodes one WebSocket text message.
///
/// # Errors
///
/// Returns [`Error::Frame`] on an unknown prefix, or [`Error::Json`] on a
/// malformed payload.
pub fn decode(text: &str) -> Result<SockJsFrame> {
    let mut chars = text.chars();
    match chars.next() {
        Some('o') => Ok(SockJsFrame::Open),
        Some('h') => Ok(SockJsFrame::Heartbeat),
        Some('a') => Ok(SockJsFrame::Messages(serde_json::from_str(chars.as_str())?)),
        Some('m') => Ok(SockJsFrame::Messages(vec![serde_json::from_str(chars.as_str())?])),
        Some('c') => {
            let (code, reason): (u16, String) = serde_json::from_str(chars.as_str())?;
            Ok(SockJsFrame::Close { code, reason })
        }
        _ => Err(Error::frame(format!("Unknown SockJS frame: {text:.16}"))),
    }
}

/// Encodes one outgoing message.
///
/// # Errors
///
/// Returns [`Error::Json`] if serialization fails.
pub fn encode(message: &str) -> Result<String> {
    Ok(serde_json::to_string(&[message])?)
}

/// Builds the SockJS WebSocket URL `{endpoint}/{server}/{session}/websocket`.
///
/// # Errors
///
/// Returns [`Error::Config`] if the endpoint cannot carry a path.
pub fn websocket_url(endpoint: &Url, session: SessionId) -> Result<Url> {
    let server: u16 = rand::rng().random_range(0..1000);
    let mut url = endpoint.clone();
    url.path_segments_mut()
        .map_err(|()| Error::config(format!("Endpoint cannot be a base: {endpoint}")))?
        .pop_if_empty()
        .push(&format!("{server:03}"))
        .push(&session.simple())
        .push("websocket");
    Ok(url)
}

// ============================================================================
// Tests
// ============================================================================
