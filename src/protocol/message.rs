//! Messages delivered to topic handlers.
//!
//! A MESSAGE frame body is parsed as JSON when the frame declares a JSON
//! content type, or declares none at all. Anything that fails to parse is
//! handed over as raw text, so handlers must accept either [`Payload`] form.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;

use super::destination::Destination;
use super::frame::Frame;

// ============================================================================
// Payload
// ============================================================================

/// Message body after content-type aware parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Body parsed as JSON.
    Json(Value),
    /// Body delivered verbatim.
    Text(String),
}

impl Payload {
    /// Parses a body according to its declared content type.
    #[must_use]
    pub fn from_body(content_type: Option<&str>, body: &str) -> Self {
        if !declares_json(content_type) {
            return Self::Text(body.to_string());
        }

        match serde_json::from_str(body) {
            Ok(value) => Self::Json(value),
            Err(e) => {
                debug!(error = %e, "Body is not valid JSON, delivering raw text");
                Self::Text(body.to_string())
            }
        }
    }

    /// Returns the JSON value if parsed.
    #[inline]
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    /// Returns the raw text if unparsed.
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Json(_) => None,
            Self::Text(text) => Some(text),
        }
    }

    /// Decodes into a typed value.
    ///
    /// Text payloads are tried as JSON too, since some brokers omit
    /// `content-type` on string-serialized bodies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if the payload does not
    /// match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(match self {
            Self::Json(value) => T::deserialize(value)?,
            Self::Text(text) => serde_json::from_str(text)?,
        })
    }
}

fn declares_json(content_type: Option<&str>) -> bool {
    match content_type {
        None => true,
        Some(ct) => {
            let ct = ct.to_ascii_lowercase();
            ct.contains("json")
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// A message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Destination the broker published to.
    pub destination: String,
    /// All frame headers.
    pub headers: Vec<(String, String)>,
    /// Parsed body.
    pub payload: Payload,
}

impl Message {
    /// Builds a message from a MESSAGE frame.
    #[must_use]
    pub fn from_frame(frame: Frame) -> Self {
        let destination = frame.get("destination").unwrap_or_default().to_string();
        let payload = Payload::from_body(frame.get("content-type"), &frame.body);

        Self {
            destination,
            headers: frame.headers,
            payload,
        }
    }

    /// Returns the first value of a header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// A SEND envelope: destination, extra headers and a JSON body.
///
/// Only ever handed to a live session. Nothing is queued while disconnected.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    /// Target destination.
    pub destination: Destination,
    /// Extra frame headers.
    pub headers: Vec<(String, String)>,
    /// Body, serialized as JSON on the wire.
    pub body: Value,
}

impl Outbound {
    /// Creates an envelope from any serializable body.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidDestination`](crate::Error::InvalidDestination) for a malformed destination
    /// - [`Error::Json`](crate::Error::Json) if the body cannot be serialized
    pub fn new<T: Serialize + ?Sized>(destination: &str, body: &T) -> Result<Self> {
        Ok(Self {
            destination: Destination::new(destination)?,
            headers: Vec::new(),
            body: serde_json::to_value(body)?,
        })
    }

    /// Adds a header.
    #[inline]
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde::Deserialize;
    use serde_json::json;

    use crate::protocol::frame::Command;

    #[test]
    fn test_json_body_parsed() {
        let payload = Payload::from_body(Some("application/json;charset=UTF-8"), r#"{"a":1}"#);
        assert_eq!(payload, Payload::Json(json!({"a": 1})));
    }

    #[test]
    fn test_missing_content_type_tries_json() {
        let payload = Payload::from_body(None, "[1,2]");
        assert_eq!(payload.as_json(), Some(&json!([1, 2])));
    }

    #[test]
    fn test_non_json_body_falls_back_to_text() {
        let payload = Payload::from_body(Some("application/json"), "BTC up 3%");
        assert_eq!(payload.as_text(), Some("BTC up 3%"));
    }

    #[test]
    fn test_text_content_type_not_parsed() {
        let payload = Payload::from_body(Some("text/plain"), "42");
        assert_eq!(payload, Payload::Text("42".into()));
    }

    #[test]
    fn test_decode_from_text() {
        #[derive(Deserialize)]
        struct Pong {
            ok: bool,
        }
        let payload = Payload::Text(r#"{"ok":true}"#.into());
        assert!(payload.decode::<Pong>().unwrap().ok);
        assert!(Payload::Text("nope".into()).decode::<Pong>().is_err());
    }

    #[test]
    fn test_message_from_frame() {
        let frame = Frame::new(Command::Message)
            .header("destination", "/topic/updates")
            .header("content-type", "text/plain")
            .body("hello");
        let message = Message::from_frame(frame);
        assert_eq!(message.destination, "/topic/updates");
        assert_eq!(message.header("content-type"), Some("text/plain"));
        assert_eq!(message.payload.as_text(), Some("hello"));
    }

    #[test]
    fn test_outbound_envelope() {
        let outbound = Outbound::new("/app/trade/buy", &json!({"symbol": "ETH", "qty": 1}))
            .unwrap()
            .header("x-request", "9");
        assert_eq!(outbound.destination.as_str(), "/app/trade/buy");
        assert_eq!(outbound.headers, vec![("x-request".into(), "9".into())]);
        assert_eq!(outbound.body["symbol"], "ETH");

        assert!(Outbound::new("trade", &1).is_err());
    }
}
