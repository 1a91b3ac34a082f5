//! STOMP 1.2 frame model and codec.
//!
//! A frame is a command line, a block of `name:value` headers, an empty
//! line, and a body terminated by a NUL byte:
//!
//! ```text
//! SEND
//! destination:/app/trade
//! content-type:application/json
//!
//! {"qty":1}^@
//! ```
//!
//! A lone EOL between frames is a heartbeat.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Heartbeat frame sent on an idle connection.
pub const HEARTBEAT: &str = "\n";

/// Protocol versions offered in CONNECT.
pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

/// Content type attached to JSON bodies.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Largest frame the decoder will buffer, in bytes.
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

// ============================================================================
// Command
// ============================================================================

/// STOMP frame command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // Client frames
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    // Server frames
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Connected => "CONNECTED",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// CONNECT and CONNECTED headers are never escaped.
    #[inline]
    const fn escapes_headers(&self) -> bool {
        !matches!(self, Self::Connect | Self::Stomp | Self::Connected)
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "CONNECTED" => Self::Connected,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => return Err(Error::frame(format!("Unknown command: {other}"))),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Frame
// ============================================================================

/// A single STOMP frame.
///
/// Headers keep wire order. When a header repeats, the first value wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame command.
    pub command: Command,
    /// Headers in wire order.
    pub headers: Vec<(String, String)>,
    /// Text body.
    pub body: String,
}

impl Frame {
    /// Creates a frame with no headers and an empty body.
    #[inline]
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Appends a header.
    #[inline]
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Appends every header from an iterator.
    #[must_use]
    pub fn headers<K, V>(mut self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the body.
    #[inline]
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the first value of a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the ERROR frame's message, falling back to its body.
    #[must_use]
    pub fn error_message(&self) -> String {
        match self.get("message") {
            Some(message) if !message.is_empty() => message.to_string(),
            _ if !self.body.is_empty() => self.body.trim().to_string(),
            _ => "broker sent ERROR".to_string(),
        }
    }

    /// Encodes the frame to its wire form, NUL terminator included.
    #[must_use]
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(32 + self.body.len() + self.headers.len() * 24);

        out.push_str(self.command.as_str());
        out.push('\n');

        for (name, value) in &self.headers {
            if escape {
                escape_into(&mut out, name);
                out.push(':');
                escape_into(&mut out, value);
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }

        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

// ============================================================================
// Client Frame Constructors
// ============================================================================

impl Frame {
    /// Builds the CONNECT frame.
    #[must_use]
    pub fn connect(host: &str, heartbeat: Heartbeat, extra: &[(String, String)]) -> Self {
        Self::new(Command::Connect)
            .header("accept-version", ACCEPT_VERSION)
            .header("host", host)
            .header("heart-beat", heartbeat.to_header())
            .headers(extra.iter().cloned())
    }

    /// Builds a SUBSCRIBE frame.
    #[must_use]
    pub fn subscribe(id: impl Into<String>, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    /// Builds an UNSUBSCRIBE frame.
    #[must_use]
    pub fn unsubscribe(id: impl Into<String>) -> Self {
        Self::new(Command::Unsubscribe).header("id", id)
    }

    /// Builds a SEND frame carrying a JSON body.
    ///
    /// Caller headers come after the generated ones and never override
    /// `destination`.
    #[must_use]
    pub fn send_json(destination: &str, headers: &[(String, String)], json: String) -> Self {
        let mut frame = Self::new(Command::Send).header("destination", destination);
        if !headers.iter().any(|(k, _)| k == "content-type") {
            frame = frame.header("content-type", JSON_CONTENT_TYPE);
        }
        frame
            .headers(
                headers
                    .iter()
                    .filter(|(k, _)| k != "destination" && k != "content-length")
                    .cloned(),
            )
            .header("content-length", json.len().to_string())
            .body(json)
    }

    /// Builds a DISCONNECT frame.
    #[must_use]
    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }
}

// ============================================================================
// Heartbeat
// ============================================================================

/// Heartbeat interval pair as carried in the `heart-beat` header.
///
/// `outgoing` is how often this side promises to send,
/// `incoming` is how often it wants to receive. Zero disables a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// Interval this side sends at.
    pub outgoing: Duration,
    /// Interval this side expects to receive at.
    pub incoming: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new(Duration::from_millis(10_000), Duration::from_millis(10_000))
    }
}

impl Heartbeat {
    /// Creates a heartbeat pair.
    #[inline]
    #[must_use]
    pub const fn new(outgoing: Duration, incoming: Duration) -> Self {
        Self { outgoing, incoming }
    }

    /// Disables heartbeats in both directions.
    #[inline]
    #[must_use]
    pub const fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Formats as `outgoing-ms,incoming-ms`.
    #[must_use]
    pub fn to_header(&self) -> String {
        format!(
            "{},{}",
            self.outgoing.as_millis(),
            self.incoming.as_millis()
        )
    }

    /// Parses the `outgoing-ms,incoming-ms` header form.
    pub fn parse(header: &str) -> Result<Self> {
        let (cx, cy) = header
            .split_once(',')
            .ok_or_else(|| Error::frame(format!("Invalid heart-beat header: {header}")))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| Error::frame(format!("Invalid heart-beat header: {header}")))
        };
        Ok(Self::new(parse(cx)?, parse(cy)?))
    }

    /// Negotiates with the broker's advertised pair.
    ///
    /// Returns `(send_every, expect_every)`; `None` means that direction is off.
    #[must_use]
    pub fn negotiate(&self, server: Heartbeat) -> (Option<Duration>, Option<Duration>) {
        let pick = |ours: Duration, theirs: Duration| {
            if ours.is_zero() || theirs.is_zero() {
                None
            } else {
                Some(ours.max(theirs))
            }
        };
        (
            pick(self.outgoing, server.incoming),
            pick(self.incoming, server.outgoing),
        )
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// Item produced by [`FrameDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// Bare EOL keep-alive.
    Heartbeat,
    /// A complete frame.
    Frame(Frame),
}

/// Result of feeding one chunk to a [`FrameDecoder`].
#[derive(Debug, Default)]
pub struct Decoded {
    /// Items decoded before any error, in wire order.
    pub items: Vec<Incoming>,
    /// The malformed frame that stopped decoding, if any.
    pub error: Option<Error>,
}

impl Decoded {
    /// Returns the items, or the error if decoding stopped early.
    ///
    /// # Errors
    ///
    /// Returns the decoder's [`Error::Frame`] when the chunk was malformed.
    pub fn into_result(self) -> Result<Vec<Incoming>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.items),
        }
    }
}

/// Streaming decoder.
///
/// Frames may be split across or packed into transport messages;
/// incomplete input stays buffered until the next [`push`](Self::push).
/// A partial frame larger than [`MAX_FRAME_SIZE`] is rejected.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of buffered bytes not yet decoded.
    #[inline]
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feeds a chunk and returns every complete item.
    ///
    /// Items that precede a malformed frame are still returned. On error the
    /// buffer is cleared so the decoder can resynchronise on the next chunk.
    pub fn push(&mut self, chunk: &str) -> Decoded {
        self.buffer.push_str(chunk);
        let mut decoded = Decoded::default();

        loop {
            match self.next_item() {
                Ok(Some((item, consumed))) => {
                    self.buffer.drain(..consumed);
                    decoded.items.push(item);
                }
                Ok(None) if self.buffer.len() > MAX_FRAME_SIZE => {
                    self.buffer.clear();
                    decoded.error = Some(Error::frame(format!(
                        "Partial frame exceeds {MAX_FRAME_SIZE} bytes"
                    )));
                    break;
                }
                Ok(None) => break,
                Err(e) => {
                    self.buffer.clear();
                    decoded.error = Some(e);
                    break;
                }
            }
        }

        decoded
    }

    /// Attempts to decode one item from the front of the buffer.
    fn next_item(&self) -> Result<Option<(Incoming, usize)>> {
        let buf = self.buffer.as_str();

        if buf.starts_with('\n') {
            return Ok(Some((Incoming::Heartbeat, 1)));
        }
        if buf.starts_with("\r\n") {
            return Ok(Some((Incoming::Heartbeat, 2)));
        }
        if buf.is_empty() {
            return Ok(None);
        }

        let mut pos = 0;
        let Some(command_line) = read_line(buf, &mut pos) else {
            return Ok(None);
        };
        let command: Command = command_line.parse()?;
        let escaped = command.escapes_headers();

        let mut headers = Vec::new();
        loop {
            let Some(line) = read_line(buf, &mut pos) else {
                return Ok(None);
            };
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| Error::frame(format!("Header without colon: {line}")))?;
            if escaped {
                headers.push((unescape(name)?, unescape(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let content_length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .map(|(_, v)| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| Error::frame(format!("Invalid content-length: {v}")))
            })
            .transpose()?;

        let body_end = match content_length {
            Some(len) => {
                if len > MAX_FRAME_SIZE {
                    return Err(Error::frame(format!("content-length {len} exceeds limit")));
                }
                let end = pos
                    .checked_add(len)
                    .ok_or_else(|| Error::frame("content-length overflows"))?;
                if buf.len() <= end {
                    return Ok(None);
                }
                if buf.as_bytes()[end] != 0 {
                    return Err(Error::frame("Body longer than content-length"));
                }
                end
            }
            None => match buf[pos..].find('\0') {
                Some(offset) => pos + offset,
                None => return Ok(None),
            },
        };

        let body = buf
            .get(pos..body_end)
            .ok_or_else(|| Error::frame("content-length splits a character"))?
            .to_string();

        let frame = Frame {
            command,
            headers,
            body,
        };
        Ok(Some((Incoming::Frame(frame), body_end + 1)))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Reads one EOL-terminated line starting at `pos`, stripping `\r`.
fn read_line<'a>(buf: &'a str, pos: &mut usize) -> Option<&'a str> {
    let rest = &buf[*pos..];
    let end = rest.find('\n')?;
    *pos += end + 1;
    Some(rest[..end].strip_suffix('\r').unwrap_or(&rest[..end]))
}

fn escape_into(out: &mut String, raw: &str) {
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape(raw: &str) -> Result<String> {
    if !raw.contains('\\') {
        return Ok(raw.to_string());
    }

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(Error::frame(format!(
                    "Invalid header escape: \\{}",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn decode_all(input: &str) -> Vec<Incoming> {
        FrameDecoder::new().push(input).into_result().unwrap()
    }

    #[test]
    fn test_encode_subscribe() {
        let frame = Frame::subscribe("sub-0", "/topic/prices");
        assert_eq!(
            frame.encode(),
            "SUBSCRIBE\nid:sub-0\ndestination:/topic/prices\nack:auto\n\n\0"
        );
    }

    #[test]
    fn test_connect_headers_not_escaped() {
        let frame = Frame::connect("localhost:8080", Heartbeat::default(), &[]);
        let wire = frame.encode();
        assert!(wire.starts_with("CONNECT\n"));
        assert!(wire.contains("host:localhost:8080\n"));
        assert!(wire.contains("heart-beat:10000,10000\n"));
        assert!(wire.contains("accept-version:1.2,1.1,1.0\n"));
    }

    #[test]
    fn test_send_json_sets_length_and_type() {
        let frame = Frame::send_json(
            "/app/trade",
            &[("destination".into(), "/evil".into())],
            r#"{"qty":1}"#.into(),
        );
        assert_eq!(frame.get("destination"), Some("/app/trade"));
        assert_eq!(frame.get("content-type"), Some(JSON_CONTENT_TYPE));
        assert_eq!(frame.get("content-length"), Some("9"));
        assert_eq!(
            frame.headers.iter().filter(|(k, _)| k == "destination").count(),
            1
        );
    }

    #[test]
    fn test_decode_message_frame() {
        let items = decode_all(
            "MESSAGE\nsubscription:sub-1\ndestination:/topic/prices\ncontent-type:application/json\n\n{\"a\":1}\0",
        );
        assert_eq!(items.len(), 1);
        let Incoming::Frame(frame) = &items[0] else {
            panic!("expected frame");
        };
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.get("subscription"), Some("sub-1"));
        assert_eq!(frame.body, "{\"a\":1}");
    }

    #[test]
    fn test_decode_heartbeats_between_frames() {
        let items = decode_all("\n\r\nRECEIPT\nreceipt-id:7\n\n\0\n");
        assert_eq!(items.len(), 4);
        assert_eq!(items[0], Incoming::Heartbeat);
        assert_eq!(items[1], Incoming::Heartbeat);
        assert!(matches!(items[2], Incoming::Frame(_)));
        assert_eq!(items[3], Incoming::Heartbeat);
    }

    #[test]
    fn test_decode_crlf_lines() {
        let items = decode_all("CONNECTED\r\nversion:1.2\r\n\r\n\0");
        let Incoming::Frame(frame) = &items[0] else {
            panic!("expected frame");
        };
        assert_eq!(frame.command, Command::Connected);
        assert_eq!(frame.get("version"), Some("1.2"));
    }

    #[test]
    fn test_decode_split_across_chunks() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push("MESSAGE\nsubscription:sub-1\n").items.is_empty());
        assert!(decoder.push("\nhel").items.is_empty());
        let items = decoder.push("lo\0").into_result().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decode_content_length_allows_nul_in_body() {
        let items = decode_all("MESSAGE\ncontent-length:3\n\na\0b\0");
        let Incoming::Frame(frame) = &items[0] else {
            panic!("expected frame");
        };
        assert_eq!(frame.body, "a\0b");
    }

    #[test]
    fn test_decode_repeated_header_first_wins() {
        let items = decode_all("MESSAGE\nfoo:1\nfoo:2\n\n\0");
        let Incoming::Frame(frame) = &items[0] else {
            panic!("expected frame");
        };
        assert_eq!(frame.get("foo"), Some("1"));
    }

    #[test]
    fn test_decode_unknown_command_resets() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push("BOGUS\n\n\0").error.is_some());
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(decoder.push("\n").into_result().unwrap(), vec![Incoming::Heartbeat]);
    }

    #[test]
    fn test_decode_invalid_escape() {
        assert!(FrameDecoder::new().push("MESSAGE\nfoo:a\\tb\n\n\0").error.is_some());
    }

    #[test]
    fn test_decode_keeps_frames_before_malformed_one() {
        let decoded = FrameDecoder::new().push("MESSAGE\ndestination:/topic/prices\n\nok\0BOGUS\n\n\0");
        assert_eq!(decoded.items.len(), 1);
        let Incoming::Frame(frame) = &decoded.items[0] else {
            panic!("expected frame");
        };
        assert_eq!(frame.body, "ok");
        assert!(matches!(decoded.error, Some(Error::Frame { .. })));
    }

    #[test]
    fn test_decode_huge_content_length_is_rejected() {
        let mut decoder = FrameDecoder::new();
        let decoded =
            decoder.push("MESSAGE\nsubscription:sub-1\ncontent-length:18446744073709551615\n\nx");
        assert!(decoded.items.is_empty());
        assert!(matches!(decoded.error, Some(Error::Frame { .. })));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decode_caps_unterminated_frame() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push("MESSAGE\n\n").error.is_none());
        let filler = "x".repeat(MAX_FRAME_SIZE);
        assert!(decoder.push(&filler).error.is_some());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_error_message_fallback() {
        let frame = Frame::new(Command::Error).body("Bad credentials\n");
        assert_eq!(frame.error_message(), "Bad credentials");
        let frame = Frame::new(Command::Error).header("message", "denied");
        assert_eq!(frame.error_message(), "denied");
    }

    #[test]
    fn test_heartbeat_parse_and_format() {
        let hb = Heartbeat::parse("10000, 5000").unwrap();
        assert_eq!(hb.outgoing, Duration::from_millis(10_000));
        assert_eq!(hb.incoming, Duration::from_millis(5_000));
        assert_eq!(Heartbeat::default().to_header(), "10000,10000");
        assert!(Heartbeat::parse("10000").is_err());
    }

    #[test]
    fn test_heartbeat_negotiation() {
        let ours = Heartbeat::default();
        let (send, expect) = ours.negotiate(Heartbeat::new(
            Duration::from_millis(20_000),
            Duration::from_millis(5_000),
        ));
        assert_eq!(send, Some(Duration::from_millis(10_000)));
        assert_eq!(expect, Some(Duration::from_millis(20_000)));

        let (send, expect) = ours.negotiate(Heartbeat::disabled());
        assert_eq!((send, expect), (None, None));
    }

    proptest! {
        #[test]
        fn prop_header_values_survive_escaping(value in "[ -~\\n\\r]{0,40}") {
            let frame = Frame::new(Command::Message).header("x-note", value.clone());
            let items = FrameDecoder::new().push(&frame.encode()).into_result().unwrap();
            prop_assert_eq!(items.len(), 1);
            let Incoming::Frame(decoded) = &items[0] else {
                return Err(TestCaseError::fail("expected frame"));
            };
            prop_assert_eq!(decoded.get("x-note"), Some(value.as_str()));
        }

        #[test]
        fn prop_decoder_is_chunking_independent(split in 0usize..60) {
            let wire = Frame::new(Command::Message)
                .header("destination", "/topic/prices")
                .body("{\"symbol\":\"BTC\"}")
                .encode();
            let split = split.min(wire.len());
            let mut decoder = FrameDecoder::new();
            let mut items = decoder.push(&wire[..split]).into_result().unwrap();
            items.extend(decoder.push(&wire[split..]).into_result().unwrap());
            prop_assert_eq!(items.len(), 1);
        }
    }
}
