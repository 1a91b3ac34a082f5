//! WebSocket connector.
//!
//! Opens the physical connection with `tokio-tungstenite`, either as a plain
//! WebSocket carrying STOMP frames directly, or as the SockJS WebSocket
//! transport with its array envelope.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt, future, stream};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::SessionId;

use super::connector::{Connector, Duplex, TextSink, TextStream};
use super::sockjs::{self, SockJsFrame};

// ============================================================================
// TransportKind
// ============================================================================

/// Wire transport used under STOMP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportKind {
    /// SockJS WebSocket transport (`{endpoint}/{server}/{session}/websocket`).
    #[default]
    SockJs,
    /// Plain WebSocket at the endpoint itself.
    WebSocket,
}

// ============================================================================
// WebSocketConnector
// ============================================================================

/// [`Connector`] backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector {
    kind: TransportKind,
}

impl WebSocketConnector {
    /// Creates a connector for the given transport kind.
    #[inline]
    #[must_use]
    pub const fn new(kind: TransportKind) -> Self {
        Self { kind }
    }

    /// Returns the transport kind.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> TransportKind {
        self.kind
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &Url) -> Result<Duplex> {
        let url = match self.kind {
            TransportKind::SockJs => sockjs::websocket_url(endpoint, SessionId::generate())?,
            TransportKind::WebSocket => endpoint.clone(),
        };

        debug!(url = %url, kind = ?self.kind, "Opening WebSocket");

        let (ws_stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::connection(format!("WebSocket connect to {url} failed: {e}")))?;

        let (ws_write, ws_read) = ws_stream.split();
        let ws_write = ws_write.sink_map_err(Error::from);

        let duplex = match self.kind {
            TransportKind::WebSocket => {
                let sink: TextSink = Box::pin(ws_write.with(|text: String| {
                    future::ready(Ok::<_, Error>(Message::Text(text.into())))
                }));
                let stream: TextStream = Box::pin(ws_read.filter_map(|message| {
                    future::ready(match message {
                        Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                        Ok(Message::Close(frame)) => {
                            debug!(?frame, "WebSocket closed by remote");
                            None
                        }
                        Ok(_) => None,
                        Err(e) => Some(Err(Error::from(e))),
                    })
                }));
                Duplex::new(sink, stream)
            }
            TransportKind::SockJs => {
                let sink: TextSink = Box::pin(ws_write.with(|text: String| {
                    future::ready(sockjs::encode(&text).map(|json| Message::Text(json.into())))
                }));
                let stream: TextStream = Box::pin(
                    ws_read
                        .map(|message| stream::iter(unwrap_sockjs(message)))
                        .flatten(),
                );
                Duplex::new(sink, stream)
            }
        };

        Ok(duplex)
    }
}

/// Flattens one SockJS envelope into STOMP text chunks.
fn unwrap_sockjs(
    message: std::result::Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Vec<Result<String>> {
    let text = match message {
        Ok(Message::Text(text)) => text,
        Ok(Message::Close(frame)) => {
            debug!(?frame, "SockJS socket closed by remote");
            return Vec::new();
        }
        Ok(_) => return Vec::new(),
        Err(e) => return vec![Err(Error::from(e))],
    };

    match sockjs::decode(text.as_str()) {
        Ok(SockJsFrame::Open) => {
            trace!("SockJS session open");
            Vec::new()
        }
        Ok(SockJsFrame::Heartbeat) => {
            trace!("SockJS heartbeat");
            Vec::new()
        }
        Ok(SockJsFrame::Messages(messages)) => messages.into_iter().map(Ok).collect(),
        Ok(SockJsFrame::Close { code, reason }) => vec![Err(Error::transport_dropped(format!(
            "SockJS close {code}: {reason}"
        )))],
        Err(e) => {
            warn!(error = %e, "Dropping malformed SockJS frame");
            Vec::new()
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
    fn test_default_kind_is_sockjs() {
        assert_eq!(WebSocketConnector::default().kind(), TransportKind::SockJs);
        assert_eq!(
            WebSocketConnector::new(TransportKind::WebSocket).kind(),
            TransportKind::WebSocket
        );
    }

    #[test]
    fn test_unwrap_sockjs_messages() {
        let items = unwrap_sockjs(Ok(Message::Text(r#"a["\n","MESSAGE\n\n\u0000"]"#.into())));
        let texts: Vec<_> = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(texts, vec!["\n".to_string(), "MESSAGE\n\n\0".to_string()]);
    }

    #[test]
    fn test_unwrap_sockjs_control_frames() {
        assert!(unwrap_sockjs(Ok(Message::Text("o".into()))).is_empty());
        assert!(unwrap_sockjs(Ok(Message::Text("h".into()))).is_empty());
    }

    #[test]
    fn test_unwrap_sockjs_close_is_error() {
        let items = unwrap_sockjs(Ok(Message::Text(r#"c[1000,"Normal"]"#.into())));
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(Error::TransportDropped { .. })));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let connector = WebSocketConnector::new(TransportKind::WebSocket);
        let endpoint = Url::parse("ws://127.0.0.1:1/ws").unwrap();
        let err = connector.connect(&endpoint).await.unwrap_err();
        assert!(err.is_connection_error());
    }
}
