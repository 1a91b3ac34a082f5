//! Transport session and event loop.
//!
//! A [`Session`] is one physical connection attempt: it opens a channel
//! through a [`Connector`], completes the STOMP handshake, then hands the
//! channel to a spawned event loop.
//!
//! # Event Loop
//!
//! The loop multiplexes:
//!
//! - Incoming frames from the broker, routed to subscription handlers
//! - Outgoing frames queued by the Rust API
//! - Outgoing heartbeats at the negotiated interval
//! - An incoming watchdog that fails the session after two silent intervals
//!
//! When the loop exits, the session's end callback runs exactly once with
//! a [`SessionEnd`] telling a local close apart from a peer close or a failure.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, timeout};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::{SessionId, SubscriptionId};
use crate::protocol::frame::HEARTBEAT;
use crate::protocol::{Command, Decoded, Frame, FrameDecoder, Heartbeat, Incoming, Message};

use super::connector::{Connector, Duplex};

// ============================================================================
// Types
// ============================================================================

/// Handler invoked for every message on a subscription.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Callback invoked once when the session's channel is gone.
pub type EndCallback = Box<dyn FnOnce(SessionEnd) + Send>;

/// Map of subscription IDs to routes.
type RouteMap = FxHashMap<SubscriptionId, Route>;

struct Route {
    destination: String,
    handler: MessageHandler,
}

// ============================================================================
// SessionEnd
// ============================================================================

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Closed locally via [`Session::close`] or drop.
    Closed,
    /// Peer closed the channel.
    Remote,
    /// Channel failed: I/O error, broker ERROR frame, or heartbeat timeout.
    Failed(String),
}

impl SessionEnd {
    /// Returns `true` unless the session was closed locally.
    #[inline]
    #[must_use]
    pub fn is_unexpected(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed locally"),
            Self::Remote => f.write_str("closed by peer"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

// ============================================================================
// SessionConfig
// ============================================================================

/// Parameters for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fixed endpoint passed to the connector.
    pub endpoint: Url,
    /// Value of the CONNECT `host` header.
    pub host: String,
    /// Heartbeat offer.
    pub heartbeat: Heartbeat,
    /// Limit for socket open plus CONNECTED frame.
    pub connect_timeout: Duration,
    /// Extra CONNECT headers (credentials and the like).
    pub connect_headers: Vec<(String, String)>,
}

// ============================================================================
// WriteReceipt
// ============================================================================

/// Resolves once the transport has accepted a queued frame.
#[derive(Debug)]
pub struct WriteReceipt(oneshot::Receiver<Result<()>>);

impl WriteReceipt {
    /// Waits until the frame is written.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the session ended before the write
    /// - The transport error if the write failed
    pub async fn accepted(self) -> Result<()> {
        self.0.await.map_err(|_| Error::NotConnected)?
    }
}

// ============================================================================
// SessionCommand
// ============================================================================

/// Internal commands for the event loop.
enum SessionCommand {
    /// Write a frame without confirmation.
    Frame(Frame),
    /// Write a frame and report the outcome.
    Write {
        frame: Frame,
        accepted_tx: oneshot::Sender<Result<()>>,
    },
    /// Send DISCONNECT and close the channel.
    Close,
}

// ============================================================================
// Session
// ============================================================================

/// One open STOMP session.
///
/// Dropping the session closes it gracefully.
pub struct Session {
    /// Identity of this attempt.
    id: SessionId,
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    /// Subscription routes (shared with event loop).
    routes: Arc<Mutex<RouteMap>>,
    /// Cleared when closing or when the loop exits.
    open: Arc<AtomicBool>,
    /// Negotiated protocol version.
    version: Option<String>,
    /// Broker `server` header.
    server: Option<String>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .field("version", &self.version)
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl Session {
    /// Opens a channel and completes the STOMP handshake.
    ///
    /// Resolves on the CONNECTED frame. `on_end` is only armed once the
    /// handshake succeeded.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if CONNECTED is not received in time
    /// - [`Error::Handshake`] if the broker answers with ERROR
    /// - [`Error::Connection`] if the channel fails or closes first
    pub async fn open(
        connector: &dyn Connector,
        config: &SessionConfig,
        on_end: EndCallback,
    ) -> Result<Self> {
        let id = SessionId::generate();
        let timeout_ms = config.connect_timeout.as_millis() as u64;

        let (duplex, decoder, connected) =
            timeout(config.connect_timeout, Self::handshake(connector, config))
                .await
                .map_err(|_| Error::connection_timeout(timeout_ms))??;

        let server_heartbeat = match connected.get("heart-beat") {
            Some(header) => Heartbeat::parse(header).unwrap_or_else(|e| {
                warn!(error = %e, "Ignoring malformed heart-beat header");
                Heartbeat::disabled()
            }),
            None => Heartbeat::disabled(),
        };
        let (send_every, expect_every) = config.heartbeat.negotiate(server_heartbeat);

        let version = connected.get("version").map(str::to_string);
        let server = connected.get("server").map(str::to_string);

        info!(
            session = %id,
            version = version.as_deref().unwrap_or("1.0"),
            server = server.as_deref().unwrap_or("unknown"),
            ?send_every,
            ?expect_every,
            "STOMP session established"
        );

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let routes = Arc::new(Mutex::new(RouteMap::default()));
        let open = Arc::new(AtomicBool::new(true));

        tokio::spawn(Self::run_event_loop(EventLoop {
            id,
            duplex,
            decoder,
            command_rx,
            routes: Arc::clone(&routes),
            open: Arc::clone(&open),
            send_every,
            expect_every,
            on_end,
        }));

        Ok(Self {
            id,
            command_tx,
            routes,
            open,
            version,
            server,
        })
    }

    /// Sends CONNECT and waits for CONNECTED.
    async fn handshake(
        connector: &dyn Connector,
        config: &SessionConfig,
    ) -> Result<(Duplex, FrameDecoder, Frame)> {
        let mut duplex = connector.connect(&config.endpoint).await?;

        let connect = Frame::connect(&config.host, config.heartbeat, &config.connect_headers);
        duplex.sink.send(connect.encode()).await?;

        let mut decoder = FrameDecoder::new();
        while let Some(chunk) = duplex.stream.next().await {
            let chunk = chunk.map_err(|e| Error::connection(format!("Handshake failed: {e}")))?;

            for item in decoder.push(&chunk).into_result()? {
                match item {
                    Incoming::Heartbeat => {}
                    Incoming::Frame(frame) if frame.command == Command::Connected => {
                        return Ok((duplex, decoder, frame));
                    }
                    Incoming::Frame(frame) if frame.command == Command::Error => {
                        return Err(Error::handshake(frame.error_message()));
                    }
                    Incoming::Frame(frame) => {
                        return Err(Error::frame(format!(
                            "Expected CONNECTED, got {}",
                            frame.command
                        )));
                    }
                }
            }
        }

        Err(Error::connection("Transport closed before CONNECTED"))
    }

    /// Returns the session ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns `true` until closed or ended.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Returns the negotiated protocol version.
    #[inline]
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Returns the broker's `server` header.
    #[inline]
    #[must_use]
    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    /// Returns the number of active frame-level subscriptions.
    #[inline]
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.routes.lock().len()
    }

    /// Registers a frame-level subscription.
    ///
    /// The returned ID cancels it via [`unsubscribe`](Self::unsubscribe).
    /// Messages are delivered as parsed JSON when the frame declares JSON,
    /// otherwise as raw text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the session is closed.
    pub fn subscribe(&self, destination: &str, handler: MessageHandler) -> Result<SubscriptionId> {
        if !self.is_open() {
            return Err(Error::NotConnected);
        }

        let id = SubscriptionId::next();
        self.routes.lock().insert(
            id,
            Route {
                destination: destination.to_string(),
                handler,
            },
        );

        if self
            .command_tx
            .send(SessionCommand::Frame(Frame::subscribe(id.to_string(), destination)))
            .is_err()
        {
            self.routes.lock().remove(&id);
            return Err(Error::NotConnected);
        }

        debug!(session = %self.id, %id, destination, "Subscribed");
        Ok(id)
    }

    /// Cancels a frame-level subscription.
    ///
    /// Returns `false` if the ID was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Some(route) = self.routes.lock().remove(&id) else {
            return false;
        };

        if self.is_open() {
            let _ = self
                .command_tx
                .send(SessionCommand::Frame(Frame::unsubscribe(id.to_string())));
        }

        debug!(session = %self.id, %id, destination = %route.destination, "Unsubscribed");
        true
    }

    /// Queues a SEND frame with a JSON body.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the session is closed
    /// - [`Error::Json`] if the body cannot be serialized
    pub fn enqueue_json<T: Serialize + ?Sized>(
        &self,
        destination: &str,
        headers: &[(String, String)],
        body: &T,
    ) -> Result<WriteReceipt> {
        if !self.is_open() {
            return Err(Error::NotConnected);
        }

        let json = serde_json::to_string(body)?;
        let frame = Frame::send_json(destination, headers, json);
        let (accepted_tx, accepted_rx) = oneshot::channel();

        self.command_tx
            .send(SessionCommand::Write { frame, accepted_tx })
            .map_err(|_| Error::NotConnected)?;

        Ok(WriteReceipt(accepted_rx))
    }

    /// Sends a JSON body and waits until the transport accepted the write.
    ///
    /// # Errors
    ///
    /// See [`enqueue_json`](Self::enqueue_json) and [`WriteReceipt::accepted`].
    pub async fn send<T: Serialize + ?Sized>(
        &self,
        destination: &str,
        headers: &[(String, String)],
        body: &T,
    ) -> Result<()> {
        self.enqueue_json(destination, headers, body)?
            .accepted()
            .await
    }

    /// Closes the session gracefully. Idempotent.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            debug!(session = %self.id, "Closing session");
            let _ = self.command_tx.send(SessionCommand::Close);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Event Loop
// ============================================================================

/// State moved into the event loop task.
struct EventLoop {
    id: SessionId,
    duplex: Duplex,
    decoder: FrameDecoder,
    command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    routes: Arc<Mutex<RouteMap>>,
    open: Arc<AtomicBool>,
    send_every: Option<Duration>,
    expect_every: Option<Duration>,
    on_end: EndCallback,
}

/// Delivers the end callback once, including when the event loop unwinds.
struct EndNotifier {
    id: SessionId,
    open: Arc<AtomicBool>,
    on_end: Option<EndCallback>,
}

impl EndNotifier {
    fn fire(mut self, end: SessionEnd) {
        if let Some(on_end) = self.on_end.take() {
            on_end(end);
        }
    }
}

impl Drop for EndNotifier {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        if let Some(on_end) = self.on_end.take() {
            self.open.store(false, Ordering::Release);
            error!(session = %self.id, "Event loop panicked");
            on_end(SessionEnd::Failed("event loop panicked".to_string()));
        }
    }
}

impl Session {
    /// Event loop that handles transport I/O.
    async fn run_event_loop(state: EventLoop) {
        let EventLoop {
            id,
            duplex,
            mut decoder,
            mut command_rx,
            routes,
            open,
            send_every,
            expect_every,
            on_end,
        } = state;
        let notifier = EndNotifier {
            id,
            open: Arc::clone(&open),
            on_end: Some(on_end),
        };
        let Duplex {
            mut sink,
            mut stream,
        } = duplex;

        let mut heartbeat = send_every.map(ticker);
        let mut watchdog = expect_every.map(ticker);
        let mut last_seen = Instant::now();

        let end = loop {
            tokio::select! {
                // Incoming data from broker
                chunk = stream.next() => {
                    match chunk {
                        Some(Ok(text)) => {
                            last_seen = Instant::now();
                            if let Some(end) = Self::handle_chunk(id, &text, &mut decoder, &routes) {
                                break end;
                            }
                        }

                        Some(Err(e)) => {
                            warn!(session = %id, error = %e, "Transport error");
                            break SessionEnd::Failed(e.to_string());
                        }

                        None => {
                            debug!(session = %id, "Transport stream ended");
                            break SessionEnd::Remote;
                        }
                    }
                }

                // Commands from Rust API
                command = command_rx.recv() => {
                    match command {
                        Some(SessionCommand::Frame(frame)) => {
                            trace!(session = %id, command = %frame.command, "Writing frame");
                            if let Err(e) = sink.send(frame.encode()).await {
                                break SessionEnd::Failed(e.to_string());
                            }
                        }

                        Some(SessionCommand::Write { frame, accepted_tx }) => {
                            trace!(session = %id, command = %frame.command, "Writing frame");
                            match sink.send(frame.encode()).await {
                                Ok(()) => {
                                    let _ = accepted_tx.send(Ok(()));
                                }
                                Err(e) => {
                                    let reason = e.to_string();
                                    let _ = accepted_tx.send(Err(e));
                                    break SessionEnd::Failed(reason);
                                }
                            }
                        }

                        Some(SessionCommand::Close) | None => {
                            debug!(session = %id, "Shutdown requested");
                            let _ = sink.send(Frame::disconnect().encode()).await;
                            let _ = sink.close().await;
                            break SessionEnd::Closed;
                        }
                    }
                }

                // Outgoing heartbeat
                _ = tick(&mut heartbeat) => {
                    trace!(session = %id, "Sending heartbeat");
                    if let Err(e) = sink.send(HEARTBEAT.to_string()).await {
                        break SessionEnd::Failed(e.to_string());
                    }
                }

                // Incoming watchdog
                _ = tick(&mut watchdog) => {
                    if let Some(expected) = expect_every
                        && last_seen.elapsed() > expected * 2
                    {
                        warn!(session = %id, silent_ms = last_seen.elapsed().as_millis() as u64, "Heartbeat timeout");
                        break SessionEnd::Failed("heartbeat timeout".to_string());
                    }
                }
            }
        };

        open.store(false, Ordering::Release);
        routes.lock().clear();

        // Fail writes still queued
        command_rx.close();
        while let Ok(command) = command_rx.try_recv() {
            if let SessionCommand::Write { accepted_tx, .. } = command {
                let _ = accepted_tx.send(Err(Error::NotConnected));
            }
        }

        debug!(session = %id, end = %end, "Event loop terminated");
        notifier.fire(end);
    }

    /// Decodes a chunk and dispatches its frames.
    ///
    /// Returns `Some` if the chunk ends the session.
    fn handle_chunk(
        id: SessionId,
        text: &str,
        decoder: &mut FrameDecoder,
        routes: &Arc<Mutex<RouteMap>>,
    ) -> Option<SessionEnd> {
        let Decoded { items, error } = decoder.push(text);

        for item in items {
            let Incoming::Frame(frame) = item else {
                trace!(session = %id, "Heartbeat received");
                continue;
            };

            match frame.command {
                Command::Message => Self::dispatch(id, frame, routes),
                Command::Error => {
                    let message = frame.error_message();
                    error!(session = %id, message = %message, "Broker sent ERROR");
                    return Some(SessionEnd::Failed(Error::broker(message).to_string()));
                }
                Command::Receipt => {
                    trace!(session = %id, receipt = ?frame.get("receipt-id"), "Receipt");
                }
                other => {
                    debug!(session = %id, command = %other, "Ignoring unexpected frame");
                }
            }
        }

        // Framing is lost after a malformed frame
        error.map(|e| {
            warn!(session = %id, error = %e, "Malformed frame from broker");
            SessionEnd::Failed(e.to_string())
        })
    }

    /// Routes a MESSAGE frame to its subscription handler.
    fn dispatch(id: SessionId, frame: Frame, routes: &Arc<Mutex<RouteMap>>) {
        let Some(subscription) = frame.get("subscription").and_then(SubscriptionId::parse) else {
            warn!(session = %id, "MESSAGE without subscription header");
            return;
        };

        // Clone out so the handler may (un)subscribe without deadlocking
        let handler = routes
            .lock()
            .get(&subscription)
            .map(|route| Arc::clone(&route.handler));

        let Some(handler) = handler else {
            debug!(session = %id, %subscription, "MESSAGE for inactive subscription");
            return;
        };

        let message = Message::from_frame(frame);
        let destination = message.destination.clone();
        if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
            error!(session = %id, destination = %destination, "Message handler panicked");
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn ticker(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

// ============================================================================
// Tests
// ============================================================================
