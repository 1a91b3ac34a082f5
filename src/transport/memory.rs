//! In-process broker for tests.
//!
//! Implements [`Connector`] over channels and plays the broker side of the
//! handshake, recording every frame the client writes.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{sink, stream};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{Command, Frame, FrameDecoder, Incoming};

use super::connector::{Connector, Duplex, TextSink, TextStream};

// ============================================================================
// MemoryBroker
// ============================================================================

/// Scripted broker shared between a test and its connector.
#[derive(Clone, Default)]
pub(crate) struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    refuse: u32,
    reject: Option<String>,
    stall: bool,
    heartbeat: Option<String>,
    connects: usize,
    heartbeats: usize,
    frames: Vec<Frame>,
    current: Option<Link>,
}

/// The broker side of one client connection.
struct Link {
    generation: usize,
    to_client: Option<mpsc::UnboundedSender<Result<String>>>,
    subscriptions: Vec<(String, String)>,
    next_message: u64,
}

impl MemoryBroker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(MemoryConnector {
            broker: self.clone(),
        })
    }

    /// Refuses the next `n` connection attempts.
    pub(crate) fn fail_next(&self, n: u32) {
        self.state.lock().refuse = n;
    }

    /// Answers the next CONNECT with an ERROR frame.
    pub(crate) fn reject_next_handshake(&self, message: &str) {
        self.state.lock().reject = Some(message.to_string());
    }

    /// Leaves the next CONNECT unanswered.
    pub(crate) fn stall_next_handshake(&self) {
        self.state.lock().stall = true;
    }

    /// Sets the `heart-beat` header sent in CONNECTED.
    pub(crate) fn advertise_heartbeat(&self, header: &str) {
        self.state.lock().heartbeat = Some(header.to_string());
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    pub(crate) fn heartbeats_received(&self) -> usize {
        self.state.lock().heartbeats
    }

    /// Every frame of a command received across all connections.
    pub(crate) fn frames_of(&self, command: Command) -> Vec<Frame> {
        self.state
            .lock()
            .frames
            .iter()
            .filter(|f| f.command == command)
            .cloned()
            .collect()
    }

    /// Destinations subscribed on the current connection, in arrival order.
    pub(crate) fn active_subscriptions(&self) -> Vec<String> {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|link| link.subscriptions.iter().map(|(_, d)| d.clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) async fn wait_for_subscription(&self, destination: &str) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !self.active_subscriptions().iter().any(|d| d == destination) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("subscription not seen by broker");
    }

    /// Delivers a MESSAGE to every matching subscription on the current link.
    pub(crate) fn publish(&self, destination: &str, content_type: Option<&str>, body: &str) {
        let mut state = self.state.lock();
        let Some(link) = state.current.as_mut() else {
            return;
        };

        let targets: Vec<String> = link
            .subscriptions
            .iter()
            .filter(|(_, d)| d == destination)
            .map(|(id, _)| id.clone())
            .collect();

        for id in targets {
            link.next_message += 1;
            let mut frame = Frame::new(Command::Message)
                .header("subscription", id)
                .header("message-id", link.next_message.to_string())
                .header("destination", destination);
            if let Some(ct) = content_type {
                frame = frame.header("content-type", ct);
            }
            link.push(frame.body(body).encode());
        }
    }

    /// Writes raw text to the client on the current link.
    pub(crate) fn push_raw(&self, text: &str) {
        if let Some(link) = self.state.lock().current.as_mut() {
            link.push(text.to_string());
        }
    }

    /// Sends an ERROR frame on the current link.
    pub(crate) fn send_error(&self, message: &str) {
        if let Some(link) = self.state.lock().current.as_mut() {
            link.push(Frame::new(Command::Error).header("message", message).encode());
        }
    }

    /// Ends the current link's stream cleanly.
    pub(crate) fn close_connection(&self) {
        if let Some(link) = self.state.lock().current.as_mut() {
            link.to_client = None;
        }
    }

    /// Fails the current link's stream.
    pub(crate) fn drop_connection(&self) {
        if let Some(link) = self.state.lock().current.as_mut() {
            if let Some(tx) = link.to_client.take() {
                let _ = tx.send(Err(Error::connection("connection reset")));
            }
        }
    }

    /// Handles text the client wrote on link `generation`.
    fn receive(&self, generation: usize, decoder: &mut FrameDecoder, text: &str) {
        let mut state = self.state.lock();
        for item in decoder.push(text).items {
            let frame = match item {
                Incoming::Heartbeat => {
                    state.heartbeats += 1;
                    continue;
                }
                Incoming::Frame(frame) => frame,
            };
            state.frames.push(frame.clone());

            let (reject, stall) = if frame.command == Command::Connect {
                (state.reject.take(), std::mem::take(&mut state.stall))
            } else {
                (None, false)
            };
            let heartbeat = state.heartbeat.clone().unwrap_or_else(|| "0,0".into());

            let Some(link) = state.current.as_mut().filter(|l| l.generation == generation) else {
                continue;
            };

            match frame.command {
                Command::Connect if stall => {}
                Command::Connect => match reject {
                    Some(message) => {
                        link.push(Frame::new(Command::Error).header("message", message).encode());
                        link.to_client = None;
                    }
                    None => link.push(
                        Frame::new(Command::Connected)
                            .header("version", "1.2")
                            .header("heart-beat", heartbeat)
                            .header("server", "memory-broker")
                            .encode(),
                    ),
                },
                Command::Subscribe => {
                    let id = frame.get("id").unwrap_or_default().to_string();
                    let destination = frame.get("destination").unwrap_or_default().to_string();
                    link.subscriptions.push((id, destination));
                }
                Command::Unsubscribe => {
                    let id = frame.get("id").unwrap_or_default();
                    link.subscriptions.retain(|(sub, _)| sub != id);
                }
                Command::Disconnect => {
                    link.to_client = None;
                }
                _ => {}
            }
        }
    }
}

impl Link {
    fn push(&self, text: String) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(Ok(text));
        }
    }
}

// ============================================================================
// MemoryConnector
// ============================================================================

struct MemoryConnector {
    broker: MemoryBroker,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _endpoint: &Url) -> Result<Duplex> {
        let (tx, rx) = mpsc::unbounded_channel();

        let generation = {
            let mut state = self.broker.state.lock();
            state.connects += 1;
            if state.refuse > 0 {
                state.refuse -= 1;
                return Err(Error::connection("connection refused"));
            }
            state.current = Some(Link {
                generation: state.connects,
                to_client: Some(tx),
                subscriptions: Vec::new(),
                next_message: 0,
            });
            state.connects
        };

        let broker = self.broker.clone();
        let sink: TextSink = Box::pin(sink::unfold(
            (broker, FrameDecoder::new()),
            move |(broker, mut decoder), text: String| async move {
                broker.receive(generation, &mut decoder, &text);
                Ok::<_, Error>((broker, decoder))
            },
        ));

        let stream: TextStream = Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }));

        Ok(Duplex::new(sink, stream))
    }
}
