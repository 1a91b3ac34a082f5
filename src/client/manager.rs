//! Connection manager.
//!
//! A [`Client`] owns one logical broker connection across any number of
//! [`Session`] attempts. It serializes `connect()` calls into a single
//! in-flight attempt, replays the subscription registry on every successful
//! connect, and schedules bounded reconnects after unexpected failures.
//!
//! # Lifecycle
//!
//! | From | Event | To | Listeners |
//! |------|-------|----|-----------|
//! | Idle / Disconnected | `connect()` | Connecting | |
//! | Connecting | handshake ok | Connected | `on_connect` after replay |
//! | Connecting | handshake failed | Disconnected | `on_error`, reconnect scheduled |
//! | Connected | session lost | Disconnected | `on_error`, `on_disconnect`, reconnect scheduled |
//! | Connecting / Connected | `disconnect()` | Disconnected | `on_disconnect` |
//! | Disconnected | budget exhausted | Disconnected | `on_error`, `on_disconnect` |
//!
//! Every attempt carries a generation number. Anything reported by an
//! attempt or session whose generation is no longer current is ignored.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::{SessionId, SubscriptionId};
use crate::protocol::{Destination, Message, Outbound};
use crate::transport::{
    Connector, EndCallback, MessageHandler, Session, SessionEnd, WebSocketConnector,
};

use super::backoff::ReconnectPlan;
use super::builder::ClientBuilder;
use super::listeners::CallbackRegistry;
use super::options::ClientOptions;
use super::state::{ConnectionState, DisconnectReason};

// ============================================================================
// Types
// ============================================================================

/// Outcome of one connect attempt, shared by every joined caller.
type ConnectFuture = Shared<BoxFuture<'static, std::result::Result<(), Arc<Error>>>>;

/// A registered topic.
struct Subscription {
    handler: MessageHandler,
    /// Handle on the current session, if any.
    live: Option<SubscriptionId>,
}

/// Mutable manager state, guarded by one lock.
struct Core {
    state: ConnectionState,
    /// Bumped on every attempt and on manual disconnect.
    generation: u64,
    session: Option<Session>,
    in_flight: Option<ConnectFuture>,
    attempt_task: Option<AbortHandle>,
    subscriptions: BTreeMap<String, Subscription>,
    plan: ReconnectPlan,
    manually_closed: bool,
    reconnect_timer: Option<JoinHandle<()>>,
    /// Identifies the armed timer; a timer holding an older token is stale.
    timer_token: u64,
}

struct Inner {
    options: ClientOptions,
    connector: Arc<dyn Connector>,
    core: Mutex<Core>,
    listeners: CallbackRegistry,
}

// ============================================================================
// Client
// ============================================================================

/// Resilient STOMP client.
///
/// Cheap to clone; clones share the same connection.
///
/// # Example
///
/// ```no_run
/// use stomp_relay::{Client, Payload, Result};
///
/// # async fn example() -> Result<()> {
/// let client = Client::builder()
///     .endpoint("http://localhost:8080/ws")
///     .build()?;
///
/// client
///     .on_connect(|| println!("connected"))
///     .on_error(|e| eprintln!("connection problem: {e}"));
///
/// client.subscribe("/topic/prices", |message| {
///     if let Payload::Json(value) = &message.payload {
///         println!("{value}");
///     }
/// })?;
///
/// client.connect().await?;
/// client.send("/app/trade/buy", &[], &serde_json::json!({"symbol": "BTC"})).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("Client")
            .field("endpoint", &self.inner.options.endpoint.as_str())
            .field("state", &core.state)
            .field("subscriptions", &core.subscriptions.len())
            .field("attempt", &core.plan.attempt())
            .finish()
    }
}

// ============================================================================
// Client - Construction
// ============================================================================

impl Client {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Creates a client using the WebSocket connector for `options.transport`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the options are invalid.
    pub fn new(options: ClientOptions) -> Result<Self> {
        let connector = Arc::new(WebSocketConnector::new(options.transport));
        Self::with_connector(options, connector)
    }

    /// Creates a client with a custom transport factory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the options are invalid.
    pub fn with_connector(options: ClientOptions, connector: Arc<dyn Connector>) -> Result<Self> {
        options.validate()?;

        let core = Core {
            state: ConnectionState::Idle,
            generation: 0,
            session: None,
            in_flight: None,
            attempt_task: None,
            subscriptions: BTreeMap::new(),
            plan: ReconnectPlan::new(options.reconnect),
            manually_closed: false,
            reconnect_timer: None,
            timer_token: 0,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                options,
                connector,
                core: Mutex::new(core),
                listeners: CallbackRegistry::default(),
            }),
        })
    }
}

// ============================================================================
// Client - Connection
// ============================================================================

impl Client {
    /// Connects to the broker.
    ///
    /// Resolves immediately if already connected. While an attempt is in
    /// flight, joins it instead of opening a second session. Otherwise
    /// starts a fresh attempt with the full reconnect budget.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectFailed`] wrapping the attempt's failure.
    /// Joined callers receive the same inner error. An attempt cancelled by
    /// [`disconnect`](Self::disconnect) fails with [`Error::Superseded`] inside.
    pub async fn connect(&self) -> Result<()> {
        let attempt = {
            let mut core = self.inner.core.lock();
            if core.state == ConnectionState::Connected {
                return Ok(());
            }

            if let Some(attempt) = core.in_flight.clone() {
                debug!("Joining in-flight connect attempt");
                attempt
            } else {
                core.manually_closed = false;
                core.plan.reset();
                if let Some(timer) = core.reconnect_timer.take() {
                    timer.abort();
                }
                Inner::begin_attempt(&self.inner, &mut core)
            }
        };

        attempt.await.map_err(Error::ConnectFailed)
    }

    /// Disconnects and suppresses automatic reconnection.
    ///
    /// Cancels any pending reconnect timer and any in-flight attempt, then
    /// closes the session gracefully. Registered subscriptions are kept and
    /// replayed on the next [`connect`](Self::connect).
    pub fn disconnect(&self) {
        let was_active = {
            let mut core = self.inner.core.lock();
            core.manually_closed = true;
            core.generation += 1;
            core.plan.reset();
            core.in_flight = None;

            if let Some(timer) = core.reconnect_timer.take() {
                timer.abort();
            }
            if let Some(task) = core.attempt_task.take() {
                task.abort();
            }
            if let Some(session) = core.session.take() {
                session.close();
            }
            for subscription in core.subscriptions.values_mut() {
                subscription.live = None;
            }

            let was_active = matches!(
                core.state,
                ConnectionState::Connected | ConnectionState::Connecting
            );
            if was_active {
                core.state = ConnectionState::Disconnected;
            }
            was_active
        };

        if was_active {
            info!(endpoint = %self.inner.options.endpoint, "Disconnected");
            self.inner
                .listeners
                .notify_disconnect(&DisconnectReason::Manual);
        }
    }
}

// ============================================================================
// Client - Subscriptions
// ============================================================================

impl Client {
    /// Registers a handler for a topic.
    ///
    /// Activated immediately when connected, otherwise on the next
    /// successful connect. Subscribing to a registered topic replaces its
    /// handler; at most one live subscription exists per topic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDestination`] for a malformed topic.
    pub fn subscribe<F>(&self, topic: impl AsRef<str>, handler: F) -> Result<()>
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        let destination = Destination::new(topic.as_ref())?;
        let handler: MessageHandler = Arc::new(handler);

        let mut guard = self.inner.core.lock();
        let core = &mut *guard;
        let previous = core.subscriptions.remove(destination.as_str());

        let live = match &core.session {
            Some(session) => {
                if let Some(id) = previous.and_then(|p| p.live) {
                    session.unsubscribe(id);
                }
                match session.subscribe(destination.as_str(), Arc::clone(&handler)) {
                    Ok(id) => Some(id),
                    Err(e) => {
                        warn!(destination = %destination, error = %e, "Live subscribe failed, will replay on reconnect");
                        None
                    }
                }
            }
            None => None,
        };

        debug!(destination = %destination, live = live.is_some(), "Subscription registered");
        core.subscriptions
            .insert(destination.into(), Subscription { handler, live });
        Ok(())
    }

    /// Removes a topic from the registry and cancels its live subscription.
    ///
    /// Returns `false` (and logs) if the topic was not registered.
    pub fn unsubscribe(&self, topic: &str) -> bool {
        let mut core = self.inner.core.lock();
        let Some(subscription) = core.subscriptions.remove(topic) else {
            warn!(destination = topic, "Unsubscribe for unknown topic");
            return false;
        };

        if let (Some(id), Some(session)) = (subscription.live, core.session.as_ref()) {
            session.unsubscribe(id);
        }

        debug!(destination = topic, "Subscription removed");
        true
    }
}

// ============================================================================
// Client - Sending
// ============================================================================

impl Client {
    /// Sends a JSON body to a destination.
    ///
    /// Resolves once the transport accepted the write. Nothing is queued
    /// while disconnected.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidDestination`] for a malformed destination
    /// - [`Error::NotConnected`] unless connected
    /// - [`Error::Json`] if the body cannot be serialized
    pub async fn send<T: Serialize + ?Sized>(
        &self,
        destination: &str,
        headers: &[(&str, &str)],
        body: &T,
    ) -> Result<()> {
        let mut outbound = Outbound::new(destination, body)?;
        outbound.headers = headers
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect();
        self.publish(outbound).await
    }

    /// Sends a prepared envelope.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn publish(&self, outbound: Outbound) -> Result<()> {
        let receipt = {
            let core = self.inner.core.lock();
            let Some(session) = core.session.as_ref() else {
                return Err(Error::NotConnected);
            };
            session.enqueue_json(outbound.destination.as_str(), &outbound.headers, &outbound.body)?
        };

        receipt.accepted().await
    }
}

// ============================================================================
// Client - CallbackRegistry
// ============================================================================

impl Client {
    /// Adds a listener run after every successful connect.
    ///
    /// All registered subscriptions are already live when it runs.
    pub fn on_connect<F>(&self, listener: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.listeners.add_connect(Arc::new(listener));
        self
    }

    /// Adds a listener run when the client stops being connected.
    pub fn on_disconnect<F>(&self, listener: F) -> &Self
    where
        F: Fn(&DisconnectReason) + Send + Sync + 'static,
    {
        self.inner.listeners.add_disconnect(Arc::new(listener));
        self
    }

    /// Adds a listener run on every reported connection error.
    pub fn on_error<F>(&self, listener: F) -> &Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.inner.listeners.add_error(Arc::new(listener));
        self
    }
}

// ============================================================================
// Client - Accessors
// ============================================================================

impl Client {
    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.core.lock().state
    }

    /// Returns `true` while a session is live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns the registered topics in replay order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.core.lock().subscriptions.keys().cloned().collect()
    }

    /// Returns the live subscription handle for a topic.
    #[must_use]
    pub fn live_subscription(&self, topic: &str) -> Option<SubscriptionId> {
        self.inner
            .core
            .lock()
            .subscriptions
            .get(topic)
            .and_then(|s| s.live)
    }

    /// Returns the automatic attempts used since the last reset.
    #[must_use]
    pub fn reconnect_attempt(&self) -> u32 {
        self.inner.core.lock().plan.attempt()
    }

    /// Returns `true` while a reconnect timer is armed.
    #[must_use]
    pub fn has_pending_reconnect(&self) -> bool {
        self.inner
            .core
            .lock()
            .reconnect_timer
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    /// Returns the ID of the current session.
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.core.lock().session.as_ref().map(Session::id)
    }

    /// Returns the options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }
}

// ============================================================================
// Inner - Attempt Lifecycle
// ============================================================================

impl Inner {
    /// Starts a new attempt. Caller holds the core lock.
    fn begin_attempt(this: &Arc<Self>, core: &mut Core) -> ConnectFuture {
        core.generation += 1;
        core.state = ConnectionState::Connecting;
        let generation = core.generation;

        debug!(generation, endpoint = %this.options.endpoint, "Starting connect attempt");

        let handle = tokio::spawn(Arc::clone(this).run_attempt(generation));
        core.attempt_task = Some(handle.abort_handle());

        let attempt = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => Err(Arc::new(Error::Superseded)),
                Err(e) => Err(Arc::new(Error::connection(format!(
                    "Connect task failed: {e}"
                )))),
            }
        }
        .boxed()
        .shared();

        core.in_flight = Some(attempt.clone());
        attempt
    }

    async fn run_attempt(self: Arc<Self>, generation: u64) -> std::result::Result<(), Arc<Error>> {
        let config = self.options.session_config();

        let weak: Weak<Self> = Arc::downgrade(&self);
        let on_end: EndCallback = Box::new(move |end| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_session_end(generation, end);
            }
        });

        match Session::open(self.connector.as_ref(), &config, on_end).await {
            Ok(session) => self.finish_connect(generation, session),
            Err(e) => self.fail_connect(generation, e),
        }
    }

    /// Installs a fresh session: replay, then `on_connect`.
    fn finish_connect(
        self: &Arc<Self>,
        generation: u64,
        session: Session,
    ) -> std::result::Result<(), Arc<Error>> {
        {
            let mut guard = self.core.lock();
            let core = &mut *guard;

            if core.generation != generation {
                debug!(generation, "Discarding session of superseded attempt");
                session.close();
                return Err(Arc::new(Error::Superseded));
            }

            if !session.is_open() {
                drop(guard);
                return self.fail_connect(
                    generation,
                    Error::transport_dropped("session ended during connect"),
                );
            }

            for (topic, subscription) in &mut core.subscriptions {
                subscription.live = match session.subscribe(topic, Arc::clone(&subscription.handler)) {
                    Ok(id) => Some(id),
                    Err(e) => {
                        warn!(destination = %topic, error = %e, "Replay failed");
                        None
                    }
                };
            }

            info!(
                session = %session.id(),
                endpoint = %self.options.endpoint,
                replayed = core.subscriptions.len(),
                "Connected"
            );

            core.plan.reset();
            core.state = ConnectionState::Connected;
            core.session = Some(session);
            core.in_flight = None;
            core.attempt_task = None;
        }

        self.listeners.notify_connect();
        Ok(())
    }

    fn fail_connect(self: &Arc<Self>, generation: u64, err: Error) -> std::result::Result<(), Arc<Error>> {
        {
            let mut core = self.core.lock();
            if core.generation != generation {
                return Err(Arc::new(Error::Superseded));
            }
            core.state = ConnectionState::Disconnected;
            core.in_flight = None;
            core.attempt_task = None;
        }

        warn!(generation, error = %err, "Connect attempt failed");
        let err = Arc::new(err);
        self.listeners.notify_error(&err);
        self.schedule_reconnect();
        Err(err)
    }

    /// Reacts to the current session going away.
    fn handle_session_end(self: &Arc<Self>, generation: u64, end: SessionEnd) {
        {
            let mut core = self.core.lock();
            if core.generation != generation || core.state != ConnectionState::Connected {
                debug!(generation, end = %end, "Ignoring end of stale session");
                return;
            }
            core.state = ConnectionState::Disconnected;
            core.session = None;
            for subscription in core.subscriptions.values_mut() {
                subscription.live = None;
            }
        }

        let err = Error::transport_dropped(end.to_string());
        warn!(error = %err, "Connection lost");
        self.listeners.notify_error(&err);
        self.listeners
            .notify_disconnect(&DisconnectReason::Dropped);
        self.schedule_reconnect();
    }
}

// ============================================================================
// Inner - Reconnection
// ============================================================================

impl Inner {
    /// Arms the reconnect timer, or reports exhaustion.
    fn schedule_reconnect(self: &Arc<Self>) {
        let exhausted = {
            let mut core = self.core.lock();
            if core.manually_closed || core.state != ConnectionState::Disconnected {
                return;
            }

            match core.plan.next_delay() {
                Some(delay) => {
                    let generation = core.generation;
                    if let Some(timer) = core.reconnect_timer.take() {
                        timer.abort();
                    }

                    info!(
                        attempt = core.plan.attempt(),
                        max_attempts = core.plan.policy().max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Scheduling reconnect"
                    );

                    core.timer_token += 1;
                    let token = core.timer_token;
                    let weak = Arc::downgrade(self);
                    core.reconnect_timer = Some(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if let Some(inner) = weak.upgrade() {
                            inner.fire_reconnect(generation, token);
                        }
                    }));
                    None
                }
                None => Some(core.plan.attempt()),
            }
        };

        if let Some(attempts) = exhausted {
            error!(attempts, endpoint = %self.options.endpoint, "Reconnect budget exhausted");
            self.listeners
                .notify_error(&Error::ReconnectExhausted { attempts });
            self.listeners
                .notify_disconnect(&DisconnectReason::ReconnectExhausted { attempts });
        }
    }

    fn fire_reconnect(self: &Arc<Self>, generation: u64, token: u64) {
        let mut core = self.core.lock();
        if core.timer_token != token {
            debug!(token, current = core.timer_token, "Ignoring replaced reconnect timer");
            return;
        }
        core.reconnect_timer = None;

        if core.manually_closed
            || core.generation != generation
            || core.state != ConnectionState::Disconnected
            || core.in_flight.is_some()
        {
            debug!(generation, "Reconnect timer no longer relevant");
            return;
        }

        info!(attempt = core.plan.attempt(), "Reconnecting");
        let _attempt = Self::begin_attempt(self, &mut core);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        if let Some(timer) = core.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(session) = core.session.take() {
            session.close();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
