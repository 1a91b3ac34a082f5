//! Builder pattern for client configuration.
//!
//! Provides a fluent API for configuring and creating [`Client`] instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use stomp_relay::{Client, ReconnectPolicy, TransportKind};
//!
//! # fn example() -> stomp_relay::Result<()> {
//! let client = Client::builder()
//!     .endpoint("https://trading.example.com/ws")
//!     .transport(TransportKind::SockJs)
//!     .credentials("alice", "secret")
//!     .reconnect(ReconnectPolicy::default().with_max_attempts(10))
//!     .connect_timeout(Duration::from_secs(10))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::protocol::Heartbeat;
use crate::transport::{Connector, TransportKind, WebSocketConnector};

use super::manager::Client;
use super::options::{
    ClientOptions, DEFAULT_CONNECT_TIMEOUT, DEFAULT_ENDPOINT, ReconnectPolicy, parse_endpoint,
};

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring a [`Client`].
///
/// Use [`Client::builder()`] to create a new builder.
#[derive(Clone)]
pub struct ClientBuilder {
    endpoint: Option<String>,
    transport: TransportKind,
    heartbeat: Heartbeat,
    connect_timeout: Duration,
    connect_headers: Vec<(String, String)>,
    host: Option<String>,
    reconnect: ReconnectPolicy,
    connector: Option<Arc<dyn Connector>>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            endpoint: None,
            transport: TransportKind::default(),
            heartbeat: Heartbeat::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            connect_headers: Vec::new(),
            host: None,
            reconnect: ReconnectPolicy::default(),
            connector: None,
        }
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("endpoint", &self.endpoint)
            .field("transport", &self.transport)
            .field("heartbeat", &self.heartbeat)
            .field("connect_timeout", &self.connect_timeout)
            .field("reconnect", &self.reconnect)
            .field("custom_connector", &self.connector.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ClientBuilder Implementation
// ============================================================================

impl ClientBuilder {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the broker endpoint.
    ///
    /// `http` and `https` are mapped to `ws` and `wss`.
    /// Defaults to `ws://localhost:8080/ws`.
    #[inline]
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the wire transport.
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Sets the heartbeat offer.
    #[inline]
    #[must_use]
    pub fn heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Sets the limit for socket open plus handshake.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Adds a CONNECT header.
    #[inline]
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.connect_headers.push((name.into(), value.into()));
        self
    }

    /// Adds `login` and `passcode` CONNECT headers.
    #[inline]
    #[must_use]
    pub fn credentials(self, login: impl Into<String>, passcode: impl Into<String>) -> Self {
        self.header("login", login).header("passcode", passcode)
    }

    /// Overrides the CONNECT `host` header.
    #[inline]
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the reconnection policy.
    #[inline]
    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Replaces the transport factory.
    ///
    /// By default a [`WebSocketConnector`] for the configured transport is used.
    #[inline]
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Validates the configuration and creates the client.
    ///
    /// No connection is opened until [`Client::connect`] is called.
    ///
    /// # Errors
    ///
    /// - [`Error::Url`](crate::Error::Url) if the endpoint cannot be parsed
    /// - [`Error::Config`](crate::Error::Config) if any setting is invalid
    pub fn build(self) -> Result<Client> {
        let endpoint = parse_endpoint(self.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT))?;

        let mut options = ClientOptions::new(endpoint)
            .with_transport(self.transport)
            .with_heartbeat(self.heartbeat)
            .with_connect_timeout(self.connect_timeout)
            .with_reconnect(self.reconnect);
        options.connect_headers = self.connect_headers;
        options.host = self.host;

        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WebSocketConnector::new(options.transport)));

        Client::with_connector(options, connector)
    }
}

// ============================================================================
// Tests
// ============================================================================
