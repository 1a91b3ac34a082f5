//! Client configuration.
//!
//! Provides a type-safe interface for the endpoint, subprotocol and
//! reconnection settings of a [`Client`](crate::Client).
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use stomp_relay::{ClientOptions, ReconnectPolicy};
//!
//! let options = ClientOptions::new(url::Url::parse("ws://localhost:8080/ws")?)
//!     .with_connect_timeout(Duration::from_secs(10))
//!     .with_reconnect(ReconnectPolicy::default().with_max_attempts(10));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::protocol::Heartbeat;
use crate::transport::{SessionConfig, TransportKind};

// ============================================================================
// Constants
// ============================================================================

/// Default broker endpoint.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080/ws";

/// Default limit for socket open plus handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Bounded exponential backoff with jitter.
///
/// Attempt `n` waits `min(base_delay * 2^(n-1), max_delay)` plus a uniform
/// jitter in `[0, jitter]`, the sum clamped to `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Automatic attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the first attempt.
    pub base_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Upper bound for the random addition.
    pub jitter: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(5_000),
            max_delay: Duration::from_millis(30_000),
            jitter: Duration::from_millis(1_000),
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never reconnects automatically.
    #[inline]
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Sets the attempt budget.
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the first delay.
    #[inline]
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Sets the delay cap.
    #[inline]
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Sets the jitter bound.
    #[inline]
    #[must_use]
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay for a 1-based attempt, before jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Checks the policy is coherent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `max_delay < base_delay`.
    pub fn validate(&self) -> Result<()> {
        if self.max_delay < self.base_delay {
            return Err(Error::config(format!(
                "max_delay ({}ms) is below base_delay ({}ms)",
                self.max_delay.as_millis(),
                self.base_delay.as_millis()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// ClientOptions
// ============================================================================

/// Client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    /// Fixed broker endpoint (`ws`/`wss`).
    pub endpoint: Url,
    /// CONNECT `host` header; defaults to the endpoint authority.
    pub host: Option<String>,
    /// Wire transport under STOMP.
    pub transport: TransportKind,
    /// Heartbeat offer.
    pub heartbeat: Heartbeat,
    /// Limit for socket open plus CONNECTED frame.
    pub connect_timeout: Duration,
    /// Extra CONNECT headers.
    pub connect_headers: Vec<(String, String)>,
    /// Automatic reconnection.
    pub reconnect: ReconnectPolicy,
}

impl ClientOptions {
    /// Creates options for an endpoint with default settings.
    #[must_use]
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            host: None,
            transport: TransportKind::default(),
            heartbeat: Heartbeat::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            connect_headers: Vec::new(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Sets the CONNECT `host` header.
    #[inline]
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the wire transport.
    #[inline]
    #[must_use]
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Sets the heartbeat offer.
    #[inline]
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Adds a CONNECT header.
    #[inline]
    #[must_use]
    pub fn with_connect_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.connect_headers.push((name.into(), value.into()));
        self
    }

    /// Sets the reconnection policy.
    #[inline]
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Returns the effective `host` header.
    #[must_use]
    pub fn host_header(&self) -> String {
        if let Some(host) = &self.host {
            return host.clone();
        }
        match (self.endpoint.host_str(), self.endpoint.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        }
    }

    /// Checks the options are usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a non-WebSocket scheme, an endpoint
    /// without a path, a zero connect timeout, or an incoherent policy.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.endpoint.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "Endpoint must use ws or wss: {}",
                self.endpoint
            )));
        }
        if self.endpoint.path().trim_matches('/').is_empty() {
            return Err(Error::config(format!(
                "Endpoint has no path: {}",
                self.endpoint
            )));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::config("connect_timeout must be greater than zero"));
        }
        self.reconnect.validate()
    }

    /// Builds the per-attempt session parameters.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.endpoint.clone(),
            host: self.host_header(),
            heartbeat: self.heartbeat,
            connect_timeout: self.connect_timeout,
            connect_headers: self.connect_headers.clone(),
        }
    }
}

/// Parses an endpoint, mapping `http(s)` to `ws(s)`.
///
/// # Errors
///
/// Returns [`Error::Url`] if unparseable, or [`Error::Config`] for an
/// unsupported scheme or a missing host.
pub fn parse_endpoint(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)?;

    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(Error::config(format!(
                "Unsupported endpoint scheme '{other}', expected ws, wss, http or https"
            )));
        }
    };
    if url.scheme() != scheme {
        url.set_scheme(scheme)
            .map_err(|()| Error::config(format!("Cannot use scheme {scheme} for {raw}")))?;
    }

    if url.host_str().is_none() {
        return Err(Error::config(format!("Endpoint has no host: {raw}")));
    }

    Ok(url)
}

// ============================================================================
// Tests
// ============================================================================
