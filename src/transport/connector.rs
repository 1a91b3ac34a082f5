//! Transport factory abstraction.
//!
//! A [`Connector`] opens one duplex, message-framed text channel to an
//! endpoint. Everything above it (STOMP framing, heartbeats, reconnection)
//! is transport agnostic, so tests and alternative transports plug in here.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, Stream};
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

/// Outgoing half: one item per transport message.
pub type TextSink = Pin<Box<dyn Sink<String, Error = Error> + Send>>;

/// Incoming half: one item per transport message.
///
/// The stream ending means the peer closed the channel; an `Err` item
/// means the channel failed.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

// ============================================================================
// Duplex
// ============================================================================

/// An open text channel.
pub struct Duplex {
    /// Outgoing half.
    pub sink: TextSink,
    /// Incoming half.
    pub stream: TextStream,
}

impl Duplex {
    /// Bundles a sink and a stream.
    #[inline]
    #[must_use]
    pub fn new(sink: TextSink, stream: TextStream) -> Self {
        Self { sink, stream }
    }
}

impl fmt::Debug for Duplex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Duplex").finish_non_exhaustive()
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Opens physical connections.
///
/// Called once per connect attempt with the same fixed endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens a channel to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] (or a wrapped transport error) if the
    /// channel cannot be established.
    async fn connect(&self, endpoint: &Url) -> Result<Duplex>;
}
