//! Topic addressing.
//!
//! Two address families are in use:
//!
//! | Family | Example |
//! |--------|---------|
//! | Broadcast topic | `/topic/prices` |
//! | Per-user queue | `/user/queue/notifications/{userId}` |
//!
//! Application-bound sends use the `/app` prefix.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Broadcast topic prefix.
pub const TOPIC_PREFIX: &str = "/topic/";

/// Per-user destination prefix.
pub const USER_PREFIX: &str = "/user/";

/// Application handler prefix for outbound sends.
pub const APP_PREFIX: &str = "/app/";

// ============================================================================
// Destination
// ============================================================================

/// Validated destination string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Destination(String);

impl Destination {
    /// Validates a raw destination.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDestination`] if empty, not starting with `/`,
    /// or containing a line break or NUL.
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let valid = raw.len() > 1
            && raw.starts_with('/')
            && !raw.contains(['\n', '\r', '\0']);
        if !valid {
            return Err(Error::invalid_destination(raw));
        }
        Ok(Self(raw))
    }

    /// Broadcast topic, e.g. `topic("prices")` gives `/topic/prices`.
    #[must_use]
    pub fn topic(name: &str) -> Self {
        Self(format!("{TOPIC_PREFIX}{}", name.trim_start_matches('/')))
    }

    /// Per-user queue, e.g. `/user/queue/notifications/42`.
    #[must_use]
    pub fn user_queue(queue: &str, user_id: impl fmt::Display) -> Self {
        Self(format!(
            "{USER_PREFIX}queue/{}/{user_id}",
            queue.trim_matches('/')
        ))
    }

    /// Application-bound destination, e.g. `/app/trade`.
    #[must_use]
    pub fn app(name: &str) -> Self {
        Self(format!("{APP_PREFIX}{}", name.trim_start_matches('/')))
    }

    /// Returns `true` for `/topic/...`.
    #[inline]
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.0.starts_with(TOPIC_PREFIX)
    }

    /// Returns `true` for `/user/...`.
    #[inline]
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.0.starts_with(USER_PREFIX)
    }

    /// Returns the destination string.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Destination {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<Destination> for String {
    fn from(destination: Destination) -> Self {
        destination.0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_families() {
        let prices = Destination::topic("prices");
        assert_eq!(prices.as_str(), "/topic/prices");
        assert!(prices.is_broadcast());
        assert!(!prices.is_user());

        let notes = Destination::user_queue("notifications", 42);
        assert_eq!(notes.as_str(), "/user/queue/notifications/42");
        assert!(notes.is_user());

        assert_eq!(Destination::app("/trade").as_str(), "/app/trade");
    }

    #[test]
    fn test_validation() {
        assert!(Destination::new("/topic/broadcast").is_ok());
        assert!(Destination::new("").is_err());
        assert!(Destination::new("/").is_err());
        assert!(Destination::new("topic/prices").is_err());
        assert!(Destination::new("/topic/a\nb").is_err());
    }
}
