//! Typed feed helpers.
//!
//! The broker publishes on a small set of well-known destinations:
//!
//! | Destination | Payload |
//! |-------------|---------|
//! | `/topic/prices` | [`PriceUpdate`] |
//! | `/topic/updates` | notice, object with `message` or plain text |
//! | `/topic/broadcast` | notice, object with `message` or plain text |
//! | `/user/queue/notifications/{userId}` | private notice |

// ============================================================================
// Imports
// ============================================================================

use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::client::Client;
use crate::error::Result;
use crate::protocol::{Destination, Message, Payload};

// ============================================================================
// Constants
// ============================================================================

/// Live price updates.
pub const PRICES_TOPIC: &str = "/topic/prices";

/// General system updates.
pub const UPDATES_TOPIC: &str = "/topic/updates";

/// Broadcast announcements.
pub const BROADCAST_TOPIC: &str = "/topic/broadcast";

/// Returns the private notification queue of a user.
#[must_use]
pub fn notifications_queue(user_id: impl std::fmt::Display) -> Destination {
    Destination::user_queue("notifications", user_id)
}

// ============================================================================
// PriceUpdate
// ============================================================================

/// One price tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    /// Instrument symbol, e.g. `BTC`.
    pub symbol: String,
    /// New price. Accepts a JSON number or a numeric string; null means zero.
    #[serde(default, deserialize_with = "lenient_price")]
    pub new_price: f64,
    /// Change over the last 24 hours, in percent.
    #[serde(default, rename = "percentChange24h", skip_serializing_if = "Option::is_none")]
    pub percent_change_24h: Option<f64>,
    /// Publish time, milliseconds since the epoch.
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
}

fn lenient_price<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    match Option::<NumberOrText>::deserialize(deserializer)? {
        None => Ok(0.0),
        Some(NumberOrText::Number(n)) => Ok(n),
        Some(NumberOrText::Text(text)) => text
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid price {text:?}"))),
    }
}

// ============================================================================
// Notices
// ============================================================================

/// Extracts the human-readable text of a notice.
///
/// Objects contribute their `message` field, strings are used as-is, and
/// raw text is passed through.
#[must_use]
pub fn notice_text(payload: &Payload) -> Option<String> {
    match payload {
        Payload::Text(text) => Some(text.clone()),
        Payload::Json(serde_json::Value::String(text)) => Some(text.clone()),
        Payload::Json(serde_json::Value::Object(map)) => map
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string),
        Payload::Json(other) => Some(other.to_string()),
    }
}

// ============================================================================
// Typed Subscriptions
// ============================================================================

impl Client {
    /// Subscribes with a handler that receives decoded values.
    ///
    /// Payloads that do not decode as `T` are logged and dropped.
    ///
    /// # Errors
    ///
    /// Same as [`Client::subscribe`].
    pub fn subscribe_json<T, F>(&self, topic: impl AsRef<str>, handler: F) -> Result<()>
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe(topic, move |message: Message| {
            match message.payload.decode::<T>() {
                Ok(value) => handler(value),
                Err(e) => {
                    warn!(destination = %message.destination, error = %e, "Dropping undecodable payload");
                }
            }
        })
    }

    /// Subscribes to [`PRICES_TOPIC`] with typed updates.
    ///
    /// # Errors
    ///
    /// Same as [`Client::subscribe`].
    pub fn subscribe_prices<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(PriceUpdate) + Send + Sync + 'static,
    {
        self.subscribe_json(PRICES_TOPIC, handler)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::json;

    use crate::client::ReconnectPolicy;
    use crate::protocol::Heartbeat;
    use crate::transport::memory::MemoryBroker;

    #[test]
    fn test_price_from_number_and_string() {
        let update: PriceUpdate =
            serde_json::from_value(json!({"symbol": "BTC", "newPrice": 64000.5, "timestamp": 1})).unwrap();
        assert_eq!(update.new_price, 64000.5);
        assert_eq!(update.timestamp, 1);

        let update: PriceUpdate =
            serde_json::from_value(json!({"symbol": "ETH", "newPrice": " 3100.25 "})).unwrap();
        assert_eq!(update.new_price, 3100.25);
        assert_eq!(update.timestamp, 0);
        assert_eq!(update.percent_change_24h, None);
    }

    #[test]
    fn test_price_null_is_zero() {
        let update: PriceUpdate =
            serde_json::from_value(json!({"symbol": "XRP", "newPrice": null, "percentChange24h": -1.5}))
                .unwrap();
        assert_eq!(update.new_price, 0.0);
        assert_eq!(update.percent_change_24h, Some(-1.5));
    }

    #[test]
    fn test_price_rejects_garbage() {
        let result = serde_json::from_value::<PriceUpdate>(json!({"symbol": "BTC", "newPrice": "lots"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_notice_text() {
        assert_eq!(
            notice_text(&Payload::Json(json!({"message": "Maintenance at 5"}))),
            Some("Maintenance at 5".into())
        );
        assert_eq!(notice_text(&Payload::Text("hi".into())), Some("hi".into()));
        assert_eq!(notice_text(&Payload::Json(json!("plain"))), Some("plain".into()));
        assert_eq!(notice_text(&Payload::Json(json!({"other": 1}))), None);
    }

    #[test]
    fn test_notifications_queue() {
        assert_eq!(
            notifications_queue(12).as_str(),
            "/user/queue/notifications/12"
        );
    }

    #[tokio::test]
    async fn test_typed_subscription_drops_bad_payloads() {
        let broker = MemoryBroker::new();
        let client = Client::builder()
            .endpoint("ws://broker.test/ws")
            .heartbeat(Heartbeat::disabled())
            .reconnect(ReconnectPolicy::disabled())
            .connector(broker.connector())
            .build()
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        client
            .subscribe_prices(move |update| sink.lock().push(update))
            .unwrap();
        client.connect().await.unwrap();
        broker.wait_for_subscription(PRICES_TOPIC).await;

        broker.publish(PRICES_TOPIC, Some("application/json"), "not a price");
        broker.publish(
            PRICES_TOPIC,
            Some("application/json"),
            r#"{"symbol":"BTC","newPrice":"65000","timestamp":7}"#,
        );

        tokio::time::timeout(Duration::from_secs(2), async {
            while seen.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].symbol, "BTC");
        assert_eq!(seen[0].new_price, 65000.0);
        assert!(client.is_connected());
    }
}
