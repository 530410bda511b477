//! Message bus seam.
//!
//! The bus publishes JSON payloads to a topic exchange and implements
//! "look at this again in N milliseconds" with a delay queue whose expired
//! messages are dead-lettered back onto the exchange under
//! [`routing_keys::RESERVATION_EXPIRE`](crate::event::routing_keys::RESERVATION_EXPIRE).
//!
//! ```text
//! schedule_expiration ──► [delay queue] ──TTL──► exchange ──reservation.expire──► [process queue]
//!                                                                                  │
//!                                                                      consume ◄───┘
//! ```
//!
//! Implementations:
//!
//! - `AmqpGateway` (`boxoffice-amqp`) for production
//! - `InMemoryMessageBus` (`boxoffice-testing`) for tests

use crate::error::BusError;
use crate::event::CORRELATION_HEADER;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// String message headers.
pub type Headers = BTreeMap<String, String>;

/// Headers carrying `correlation_id`, if present.
#[must_use]
pub fn correlation_headers(correlation_id: Option<&str>) -> Headers {
    let mut headers = Headers::new();
    if let Some(id) = correlation_id.filter(|id| !id.is_empty()) {
        headers.insert(CORRELATION_HEADER.to_string(), id.to_string());
    }
    headers
}

/// A message handed to a [`MessageHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Routing key the message arrived under
    pub routing_key: String,
    /// Raw body
    pub payload: Vec<u8>,
    /// Message headers
    pub headers: Headers,
}

/// Error type returned by handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Processes one consumed message.
///
/// `Ok` acknowledges the message. `Err` negatively acknowledges it without
/// requeue: the broker drops it and recovery is left to reconciliation logic.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle a delivery to completion.
    ///
    /// # Errors
    ///
    /// Any error causes a nack without requeue.
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError>;
}

/// Publish and consume primitives.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Publish `payload` on the events exchange under `routing_key`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if the broker is unreachable or does not confirm.
    async fn publish(
        &self,
        routing_key: &str,
        payload: &serde_json::Value,
        headers: &Headers,
    ) -> Result<(), BusError>;

    /// Send `payload` to the delay queue with a per-message TTL of `delay`.
    /// The broker redelivers it to the process queue once the TTL elapses.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if the broker is unreachable or does not confirm.
    async fn schedule_expiration(
        &self,
        payload: &serde_json::Value,
        delay: Duration,
        headers: &Headers,
    ) -> Result<(), BusError>;

    /// Consume `queue`, running `handler` on each message, until the
    /// underlying stream ends.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if the consumer cannot be started.
    async fn consume(&self, queue: &str, handler: Arc<dyn MessageHandler>) -> Result<(), BusError>;
}
