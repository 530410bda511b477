//! Domain events and their wire contract.
//!
//! The outbox stores events generically as `(event_type, JSON payload)`. The
//! event type doubles as the routing key on the topic exchange. Each producer
//! and consumer pair works with the strongly-typed variant of [`DomainEvent`]
//! and decodes with [`DomainEvent::decode`].
//!
//! Payloads are camelCase JSON so that non-Rust subscribers can read them.

use crate::types::{ReservationId, SaleId, SessionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Routing keys on the events exchange.
pub mod routing_keys {
    /// A reservation was created (also triggers expiration scheduling)
    pub const RESERVATION_CREATED: &str = "reservation.created";
    /// Delayed signal redelivered from the delay queue
    pub const RESERVATION_EXPIRE: &str = "reservation.expire";
    /// A reservation expired and released its seats
    pub const RESERVATION_EXPIRED: &str = "reservation.expired";
    /// A reservation was paid and a sale created
    pub const PAYMENT_CONFIRMED: &str = "payment.confirmed";
}

/// Message header carrying the correlation id across the async boundary.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Payload of [`routing_keys::RESERVATION_CREATED`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationCreated {
    /// The new reservation
    pub reservation_id: ReservationId,
    /// Session
    pub session_id: SessionId,
    /// Buyer
    pub user_id: UserId,
    /// Held seats
    pub seat_labels: Vec<String>,
    /// Hold deadline
    pub expires_at: DateTime<Utc>,
    /// Request correlation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Payload of [`routing_keys::RESERVATION_EXPIRED`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationExpired {
    /// The expired reservation
    pub reservation_id: ReservationId,
    /// Session
    pub session_id: SessionId,
    /// Seats returned to availability
    pub seat_labels: Vec<String>,
    /// Correlation id of the flow that observed the expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Payload of [`routing_keys::PAYMENT_CONFIRMED`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmed {
    /// The confirmed reservation
    pub reservation_id: ReservationId,
    /// The sale created for it
    pub sale_id: SaleId,
    /// Session
    pub session_id: SessionId,
    /// Buyer
    pub user_id: UserId,
    /// Amount charged
    pub total_cents: i64,
    /// Request correlation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Every event the engine emits, keyed by routing key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DomainEvent {
    /// See [`ReservationCreated`]
    ReservationCreated(ReservationCreated),
    /// See [`ReservationExpired`]
    ReservationExpired(ReservationExpired),
    /// See [`PaymentConfirmed`]
    PaymentConfirmed(PaymentConfirmed),
}

/// An event type the decoder does not know, or a payload that does not match it.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// No variant is registered under this event type
    #[error("unknown event type: {0}")]
    UnknownType(String),
    /// The payload does not match the variant's contract
    #[error("malformed {event_type} payload: {source}")]
    Malformed {
        /// Event type being decoded
        event_type: String,
        /// Underlying JSON error
        source: serde_json::Error,
    },
}

impl DomainEvent {
    /// Routing key, also stored as the outbox event type.
    #[must_use]
    pub const fn routing_key(&self) -> &'static str {
        match self {
            Self::ReservationCreated(_) => routing_keys::RESERVATION_CREATED,
            Self::ReservationExpired(_) => routing_keys::RESERVATION_EXPIRED,
            Self::PaymentConfirmed(_) => routing_keys::PAYMENT_CONFIRMED,
        }
    }

    /// Correlation id carried by the payload, if any.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::ReservationCreated(e) => e.correlation_id.as_deref(),
            Self::ReservationExpired(e) => e.correlation_id.as_deref(),
            Self::PaymentConfirmed(e) => e.correlation_id.as_deref(),
        }
    }

    /// Serialize the payload (without any type tag).
    ///
    /// # Errors
    ///
    /// Returns the serializer error; the payload types only hold JSON-safe
    /// values so this does not fail in practice.
    pub fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::ReservationCreated(e) => serde_json::to_value(e),
            Self::ReservationExpired(e) => serde_json::to_value(e),
            Self::PaymentConfirmed(e) => serde_json::to_value(e),
        }
    }

    /// Decode a stored `(event_type, payload)` pair.
    ///
    /// # Errors
    ///
    /// [`DecodeError::UnknownType`] for unregistered types and
    /// [`DecodeError::Malformed`] when the payload does not match.
    pub fn decode(event_type: &str, payload: &serde_json::Value) -> Result<Self, DecodeError> {
        let malformed = |source| DecodeError::Malformed {
            event_type: event_type.to_string(),
            source,
        };
        match event_type {
            routing_keys::RESERVATION_CREATED => serde_json::from_value(payload.clone())
                .map(Self::ReservationCreated)
                .map_err(malformed),
            routing_keys::RESERVATION_EXPIRED => serde_json::from_value(payload.clone())
                .map(Self::ReservationExpired)
                .map_err(malformed),
            routing_keys::PAYMENT_CONFIRMED => serde_json::from_value(payload.clone())
                .map(Self::PaymentConfirmed)
                .map_err(malformed),
            other => Err(DecodeError::UnknownType(other.to_string())),
        }
    }
}

/// What the expiration consumer reads from a redelivered delay-queue message.
///
/// Every field is optional so that a message missing the identifier can be
/// recognised and dropped instead of failing to parse.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpirationSignal {
    /// Reservation to reconcile
    #[serde(default)]
    pub reservation_id: Option<ReservationId>,
    /// Correlation id written by the producer
    #[serde(default)]
    pub correlation_id: Option<String>,
}
