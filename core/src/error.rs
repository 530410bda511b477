//! Error taxonomy.
//!
//! [`BookingError`] is what callers see. Infrastructure errors from the three
//! failure domains ([`LockError`], [`StoreError`], [`BusError`]) convert into it
//! so that the engine can use `?` throughout.

use thiserror::Error;

/// Why an operation was rejected as a conflict.
///
/// Clients treat contention and unavailability as "re-poll availability" and
/// the reservation-state reasons as "abort".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// Another request holds a lock on at least one requested seat
    SeatContention,
    /// At least one requested seat is not available
    SeatUnavailable,
    /// The reservation is in a state that cannot be confirmed
    CannotConfirm,
    /// The reservation's hold elapsed
    Expired,
    /// The reservation is confirmed but has no backing sale
    ConfirmedWithoutSale,
}

impl ConflictReason {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::SeatContention => "SEAT_CONTENTION",
            Self::SeatUnavailable => "SEAT_UNAVAILABLE",
            Self::CannotConfirm => "CANNOT_CONFIRM",
            Self::Expired => "RESERVATION_EXPIRED",
            Self::ConfirmedWithoutSale => "CONFIRMED_WITHOUT_SALE",
        }
    }

    /// Human-readable message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::SeatContention => "one or more seats are being reserved by another request",
            Self::SeatUnavailable => "one or more seats are unavailable",
            Self::CannotConfirm => "reservation cannot be confirmed",
            Self::Expired => "reservation expired",
            Self::ConfirmedWithoutSale => "reservation already confirmed",
        }
    }
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Errors reported by the reservation engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// Session, reservation or seat does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Business-rule conflict
    #[error("conflict: {0}")]
    Conflict(ConflictReason),

    /// Lock store or message bus unreachable
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Relational store failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Request rejected before any work was done
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl BookingError {
    /// Whether this is a conflict with the given reason.
    #[must_use]
    pub fn is_conflict(&self, reason: ConflictReason) -> bool {
        matches!(self, Self::Conflict(r) if *r == reason)
    }
}

/// Lock store failures. Never treated as "acquired".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Could not reach the lock store
    #[error("lock store connection failed: {0}")]
    Connection(String),

    /// The lock store rejected or failed a command
    #[error("lock store command failed: {0}")]
    Command(String),
}

/// Relational store failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Query or connection failure
    #[error("database error: {0}")]
    Database(String),

    /// A row held a value the domain cannot represent
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Payload could not be serialized
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Message bus failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Could not connect or open a channel
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Broker refused or failed to confirm a publish
    #[error("publish failed for '{routing_key}': {reason}")]
    PublishFailed {
        /// Routing key or queue that failed
        routing_key: String,
        /// The reason for failure
        reason: String,
    },

    /// Consumer could not be started or its stream failed
    #[error("consume failed for queue '{queue}': {reason}")]
    ConsumeFailed {
        /// Queue being consumed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Payload did not match the event contract
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl From<LockError> for BookingError {
    fn from(error: LockError) -> Self {
        Self::Unavailable(error.to_string())
    }
}

impl From<BusError> for BookingError {
    fn from(error: BusError) -> Self {
        Self::Unavailable(error.to_string())
    }
}

impl From<StoreError> for BookingError {
    fn from(error: StoreError) -> Self {
        Self::Storage(error.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_errors_surface_as_unavailable() {
        let lock: BookingError = LockError::Connection("refused".into()).into();
        assert!(matches!(lock, BookingError::Unavailable(_)));

        let bus: BookingError = BusError::ConnectionFailed("refused".into()).into();
        assert!(matches!(bus, BookingError::Unavailable(_)));

        let store: BookingError = StoreError::Database("timeout".into()).into();
        assert!(matches!(store, BookingError::Storage(_)));
    }

    #[test]
    fn conflict_reasons_are_distinguishable() {
        let error = BookingError::Conflict(ConflictReason::Expired);
        assert!(error.is_conflict(ConflictReason::Expired));
        assert!(!error.is_conflict(ConflictReason::SeatContention));
        assert_eq!(ConflictReason::SeatContention.code(), "SEAT_CONTENTION");
    }
}
