//! Domain types for seat booking.
//!
//! Sessions own seats; reservations hold a set of seats for one user until they
//! are confirmed (producing a [`Sale`]) or expire.
//!
//! # Seat State Machine
//!
//! ```text
//! Available ──reserve──► Reserved ──sell──► Sold
//!     ▲                      │
//!     └──────release─────────┘
//! ```
//!
//! `Sold` is terminal. Every transition is checked through
//! [`SeatStatus::transition`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of a session (a timed showing).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(i64);

impl SessionId {
    /// Wrap a raw database identifier.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a seat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeatId(i64);

impl SeatId {
    /// Wrap a raw database identifier.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for SeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque, globally unique identifier of a reservation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(Uuid);

impl ReservationId {
    /// Creates a new random `ReservationId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `ReservationId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of a sale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SaleId(Uuid);

impl SaleId {
    /// Creates a new random `SaleId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `SaleId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SaleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SaleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the buying user, as asserted by the upstream identity layer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap a user identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Sessions and Seats
// ============================================================================

/// A timed showing with a fixed per-seat price.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session identifier
    pub id: SessionId,
    /// Title of what is being shown
    pub title: String,
    /// Room the session runs in
    pub room: String,
    /// Start time
    pub starts_at: DateTime<Utc>,
    /// Price of one seat, in cents
    pub price_cents: i64,
}

/// Generate `count` seat labels laid out in rows of eight: `A1..A8, B1..B8, ...`.
///
/// Used when seeding a session's seat map.
#[must_use]
pub fn seat_labels(count: usize) -> Vec<String> {
    const PER_ROW: usize = 8;
    (0..count)
        .map(|index| {
            let row = index / PER_ROW;
            let column = index % PER_ROW + 1;
            format!("{}{column}", row_name(row))
        })
        .collect()
}

fn row_name(mut row: usize) -> String {
    let mut name = Vec::new();
    loop {
        // row % 26 < 26, so the cast cannot truncate
        #[allow(clippy::cast_possible_truncation)]
        name.push(b'A' + (row % 26) as u8);
        if row < 26 {
            break;
        }
        row = row / 26 - 1;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

/// Seat status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    /// Free to reserve
    Available,
    /// Held by a pending reservation
    Reserved,
    /// Sold through a confirmed reservation
    Sold,
}

/// Rejected status transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition from {from} to {to}")]
pub struct InvalidTransition {
    /// Status before the attempted transition
    pub from: &'static str,
    /// Requested status
    pub to: &'static str,
}

impl SeatStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Reserved => "RESERVED",
            Self::Sold => "SOLD",
        }
    }

    /// Parse the database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AVAILABLE" => Some(Self::Available),
            "RESERVED" => Some(Self::Reserved),
            "SOLD" => Some(Self::Sold),
            _ => None,
        }
    }

    /// Validate a transition.
    ///
    /// Allowed: `Available → Reserved`, `Reserved → Sold`, `Reserved → Available`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] for anything else, including every
    /// transition out of `Sold`.
    pub const fn transition(self, next: Self) -> Result<Self, InvalidTransition> {
        match (self, next) {
            (Self::Available, Self::Reserved)
            | (Self::Reserved, Self::Sold | Self::Available) => Ok(next),
            _ => Err(InvalidTransition {
                from: self.as_str(),
                to: next.as_str(),
            }),
        }
    }
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A seat within a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    /// Seat identifier
    pub id: SeatId,
    /// Owning session
    pub session_id: SessionId,
    /// Label, unique within the session (e.g. `A1`)
    pub label: String,
    /// Current status
    pub status: SeatStatus,
}

// ============================================================================
// Reservations
// ============================================================================

/// Reservation status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    /// Holding seats, awaiting payment
    Pending,
    /// Paid; a sale exists
    Confirmed,
    /// Hold elapsed without payment
    Expired,
    /// Cancelled before payment
    Cancelled,
}

impl ReservationStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Expired => "EXPIRED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse the database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "CONFIRMED" => Some(Self::Confirmed),
            "EXPIRED" => Some(Self::Expired),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal statuses are never reopened.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Validate a transition. Only `Pending` may move, and only to a terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] when leaving a terminal status or staying in `Pending`.
    pub const fn transition(self, next: Self) -> Result<Self, InvalidTransition> {
        match (self, next) {
            (Self::Pending, Self::Confirmed | Self::Expired | Self::Cancelled) => Ok(next),
            _ => Err(InvalidTransition {
                from: self.as_str(),
                to: next.as_str(),
            }),
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hold on a set of seats for one user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    /// Reservation identifier
    pub id: ReservationId,
    /// Session the seats belong to
    pub session_id: SessionId,
    /// Buyer
    pub user_id: UserId,
    /// Current status
    pub status: ReservationStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Hold deadline
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    /// A fresh `Pending` reservation holding until `now + hold`.
    #[must_use]
    pub fn pending(
        session_id: SessionId,
        user_id: UserId,
        now: DateTime<Utc>,
        hold: chrono::TimeDelta,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            session_id,
            user_id,
            status: ReservationStatus::Pending,
            created_at: now,
            expires_at: now + hold,
        }
    }

    /// Whether the hold deadline has been reached. The deadline itself counts as elapsed.
    #[must_use]
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Reservation as returned to callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationSummary {
    /// Reservation identifier
    pub reservation_id: ReservationId,
    /// Session
    pub session_id: SessionId,
    /// Buyer
    pub user_id: UserId,
    /// Current status
    pub status: ReservationStatus,
    /// Hold deadline
    pub expires_at: DateTime<Utc>,
    /// Labels of the held seats
    pub seat_labels: Vec<String>,
}

impl ReservationSummary {
    /// Build a summary from a reservation and its seats.
    #[must_use]
    pub fn new(reservation: &Reservation, seats: &[Seat]) -> Self {
        Self {
            reservation_id: reservation.id,
            session_id: reservation.session_id,
            user_id: reservation.user_id.clone(),
            status: reservation.status,
            expires_at: reservation.expires_at,
            seat_labels: seats.iter().map(|seat| seat.label.clone()).collect(),
        }
    }
}

/// A reservation loaded for update, with its seats and the session's seat price.
#[derive(Clone, Debug)]
pub struct ReservationRecord {
    /// The reservation row
    pub reservation: Reservation,
    /// Linked seats
    pub seats: Vec<Seat>,
    /// Per-seat price of the session
    pub price_cents: i64,
}

// ============================================================================
// Sales
// ============================================================================

/// Created exactly once per confirmed reservation; immutable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    /// Sale identifier
    pub id: SaleId,
    /// Session sold
    pub session_id: SessionId,
    /// Buyer
    pub user_id: UserId,
    /// The confirmed reservation (unique)
    pub reservation_id: ReservationId,
    /// Seat count × session price
    pub total_cents: i64,
    /// Confirmation time
    pub confirmed_at: DateTime<Utc>,
}
