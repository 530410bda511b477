//! Relational store seam.
//!
//! The store is the single source of truth for seats, reservations and sales.
//! All mutations happen through a [`BookingTx`]: a unit of work that either
//! commits as a whole or is rolled back when dropped. Outbox rows are written
//! through the same transaction so that an event can never be lost relative
//! to the state change it announces.
//!
//! Implementations:
//!
//! - `PostgresBookingStore` (`boxoffice-postgres`)
//! - `InMemoryBookingStore` (`boxoffice-testing`)

use crate::error::StoreError;
use crate::outbox::NewOutboxEvent;
use crate::types::{
    Reservation, ReservationId, ReservationRecord, ReservationStatus, ReservationSummary, Sale,
    Seat, SeatId, SeatStatus, Session, SessionId, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Entry point to the relational store.
#[async_trait]
pub trait BookingStore: Send + Sync + 'static {
    /// Transaction type. Dropping it without [`BookingTx::commit`] rolls back.
    type Tx: BookingTx;

    /// Open a transaction (at least read-committed).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when no connection is available.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Catalog lookup.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on query failure.
    async fn find_session(&self, id: SessionId) -> Result<Option<Session>, StoreError>;

    /// Read a reservation with its seat labels, outside any transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on query failure.
    async fn find_reservation(
        &self,
        id: ReservationId,
    ) -> Result<Option<ReservationSummary>, StoreError>;

    /// A user's sales, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on query failure.
    async fn sales_for_user(&self, user_id: &UserId) -> Result<Vec<Sale>, StoreError>;
}

/// One transaction against the store.
#[async_trait]
pub trait BookingTx: Send {
    /// Load the seats of `session_id` carrying any of `labels`, row-locked for
    /// the rest of the transaction. Unknown labels are simply absent.
    async fn lock_seats(
        &mut self,
        session_id: SessionId,
        labels: &[String],
    ) -> Result<Vec<Seat>, StoreError>;

    /// Insert a reservation and link it to `seats`.
    async fn insert_reservation(
        &mut self,
        reservation: &Reservation,
        seats: &[SeatId],
    ) -> Result<(), StoreError>;

    /// Load a reservation with its seats and the session price, row-locked.
    async fn lock_reservation(
        &mut self,
        id: ReservationId,
    ) -> Result<Option<ReservationRecord>, StoreError>;

    /// Set the status of every seat in `seats`.
    async fn update_seat_status(
        &mut self,
        seats: &[SeatId],
        status: SeatStatus,
    ) -> Result<(), StoreError>;

    /// Set a reservation's status.
    async fn update_reservation_status(
        &mut self,
        id: ReservationId,
        status: ReservationStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// The sale backing a reservation, if any.
    async fn find_sale(&mut self, reservation_id: ReservationId)
    -> Result<Option<Sale>, StoreError>;

    /// Insert a sale. At most one per reservation.
    async fn insert_sale(&mut self, sale: &Sale) -> Result<(), StoreError>;

    /// Write an outbox row inside this transaction.
    async fn enqueue_event(&mut self, event: NewOutboxEvent) -> Result<(), StoreError>;

    /// Commit every change made through this transaction.
    async fn commit(self) -> Result<(), StoreError>;
}
