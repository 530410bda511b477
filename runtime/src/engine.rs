//! Reservation lifecycle engine.
//!
//! Orchestrates seat locks, transactional seat and reservation transitions,
//! outbox enqueuing and expiration reconciliation.
//!
//! # Flow
//!
//! ```text
//! create ──► lock seats (sorted) ──► tx { re-check seats, insert reservation,
//!                                        seats → RESERVED, enqueue created } ──► unlock
//!
//! confirm_payment ──► tx { lock reservation
//!                          past deadline? → EXPIRED, seats → AVAILABLE, commit, Conflict(Expired)
//!                          else → CONFIRMED, seats → SOLD, insert sale }
//!
//! expire_if_pending ──► tx { lock reservation; PENDING and past deadline? → EXPIRED }
//! ```
//!
//! The relational store decides every outcome. Locks only bound how many
//! requests race into the same transaction.

use crate::lock::{LockManager, seat_lock_key};
use boxoffice_core::bus::{MessageBus, correlation_headers};
use boxoffice_core::environment::Clock;
use boxoffice_core::error::{BookingError, ConflictReason, StoreError};
use boxoffice_core::event::{DomainEvent, PaymentConfirmed, ReservationCreated, ReservationExpired};
use boxoffice_core::outbox::NewOutboxEvent;
use boxoffice_core::store::{BookingStore, BookingTx};
use boxoffice_core::types::{
    InvalidTransition, Reservation, ReservationId, ReservationRecord, ReservationStatus,
    ReservationSummary, Sale, SaleId, Seat, SeatId, SeatStatus, SessionId, UserId,
};
use chrono::{DateTime, TimeDelta, Utc};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How payment-confirmed and reservation-expired events reach the bus.
///
/// Reservation-created always goes through the outbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EventDelivery {
    /// Enqueued in the same transaction as the state change
    #[default]
    Outbox,
    /// Published right after commit; a failed publish is reported to the caller
    Direct,
}

impl EventDelivery {
    /// Parse `outbox` or `direct`, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "outbox" => Some(Self::Outbox),
            "direct" => Some(Self::Direct),
            _ => None,
        }
    }
}

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a pending reservation holds its seats
    pub hold: TimeDelta,
    /// TTL of seat locks; bounds the contention window of one create
    pub lock_ttl: Duration,
    /// Delivery policy for confirm and expire events
    pub delivery: EventDelivery,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hold: TimeDelta::seconds(30),
            lock_ttl: Duration::from_secs(5),
            delivery: EventDelivery::Outbox,
        }
    }
}

/// Input of [`ReservationEngine::create`].
#[derive(Debug, Clone)]
pub struct CreateReservation {
    /// Session to reserve in
    pub session_id: SessionId,
    /// Buyer
    pub user_id: UserId,
    /// Requested seats
    pub seat_labels: Vec<String>,
    /// Correlation id of the calling request
    pub correlation_id: Option<String>,
}

/// Result of [`ReservationEngine::expire_if_pending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireOutcome {
    /// Transitioned to `Expired` and released its seats
    Expired,
    /// No such reservation
    Missing,
    /// Already in a terminal status
    AlreadyFinal(ReservationStatus),
    /// Still pending and within its hold
    NotDue,
}

/// The reservation lifecycle engine.
pub struct ReservationEngine<S> {
    store: Arc<S>,
    locks: LockManager,
    bus: Arc<dyn MessageBus>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl<S> std::fmt::Debug for ReservationEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: BookingStore> ReservationEngine<S> {
    /// Assemble an engine from its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        locks: LockManager,
        bus: Arc<dyn MessageBus>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            locks,
            bus,
            clock,
            config,
        }
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reserve seats for a user.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Invalid`] for an empty seat list or user id
    /// - [`BookingError::NotFound`] for an unknown session or seat label
    /// - [`BookingError::Conflict`] with [`ConflictReason::SeatContention`] when
    ///   another request holds a seat lock, or [`ConflictReason::SeatUnavailable`]
    ///   when a seat is already reserved or sold
    /// - [`BookingError::Unavailable`] / [`BookingError::Storage`] on infrastructure failure
    pub async fn create(&self, request: CreateReservation) -> Result<ReservationSummary, BookingError> {
        if request.user_id.as_str().trim().is_empty() {
            return Err(BookingError::Invalid("user id must not be empty".to_string()));
        }
        let mut labels = request.seat_labels.clone();
        labels.sort();
        labels.dedup();
        if labels.is_empty() {
            return Err(BookingError::Invalid("at least one seat is required".to_string()));
        }

        let session = self
            .store
            .find_session(request.session_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("session {}", request.session_id)))?;

        let keys: Vec<String> = labels
            .iter()
            .map(|label| seat_lock_key(session.id, label))
            .collect();
        let Some(guard) = self.locks.guard(&keys, self.config.lock_ttl).await? else {
            counter!("boxoffice.reservations.conflicts").increment(1);
            debug!(session_id = %session.id, seats = ?labels, "Seat lock contention");
            return Err(BookingError::Conflict(ConflictReason::SeatContention));
        };

        let result = self.reserve_locked(session.id, &request, &labels).await;
        guard.release().await;

        match &result {
            Ok(summary) => {
                counter!("boxoffice.reservations.created").increment(1);
                info!(
                    reservation_id = %summary.reservation_id,
                    session_id = %summary.session_id,
                    user_id = %summary.user_id,
                    seats = ?summary.seat_labels,
                    correlation_id = request.correlation_id.as_deref().unwrap_or_default(),
                    "Reservation created"
                );
            },
            Err(BookingError::Conflict(_)) => {
                counter!("boxoffice.reservations.conflicts").increment(1);
            },
            Err(_) => {},
        }
        result
    }

    async fn reserve_locked(
        &self,
        session_id: SessionId,
        request: &CreateReservation,
        labels: &[String],
    ) -> Result<ReservationSummary, BookingError> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let seats = tx.lock_seats(session_id, labels).await?;
        if seats.len() != labels.len() {
            let missing: Vec<&str> = labels
                .iter()
                .filter(|label| !seats.iter().any(|seat| &seat.label == *label))
                .map(String::as_str)
                .collect();
            return Err(BookingError::NotFound(format!("unknown seat {}", missing.join(", "))));
        }
        if seats.iter().any(|seat| seat.status != SeatStatus::Available) {
            return Err(BookingError::Conflict(ConflictReason::SeatUnavailable));
        }

        let reservation =
            Reservation::pending(session_id, request.user_id.clone(), now, self.config.hold);
        let seat_ids = transition_seats(&seats, SeatStatus::Reserved)?;
        tx.insert_reservation(&reservation, &seat_ids).await?;
        tx.update_seat_status(&seat_ids, SeatStatus::Reserved).await?;

        let summary = ReservationSummary::new(&reservation, &seats);
        let event = DomainEvent::ReservationCreated(ReservationCreated {
            reservation_id: reservation.id,
            session_id,
            user_id: reservation.user_id.clone(),
            seat_labels: summary.seat_labels.clone(),
            expires_at: reservation.expires_at,
            correlation_id: request.correlation_id.clone(),
        });
        tx.enqueue_event(NewOutboxEvent::from_event(&event, now)?)
            .await?;
        tx.commit().await?;

        Ok(summary)
    }

    /// Confirm payment of a reservation and create its sale.
    ///
    /// Idempotent: confirming an already confirmed reservation returns the
    /// existing sale. A pending reservation whose hold has elapsed is expired
    /// on the spot and reported as [`ConflictReason::Expired`].
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] for an unknown reservation
    /// - [`BookingError::Conflict`] when the reservation expired, was cancelled,
    ///   or is confirmed without a backing sale
    /// - [`BookingError::Unavailable`] when [`EventDelivery::Direct`] is in use
    ///   and the bus rejects the event; the confirmation itself is committed
    pub async fn confirm_payment(
        &self,
        reservation_id: ReservationId,
        correlation_id: Option<&str>,
    ) -> Result<Sale, BookingError> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let record = tx
            .lock_reservation(reservation_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("reservation {reservation_id}")))?;

        match record.reservation.status {
            ReservationStatus::Pending => {},
            ReservationStatus::Confirmed => {
                return tx.find_sale(reservation_id).await?.ok_or_else(|| {
                    warn!(%reservation_id, "Confirmed reservation has no sale");
                    BookingError::Conflict(ConflictReason::ConfirmedWithoutSale)
                });
            },
            ReservationStatus::Expired | ReservationStatus::Cancelled => {
                return Err(BookingError::Conflict(ConflictReason::CannotConfirm));
            },
        }

        if record.reservation.is_past_deadline(now) {
            let event = self.expire_in(&mut tx, &record, now, correlation_id).await?;
            tx.commit().await?;
            counter!("boxoffice.reservations.expired").increment(1);
            info!(%reservation_id, "Reservation expired at confirmation");
            if self.config.delivery == EventDelivery::Direct {
                if let Err(e) = self.publish_direct(&event).await {
                    warn!(%reservation_id, error = %e, "Failed to publish expiry event");
                }
            }
            return Err(BookingError::Conflict(ConflictReason::Expired));
        }

        let ReservationRecord {
            reservation,
            seats,
            price_cents,
        } = record;
        reservation
            .status
            .transition(ReservationStatus::Confirmed)
            .map_err(corrupt)?;
        let seat_ids = transition_seats(&seats, SeatStatus::Sold)?;
        let seat_count = i64::try_from(seats.len())
            .map_err(|_| BookingError::Storage("seat count out of range".to_string()))?;
        let total_cents = price_cents
            .checked_mul(seat_count)
            .ok_or_else(|| BookingError::Storage("sale total overflows".to_string()))?;

        let sale = Sale {
            id: SaleId::new(),
            session_id: reservation.session_id,
            user_id: reservation.user_id.clone(),
            reservation_id,
            total_cents,
            confirmed_at: now,
        };
        tx.update_reservation_status(reservation_id, ReservationStatus::Confirmed, now)
            .await?;
        tx.update_seat_status(&seat_ids, SeatStatus::Sold).await?;
        tx.insert_sale(&sale).await?;

        let event = DomainEvent::PaymentConfirmed(PaymentConfirmed {
            reservation_id,
            sale_id: sale.id,
            session_id: sale.session_id,
            user_id: sale.user_id.clone(),
            total_cents,
            correlation_id: correlation_id.map(str::to_string),
        });
        if self.config.delivery == EventDelivery::Outbox {
            tx.enqueue_event(NewOutboxEvent::from_event(&event, now)?)
                .await?;
        }
        tx.commit().await?;
        info!(%reservation_id, sale_id = %sale.id, total_cents, "Payment confirmed");

        if self.config.delivery == EventDelivery::Direct {
            self.publish_direct(&event).await?;
        }
        Ok(sale)
    }

    /// Expire a reservation if it is still pending and past its deadline.
    ///
    /// Safe to call any number of times for the same reservation; only the
    /// call that performs the transition emits an expired event.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Storage`] on store failure, and
    /// [`BookingError::Unavailable`] when [`EventDelivery::Direct`] is in use
    /// and the bus rejects the event.
    pub async fn expire_if_pending(
        &self,
        reservation_id: ReservationId,
        correlation_id: Option<&str>,
    ) -> Result<ExpireOutcome, BookingError> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let Some(record) = tx.lock_reservation(reservation_id).await? else {
            return Ok(ExpireOutcome::Missing);
        };
        if record.reservation.status != ReservationStatus::Pending {
            return Ok(ExpireOutcome::AlreadyFinal(record.reservation.status));
        }
        if !record.reservation.is_past_deadline(now) {
            return Ok(ExpireOutcome::NotDue);
        }

        let event = self.expire_in(&mut tx, &record, now, correlation_id).await?;
        tx.commit().await?;
        counter!("boxoffice.reservations.expired").increment(1);
        info!(
            %reservation_id,
            seats = record.seats.len(),
            correlation_id = correlation_id.unwrap_or_default(),
            "Reservation expired"
        );

        if self.config.delivery == EventDelivery::Direct {
            self.publish_direct(&event).await?;
        }
        Ok(ExpireOutcome::Expired)
    }

    /// Look up a reservation.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] if it does not exist.
    pub async fn get(&self, reservation_id: ReservationId) -> Result<ReservationSummary, BookingError> {
        self.store
            .find_reservation(reservation_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("reservation {reservation_id}")))
    }

    /// A user's sales, newest first.
    ///
    /// # Errors
    ///
    /// [`BookingError::Storage`] on store failure.
    pub async fn purchase_history(&self, user_id: &UserId) -> Result<Vec<Sale>, BookingError> {
        Ok(self.store.sales_for_user(user_id).await?)
    }

    async fn expire_in(
        &self,
        tx: &mut S::Tx,
        record: &ReservationRecord,
        now: DateTime<Utc>,
        correlation_id: Option<&str>,
    ) -> Result<DomainEvent, BookingError> {
        let reservation = &record.reservation;
        reservation
            .status
            .transition(ReservationStatus::Expired)
            .map_err(corrupt)?;
        let seat_ids = transition_seats(&record.seats, SeatStatus::Available)?;

        tx.update_reservation_status(reservation.id, ReservationStatus::Expired, now)
            .await?;
        tx.update_seat_status(&seat_ids, SeatStatus::Available)
            .await?;

        let event = DomainEvent::ReservationExpired(ReservationExpired {
            reservation_id: reservation.id,
            session_id: reservation.session_id,
            seat_labels: record.seats.iter().map(|seat| seat.label.clone()).collect(),
            correlation_id: correlation_id.map(str::to_string),
        });
        if self.config.delivery == EventDelivery::Outbox {
            tx.enqueue_event(NewOutboxEvent::from_event(&event, now)?)
                .await?;
        }
        Ok(event)
    }

    async fn publish_direct(&self, event: &DomainEvent) -> Result<(), BookingError> {
        let payload = event.to_payload().map_err(StoreError::from)?;
        self.bus
            .publish(
                event.routing_key(),
                &payload,
                &correlation_headers(event.correlation_id()),
            )
            .await?;
        Ok(())
    }
}

fn corrupt(error: InvalidTransition) -> BookingError {
    BookingError::Storage(error.to_string())
}

/// Check every seat may move to `next`; returns their ids.
fn transition_seats(seats: &[Seat], next: SeatStatus) -> Result<Vec<SeatId>, BookingError> {
    seats
        .iter()
        .map(|seat| seat.status.transition(next).map(|_| seat.id).map_err(corrupt))
        .collect()
}
