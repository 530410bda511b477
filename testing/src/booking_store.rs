//! In-memory relational store.

use async_trait::async_trait;
use boxoffice_core::error::StoreError;
use boxoffice_core::outbox::{
    FailureDisposition, NewOutboxEvent, OutboxEvent, OutboxMetrics, OutboxStatus, OutboxStore,
};
use boxoffice_core::store::{BookingStore, BookingTx};
use boxoffice_core::types::{
    Reservation, ReservationId, ReservationRecord, ReservationStatus, ReservationSummary, Sale,
    Seat, SeatId, SeatStatus, Session, SessionId, UserId, seat_labels,
};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct Tables {
    sessions: BTreeMap<SessionId, Session>,
    seats: BTreeMap<SeatId, Seat>,
    reservations: HashMap<ReservationId, Reservation>,
    links: Vec<(ReservationId, SeatId)>,
    sales: Vec<Sale>,
    outbox: Vec<OutboxEvent>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn seats_of(&self, reservation_id: ReservationId) -> Vec<Seat> {
        self.links
            .iter()
            .filter(|(id, _)| *id == reservation_id)
            .filter_map(|(_, seat_id)| self.seats.get(seat_id).cloned())
            .collect()
    }
}

/// Relational store held in memory.
///
/// A transaction takes the whole table set exclusively and works on a copy;
/// `commit` writes the copy back and dropping the transaction discards it. This
/// is stricter than row locking but gives the same observable guarantees.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBookingStore {
    tables: Arc<Mutex<Tables>>,
    fail_commits: Arc<AtomicBool>,
}

impl InMemoryBookingStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a session with `seat_count` available seats labelled `A1, A2, ...`.
    pub async fn add_session(&self, title: &str, price_cents: i64, seat_count: usize) -> Session {
        let mut tables = self.tables.lock().await;
        let session = Session {
            id: SessionId::new(tables.next_id()),
            title: title.to_string(),
            room: "Room 1".to_string(),
            starts_at: Utc::now() + TimeDelta::days(1),
            price_cents,
        };
        tables.sessions.insert(session.id, session.clone());
        for label in seat_labels(seat_count) {
            let id = SeatId::new(tables.next_id());
            tables.seats.insert(
                id,
                Seat {
                    id,
                    session_id: session.id,
                    label,
                    status: SeatStatus::Available,
                },
            );
        }
        session
    }

    /// Make every subsequent commit fail, simulating a lost connection.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Current status of a seat, looked up by label.
    pub async fn seat_status(&self, session_id: SessionId, label: &str) -> Option<SeatStatus> {
        self.tables
            .lock()
            .await
            .seats
            .values()
            .find(|seat| seat.session_id == session_id && seat.label == label)
            .map(|seat| seat.status)
    }

    /// Stored reservation row.
    pub async fn reservation(&self, id: ReservationId) -> Option<Reservation> {
        self.tables.lock().await.reservations.get(&id).cloned()
    }

    /// Every reservation of a session.
    pub async fn reservations_for(&self, session_id: SessionId) -> Vec<Reservation> {
        self.tables
            .lock()
            .await
            .reservations
            .values()
            .filter(|reservation| reservation.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Every sale.
    pub async fn sales(&self) -> Vec<Sale> {
        self.tables.lock().await.sales.clone()
    }

    /// Every outbox row, in insert order.
    pub async fn outbox_events(&self) -> Vec<OutboxEvent> {
        self.tables.lock().await.outbox.clone()
    }

    /// Insert an outbox row outside any business transaction.
    pub async fn insert_outbox_event(&self, event: NewOutboxEvent) {
        self.tables.lock().await.outbox.push(event.into_pending());
    }
}

/// Transaction over [`InMemoryBookingStore`].
#[derive(Debug)]
pub struct InMemoryTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    fail_commit: bool,
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx, StoreError> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        Ok(InMemoryTx {
            guard,
            working,
            fail_commit: self.fail_commits.load(Ordering::SeqCst),
        })
    }

    async fn find_session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.tables.lock().await.sessions.get(&id).cloned())
    }

    async fn find_reservation(
        &self,
        id: ReservationId,
    ) -> Result<Option<ReservationSummary>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .reservations
            .get(&id)
            .map(|reservation| ReservationSummary::new(reservation, &tables.seats_of(id))))
    }

    async fn sales_for_user(&self, user_id: &UserId) -> Result<Vec<Sale>, StoreError> {
        let mut sales: Vec<Sale> = self
            .tables
            .lock()
            .await
            .sales
            .iter()
            .filter(|sale| &sale.user_id == user_id)
            .cloned()
            .collect();
        sales.sort_by(|a, b| b.confirmed_at.cmp(&a.confirmed_at));
        Ok(sales)
    }
}

#[async_trait]
impl BookingTx for InMemoryTx {
    async fn lock_seats(
        &mut self,
        session_id: SessionId,
        labels: &[String],
    ) -> Result<Vec<Seat>, StoreError> {
        Ok(self
            .working
            .seats
            .values()
            .filter(|seat| seat.session_id == session_id && labels.contains(&seat.label))
            .cloned()
            .collect())
    }

    async fn insert_reservation(
        &mut self,
        reservation: &Reservation,
        seats: &[SeatId],
    ) -> Result<(), StoreError> {
        if self.working.reservations.contains_key(&reservation.id) {
            return Err(StoreError::Database(format!(
                "duplicate reservation {}",
                reservation.id
            )));
        }
        self.working
            .reservations
            .insert(reservation.id, reservation.clone());
        for seat in seats {
            if self.working.links.contains(&(reservation.id, *seat)) {
                return Err(StoreError::Database(format!("duplicate seat link {seat}")));
            }
            self.working.links.push((reservation.id, *seat));
        }
        Ok(())
    }

    async fn lock_reservation(
        &mut self,
        id: ReservationId,
    ) -> Result<Option<ReservationRecord>, StoreError> {
        let Some(reservation) = self.working.reservations.get(&id).cloned() else {
            return Ok(None);
        };
        let price_cents = self
            .working
            .sessions
            .get(&reservation.session_id)
            .map(|session| session.price_cents)
            .ok_or_else(|| {
                StoreError::Corrupt(format!("reservation {id} references a missing session"))
            })?;
        Ok(Some(ReservationRecord {
            seats: self.working.seats_of(id),
            reservation,
            price_cents,
        }))
    }

    async fn update_seat_status(
        &mut self,
        seats: &[SeatId],
        status: SeatStatus,
    ) -> Result<(), StoreError> {
        for id in seats {
            let seat = self
                .working
                .seats
                .get_mut(id)
                .ok_or_else(|| StoreError::Corrupt(format!("seat {id} not found")))?;
            seat.status = status;
        }
        Ok(())
    }

    async fn update_reservation_status(
        &mut self,
        id: ReservationId,
        status: ReservationStatus,
        _now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let reservation = self
            .working
            .reservations
            .get_mut(&id)
            .ok_or_else(|| StoreError::Corrupt(format!("reservation {id} not found")))?;
        reservation.status = status;
        Ok(())
    }

    async fn find_sale(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Option<Sale>, StoreError> {
        Ok(self
            .working
            .sales
            .iter()
            .find(|sale| sale.reservation_id == reservation_id)
            .cloned())
    }

    async fn insert_sale(&mut self, sale: &Sale) -> Result<(), StoreError> {
        if self
            .working
            .sales
            .iter()
            .any(|existing| existing.reservation_id == sale.reservation_id)
        {
            return Err(StoreError::Database(format!(
                "duplicate sale for reservation {}",
                sale.reservation_id
            )));
        }
        self.working.sales.push(sale.clone());
        Ok(())
    }

    async fn enqueue_event(&mut self, event: NewOutboxEvent) -> Result<(), StoreError> {
        self.working.outbox.push(event.into_pending());
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        if self.fail_commit {
            return Err(StoreError::Database("connection lost during commit".to_string()));
        }
        *self.guard = self.working;
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryBookingStore {
    async fn claim_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        lease: TimeDelta,
    ) -> Result<Vec<OutboxEvent>, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut due: Vec<&mut OutboxEvent> = tables
            .outbox
            .iter_mut()
            .filter(|event| event.status == OutboxStatus::Pending && event.available_at <= now)
            .collect();
        due.sort_by_key(|event| event.created_at);
        Ok(due
            .into_iter()
            .take(limit)
            .map(|event| {
                event.available_at = now + lease;
                event.updated_at = now;
                event.clone()
            })
            .collect())
    }

    async fn mark_published(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(event) = tables
            .outbox
            .iter_mut()
            .find(|event| event.id == id && event.status == OutboxStatus::Pending)
        {
            event.status = OutboxStatus::Published;
            event.published_at = Some(now);
            event.last_error = None;
            event.updated_at = now;
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        id: Uuid,
        attempts: i32,
        error: &str,
        disposition: FailureDisposition,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(event) = tables
            .outbox
            .iter_mut()
            .find(|event| event.id == id && event.status == OutboxStatus::Pending)
        {
            event.attempts = attempts;
            event.last_error = Some(error.to_string());
            event.updated_at = now;
            match disposition {
                FailureDisposition::Retry { available_at } => event.available_at = available_at,
                FailureDisposition::Quarantine => event.status = OutboxStatus::Failed,
            }
        }
        Ok(())
    }

    async fn requeue_failed(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut requeued = 0;
        for event in tables
            .outbox
            .iter_mut()
            .filter(|event| event.status == OutboxStatus::Failed)
        {
            event.status = OutboxStatus::Pending;
            event.attempts = 0;
            event.available_at = now;
            event.updated_at = now;
            requeued += 1;
        }
        Ok(requeued)
    }

    async fn metrics(&self) -> Result<OutboxMetrics, StoreError> {
        let tables = self.tables.lock().await;
        let mut metrics = OutboxMetrics::default();
        for event in &tables.outbox {
            match event.status {
                OutboxStatus::Pending => {
                    metrics.pending += 1;
                    metrics.oldest_pending_at = Some(
                        metrics
                            .oldest_pending_at
                            .map_or(event.created_at, |oldest| oldest.min(event.created_at)),
                    );
                },
                OutboxStatus::Published => metrics.published += 1,
                OutboxStatus::Failed => metrics.failed += 1,
            }
        }
        Ok(metrics)
    }
}
