//! Sessions, seats, reservations and sales.

use crate::{column, db_error};
use async_trait::async_trait;
use boxoffice_core::error::StoreError;
use boxoffice_core::outbox::NewOutboxEvent;
use boxoffice_core::store::{BookingStore, BookingTx};
use boxoffice_core::types::{
    Reservation, ReservationId, ReservationRecord, ReservationStatus, ReservationSummary, Sale,
    SaleId, Seat, SeatId, SeatStatus, Session, SessionId, UserId, seat_labels,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Transaction};
use std::time::Duration;

/// Connection pool settings.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Maximum number of connections
    pub max_connections: u32,
    /// Idle connections kept open
    pub min_connections: u32,
    /// How long to wait for a connection
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// `PostgreSQL`-backed booking store.
#[derive(Clone, Debug)]
pub struct PostgresBookingStore {
    pool: PgPool,
}

impl PostgresBookingStore {
    /// Connect with a pool sized by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the database cannot be reached.
    pub async fn connect(database_url: &str, config: &PoolConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))?;

        Ok(Self::from_pool(pool))
    }

    /// Use an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;

        tracing::info!("Booking schema migrated");
        Ok(())
    }

    /// Insert a session with `seat_count` available seats labelled `A1, A2, ...`.
    ///
    /// Catalog management is out of band; this seeds fixtures and demo data.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn insert_session(
        &self,
        title: &str,
        room: &str,
        starts_at: DateTime<Utc>,
        price_cents: i64,
        seat_count: usize,
    ) -> Result<Session, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| db_error(&e))?;

        let row = sqlx::query(
            "INSERT INTO sessions (title, room, starts_at, price_cents)
             VALUES ($1, $2, $3, $4)
             RETURNING id",
        )
        .bind(title)
        .bind(room)
        .bind(starts_at)
        .bind(price_cents)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error(&e))?;
        let id: i64 = column(&row, "id")?;

        sqlx::query("INSERT INTO seats (session_id, label) SELECT $1, UNNEST($2::text[])")
            .bind(id)
            .bind(seat_labels(seat_count))
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(&e))?;

        tx.commit().await.map_err(|e| db_error(&e))?;

        tracing::info!(session_id = id, seat_count, "Session seeded");
        Ok(Session {
            id: SessionId::new(id),
            title: title.to_string(),
            room: room.to_string(),
            starts_at,
            price_cents,
        })
    }

    /// Current status of one seat.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on query failure or an unknown status value.
    pub async fn seat_status(
        &self,
        session_id: SessionId,
        label: &str,
    ) -> Result<Option<SeatStatus>, StoreError> {
        let row = sqlx::query("SELECT status FROM seats WHERE session_id = $1 AND label = $2")
            .bind(session_id.get())
            .bind(label)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(&e))?;

        row.map(|row| parse_seat_status(&column::<String>(&row, "status")?))
            .transpose()
    }

    async fn seats_of(&self, id: ReservationId) -> Result<Vec<Seat>, StoreError> {
        let rows = sqlx::query(
            "SELECT st.id, st.session_id, st.label, st.status
             FROM seats st
             JOIN reservation_seats rs ON rs.seat_id = st.id
             WHERE rs.reservation_id = $1
             ORDER BY st.id",
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error(&e))?;

        rows.iter().map(seat_from_row).collect()
    }
}

#[async_trait]
impl BookingStore for PostgresBookingStore {
    type Tx = PgBookingTx;

    async fn begin(&self) -> Result<PgBookingTx, StoreError> {
        let tx = self.pool.begin().await.map_err(|e| db_error(&e))?;
        Ok(PgBookingTx { tx })
    }

    async fn find_session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query(
            "SELECT id, title, room, starts_at, price_cents FROM sessions WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error(&e))?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn find_reservation(
        &self,
        id: ReservationId,
    ) -> Result<Option<ReservationSummary>, StoreError> {
        let row = sqlx::query(
            "SELECT id, session_id, user_id, status, created_at, expires_at
             FROM reservations
             WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error(&e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let reservation = reservation_from_row(&row)?;
        let seats = self.seats_of(id).await?;
        Ok(Some(ReservationSummary::new(&reservation, &seats)))
    }

    async fn sales_for_user(&self, user_id: &UserId) -> Result<Vec<Sale>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, session_id, user_id, reservation_id, total_cents, confirmed_at
             FROM sales
             WHERE user_id = $1
             ORDER BY confirmed_at DESC",
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error(&e))?;

        rows.iter().map(sale_from_row).collect()
    }
}

/// One booking transaction. Dropping it without [`BookingTx::commit`] rolls back.
#[derive(Debug)]
pub struct PgBookingTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl BookingTx for PgBookingTx {
    async fn lock_seats(
        &mut self,
        session_id: SessionId,
        labels: &[String],
    ) -> Result<Vec<Seat>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, session_id, label, status
             FROM seats
             WHERE session_id = $1 AND label = ANY($2)
             ORDER BY id
             FOR UPDATE",
        )
        .bind(session_id.get())
        .bind(labels)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error(&e))?;

        rows.iter().map(seat_from_row).collect()
    }

    async fn insert_reservation(
        &mut self,
        reservation: &Reservation,
        seats: &[SeatId],
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO reservations (id, session_id, user_id, status, created_at, expires_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $5)",
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.session_id.get())
        .bind(reservation.user_id.as_str())
        .bind(reservation.status.as_str())
        .bind(reservation.created_at)
        .bind(reservation.expires_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error(&e))?;

        let seat_ids: Vec<i64> = seats.iter().map(|id| id.get()).collect();
        sqlx::query(
            "INSERT INTO reservation_seats (reservation_id, seat_id)
             SELECT $1, UNNEST($2::bigint[])",
        )
        .bind(reservation.id.as_uuid())
        .bind(seat_ids)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error(&e))?;

        Ok(())
    }

    async fn lock_reservation(
        &mut self,
        id: ReservationId,
    ) -> Result<Option<ReservationRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT r.id, r.session_id, r.user_id, r.status, r.created_at, r.expires_at,
                    s.price_cents
             FROM reservations r
             JOIN sessions s ON s.id = r.session_id
             WHERE r.id = $1
             FOR UPDATE OF r",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error(&e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let reservation = reservation_from_row(&row)?;
        let price_cents: i64 = column(&row, "price_cents")?;

        let seat_rows = sqlx::query(
            "SELECT st.id, st.session_id, st.label, st.status
             FROM seats st
             JOIN reservation_seats rs ON rs.seat_id = st.id
             WHERE rs.reservation_id = $1
             ORDER BY st.id
             FOR UPDATE OF st",
        )
        .bind(id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error(&e))?;
        let seats = seat_rows
            .iter()
            .map(seat_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(ReservationRecord {
            reservation,
            seats,
            price_cents,
        }))
    }

    async fn update_seat_status(
        &mut self,
        seats: &[SeatId],
        status: SeatStatus,
    ) -> Result<(), StoreError> {
        let seat_ids: Vec<i64> = seats.iter().map(|id| id.get()).collect();
        sqlx::query("UPDATE seats SET status = $1, updated_at = now() WHERE id = ANY($2)")
            .bind(status.as_str())
            .bind(seat_ids)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error(&e))?;
        Ok(())
    }

    async fn update_reservation_status(
        &mut self,
        id: ReservationId,
        status: ReservationStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE reservations SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status.as_str())
            .bind(now)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error(&e))?;
        Ok(())
    }

    async fn find_sale(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Option<Sale>, StoreError> {
        let row = sqlx::query(
            "SELECT id, session_id, user_id, reservation_id, total_cents, confirmed_at
             FROM sales
             WHERE reservation_id = $1",
        )
        .bind(reservation_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error(&e))?;

        row.as_ref().map(sale_from_row).transpose()
    }

    async fn insert_sale(&mut self, sale: &Sale) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sales (id, session_id, user_id, reservation_id, total_cents, confirmed_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(sale.id.as_uuid())
        .bind(sale.session_id.get())
        .bind(sale.user_id.as_str())
        .bind(sale.reservation_id.as_uuid())
        .bind(sale.total_cents)
        .bind(sale.confirmed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error(&e))?;
        Ok(())
    }

    async fn enqueue_event(&mut self, event: NewOutboxEvent) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO outbox_events (id, event_type, payload, status, attempts, available_at, created_at, updated_at)
             VALUES ($1, $2, $3, 'PENDING', 0, $4, $5, $5)",
        )
        .bind(event.id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.available_at)
        .bind(event.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error(&e))?;
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(|e| db_error(&e))
    }
}

fn parse_seat_status(s: &str) -> Result<SeatStatus, StoreError> {
    SeatStatus::parse(s).ok_or_else(|| StoreError::Corrupt(format!("invalid seat status: {s}")))
}

fn session_from_row(row: &PgRow) -> Result<Session, StoreError> {
    Ok(Session {
        id: SessionId::new(column(row, "id")?),
        title: column(row, "title")?,
        room: column(row, "room")?,
        starts_at: column(row, "starts_at")?,
        price_cents: column(row, "price_cents")?,
    })
}

fn seat_from_row(row: &PgRow) -> Result<Seat, StoreError> {
    Ok(Seat {
        id: SeatId::new(column(row, "id")?),
        session_id: SessionId::new(column(row, "session_id")?),
        label: column(row, "label")?,
        status: parse_seat_status(&column::<String>(row, "status")?)?,
    })
}

fn reservation_from_row(row: &PgRow) -> Result<Reservation, StoreError> {
    let status: String = column(row, "status")?;
    Ok(Reservation {
        id: ReservationId::from_uuid(column(row, "id")?),
        session_id: SessionId::new(column(row, "session_id")?),
        user_id: UserId::new(column::<String>(row, "user_id")?),
        status: ReservationStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("invalid reservation status: {status}")))?,
        created_at: column(row, "created_at")?,
        expires_at: column(row, "expires_at")?,
    })
}

fn sale_from_row(row: &PgRow) -> Result<Sale, StoreError> {
    Ok(Sale {
        id: SaleId::from_uuid(column(row, "id")?),
        session_id: SessionId::new(column(row, "session_id")?),
        user_id: UserId::new(column::<String>(row, "user_id")?),
        reservation_id: ReservationId::from_uuid(column(row, "reservation_id")?),
        total_cents: column(row, "total_cents")?,
        confirmed_at: column(row, "confirmed_at")?,
    })
}
