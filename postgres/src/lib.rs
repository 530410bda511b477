//! `PostgreSQL` booking store and transactional outbox.
//!
//! [`PostgresBookingStore`] is the system of record for sessions, seats,
//! reservations and sales. It implements both
//! [`BookingStore`](boxoffice_core::store::BookingStore), whose transactions
//! take row locks with `SELECT ... FOR UPDATE`, and
//! [`OutboxStore`](boxoffice_core::outbox::OutboxStore), whose claims use
//! `FOR UPDATE SKIP LOCKED` so several publishers can share the table.
//!
//! Queries are built at runtime with `sqlx::query` so the crate compiles
//! without a live database.
//!
//! # Example
//!
//! ```ignore
//! use boxoffice_postgres::{PoolConfig, PostgresBookingStore};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresBookingStore::connect("postgres://localhost/boxoffice", &PoolConfig::default()).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

mod booking;
mod outbox;

pub use booking::{PgBookingTx, PoolConfig, PostgresBookingStore};

use boxoffice_core::error::StoreError;
use sqlx::Row;
use sqlx::postgres::PgRow;

pub(crate) fn db_error(error: &sqlx::Error) -> StoreError {
    StoreError::Database(error.to_string())
}

/// Read a column, reporting decode failures as corrupt rows.
pub(crate) fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Corrupt(format!("column {name}: {e}")))
}
