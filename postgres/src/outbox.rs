//! Outbox table access for the publisher.

use crate::booking::PostgresBookingStore;
use crate::{column, db_error};
use async_trait::async_trait;
use boxoffice_core::error::StoreError;
use boxoffice_core::outbox::{
    FailureDisposition, OutboxEvent, OutboxMetrics, OutboxStatus, OutboxStore,
};
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::postgres::PgRow;
use uuid::Uuid;

fn outbox_event_from_row(row: &PgRow) -> Result<OutboxEvent, StoreError> {
    Ok(OutboxEvent {
        id: column(row, "id")?,
        event_type: column(row, "event_type")?,
        payload: column(row, "payload")?,
        status: OutboxStatus::parse(&column::<String>(row, "status")?)?,
        attempts: column(row, "attempts")?,
        available_at: column(row, "available_at")?,
        published_at: column(row, "published_at")?,
        last_error: column(row, "last_error")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

#[async_trait]
impl OutboxStore for PostgresBookingStore {
    async fn claim_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        lease: TimeDelta,
    ) -> Result<Vec<OutboxEvent>, StoreError> {
        // SKIP LOCKED keeps concurrent claimers off each other's rows; the
        // pushed-out available_at keeps them off until the lease runs out.
        let rows = sqlx::query(
            "WITH due AS (
                 SELECT id FROM outbox_events
                 WHERE status = 'PENDING' AND available_at <= $1
                 ORDER BY created_at
                 LIMIT $2
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE outbox_events o
             SET available_at = $3, updated_at = $1
             FROM due
             WHERE o.id = due.id
             RETURNING o.id, o.event_type, o.payload, o.status, o.attempts, o.available_at,
                       o.published_at, o.last_error, o.created_at, o.updated_at",
        )
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(now + lease)
        .fetch_all(self.pool())
        .await
        .map_err(|e| db_error(&e))?;

        let mut events = rows
            .iter()
            .map(outbox_event_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        // RETURNING does not preserve the CTE's order.
        events.sort_by_key(|event| event.created_at);

        tracing::debug!(claimed = events.len(), "Claimed outbox batch");
        Ok(events)
    }

    async fn mark_published(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE outbox_events
             SET status = $2, published_at = $3, last_error = NULL, updated_at = $3
             WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(id)
        .bind(OutboxStatus::Published.as_str())
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| db_error(&e))?;
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
        let query = match disposition {
            FailureDisposition::Retry { available_at } => sqlx::query(
                "UPDATE outbox_events
                 SET attempts = $2, last_error = $3, updated_at = $4, available_at = $5
                 WHERE id = $1 AND status = 'PENDING'",
            )
            .bind(id)
            .bind(attempts)
            .bind(error)
            .bind(now)
            .bind(available_at),
            FailureDisposition::Quarantine => sqlx::query(
                "UPDATE outbox_events
                 SET attempts = $2, last_error = $3, updated_at = $4, status = $5
                 WHERE id = $1 AND status = 'PENDING'",
            )
            .bind(id)
            .bind(attempts)
            .bind(error)
            .bind(now)
            .bind(OutboxStatus::Failed.as_str()),
        };

        query.execute(self.pool()).await.map_err(|e| db_error(&e))?;
        Ok(())
    }

    async fn requeue_failed(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE outbox_events
             SET status = 'PENDING', attempts = 0, available_at = $1, updated_at = $1
             WHERE status = 'FAILED'",
        )
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| db_error(&e))?;

        Ok(result.rows_affected())
    }

    async fn metrics(&self) -> Result<OutboxMetrics, StoreError> {
        let row = sqlx::query(
            "SELECT
                 COUNT(*) FILTER (WHERE status = 'PENDING') AS pending,
                 COUNT(*) FILTER (WHERE status = 'PUBLISHED') AS published,
                 COUNT(*) FILTER (WHERE status = 'FAILED') AS failed,
                 MIN(created_at) FILTER (WHERE status = 'PENDING') AS oldest_pending_at
             FROM outbox_events",
        )
        .fetch_one(self.pool())
        .await
        .map_err(|e| db_error(&e))?;

        Ok(OutboxMetrics {
            pending: column(&row, "pending")?,
            published: column(&row, "published")?,
            failed: column(&row, "failed")?,
            oldest_pending_at: column(&row, "oldest_pending_at")?,
        })
    }
}
