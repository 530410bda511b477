//! Transactional outbox.
//!
//! An [`OutboxEvent`] is written in the same transaction as the business change
//! it announces (see [`crate::store::BookingTx::enqueue_event`]) and published
//! later by the outbox publisher. Rows are never deleted.
//!
//! # Row Lifecycle
//!
//! ```text
//! Pending ──publish ok──► Published
//!    │ ▲
//!    │ └── retry (available_at pushed out by backoff)
//!    ▼
//! Failed (attempts ≥ cap) ──operator requeue──► Pending
//! ```
//!
//! `available_at` is both the schedule and the claim lease: a claim pushes it
//! forward, so a crashed publisher's rows become claimable again once the lease
//! runs out.

use crate::error::StoreError;
use crate::event::DomainEvent;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outbox row status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    /// Waiting to be published
    Pending,
    /// Delivered to the bus
    Published,
    /// Gave up after the attempt cap; needs an operator requeue
    Failed,
}

impl OutboxStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Published => "PUBLISHED",
            Self::Failed => "FAILED",
        }
    }

    /// Parse the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] for unknown values.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PUBLISHED" => Ok(Self::Published),
            "FAILED" => Ok(Self::Failed),
            _ => Err(StoreError::Corrupt(format!("invalid outbox status: {s}"))),
        }
    }
}

/// A stored outbox row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEvent {
    /// Row identifier
    pub id: Uuid,
    /// Event type, used as the routing key
    pub event_type: String,
    /// JSON payload
    pub payload: serde_json::Value,
    /// Current status
    pub status: OutboxStatus,
    /// Failed publish attempts so far
    pub attempts: i32,
    /// Earliest time the row may be claimed
    pub available_at: DateTime<Utc>,
    /// When the row was published
    pub published_at: Option<DateTime<Utc>>,
    /// Most recent publish error
    pub last_error: Option<String>,
    /// Insert time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// A row to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxEvent {
    /// Row identifier
    pub id: Uuid,
    /// Event type, used as the routing key
    pub event_type: String,
    /// JSON payload
    pub payload: serde_json::Value,
    /// Earliest publish time
    pub available_at: DateTime<Utc>,
    /// Insert time
    pub created_at: DateTime<Utc>,
}

impl NewOutboxEvent {
    /// Row for `event`, due immediately.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the payload cannot be encoded.
    pub fn from_event(event: &DomainEvent, now: DateTime<Utc>) -> Result<Self, StoreError> {
        Ok(Self {
            id: Uuid::new_v4(),
            event_type: event.routing_key().to_string(),
            payload: event.to_payload()?,
            available_at: now,
            created_at: now,
        })
    }

    /// Delay the first publish until `at`.
    #[must_use]
    pub const fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.available_at = at;
        self
    }

    /// The row as it looks right after insert.
    #[must_use]
    pub fn into_pending(self) -> OutboxEvent {
        OutboxEvent {
            id: self.id,
            event_type: self.event_type,
            payload: self.payload,
            status: OutboxStatus::Pending,
            attempts: 0,
            available_at: self.available_at,
            published_at: None,
            last_error: None,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// What to do with a row whose publish failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Stay pending and become claimable again at the given time
    Retry {
        /// Next claimable time
        available_at: DateTime<Utc>,
    },
    /// Move to `Failed`; no more automatic retries
    Quarantine,
}

/// Row counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxMetrics {
    /// Rows waiting to be published
    pub pending: i64,
    /// Rows delivered
    pub published: i64,
    /// Quarantined rows
    pub failed: i64,
    /// Creation time of the oldest pending row
    pub oldest_pending_at: Option<DateTime<Utc>>,
}

/// Publisher-side access to the outbox table.
#[async_trait]
pub trait OutboxStore: Send + Sync + 'static {
    /// Claim up to `limit` due pending rows, oldest first, pushing each claimed
    /// row's `available_at` to `now + lease`.
    ///
    /// Safe under concurrent publishers: a row is claimed by at most one caller
    /// per lease.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on query failure.
    async fn claim_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        lease: TimeDelta,
    ) -> Result<Vec<OutboxEvent>, StoreError>;

    /// Mark a row published and clear its error.
    ///
    /// Only a PENDING row changes; a row another publisher already settled
    /// is left as it is.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on query failure.
    async fn mark_published(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Record a failed publish attempt. No-op unless the row is still PENDING.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on query failure.
    async fn record_failure(
        &self,
        id: Uuid,
        attempts: i32,
        error: &str,
        disposition: FailureDisposition,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Move every `Failed` row back to `Pending` with a fresh attempt budget.
    /// Returns how many rows were requeued.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on query failure.
    async fn requeue_failed(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Counts per status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on query failure.
    async fn metrics(&self) -> Result<OutboxMetrics, StoreError>;
}
