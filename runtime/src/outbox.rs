//! Outbox publisher.
//!
//! A background loop that claims due outbox rows in batches and hands them to
//! the [`MessageBus`]. Failed publishes are retried with a linear backoff up
//! to a cap, then quarantined as `Failed` until an operator requeues them.
//!
//! Reservation-created rows produce two broker messages: the delayed
//! expiration signal and the notification on the events exchange. The row
//! counts as delivered only when both are confirmed.

use boxoffice_core::bus::{MessageBus, correlation_headers};
use boxoffice_core::environment::Clock;
use boxoffice_core::error::{BusError, StoreError};
use boxoffice_core::event::{DomainEvent, routing_keys};
use boxoffice_core::outbox::{FailureDisposition, OutboxEvent, OutboxMetrics, OutboxStore};
use chrono::{DateTime, TimeDelta, Utc};
use futures::{StreamExt, stream};
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Shortest period the spawned publisher polls at.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Publisher tuning.
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Time between flushes; anything under a millisecond polls every millisecond
    pub poll_interval: Duration,
    /// Rows claimed per flush
    pub batch_size: usize,
    /// How long a claim hides a row from other publishers
    pub lease: TimeDelta,
    /// Failed attempts before a row is quarantined
    pub max_attempts: i32,
    /// Backoff per failed attempt
    pub backoff_step: TimeDelta,
    /// Backoff ceiling
    pub max_backoff: TimeDelta,
    /// Rows published concurrently within one flush
    pub concurrency: usize,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 50,
            lease: TimeDelta::seconds(15),
            max_attempts: 10,
            backoff_step: TimeDelta::seconds(2),
            max_backoff: TimeDelta::seconds(30),
            concurrency: 8,
        }
    }
}

impl OutboxConfig {
    /// Delay before retrying a row that has failed `attempts` times:
    /// `min(max_backoff, attempts × backoff_step)`.
    #[must_use]
    pub fn backoff_for(&self, attempts: i32) -> TimeDelta {
        self.backoff_step
            .checked_mul(attempts.max(1))
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }
}

/// What one flush did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    /// Rows claimed
    pub claimed: usize,
    /// Rows delivered and marked published
    pub published: usize,
    /// Rows rescheduled after a failure
    pub retried: usize,
    /// Rows moved to `Failed`
    pub quarantined: usize,
}

enum RowOutcome {
    Published,
    Retried,
    Quarantined,
    Unrecorded,
}

/// Claims and publishes outbox rows.
pub struct OutboxPublisher {
    store: Arc<dyn OutboxStore>,
    bus: Arc<dyn MessageBus>,
    clock: Arc<dyn Clock>,
    config: OutboxConfig,
    flushing: AtomicBool,
}

impl std::fmt::Debug for OutboxPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxPublisher")
            .field("config", &self.config)
            .field("flushing", &self.flushing)
            .finish_non_exhaustive()
    }
}

/// Clears the re-entrancy flag on every exit path.
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl OutboxPublisher {
    /// Create a publisher.
    #[must_use]
    pub fn new(
        store: Arc<dyn OutboxStore>,
        bus: Arc<dyn MessageBus>,
        clock: Arc<dyn Clock>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            store,
            bus,
            clock,
            config,
            flushing: AtomicBool::new(false),
        }
    }

    /// Publisher configuration.
    #[must_use]
    pub const fn config(&self) -> &OutboxConfig {
        &self.config
    }

    /// Run one flush now.
    ///
    /// Returns `None` without doing anything if another flush is in progress
    /// in this process.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the batch cannot be claimed. Failures to
    /// record a row's outcome are logged; the row's lease then runs out and it
    /// is delivered again.
    pub async fn flush_now(&self) -> Result<Option<FlushReport>, StoreError> {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("Flush already in progress, skipping");
            return Ok(None);
        }
        let _guard = FlushGuard(&self.flushing);

        let now = self.clock.now();
        let rows = self
            .store
            .claim_batch(self.config.batch_size, now, self.config.lease)
            .await?;
        let mut report = FlushReport {
            claimed: rows.len(),
            ..FlushReport::default()
        };
        if rows.is_empty() {
            return Ok(Some(report));
        }

        let outcomes: Vec<RowOutcome> = stream::iter(rows)
            .map(|row| self.process(row))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                RowOutcome::Published => report.published += 1,
                RowOutcome::Retried => report.retried += 1,
                RowOutcome::Quarantined => report.quarantined += 1,
                RowOutcome::Unrecorded => {},
            }
        }
        debug!(
            claimed = report.claimed,
            published = report.published,
            retried = report.retried,
            quarantined = report.quarantined,
            "Outbox flush complete"
        );
        Ok(Some(report))
    }

    /// Move every quarantined row back to pending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on query failure.
    pub async fn requeue_failed(&self) -> Result<u64, StoreError> {
        let requeued = self.store.requeue_failed(self.clock.now()).await?;
        counter!("boxoffice.outbox.requeued").increment(requeued);
        info!(requeued, "Requeued failed outbox events");
        Ok(requeued)
    }

    /// Outbox row counts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on query failure.
    pub async fn metrics(&self) -> Result<OutboxMetrics, StoreError> {
        self.store.metrics().await
    }

    /// Flush on every poll interval until `shutdown` fires.
    #[must_use]
    pub fn spawn(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.config.poll_interval.max(MIN_POLL_INTERVAL);
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                interval = ?period,
                batch_size = self.config.batch_size,
                "Outbox publisher started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("Outbox publisher received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.flush_now().await {
                            error!(error = %e, "Outbox flush failed");
                        }
                    }
                }
            }

            info!("Outbox publisher stopped");
        })
    }

    async fn process(&self, row: OutboxEvent) -> RowOutcome {
        match self.deliver(&row).await {
            Ok(()) => match self.store.mark_published(row.id, self.clock.now()).await {
                Ok(()) => {
                    counter!("boxoffice.outbox.published").increment(1);
                    RowOutcome::Published
                },
                Err(e) => {
                    error!(event_id = %row.id, error = %e, "Failed to mark outbox event published");
                    RowOutcome::Unrecorded
                },
            },
            Err(publish_error) => self.record_failure(&row, &publish_error).await,
        }
    }

    async fn record_failure(&self, row: &OutboxEvent, publish_error: &BusError) -> RowOutcome {
        let now = self.clock.now();
        let attempts = row.attempts.saturating_add(1);
        let reason = publish_error.to_string();
        let (disposition, outcome) = if attempts >= self.config.max_attempts {
            (FailureDisposition::Quarantine, RowOutcome::Quarantined)
        } else {
            (
                FailureDisposition::Retry {
                    available_at: now + self.config.backoff_for(attempts),
                },
                RowOutcome::Retried,
            )
        };

        if let Err(e) = self
            .store
            .record_failure(row.id, attempts, &reason, disposition, now)
            .await
        {
            error!(event_id = %row.id, error = %e, "Failed to record outbox failure");
            return RowOutcome::Unrecorded;
        }

        match outcome {
            RowOutcome::Quarantined => {
                counter!("boxoffice.outbox.quarantined").increment(1);
                error!(
                    event_id = %row.id,
                    event_type = %row.event_type,
                    attempts,
                    error = %reason,
                    "Outbox event quarantined"
                );
            },
            _ => {
                counter!("boxoffice.outbox.retried").increment(1);
                warn!(
                    event_id = %row.id,
                    event_type = %row.event_type,
                    attempts,
                    error = %reason,
                    "Outbox publish failed, will retry"
                );
            },
        }
        outcome
    }

    async fn deliver(&self, row: &OutboxEvent) -> Result<(), BusError> {
        let correlation_id = row
            .payload
            .get("correlationId")
            .and_then(serde_json::Value::as_str);
        let headers = correlation_headers(correlation_id);

        if row.event_type == routing_keys::RESERVATION_CREATED {
            let expires_at = match DomainEvent::decode(&row.event_type, &row.payload) {
                Ok(DomainEvent::ReservationCreated(created)) => created.expires_at,
                Ok(_) => return Err(BusError::InvalidPayload(row.event_type.clone())),
                Err(e) => return Err(BusError::InvalidPayload(e.to_string())),
            };
            let delay = remaining(expires_at, self.clock.now());
            self.bus
                .schedule_expiration(&row.payload, delay, &headers)
                .await?;
        }
        self.bus
            .publish(&row.event_type, &row.payload, &headers)
            .await
    }
}

/// Time left until `deadline`, zero once it has passed.
fn remaining(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_linearly_then_caps() {
        let config = OutboxConfig::default();
        assert_eq!(config.backoff_for(0), TimeDelta::seconds(2));
        assert_eq!(config.backoff_for(1), TimeDelta::seconds(2));
        assert_eq!(config.backoff_for(3), TimeDelta::seconds(6));
        assert_eq!(config.backoff_for(15), TimeDelta::seconds(30));
        assert_eq!(config.backoff_for(i32::MAX), TimeDelta::seconds(30));
    }

    #[test]
    fn remaining_never_goes_negative() {
        let now = Utc::now();
        assert_eq!(remaining(now - TimeDelta::seconds(5), now), Duration::ZERO);
        assert_eq!(
            remaining(now + TimeDelta::milliseconds(1500), now),
            Duration::from_millis(1500)
        );
    }
}
