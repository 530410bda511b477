//! Expiration consumer.
//!
//! Handles the delayed signals redelivered from the delay queue once a
//! reservation's hold has elapsed, and asks the engine to expire the
//! reservation if it is still pending.

use crate::engine::{ExpireOutcome, ReservationEngine};
use async_trait::async_trait;
use boxoffice_core::bus::{Delivery, HandlerError, MessageHandler};
use boxoffice_core::event::{CORRELATION_HEADER, ExpirationSignal};
use boxoffice_core::store::BookingStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// [`MessageHandler`] for the expiration process queue.
///
/// - unparseable body: error, so the message is dropped without requeue
/// - body without `reservationId`: logged and acknowledged
/// - otherwise: [`ReservationEngine::expire_if_pending`]; an engine error
///   drops the message and leaves recovery to the check in `confirm_payment`
pub struct ExpirationHandler<S> {
    engine: Arc<ReservationEngine<S>>,
}

impl<S: BookingStore> ExpirationHandler<S> {
    /// Handler driving `engine`.
    #[must_use]
    pub const fn new(engine: Arc<ReservationEngine<S>>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl<S: BookingStore> MessageHandler for ExpirationHandler<S> {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let signal: ExpirationSignal = serde_json::from_slice(&delivery.payload)?;
        let correlation_id = signal
            .correlation_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .or_else(|| delivery.headers.get(CORRELATION_HEADER).map(String::as_str));

        let Some(reservation_id) = signal.reservation_id else {
            warn!(
                routing_key = %delivery.routing_key,
                correlation_id = correlation_id.unwrap_or_default(),
                "Expiration signal without reservationId, dropping"
            );
            return Ok(());
        };

        match self
            .engine
            .expire_if_pending(reservation_id, correlation_id)
            .await?
        {
            ExpireOutcome::Expired => {
                info!(
                    %reservation_id,
                    correlation_id = correlation_id.unwrap_or_default(),
                    "Expiration signal applied"
                );
            },
            outcome => {
                debug!(%reservation_id, ?outcome, "Expiration signal ignored");
            },
        }
        Ok(())
    }
}
