//! Outbox administration.
//!
//! - `GET /admin/outbox/metrics` - Row counts per status
//! - `POST /admin/outbox/retry-failed` - Requeue quarantined rows and flush
//!
//! When an admin key is configured, both require a matching `x-api-key`.

use crate::error::AppError;
use crate::state::AppState;
use axum::{Json, extract::State, http::HeaderMap};
use boxoffice_core::outbox::OutboxMetrics;
use serde::Serialize;

/// Header carrying the admin key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Result of a requeue.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryFailedResponse {
    /// Rows moved from `FAILED` back to `PENDING`
    pub requeued: u64,
    /// Rows published by the flush that followed; 0 if a flush was already running
    pub flushed: usize,
}

fn authorize<S>(state: &AppState<S>, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = state.admin_api_key.as_deref() else {
        return Ok(());
    };

    let provided = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    if provided == Some(expected) {
        Ok(())
    } else {
        tracing::warn!("Rejected admin request with missing or wrong API key");
        Err(AppError::unauthorized("invalid or missing API key"))
    }
}

/// Outbox row counts and the age of the backlog.
///
/// ```bash
/// curl http://localhost:3000/admin/outbox/metrics -H "x-api-key: $ADMIN_API_KEY"
/// # {"pending":0,"published":42,"failed":1,"oldestPendingAt":null}
/// ```
///
/// # Errors
///
/// 401 on a bad key, 500 on store failure.
pub async fn outbox_metrics<S>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
) -> Result<Json<OutboxMetrics>, AppError> {
    authorize(&state, &headers)?;
    Ok(Json(state.publisher.metrics().await?))
}

/// Requeue every quarantined row, then flush once.
///
/// # Errors
///
/// 401 on a bad key, 500 on store failure.
pub async fn retry_failed<S>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
) -> Result<Json<RetryFailedResponse>, AppError> {
    authorize(&state, &headers)?;

    let requeued = state.publisher.requeue_failed().await?;
    let flushed = state
        .publisher
        .flush_now()
        .await?
        .map_or(0, |report| report.published);

    tracing::info!(requeued, flushed, "Requeued failed outbox events");

    Ok(Json(RetryFailedResponse { requeued, flushed }))
}
