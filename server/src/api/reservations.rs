//! Reservation API endpoints.
//!
//! - `POST /reservations` - Hold seats for a user
//! - `POST /reservations/:id/confirm-payment` - Confirm payment and create the sale
//! - `GET /reservations/:id` - Reservation status, expiry and seats
//! - `GET /reservations/users/:user_id/purchases` - A user's sales, newest first
//!
//! # State Machine
//!
//! ```text
//! PENDING ──confirm──► CONFIRMED
//!    │
//!    └──hold elapsed──► EXPIRED
//! ```

use crate::error::AppError;
use crate::extractors::{CorrelationId, JsonBody};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use boxoffice_core::store::BookingStore;
use boxoffice_core::types::{ReservationId, ReservationSummary, Sale, SessionId, UserId};
use boxoffice_runtime::CreateReservation;
use serde::Deserialize;
use std::collections::HashSet;
use uuid::Uuid;

// ============================================================================
// Request Types
// ============================================================================

/// Request to hold seats.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationRequest {
    /// Session to reserve in
    pub session_id: i64,
    /// Buyer
    pub user_id: String,
    /// Seats to hold, e.g. `["A1", "A2"]`
    pub seat_labels: Vec<String>,
}

impl CreateReservationRequest {
    fn validate(&self) -> Result<(), AppError> {
        if self.user_id.trim().is_empty() {
            return Err(AppError::validation("userId must not be empty"));
        }
        if self.seat_labels.is_empty() {
            return Err(AppError::validation("seatLabels must not be empty"));
        }
        if self.seat_labels.iter().any(|label| label.trim().is_empty()) {
            return Err(AppError::validation("seat labels must not be blank"));
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = self.seat_labels.iter().find(|label| !seen.insert(*label)) {
            return Err(AppError::validation(format!("seat {duplicate} requested twice")));
        }
        Ok(())
    }
}

fn parse_reservation_id(raw: &str) -> Result<ReservationId, AppError> {
    Uuid::parse_str(raw)
        .map(ReservationId::from_uuid)
        .map_err(|_| AppError::validation(format!("invalid reservation id: {raw}")))
}

// ============================================================================
// Handlers
// ============================================================================

/// Hold seats for a user.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:3000/reservations \
///   -H "Content-Type: application/json" \
///   -d '{"sessionId": 1, "userId": "alice", "seatLabels": ["A1", "A2"]}'
/// ```
///
/// # Errors
///
/// 422 for a malformed or unparsable request, 404 for an unknown session or seat, 409 when
/// a seat is contended or unavailable, 503 when a dependency is down.
pub async fn create_reservation<S: BookingStore>(
    State(state): State<AppState<S>>,
    CorrelationId(correlation_id): CorrelationId,
    JsonBody(request): JsonBody<CreateReservationRequest>,
) -> Result<(StatusCode, Json<ReservationSummary>), AppError> {
    request.validate()?;

    let summary = state
        .engine
        .create(CreateReservation {
            session_id: SessionId::new(request.session_id),
            user_id: UserId::new(request.user_id),
            seat_labels: request.seat_labels,
            correlation_id: Some(correlation_id),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(summary)))
}

/// Confirm payment of a reservation.
///
/// Idempotent: confirming again returns the same sale.
///
/// # Errors
///
/// 404 for an unknown reservation, 409 when it expired or cannot be confirmed.
pub async fn confirm_payment<S: BookingStore>(
    State(state): State<AppState<S>>,
    CorrelationId(correlation_id): CorrelationId,
    Path(id): Path<String>,
) -> Result<Json<Sale>, AppError> {
    let reservation_id = parse_reservation_id(&id)?;
    let sale = state
        .engine
        .confirm_payment(reservation_id, Some(&correlation_id))
        .await?;
    Ok(Json(sale))
}

/// Get a reservation.
///
/// # Errors
///
/// 404 for an unknown reservation.
pub async fn get_reservation<S: BookingStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<Json<ReservationSummary>, AppError> {
    let reservation_id = parse_reservation_id(&id)?;
    Ok(Json(state.engine.get(reservation_id).await?))
}

/// A user's purchases, newest first.
///
/// # Errors
///
/// 500 on store failure.
pub async fn purchase_history<S: BookingStore>(
    State(state): State<AppState<S>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Sale>>, AppError> {
    let sales = state
        .engine
        .purchase_history(&UserId::new(user_id))
        .await?;
    Ok(Json(sales))
}
