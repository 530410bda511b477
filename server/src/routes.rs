//! Router configuration.

use crate::api::{admin, health, reservations};
use crate::state::AppState;
use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderName, Request, header},
    response::IntoResponse,
    routing::{get, post},
};
use boxoffice_core::event::CORRELATION_HEADER;
use boxoffice_core::store::BookingStore;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// Build the complete router.
///
/// Every request carries an `x-correlation-id`: the client's, or a fresh UUID.
/// It is echoed on the response and recorded on the request span.
pub fn build_router<S: BookingStore>(state: AppState<S>) -> Router {
    let correlation_header = HeaderName::from_static(CORRELATION_HEADER);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(metrics::<S>))
        // Reservations
        .route("/reservations", post(reservations::create_reservation::<S>))
        .route("/reservations/:id", get(reservations::get_reservation::<S>))
        .route(
            "/reservations/:id/confirm-payment",
            post(reservations::confirm_payment::<S>),
        )
        .route(
            "/reservations/users/:user_id/purchases",
            get(reservations::purchase_history::<S>),
        )
        // Outbox administration
        .route("/admin/outbox/metrics", get(admin::outbox_metrics::<S>))
        .route("/admin/outbox/retry-failed", post(admin::retry_failed::<S>))
        .with_state(state)
        .layer(PropagateRequestIdLayer::new(correlation_header.clone()))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            let correlation_id = request
                .headers()
                .get(CORRELATION_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                correlation_id = %correlation_id,
            )
        }))
        .layer(SetRequestIdLayer::new(correlation_header, MakeRequestUuid))
}

async fn metrics<S>(State(state): State<AppState<S>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
