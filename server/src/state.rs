//! Application state for the boxoffice HTTP server.

use boxoffice_runtime::metrics::MetricsRecorder;
use boxoffice_runtime::{OutboxPublisher, ReservationEngine};
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Generic over the booking store so the same router serves Postgres in
/// production and the in-memory store in tests. Cloned (cheaply via `Arc`)
/// for each request.
pub struct AppState<S> {
    /// Reservation lifecycle engine
    pub engine: Arc<ReservationEngine<S>>,
    /// Outbox publisher, for the admin routes
    pub publisher: Arc<OutboxPublisher>,
    /// Prometheus recorder backing `/metrics`
    pub metrics: Arc<MetricsRecorder>,
    /// Key required in `x-api-key` on admin routes
    pub admin_api_key: Option<Arc<str>>,
}

impl<S> AppState<S> {
    /// Create a new application state.
    #[must_use]
    pub fn new(
        engine: Arc<ReservationEngine<S>>,
        publisher: Arc<OutboxPublisher>,
        metrics: Arc<MetricsRecorder>,
        admin_api_key: Option<String>,
    ) -> Self {
        Self {
            engine,
            publisher,
            metrics,
            admin_api_key: admin_api_key.map(Arc::from),
        }
    }
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            publisher: self.publisher.clone(),
            metrics: self.metrics.clone(),
            admin_api_key: self.admin_api_key.clone(),
        }
    }
}
