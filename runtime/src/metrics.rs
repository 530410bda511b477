//! Prometheus metrics.
//!
//! The engine and publisher record counters through the `metrics` facade.
//! [`MetricsRecorder`] installs the Prometheus exporter and renders the
//! scrape body; the server exposes it at `/metrics`.
//!
//! # Example
//!
//! ```rust,no_run
//! use boxoffice_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.install()?;
//! let body = recorder.render();
//! # Ok(())
//! # }
//! ```

use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installed Prometheus recorder.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRecorder")
            .field("installed", &self.handle.is_some())
            .finish()
    }
}

impl MetricsRecorder {
    /// Recorder that has not been installed yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the Prometheus recorder as the global `metrics` recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] if the exporter cannot be installed.
    /// A recorder installed earlier in the same process (e.g. by another test)
    /// is tolerated with a warning.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                describe_metrics();
                self.handle = Some(handle);
                tracing::info!("Prometheus recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Empty if this recorder was never installed.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle
            .as_ref()
            .map(PrometheusHandle::render)
            .unwrap_or_default()
    }
}

fn describe_metrics() {
    describe_counter!(
        "boxoffice.reservations.created",
        "Reservations created"
    );
    describe_counter!(
        "boxoffice.reservations.conflicts",
        "Create requests rejected for seat contention or unavailability"
    );
    describe_counter!(
        "boxoffice.reservations.expired",
        "Reservations expired, lazily or by the expiration consumer"
    );
    describe_counter!(
        "boxoffice.outbox.published",
        "Outbox events delivered to the bus"
    );
    describe_counter!(
        "boxoffice.outbox.retried",
        "Outbox publish failures rescheduled with backoff"
    );
    describe_counter!(
        "boxoffice.outbox.quarantined",
        "Outbox events moved to FAILED after the attempt cap"
    );
    describe_counter!(
        "boxoffice.outbox.requeued",
        "FAILED outbox events requeued by an operator"
    );
}
