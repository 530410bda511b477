//! HTTP API handlers.
//!
//! - Reservations: hold seats, confirm payment, lookups
//! - Admin: outbox inspection and requeue
//! - Health: liveness

pub mod admin;
pub mod health;
pub mod reservations;

pub use admin::{outbox_metrics, retry_failed};
pub use health::health_check;
pub use reservations::{confirm_payment, create_reservation, get_reservation, purchase_history};
