//! # Boxoffice Server
//!
//! HTTP surface of the seat-booking engine.
//!
//! - [`config`]: environment-driven settings
//! - [`api`]: reservation, admin and health handlers
//! - [`routes`]: router and middleware
//! - [`error`]: mapping of booking errors to HTTP responses
//!
//! The router is generic over the booking store, so tests serve it over the
//! in-memory doubles from `boxoffice-testing`.

pub mod api;
pub mod config;
pub mod error;
pub mod extractors;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::AppError;
pub use routes::build_router;
pub use state::AppState;
