//! # Boxoffice Runtime
//!
//! The moving parts of the seat-booking engine, written against the seams in
//! `boxoffice-core` so they run unchanged over Redis/Postgres/AMQP or the
//! in-memory doubles from `boxoffice-testing`.
//!
//! ## Core Components
//!
//! - **Lock Manager** ([`lock::LockManager`]): token-guarded, ordered,
//!   whole-or-nothing multi-key locking
//! - **Reservation Engine** ([`engine::ReservationEngine`]): create, confirm,
//!   expire, lookup
//! - **Outbox Publisher** ([`outbox::OutboxPublisher`]): claims due outbox rows
//!   and delivers them with backoff and quarantine
//! - **Expiration Consumer** ([`expiration::ExpirationHandler`] driven by
//!   [`consumer::MessageConsumer`]): applies delayed expiration signals
//!
//! ## Example
//!
//! ```ignore
//! use boxoffice_runtime::{EngineConfig, LockManager, ReservationEngine};
//!
//! let engine = ReservationEngine::new(
//!     store,
//!     LockManager::new(lock_store),
//!     bus,
//!     Arc::new(SystemClock),
//!     EngineConfig::default(),
//! );
//!
//! let summary = engine.create(request).await?;
//! let sale = engine.confirm_payment(summary.reservation_id, None).await?;
//! ```

/// Queue consumer with automatic reconnection
pub mod consumer;

/// Reservation lifecycle engine
pub mod engine;

/// Expiration signal handler
pub mod expiration;

/// Distributed lock manager
pub mod lock;

/// Prometheus metrics for observability
pub mod metrics;

/// Outbox publisher
pub mod outbox;

pub use consumer::MessageConsumer;
pub use engine::{CreateReservation, EngineConfig, EventDelivery, ExpireOutcome, ReservationEngine};
pub use expiration::ExpirationHandler;
pub use lock::{LockGuard, LockManager};
pub use outbox::{FlushReport, OutboxConfig, OutboxPublisher};
