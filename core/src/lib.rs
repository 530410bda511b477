//! # Boxoffice Core
//!
//! Domain types and infrastructure seams for selling seats of timed sessions
//! under contention.
//!
//! Three independent failure domains take part in every sale:
//!
//! - a **lock store** that gates admission to a seat's critical section
//!   ([`lock::LockStore`])
//! - a **relational store**, the single source of truth, which also holds the
//!   transactional outbox ([`store::BookingStore`], [`outbox::OutboxStore`])
//! - a **message bus** for event delivery and delayed expiration signals
//!   ([`bus::MessageBus`])
//!
//! The orchestration lives in `boxoffice-runtime`; this crate only defines the
//! vocabulary so that production and in-memory implementations are
//! interchangeable.
//!
//! ## Architecture Principles
//!
//! - The relational store decides; locks only admit
//! - Every event is written in the same transaction as its state change
//! - At-least-once delivery with idempotent consumers
//! - Dependencies injected as owned handles, never ambient globals

pub mod bus;
pub mod error;
pub mod event;
pub mod lock;
pub mod outbox;
pub mod store;
pub mod types;

pub use error::{BookingError, BusError, ConflictReason, LockError, StoreError};
pub use event::DomainEvent;
pub use types::*;

/// Environment module - injected time source.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// let clock = SystemClock;
    /// let deadline = clock.now() + hold;
    ///
    /// // Test - a clock the test can move forward
    /// let clock = FixedClock::new(start);
    /// clock.advance(TimeDelta::seconds(31));
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
