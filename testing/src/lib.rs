//! # Boxoffice Testing
//!
//! In-memory implementations of every infrastructure seam, so the reservation
//! engine, outbox publisher and expiration consumer can be exercised without
//! Redis, Postgres or a broker.
//!
//! ## Example
//!
//! ```ignore
//! use boxoffice_testing::mocks::{InMemoryBookingStore, InMemoryLockStore, InMemoryMessageBus, test_clock};
//!
//! #[tokio::test]
//! async fn reserve_a_seat() {
//!     let store = Arc::new(InMemoryBookingStore::new());
//!     let session = store.add_session("Metropolis", 1500, 16).await;
//!     let engine = ReservationEngine::new(store, locks, bus, clock, EngineConfig::default());
//!
//!     let summary = engine.create(request).await.unwrap();
//!     assert_eq!(summary.status, ReservationStatus::Pending);
//! }
//! ```

mod booking_store;
mod lock_store;
mod message_bus;

use boxoffice_core::environment::Clock;
use chrono::{DateTime, Utc};

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex, PoisonError};

    pub use crate::booking_store::InMemoryBookingStore;
    pub use crate::lock_store::InMemoryLockStore;
    pub use crate::message_bus::{InMemoryMessageBus, PublishedMessage, ScheduledMessage};

    /// Controllable clock for deterministic tests
    ///
    /// Returns the same time until the test moves it. Clones share the same
    /// time, so a test can keep a handle and advance the clock seen by the
    /// engine.
    ///
    /// # Example
    ///
    /// ```
    /// use boxoffice_testing::mocks::FixedClock;
    /// use boxoffice_core::environment::Clock;
    /// use chrono::{TimeDelta, Utc};
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let before = clock.now();
    /// clock.advance(TimeDelta::seconds(31));
    /// assert_eq!(clock.now() - before, TimeDelta::seconds(31));
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: chrono::TimeDelta) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute time.
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::UNIX_EPOCH + chrono::TimeDelta::days(20_089))
    }
}

/// Install a test-friendly tracing subscriber. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boxoffice=debug".into()),
        )
        .try_init();
}
