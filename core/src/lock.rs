//! Lock store seam.
//!
//! The lock manager (in `boxoffice-runtime`) builds multi-key, whole-or-nothing
//! locking on top of the two primitives defined here. Implementations:
//!
//! - `RedisLockStore` (`boxoffice-redis`) for production
//! - `InMemoryLockStore` (`boxoffice-testing`) for tests

use crate::error::LockError;
use async_trait::async_trait;
use std::time::Duration;

/// Atomic primitives required from the external key/value store.
#[async_trait]
pub trait LockStore: Send + Sync + 'static {
    /// Set `key` to `token` with expiry `ttl` only if the key is absent.
    ///
    /// Must be one atomic check-and-set, never a read followed by a write.
    /// Returns `true` when the key was set.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] when the store cannot be reached.
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Delete `key` only if its current value equals `token`.
    ///
    /// Returns `true` when the key was deleted.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] when the store cannot be reached.
    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool, LockError>;
}

/// Ownership of one held lock. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockHandle {
    /// Locked key
    pub key: String,
    /// Random token proving ownership
    pub token: String,
}
