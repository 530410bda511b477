//! Redis lock store.
//!
//! Implements [`LockStore`] with the two primitives the lock manager needs:
//!
//! - **set-if-absent**: `SET key token NX PX ttl`, one atomic command
//! - **compare-and-delete**: a Lua script that deletes the key only while it
//!   still holds the caller's token, so a holder whose lock already expired
//!   cannot release somebody else's
//!
//! # Example
//!
//! ```no_run
//! use boxoffice_redis::RedisLockStore;
//! use boxoffice_core::lock::LockStore;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisLockStore::connect("redis://127.0.0.1:6379").await?;
//!
//! if store.set_if_absent("lock:session:1:seat:A1", "token", Duration::from_secs(5)).await? {
//!     // critical section
//!     store.compare_and_delete("lock:session:1:seat:A1", "token").await?;
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use boxoffice_core::error::LockError;
use boxoffice_core::lock::LockStore;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};
use std::time::Duration;

const COMPARE_AND_DELETE: &str = r"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
";

/// Lock store over a shared Redis [`ConnectionManager`].
///
/// Cheap to clone; clones share the same managed connection, which
/// reconnects on its own after transient failures.
#[derive(Clone)]
pub struct RedisLockStore {
    conn_manager: ConnectionManager,
    release: Script,
}

impl std::fmt::Debug for RedisLockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLockStore").finish_non_exhaustive()
    }
}

impl RedisLockStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Connection`] if the URL is malformed or the server
    /// cannot be reached.
    pub async fn connect(redis_url: &str) -> Result<Self, LockError> {
        let client = Client::open(redis_url)
            .map_err(|e| LockError::Connection(format!("Failed to create Redis client: {e}")))?;
        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| LockError::Connection(format!("Failed to connect to Redis: {e}")))?;

        tracing::info!("Connected to Redis lock store");
        Ok(Self::from_manager(conn_manager))
    }

    /// Wrap an existing connection manager.
    #[must_use]
    pub fn from_manager(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            release: Script::new(COMPARE_AND_DELETE),
        }
    }
}

fn lock_error(error: &RedisError) -> LockError {
    if error.is_io_error() || error.is_connection_refusal() || error.is_timeout() {
        LockError::Connection(error.to_string())
    } else {
        LockError::Command(error.to_string())
    }
}

/// Milliseconds for `PX`; Redis rejects zero.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut conn = self.conn_manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| lock_error(&e))?;

        tracing::trace!(key, acquired = reply.is_some(), "SET NX PX");
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool, LockError> {
        let mut conn = self.conn_manager.clone();
        let deleted: i64 = self
            .release
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| lock_error(&e))?;

        Ok(deleted == 1)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn ttl_is_never_zero() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(5)), 5000);
    }

    fn unique_key() -> String {
        format!("lock:test:{}", uuid::Uuid::new_v4())
    }

    #[tokio::test]
    #[ignore] // Requires Redis running at localhost:6379
    async fn set_if_absent_is_exclusive() {
        let store = RedisLockStore::connect("redis://127.0.0.1:6379").await.unwrap();
        let key = unique_key();
        let ttl = Duration::from_secs(5);

        assert!(store.set_if_absent(&key, "a", ttl).await.unwrap());
        assert!(!store.set_if_absent(&key, "b", ttl).await.unwrap());
        assert!(store.compare_and_delete(&key, "a").await.unwrap());
        assert!(store.set_if_absent(&key, "b", ttl).await.unwrap());
        assert!(store.compare_and_delete(&key, "b").await.unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn foreign_token_cannot_release() {
        let store = RedisLockStore::connect("redis://127.0.0.1:6379").await.unwrap();
        let key = unique_key();

        assert!(store.set_if_absent(&key, "owner", Duration::from_secs(5)).await.unwrap());
        assert!(!store.compare_and_delete(&key, "intruder").await.unwrap());
        assert!(store.compare_and_delete(&key, "owner").await.unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn locks_expire_with_their_ttl() {
        let store = RedisLockStore::connect("redis://127.0.0.1:6379").await.unwrap();
        let key = unique_key();

        assert!(store.set_if_absent(&key, "a", Duration::from_millis(50)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(store.set_if_absent(&key, "b", Duration::from_secs(5)).await.unwrap());
        assert!(!store.compare_and_delete(&key, "a").await.unwrap());
        store.compare_and_delete(&key, "b").await.unwrap();
    }
}
