//! Distributed lock manager.
//!
//! Token-guarded locks over arbitrary keys, with whole-or-nothing multi-key
//! acquisition. Keys are always acquired in lexicographic order so that two
//! requests contending for overlapping key sets cannot wait on each other in a
//! cycle.
//!
//! # Example
//!
//! ```ignore
//! let locks = LockManager::new(Arc::new(RedisLockStore::connect(url).await?));
//!
//! let Some(guard) = locks.guard(keys, Duration::from_secs(5)).await? else {
//!     return Err(BookingError::Conflict(ConflictReason::SeatContention));
//! };
//! let outcome = critical_section().await;
//! guard.release().await;
//! ```

use boxoffice_core::error::LockError;
use boxoffice_core::lock::{LockHandle, LockStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lock key of one seat.
#[must_use]
pub fn seat_lock_key(session_id: boxoffice_core::SessionId, label: &str) -> String {
    format!("lock:session:{session_id}:seat:{label}")
}

/// Acquires and releases locks in an external [`LockStore`].
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager").finish_non_exhaustive()
    }
}

impl LockManager {
    /// Manager over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self { store }
    }

    /// Take `key` with a fresh random token, unless someone else holds it.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] if the lock store is unreachable.
    pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockHandle>, LockError> {
        let token = Uuid::new_v4().to_string();
        if self.store.set_if_absent(key, &token, ttl).await? {
            Ok(Some(LockHandle {
                key: key.to_string(),
                token,
            }))
        } else {
            Ok(None)
        }
    }

    /// Release `handle` if this holder still owns it. Returns whether the key
    /// was deleted; `false` means the lock had already expired.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] if the lock store is unreachable.
    pub async fn release(&self, handle: &LockHandle) -> Result<bool, LockError> {
        self.store.compare_and_delete(&handle.key, &handle.token).await
    }

    /// Acquire every key or none of them.
    ///
    /// Keys are sorted and deduplicated first. On the first key already held,
    /// every lock taken so far is released and `None` is returned. If the store
    /// fails midway the partial set is released the same way and the error is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] if the lock store is unreachable.
    pub async fn acquire_many(
        &self,
        keys: &[String],
        ttl: Duration,
    ) -> Result<Option<Vec<LockHandle>>, LockError> {
        let mut ordered: Vec<&str> = keys.iter().map(String::as_str).collect();
        ordered.sort_unstable();
        ordered.dedup();

        let mut held = Vec::with_capacity(ordered.len());
        for key in ordered {
            match self.acquire(key, ttl).await {
                Ok(Some(handle)) => held.push(handle),
                Ok(None) => {
                    debug!(key, held = held.len(), "Lock already held, rolling back");
                    self.release_many(&held).await;
                    return Ok(None);
                },
                Err(e) => {
                    self.release_many(&held).await;
                    return Err(e);
                },
            }
        }
        Ok(Some(held))
    }

    /// Release every handle, continuing past failures. Returns how many were
    /// actually deleted. Locks that fail to release expire on their own.
    pub async fn release_many(&self, handles: &[LockHandle]) -> usize {
        let mut released = 0;
        for handle in handles {
            match self.release(handle).await {
                Ok(true) => released += 1,
                Ok(false) => debug!(key = %handle.key, "Lock expired before release"),
                Err(e) => warn!(key = %handle.key, error = %e, "Failed to release lock"),
            }
        }
        released
    }

    /// [`Self::acquire_many`] wrapped in a [`LockGuard`].
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] if the lock store is unreachable.
    pub async fn guard(
        &self,
        keys: &[String],
        ttl: Duration,
    ) -> Result<Option<LockGuard>, LockError> {
        Ok(self.acquire_many(keys, ttl).await?.map(|handles| LockGuard {
            manager: self.clone(),
            handles,
        }))
    }
}

/// A set of held locks.
///
/// Call [`LockGuard::release`] on every exit path. If the guard is dropped
/// without it (for example because the owning future was cancelled), the
/// release is spawned onto the current runtime; failing that, the locks run
/// out their TTL.
#[derive(Debug)]
#[must_use = "locks stay held until released or expired"]
pub struct LockGuard {
    manager: LockManager,
    handles: Vec<LockHandle>,
}

impl LockGuard {
    /// Keys held by this guard, in acquisition order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.handles.iter().map(|handle| handle.key.as_str())
    }

    /// Release every lock now.
    pub async fn release(mut self) -> usize {
        let handles = std::mem::take(&mut self.handles);
        self.manager.release_many(&handles).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        let handles = std::mem::take(&mut self.handles);
        let manager = self.manager.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                manager.release_many(&handles).await;
            });
        } else {
            warn!(count = handles.len(), "Lock guard dropped outside a runtime, locks will expire");
        }
    }
}
