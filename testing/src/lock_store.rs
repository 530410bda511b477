//! In-memory lock store.

use async_trait::async_trait;
use boxoffice_core::error::LockError;
use boxoffice_core::lock::LockStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct LockTable {
    entries: HashMap<String, (String, Instant)>,
    attempts: Vec<String>,
    failing_key: Option<String>,
}

impl LockTable {
    fn purge_expired(&mut self, now: Instant) {
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
    }
}

/// Lock store backed by a mutex-guarded map with real TTLs.
///
/// Records the order of acquisition attempts and can simulate an unreachable
/// store, either entirely or for one key.
#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    table: Mutex<LockTable>,
    unavailable: AtomicBool,
}

impl InMemoryLockStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, LockTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every call fail as if the store were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make acquisitions of `key` fail with a connection error.
    pub fn fail_on_key(&self, key: impl Into<String>) {
        self.table().failing_key = Some(key.into());
    }

    /// Whether `key` is currently held.
    #[must_use]
    pub fn is_locked(&self, key: &str) -> bool {
        let mut table = self.table();
        table.purge_expired(Instant::now());
        table.entries.contains_key(key)
    }

    /// Number of live locks.
    #[must_use]
    pub fn held_count(&self) -> usize {
        let mut table = self.table();
        table.purge_expired(Instant::now());
        table.entries.len()
    }

    /// Keys in the order acquisition was attempted.
    #[must_use]
    pub fn attempts(&self) -> Vec<String> {
        self.table().attempts.clone()
    }

    fn check_available(&self) -> Result<(), LockError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LockError::Connection("lock store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        self.check_available()?;
        let now = Instant::now();
        let mut table = self.table();
        table.attempts.push(key.to_string());
        if table.failing_key.as_deref() == Some(key) {
            return Err(LockError::Connection(format!("connection reset while locking {key}")));
        }
        table.purge_expired(now);
        if table.entries.contains_key(key) {
            return Ok(false);
        }
        table
            .entries
            .insert(key.to_string(), (token.to_string(), now + ttl));
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool, LockError> {
        self.check_available()?;
        let mut table = self.table();
        table.purge_expired(Instant::now());
        match table.entries.get(key) {
            Some((current, _)) if current == token => {
                table.entries.remove(key);
                Ok(true)
            },
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_if_absent_is_exclusive() {
        let store = InMemoryLockStore::new();
        let ttl = Duration::from_secs(5);

        assert!(store.set_if_absent("k", "t1", ttl).await.unwrap());
        assert!(!store.set_if_absent("k", "t2", ttl).await.unwrap());
        assert!(!store.compare_and_delete("k", "t2").await.unwrap());
        assert!(store.compare_and_delete("k", "t1").await.unwrap());
        assert!(!store.is_locked("k"));
    }

    #[tokio::test]
    async fn expired_locks_are_reclaimable() {
        let store = InMemoryLockStore::new();
        assert!(store.set_if_absent("k", "t1", Duration::from_millis(10)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.set_if_absent("k", "t2", Duration::from_secs(5)).await.unwrap());
        assert!(!store.compare_and_delete("k", "t1").await.unwrap());
    }
}
