//! In-process frame store.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::store::FrameStore;

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Frame store for single-process deployments and tests.
///
/// Same contract as the Redis store. Expired entries are dropped lazily on
/// access and swept on every write.
#[derive(Default)]
pub struct MemoryFrameStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryFrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn live_value(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl FrameStore for MemoryFrameStore {
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.retain(|_, e| e.is_live(now));
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.live_value(key))
    }

    async fn ttl_remaining(&self, key: &str) -> StoreResult<Option<Duration>> {
        let now = Instant::now();
        let entries = self.lock();
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.expires_at - now))
    }

    async fn try_acquire_lease(&self, key: &str, token: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        let mut entries = self.lock();
        if entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: token.as_bytes().to_vec(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn renew_lease(&self, key: &str, token: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) && entry.value == token.as_bytes() => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lease(&self, key: &str, token: &str) -> StoreResult<bool> {
        let now = Instant::now();
        let mut entries = self.lock();
        let owned = entries
            .get(key)
            .is_some_and(|e| e.is_live(now) && e.value == token.as_bytes());
        if owned {
            entries.remove(key);
        }
        Ok(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get() {
        let store = MemoryFrameStore::new();
        store
            .set("camera:1:frame", b"jpeg", Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(
            store.get("camera:1:frame").await.unwrap().as_deref(),
            Some(&b"jpeg"[..])
        );
        let ttl = store.ttl_remaining("camera:1:frame").await.unwrap().unwrap();
        assert!(ttl > Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_value_expires_after_ttl() {
        let store = MemoryFrameStore::new();
        store
            .set("camera:1:frame", b"jpeg", Duration::from_millis(50))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(store.get("camera:1:frame").await.unwrap().is_none());
        assert!(store.ttl_remaining("camera:1:frame").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let store = MemoryFrameStore::new();
        let ttl = Duration::from_secs(5);
        store.set("k", b"first", ttl).await.unwrap();
        store.set("k", b"second", ttl).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some(&b"second"[..]));
    }

    #[tokio::test]
    async fn test_lease_ownership() {
        let store = MemoryFrameStore::new();
        let ttl = Duration::from_secs(30);

        assert!(store.try_acquire_lease("lease", "a", ttl).await.unwrap());
        assert!(!store.try_acquire_lease("lease", "b", ttl).await.unwrap());
        assert!(!store.renew_lease("lease", "b", ttl).await.unwrap());
        assert!(!store.release_lease("lease", "b").await.unwrap());
        assert!(store.renew_lease("lease", "a", ttl).await.unwrap());
        assert!(store.release_lease("lease", "a").await.unwrap());
        assert!(store.try_acquire_lease("lease", "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken() {
        let store = MemoryFrameStore::new();
        assert!(store
            .try_acquire_lease("lease", "a", Duration::from_millis(30))
            .await
            .unwrap());

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(store
            .try_acquire_lease("lease", "b", Duration::from_secs(5))
            .await
            .unwrap());
        assert!(!store.renew_lease("lease", "a", Duration::from_secs(5)).await.unwrap());
    }
}
