//! Short-lived read cache in front of the dock store.
//!
//! Only the HTTP list endpoint reads through it. Full syncs always go to the
//! store, so the cache can make reads cheaper but never staler.

use std::collections::HashMap;
use std::time::Duration;
use parking_lot::Mutex;
use shared::types::Dock;
use tokio::time::Instant;

pub type DockCache = StateCache<Vec<Dock>>;

/// A cached value and the instant after which it must not be served
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub expires_at: Instant,
}

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Bumped by every invalidation
    epoch: u64,
}

pub struct StateCache<V> {
    ttl: Duration,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> StateCache<V> {
    /// A TTL of zero disables caching entirely.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                epoch: 0,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Returns the value if present and unexpired; expired entries are dropped.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.get(key)?;
        if entry.expires_at > Instant::now() {
            return Some(entry.value.clone());
        }
        inner.entries.remove(key);
        None
    }

    pub fn set(&self, key: &str, value: V, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        self.inner.lock().entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Current invalidation epoch. Read it before loading from the store and
    /// hand it to [`StateCache::fill`].
    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    /// Store `value` with the default TTL unless an invalidation happened after
    /// `observed_epoch` was read. Returns whether the value was stored.
    pub fn fill(&self, key: &str, value: V, observed_epoch: u64) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let mut inner = self.inner.lock();
        if inner.epoch != observed_epoch {
            tracing::debug!(key, "discarding cache fill that raced an invalidation");
            return false;
        }
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
        true
    }

    pub fn invalidate(&self, key: &str) {
        let mut inner = self.inner.lock();
        inner.entries.remove(key);
        inner.epoch += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "all_docks";

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires() {
        let cache: StateCache<u32> = StateCache::new(Duration::from_secs(60));
        cache.set(KEY, 7, Duration::from_secs(60));
        assert_eq!(cache.get(KEY), Some(7));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get(KEY), Some(7));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(KEY), None);
    }

    #[tokio::test]
    async fn test_invalidate_is_immediate() {
        let cache: StateCache<u32> = StateCache::new(Duration::from_secs(60));
        let epoch = cache.epoch();
        assert!(cache.fill(KEY, 1, epoch));

        cache.invalidate(KEY);
        assert_eq!(cache.get(KEY), None);
        assert_eq!(cache.epoch(), epoch + 1);
    }

    #[tokio::test]
    async fn test_fill_after_invalidation_is_discarded() {
        let cache: StateCache<u32> = StateCache::new(Duration::from_secs(60));

        // A reader loads pre-write data, then a write invalidates before the reader fills
        let epoch = cache.epoch();
        cache.invalidate(KEY);
        assert!(!cache.fill(KEY, 1, epoch));
        assert_eq!(cache.get(KEY), None);
    }

    #[tokio::test]
    async fn test_zero_ttl_disables() {
        let cache: StateCache<u32> = StateCache::new(Duration::ZERO);
        assert!(!cache.is_enabled());
        assert!(!cache.fill(KEY, 1, cache.epoch()));
        cache.set(KEY, 1, Duration::ZERO);
        assert_eq!(cache.get(KEY), None);
    }
}
