//! TTL store backed by Moka.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use moka::Expiry;
use moka::ops::compute::{CompResult, Op};
use moka::sync::Cache;
use tokio::time::Instant;
use tracing::debug;

use super::CacheConfig;
use super::config::MAX_TTL;

/// A stored value together with its absolute expiry time.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        let now = Instant::now();
        // The platform's Instant may not reach MAX_TTL ahead; settle for a day.
        let expires_at = now
            .checked_add(ttl.min(MAX_TTL))
            .unwrap_or_else(|| now + Duration::from_secs(24 * 60 * 60));
        Self { value, expires_at }
    }

    /// An entry is visible only while `now < expires_at`.
    pub fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }

    fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Hands Moka the remaining lifetime of each entry, so physical eviction
/// follows `expires_at` instead of Moka's own insert/update timestamps.
struct EntryExpiry;

impl<K, V> Expiry<K, CacheEntry<V>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &K,
        entry: &CacheEntry<V>,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(entry.remaining())
    }

    fn expire_after_update(
        &self,
        _key: &K,
        entry: &CacheEntry<V>,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.remaining())
    }
}

/// Key/value store where every entry expires a fixed duration after it was set.
///
/// Expiry is enforced lazily: `get`/`has` never return an entry past its
/// `expires_at`, and remove it when they find one. Moka's housekeeping evicts
/// entries nobody reads again, and keeps the store within `max_capacity`.
///
/// Cloning is cheap and shares the same underlying storage.
pub struct TtlStore<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Cache<K, CacheEntry<V>>,
    ttl: Duration,
    name: Arc<str>,
}

// Manual Clone implementation that doesn't require K: Clone, V: Clone
impl<K, V> Clone for TtlStore<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            ttl: self.ttl,
            name: Arc::clone(&self.name),
        }
    }
}

impl<K, V> TtlStore<K, V>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a new store with the given name and config.
    pub fn new(name: impl Into<Arc<str>>, config: &CacheConfig) -> Self {
        let inner = Cache::builder()
            .max_capacity(config.max_capacity)
            .expire_after(EntryExpiry)
            .build();

        Self {
            inner,
            ttl: config.ttl.min(MAX_TTL),
            name: name.into(),
        }
    }

    /// Get the name of this store.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert or overwrite a value. The entry expires `ttl` from now.
    pub fn set(&self, key: K, value: V) {
        self.inner.insert(key, CacheEntry::new(value, self.ttl));
    }

    /// Get a value if present and unexpired.
    pub fn get(&self, key: &K) -> Option<V> {
        self.entry(key).map(|entry| entry.value)
    }

    /// Get the full entry, expiry included, if present and unexpired.
    pub fn entry(&self, key: &K) -> Option<CacheEntry<V>> {
        let entry = self.inner.get(key)?;
        if entry.is_live() {
            return Some(entry);
        }

        self.purge_expired(key);
        None
    }

    /// Check whether an unexpired entry exists.
    pub fn has(&self, key: &K) -> bool {
        self.entry(key).is_some()
    }

    /// Remove an entry. No-op if absent.
    pub fn delete(&self, key: &K) {
        self.inner.invalidate(key);
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.inner.invalidate_all();
        debug!("Cleared store: {}", self.name);
    }

    /// Mutate a live entry in place, keeping its expiry.
    ///
    /// Returns `false` (and does nothing) if there is no live entry for `key`.
    pub fn merge_if_present<F>(&self, key: &K, f: F) -> bool
    where
        F: FnOnce(&mut V),
    {
        let result = self.inner.entry(key.clone()).and_compute_with(|current| {
            match current.map(|e| e.into_value()) {
                Some(mut entry) if entry.is_live() => {
                    f(&mut entry.value);
                    Op::Put(entry)
                }
                Some(_) => Op::Remove,
                None => Op::Nop,
            }
        });

        matches!(result, CompResult::ReplacedWith(_))
    }

    /// Replace the value of a live entry, refreshing its expiry like `set`.
    ///
    /// Returns `false` (and does nothing) if there is no live entry for `key`.
    pub fn replace_if_present(&self, key: &K, value: V) -> bool {
        let ttl = self.ttl;
        let result = self.inner.entry(key.clone()).and_compute_with(|current| {
            match current {
                Some(entry) if entry.value().is_live() => Op::Put(CacheEntry::new(value, ttl)),
                Some(_) => Op::Remove,
                None => Op::Nop,
            }
        });

        matches!(result, CompResult::ReplacedWith(_))
    }

    /// Number of physically stored entries, expired ones included until purged.
    ///
    /// Note: This may not be perfectly accurate due to concurrent operations.
    pub fn len(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }

    /// Check whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_expired(&self, key: &K) {
        // Only remove if still expired; a concurrent `set` may have refreshed it.
        let result = self.inner.entry(key.clone()).and_compute_with(|current| match current {
            Some(entry) if !entry.value().is_live() => Op::Remove,
            _ => Op::Nop,
        });

        if matches!(result, CompResult::Removed(_)) {
            debug!("Purged expired entry {:?} from {}", key, self.name);
        }
    }
}

impl<K, V> std::fmt::Debug for TtlStore<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlStore")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("entry_count", &self.inner.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Pair {
        a: u32,
        b: u32,
    }

    fn store(ttl_secs: u64) -> TtlStore<String, Pair> {
        TtlStore::new("test", &CacheConfig::default().ttl(Duration::from_secs(ttl_secs)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_then_get() {
        let store = store(60);
        store.set("k".to_string(), Pair { a: 1, b: 2 });

        assert!(store.has(&"k".to_string()));
        assert_eq!(store.get(&"k".to_string()), Some(Pair { a: 1, b: 2 }));
        assert!(store.get(&"missing".to_string()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_boundary() {
        let store = store(60);
        let key = "k".to_string();
        store.set(key.clone(), Pair { a: 1, b: 2 });

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.has(&key));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!store.has(&key));
        assert!(store.get(&key).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_overwrites_and_refreshes() {
        let store = store(60);
        let key = "k".to_string();
        store.set(key.clone(), Pair { a: 1, b: 2 });

        tokio::time::advance(Duration::from_secs(30)).await;
        store.set(key.clone(), Pair { a: 5, b: 6 });

        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(store.get(&key), Some(Pair { a: 5, b: 6 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_ttl_does_not_overflow() {
        let mut config = CacheConfig::default();
        config.ttl = Duration::from_secs(u64::MAX);
        let store: TtlStore<String, Pair> = TtlStore::new("test", &config);
        let key = "k".to_string();

        store.set(key.clone(), Pair { a: 1, b: 2 });
        assert_eq!(store.ttl(), MAX_TTL);
        assert!(store.has(&key));

        tokio::time::advance(Duration::from_secs(10 * 365 * 24 * 60 * 60)).await;
        assert!(store.merge_if_present(&key, |pair| pair.b = 3));
        assert!(store.replace_if_present(&key, Pair { a: 4, b: 4 }));
        assert_eq!(store.get(&key), Some(Pair { a: 4, b: 4 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_is_idempotent() {
        let store = store(60);
        let key = "k".to_string();
        store.set(key.clone(), Pair { a: 1, b: 2 });

        store.delete(&key);
        assert!(!store.has(&key));
        store.delete(&key);
        assert!(!store.has(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear() {
        let store = store(60);
        store.set("a".to_string(), Pair { a: 1, b: 1 });
        store.set("b".to_string(), Pair { a: 2, b: 2 });

        store.clear();
        assert!(!store.has(&"a".to_string()));
        assert!(!store.has(&"b".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_merge_keeps_untouched_fields_and_expiry() {
        let store = store(60);
        let key = "k".to_string();
        store.set(key.clone(), Pair { a: 1, b: 2 });
        let before = store.entry(&key).unwrap().expires_at;

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(store.merge_if_present(&key, |pair| pair.b = 3));

        let after = store.entry(&key).unwrap();
        assert_eq!(after.value, Pair { a: 1, b: 3 });
        assert_eq!(after.expires_at, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_merge_skips_absent_and_expired() {
        let store = store(60);
        let key = "k".to_string();

        assert!(!store.merge_if_present(&key, |pair| pair.b = 3));
        assert!(!store.has(&key));

        store.set(key.clone(), Pair { a: 1, b: 2 });
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!store.merge_if_present(&key, |pair| pair.b = 3));
        assert!(!store.has(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_refreshes_expiry() {
        let store = store(60);
        let key = "k".to_string();
        store.set(key.clone(), Pair { a: 1, b: 2 });

        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(store.replace_if_present(&key, Pair { a: 9, b: 9 }));

        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(store.get(&key), Some(Pair { a: 9, b: 9 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_skips_absent() {
        let store = store(60);
        let key = "k".to_string();

        assert!(!store.replace_if_present(&key, Pair { a: 9, b: 9 }));
        assert!(!store.has(&key));
    }
}
