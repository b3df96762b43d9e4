//! Single-flight cache: TTL store plus fetch deduplication.

use std::fmt::{Debug, Display};
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::inflight::{Claim, InFlight, InFlightRegistry};
use super::{CacheConfig, TtlStore};

/// A cache that populates itself on demand, with at most one outstanding
/// fetch per key.
///
/// Successful fetches are stored for the configured TTL. Failed fetches are
/// never stored: every caller of the failed episode gets `None`, and the
/// next call starts a fresh fetch.
///
/// Cloning is cheap and shares the same store and registry.
pub struct SingleFlightCache<K, V>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<Inner<K, V>>,
}

struct Inner<K, V>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    store: TtlStore<K, V>,
    inflight: InFlightRegistry<K, V>,
    fetch_timeout: Option<Duration>,
    episodes: AtomicU64,
}

impl<K, V> Clone for SingleFlightCache<K, V>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> SingleFlightCache<K, V>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a new cache with the given name and config.
    pub fn new(name: &str, config: &CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: TtlStore::new(name, config),
                inflight: InFlightRegistry::new(),
                fetch_timeout: config.fetch_timeout,
                episodes: AtomicU64::new(0),
            }),
        }
    }

    /// The underlying TTL store, for direct reads, writes and invalidation.
    pub fn store(&self) -> &TtlStore<K, V> {
        &self.inner.store
    }

    /// The registry of outstanding fetches.
    pub fn inflight(&self) -> &InFlightRegistry<K, V> {
        &self.inner.inflight
    }

    /// Return the cached value for `key`, fetching it if needed.
    ///
    /// 1. If a fetch for `key` is outstanding, wait for it and return its result.
    /// 2. Otherwise, if the store has a live value, return it.
    /// 3. Otherwise register a new pending handle, run `fetcher(key)` on its
    ///    own task, and wait for the handle.
    ///
    /// Returns `None` if the fetch failed or timed out. Errors are logged,
    /// never returned.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: K, fetcher: F) -> Option<V>
    where
        F: FnOnce(K) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        if let Some(pending) = self.inner.inflight.get(&key) {
            debug!("Joining in-flight fetch for {:?}", key);
            return pending.wait().await;
        }

        if let Some(value) = self.inner.store.get(&key) {
            return Some(value);
        }

        let episode = self.inner.episodes.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let handle = InFlight::new(episode, rx);

        let store = &self.inner.store;
        match self.inner.inflight.claim(key.clone(), handle, || store.get(&key)) {
            Claim::Ready(value) => Some(value),
            Claim::Joined(pending) => {
                debug!("Joining in-flight fetch for {:?}", key);
                pending.wait().await
            }
            Claim::Registered(pending) => {
                self.spawn_fetch(key, episode, fetcher, tx);
                pending.wait().await
            }
        }
    }

    /// Run one fetch episode to completion on its own task, so that callers
    /// going away never leave a registered handle without a driver.
    /// The handle is released however the episode ends.
    fn spawn_fetch<F, Fut, E>(
        &self,
        key: K,
        episode: u64,
        fetcher: F,
        tx: oneshot::Sender<Option<V>>,
    ) where
        F: FnOnce(K) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        debug!("Fetching {:?} (episode {})", key, episode);

        tokio::spawn(async move {
            let fetch = inner.clone().run_fetch(key.clone(), fetcher);

            // A panicking fetcher settles like a failed one.
            let outcome = match AssertUnwindSafe(fetch).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Fetch for {:?} panicked", key);
                    None
                }
            };

            inner.inflight.release(&key, episode);
            let _ = tx.send(outcome);
        });
    }
}

impl<K, V> Inner<K, V>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn run_fetch<F, Fut, E>(self: Arc<Self>, key: K, fetcher: F) -> Option<V>
    where
        F: FnOnce(K) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let fetch = fetcher(key.clone());
        let result = match self.fetch_timeout {
            Some(limit) => match tokio::time::timeout(limit, fetch).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Fetch for {:?} timed out after {:?}", key, limit);
                    return None;
                }
            },
            None => fetch.await,
        };

        match result {
            Ok(value) => {
                self.store.set(key, value.clone());
                Some(value)
            }
            Err(e) => {
                warn!("Fetch for {:?} failed: {}", key, e);
                None
            }
        }
    }
}

impl<K, V> std::fmt::Debug for SingleFlightCache<K, V>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlightCache")
            .field("store", &self.inner.store)
            .field("in_flight", &self.inner.inflight.len())
            .field("fetch_timeout", &self.inner.fetch_timeout)
            .finish()
    }
}
