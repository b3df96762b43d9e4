//! Registry of outstanding fetches, one per key.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::oneshot;

/// A pending fetch result that any number of callers can await.
///
/// Settles with `None` when the fetch failed, or when its task went away
/// without reporting back.
#[derive(Clone)]
pub struct InFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    episode: u64,
    handle: Shared<BoxFuture<'static, Option<V>>>,
}

impl<V> InFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Build a handle that settles with whatever is sent on the paired sender.
    pub fn new(episode: u64, rx: oneshot::Receiver<Option<V>>) -> Self {
        let handle = rx.map(|settled| settled.ok().flatten()).boxed().shared();
        Self { episode, handle }
    }

    /// The fetch episode this handle belongs to.
    pub fn episode(&self) -> u64 {
        self.episode
    }

    /// Wait for the fetch to settle.
    pub async fn wait(self) -> Option<V> {
        self.handle.await
    }
}

impl<V> std::fmt::Debug for InFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlight")
            .field("episode", &self.episode)
            .field("settled", &self.handle.peek().is_some())
            .finish()
    }
}

/// Outcome of [`InFlightRegistry::claim`].
pub enum Claim<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Another caller's fetch is outstanding; wait on it.
    Joined(InFlight<V>),
    /// The handle was registered; the caller must now start the fetch.
    Registered(InFlight<V>),
    /// A value became available before anything was registered.
    Ready(V),
}

/// Plain key → pending handle map, used to deduplicate concurrent fetches.
///
/// Entries never expire on their own: whoever registered a handle is
/// responsible for releasing it once the fetch settles.
pub struct InFlightRegistry<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pending: Arc<DashMap<K, InFlight<V>>>,
}

impl<K, V> Clone for InFlightRegistry<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<K, V> InFlightRegistry<K, V>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
        }
    }

    pub fn has(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<InFlight<V>> {
        self.pending.get(key).map(|h| h.clone())
    }

    pub fn set(&self, key: K, handle: InFlight<V>) {
        self.pending.insert(key, handle);
    }

    pub fn delete(&self, key: &K) {
        self.pending.remove(key);
    }

    /// Atomically join an outstanding fetch or register a new one.
    ///
    /// While the key's shard is locked, `ready` gets one last chance to
    /// supply a value (a fetch may have settled since the caller last
    /// looked). Only if it returns `None` is `handle` registered.
    pub fn claim<F>(&self, key: K, handle: InFlight<V>, ready: F) -> Claim<V>
    where
        F: FnOnce() -> Option<V>,
    {
        match self.pending.entry(key) {
            Entry::Occupied(occupied) => Claim::Joined(occupied.get().clone()),
            Entry::Vacant(vacant) => match ready() {
                Some(value) => Claim::Ready(value),
                None => Claim::Registered(vacant.insert(handle).clone()),
            },
        }
    }

    /// Remove the handle for `key`, but only if it belongs to `episode`.
    pub fn release(&self, key: &K, episode: u64) -> bool {
        self.pending
            .remove_if(key, |_, handle| handle.episode == episode)
            .is_some()
    }

    /// Number of outstanding fetches.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<K, V> Default for InFlightRegistry<K, V>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
