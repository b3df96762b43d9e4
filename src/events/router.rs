//! Routes bus messages to store mutations.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use tracing::{debug, warn};

use super::bus::{EventBus, Handler, Subscription};
use crate::cache::TtlStore;
use crate::error::EventError;

/// A record that partial-update events can patch field by field.
pub trait Mergeable {
    /// The set of fields a single event may overwrite.
    type Patch;

    fn merge(&mut self, patch: Self::Patch);
}

/// One decoded invalidation message.
#[derive(Debug, Clone, PartialEq)]
pub enum Invalidation<K, V: Mergeable> {
    /// Remove the entry.
    Delete(K),
    /// Overwrite some fields of an existing entry.
    Merge(K, V::Patch),
    /// Swap in a whole new value for an existing entry.
    Replace(K, V),
}

/// What an invalidation actually did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Deleted,
    Merged,
    Replaced,
    /// The key was not cached, so nothing changed.
    Dropped,
}

/// Turns a raw payload from a channel into an invalidation.
pub type Decoder<K, V> = fn(&[u8]) -> Result<Invalidation<K, V>, serde_json::Error>;

struct Route<K, V: Mergeable> {
    channel: &'static str,
    decode: Decoder<K, V>,
}

impl<K, V: Mergeable> Clone for Route<K, V> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel,
            decode: self.decode,
        }
    }
}

/// Applies bus messages to a shared [`TtlStore`].
///
/// Merge and replace only ever touch keys that are already cached; the
/// store is populated exclusively by fetches.
pub struct InvalidationRouter<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Mergeable + Clone + Send + Sync + 'static,
{
    store: TtlStore<K, V>,
    routes: Vec<Route<K, V>>,
}

impl<K, V> Clone for InvalidationRouter<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Mergeable + Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            routes: self.routes.clone(),
        }
    }
}

impl<K, V> InvalidationRouter<K, V>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Mergeable + Clone + Send + Sync + 'static,
{
    pub fn new(store: TtlStore<K, V>) -> Self {
        Self {
            store,
            routes: Vec::new(),
        }
    }

    /// Add a channel and the decoder for its payloads (builder pattern).
    #[must_use]
    pub fn route(mut self, channel: &'static str, decode: Decoder<K, V>) -> Self {
        self.routes.push(Route { channel, decode });
        self
    }

    /// Channels this router listens on.
    pub fn channels(&self) -> Vec<&'static str> {
        self.routes.iter().map(|r| r.channel).collect()
    }

    /// Apply one invalidation to the store.
    pub fn apply(&self, invalidation: Invalidation<K, V>) -> Applied {
        match invalidation {
            Invalidation::Delete(key) => {
                self.store.delete(&key);
                debug!("Invalidated {:?}", key);
                Applied::Deleted
            }
            Invalidation::Merge(key, patch) => {
                if self.store.merge_if_present(&key, |value| value.merge(patch)) {
                    debug!("Merged update into {:?}", key);
                    Applied::Merged
                } else {
                    debug!("Dropped update for uncached {:?}", key);
                    Applied::Dropped
                }
            }
            Invalidation::Replace(key, value) => {
                if self.store.replace_if_present(&key, value) {
                    debug!("Replaced {:?}", key);
                    Applied::Replaced
                } else {
                    debug!("Dropped replacement for uncached {:?}", key);
                    Applied::Dropped
                }
            }
        }
    }

    /// Decode and apply a raw message received on `channel`.
    pub fn handle(&self, channel: &str, payload: &[u8]) -> Result<Applied, EventError> {
        let route = self
            .routes
            .iter()
            .find(|r| r.channel == channel)
            .ok_or_else(|| EventError::UnknownChannel(channel.to_string()))?;

        let invalidation = (route.decode)(payload).map_err(|source| EventError::Decode {
            channel: channel.to_string(),
            source,
        })?;

        Ok(self.apply(invalidation))
    }

    /// Subscribe every route on `bus`.
    ///
    /// Malformed messages are logged and skipped.
    pub fn subscribe(&self, bus: &dyn EventBus) -> Vec<Subscription> {
        self.routes
            .iter()
            .map(|route| {
                let router = self.clone();
                let channel = route.channel;
                let handler: Handler = Arc::new(move |payload: &[u8]| {
                    if let Err(e) = router.handle(channel, payload) {
                        warn!("Ignoring event: {}", e);
                    }
                });
                bus.subscribe(channel, handler)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::Deserialize;

    use super::*;
    use crate::cache::CacheConfig;
    use crate::events::LocalBus;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Pair {
        id: String,
        a: u32,
        b: u32,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum PairPatch {
        B(u32),
    }

    impl Mergeable for Pair {
        type Patch = PairPatch;

        fn merge(&mut self, patch: PairPatch) {
            match patch {
                PairPatch::B(b) => self.b = b,
            }
        }
    }

    #[derive(Deserialize)]
    struct BUpdate {
        id: String,
        b: u32,
    }

    #[derive(Deserialize)]
    struct Removed {
        id: String,
    }

    fn decode_delete(payload: &[u8]) -> Result<Invalidation<String, Pair>, serde_json::Error> {
        let removed: Removed = serde_json::from_slice(payload)?;
        Ok(Invalidation::Delete(removed.id))
    }

    fn decode_b(payload: &[u8]) -> Result<Invalidation<String, Pair>, serde_json::Error> {
        let update: BUpdate = serde_json::from_slice(payload)?;
        Ok(Invalidation::Merge(update.id, PairPatch::B(update.b)))
    }

    fn decode_full(payload: &[u8]) -> Result<Invalidation<String, Pair>, serde_json::Error> {
        let pair: Pair = serde_json::from_slice(payload)?;
        Ok(Invalidation::Replace(pair.id.clone(), pair))
    }

    fn router() -> (TtlStore<String, Pair>, InvalidationRouter<String, Pair>) {
        let store = TtlStore::new("test", &CacheConfig::default().ttl(Duration::from_secs(60)));
        let router = InvalidationRouter::new(store.clone())
            .route("delete", decode_delete)
            .route("b", decode_b)
            .route("full", decode_full);
        (store, router)
    }

    fn pair(a: u32, b: u32) -> Pair {
        Pair { id: "k".to_string(), a, b }
    }

    #[tokio::test(start_paused = true)]
    async fn test_merge_preserves_untouched_fields() {
        let (store, router) = router();
        store.set("k".to_string(), pair(1, 2));

        let applied = router.apply(Invalidation::Merge("k".to_string(), PairPatch::B(3)));

        assert_eq!(applied, Applied::Merged);
        assert_eq!(store.get(&"k".to_string()), Some(pair(1, 3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_merge_and_replace_drop_when_absent() {
        let (store, router) = router();

        assert_eq!(
            router.apply(Invalidation::Merge("k".to_string(), PairPatch::B(3))),
            Applied::Dropped
        );
        assert_eq!(router.apply(Invalidation::Replace("k".to_string(), pair(5, 5))), Applied::Dropped);
        assert!(!store.has(&"k".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_existing() {
        let (store, router) = router();
        store.set("k".to_string(), pair(1, 2));

        let applied = router.handle("full", br#"{"id":"k","a":7,"b":8}"#).unwrap();

        assert_eq!(applied, Applied::Replaced);
        assert_eq!(store.get(&"k".to_string()), Some(pair(7, 8)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_twice() {
        let (store, router) = router();
        store.set("k".to_string(), pair(1, 2));

        assert_eq!(router.handle("delete", br#"{"id":"k"}"#).unwrap(), Applied::Deleted);
        assert!(!store.has(&"k".to_string()));
        assert_eq!(router.handle("delete", br#"{"id":"k"}"#).unwrap(), Applied::Deleted);
        assert!(!store.has(&"k".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_rejects_unknown_and_malformed() {
        let (store, router) = router();
        store.set("k".to_string(), pair(1, 2));

        assert!(matches!(
            router.handle("nope", b"{}"),
            Err(EventError::UnknownChannel(_))
        ));
        assert!(matches!(
            router.handle("b", b"not json"),
            Err(EventError::Decode { .. })
        ));
        assert_eq!(store.get(&"k".to_string()), Some(pair(1, 2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_applies_bus_messages_in_order() {
        let (store, router) = router();
        let bus = LocalBus::new();
        let subs = router.subscribe(&bus);
        assert_eq!(subs.len(), 3);

        store.set("k".to_string(), pair(1, 2));
        bus.publish("b", br#"{"id":"k","b":4}"#);
        bus.publish("b", br#"{"id":"k","b":5}"#);
        assert_eq!(store.get(&"k".to_string()), Some(pair(1, 5)));

        bus.publish("b", b"garbage");
        assert_eq!(store.get(&"k".to_string()), Some(pair(1, 5)));

        drop(subs);
        bus.publish("delete", br#"{"id":"k"}"#);
        assert!(store.has(&"k".to_string()));
    }
}
