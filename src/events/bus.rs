//! Event bus subscription contract and an in-process implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, trace};

/// Callback invoked with the raw payload of every message on a channel.
pub type Handler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Anything that can deliver named-channel messages to handlers.
pub trait EventBus: Send + Sync {
    /// Register `handler` for `channel`. Messages stop arriving once the
    /// returned subscription is unsubscribed or dropped.
    fn subscribe(&self, channel: &str, handler: Handler) -> Subscription;
}

/// Disposable registration of a handler on an event bus.
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription {
    channel: String,
    dispose: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, dispose: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            channel: channel.into(),
            dispose: Some(Box::new(dispose)),
        }
    }

    /// Channel this subscription listens on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Stop receiving messages.
    pub fn unsubscribe(mut self) {
        self.dispose_now();
    }

    fn dispose_now(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
            debug!("Unsubscribed from {}", self.channel);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("active", &self.dispose.is_some())
            .finish()
    }
}

type HandlerTable = HashMap<String, Vec<(u64, Handler)>>;

/// In-process event bus.
///
/// `publish` runs every handler for the channel synchronously, in
/// subscription order, before returning.
#[derive(Clone, Default)]
pub struct LocalBus {
    handlers: Arc<RwLock<HandlerTable>>,
    next_id: Arc<AtomicU64>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `payload` to every handler on `channel`.
    ///
    /// Returns the number of handlers that received it.
    pub fn publish(&self, channel: &str, payload: &[u8]) -> usize {
        // Snapshot so handlers may (un)subscribe without deadlocking.
        let handlers: Vec<Handler> = match self.handlers.read().get(channel) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => Vec::new(),
        };

        trace!("Publishing to {} ({} handlers)", channel, handlers.len());
        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.handlers.read().get(channel).map_or(0, Vec::len)
    }
}

impl EventBus for LocalBus {
    fn subscribe(&self, channel: &str, handler: Handler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .write()
            .entry(channel.to_string())
            .or_default()
            .push((id, handler));

        let handlers: Weak<RwLock<HandlerTable>> = Arc::downgrade(&self.handlers);
        let key = channel.to_string();
        Subscription::new(channel, move || {
            if let Some(handlers) = handlers.upgrade() {
                let mut table = handlers.write();
                if let Some(list) = table.get_mut(&key) {
                    list.retain(|(sid, _)| *sid != id);
                    if list.is_empty() {
                        table.remove(&key);
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.handlers.read();
        f.debug_struct("LocalBus")
            .field("channels", &table.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, Handler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: Handler = Arc::new(move |payload: &[u8]| {
            sink.lock().unwrap().push(String::from_utf8_lossy(payload).into_owned());
        });
        (seen, handler)
    }

    #[test]
    fn test_publish_reaches_channel_subscribers_in_order() {
        let bus = LocalBus::new();
        let (seen, handler) = recorder();
        let _sub = bus.subscribe("a", handler);

        assert_eq!(bus.publish("a", b"one"), 1);
        assert_eq!(bus.publish("b", b"ignored"), 0);
        assert_eq!(bus.publish("a", b"two"), 1);

        assert_eq!(*seen.lock().unwrap(), vec!["one", "two"]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = LocalBus::new();
        let (seen, handler) = recorder();
        let sub = bus.subscribe("a", handler);

        sub.unsubscribe();
        assert_eq!(bus.publish("a", b"late"), 0);
        assert_eq!(bus.subscriber_count("a"), 0);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_drop_unsubscribes_only_itself() {
        let bus = LocalBus::new();
        let (first_seen, first) = recorder();
        let (second_seen, second) = recorder();
        let sub1 = bus.subscribe("a", first);
        let _sub2 = bus.subscribe("a", second);

        drop(sub1);
        bus.publish("a", b"msg");

        assert!(first_seen.lock().unwrap().is_empty());
        assert_eq!(*second_seen.lock().unwrap(), vec!["msg"]);
    }

    #[test]
    fn test_subscription_outlives_bus() {
        let bus = LocalBus::new();
        let (_seen, handler) = recorder();
        let sub = bus.subscribe("a", handler);

        drop(bus);
        sub.unsubscribe();
    }
}
