//! Channel-based publish/subscribe fanout
//!
//! Publishers emit a message on a named channel; subscribers in any process
//! receive it via the backing [`MessageBus`]. This module owns the one
//! piece of in-process mutable shared state in the toolkit: the registry
//! mapping channel names to local subscriber handlers. Channel interest is
//! reference-counted against the bus - a channel is subscribed at bus level
//! if and only if its local subscriber set is non-empty.
//!
//! Channel names are namespaced with a deployment prefix before touching
//! the bus and stripped back on receipt; deliveries on a foreign namespace
//! or with no local subscriber are dropped with a diagnostic.

mod bus;

pub use bus::{BusDelivery, BusError, LocalBus, MessageBus, RedisBus};

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

static CHANNEL_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[a-zA-Z0-9_]+$").expect("channel name pattern compiles"));

/// Strict allow-list for client-chosen sub-channel names.
///
/// Prevents channel-name injection into the shared namespace (separators,
/// path fragments, empty names).
pub fn valid_channel_name(name: &str) -> bool {
    CHANNEL_NAME.is_match(name)
}

/// A local subscriber: invoked with each payload delivered on its channel
pub type Subscriber = Arc<dyn Fn(&str) + Send + Sync>;

struct PubSubInner {
    bus: Arc<dyn MessageBus>,
    prefix: String,
    subscribers: RwLock<HashMap<String, HashMap<u64, Subscriber>>>,
    next_id: AtomicU64,
}

impl PubSubInner {
    fn encode(&self, channel: &str) -> String {
        format!("{}{}", self.prefix, channel)
    }

    fn decode<'a>(&self, raw_channel: &'a str) -> Option<&'a str> {
        raw_channel.strip_prefix(&self.prefix)
    }

    async fn dispatch(&self, raw_channel: &str, payload: &str) {
        let Some(channel) = self.decode(raw_channel) else {
            warn!(
                raw_channel,
                "received message on foreign namespace, dropping"
            );
            return;
        };

        let subscribers = self.subscribers.read().await;
        match subscribers.get(channel) {
            Some(handlers) if !handlers.is_empty() => {
                for handler in handlers.values() {
                    handler(payload);
                }
            }
            _ => warn!(channel, "received message with no local subscribers"),
        }
    }

}

/// Publish/subscribe fanout over a backing bus.
///
/// Cheap to clone; all clones share one registry and one bus connection.
#[derive(Clone)]
pub struct PubSub {
    inner: Arc<PubSubInner>,
}

impl PubSub {
    /// Create the fanout layer over `bus`, namespacing every channel with
    /// `{namespace}:`. Spawns the dispatch task that drains the bus
    /// delivery stream.
    pub fn new(bus: Arc<dyn MessageBus>, namespace: &str) -> Self {
        let deliveries = bus.take_deliveries();
        let inner = Arc::new(PubSubInner {
            bus,
            prefix: format!("{}:", namespace),
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        });

        match deliveries {
            Some(mut rx) => {
                let dispatch = Arc::downgrade(&inner);
                tokio::spawn(async move {
                    while let Some((raw_channel, payload)) = rx.recv().await {
                        let Some(inner) = dispatch.upgrade() else { break };
                        inner.dispatch(&raw_channel, &payload).await;
                    }
                    debug!("pub/sub dispatch task finished");
                });
            }
            None => warn!("bus delivery stream already taken; dispatch disabled"),
        }

        Self { inner }
    }

    /// Broadcast `message` to every subscriber of `channel`, in every
    /// process attached to the bus. Best effort; no delivery guarantee.
    pub async fn publish(&self, channel: &str, message: &str) -> Result<(), BusError> {
        self.inner
            .bus
            .publish(&self.inner.encode(channel), message)
            .await
    }

    /// Register `handler` for messages on `channel`.
    ///
    /// The first handler on a previously-uninterested channel triggers the
    /// bus-level subscription. The returned [`Subscription`] is the
    /// capability for removing exactly this handler.
    pub async fn subscribe(
        &self,
        channel: &str,
        handler: Subscriber,
    ) -> Result<Subscription, BusError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        // Bus interest is reconciled while the registry write lock is held:
        // releasing it between registration and the bus call would let a
        // concurrent subscribe/unsubscribe on the same channel reorder the
        // bus commands and strand a registered handler without a bus
        // subscription. Both bus implementations resolve the call without
        // touching this registry, so no lock ordering issue arises.
        let mut subscribers = self.inner.subscribers.write().await;
        let first_for_channel = {
            let handlers = subscribers.entry(channel.to_string()).or_default();
            let first = handlers.is_empty();
            handlers.insert(id, handler);
            first
        };

        if first_for_channel {
            if let Err(e) = self.inner.bus.subscribe(&self.inner.encode(channel)).await {
                // Undo the registration so the invariant (bus-subscribed
                // iff local set non-empty) holds.
                if let Some(handlers) = subscribers.get_mut(channel) {
                    handlers.remove(&id);
                    if handlers.is_empty() {
                        subscribers.remove(channel);
                    }
                }
                return Err(e);
            }
        }

        Ok(Subscription {
            inner: Arc::clone(&self.inner),
            channel: channel.to_string(),
            id,
        })
    }

    /// Number of local subscribers currently registered for `channel`
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .subscribers
            .read()
            .await
            .get(channel)
            .map_or(0, HashMap::len)
    }
}

/// Unsubscribe capability returned by [`PubSub::subscribe`].
///
/// Dropping it without calling [`unsubscribe`](Self::unsubscribe) leaves
/// the handler registered; connection teardown paths must invoke it
/// explicitly before discarding the connection.
pub struct Subscription {
    inner: Arc<PubSubInner>,
    channel: String,
    id: u64,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Remove this handler; when it was the channel's last, the bus-level
    /// subscription is torn down so no further traffic arrives.
    pub async fn unsubscribe(self) -> Result<(), BusError> {
        // The bus call stays under the registry write lock, mirroring
        // subscribe: a concurrent first subscriber must observe either the
        // handler still present or the bus teardown already issued, never
        // an in-between where its own bus subscribe can be overtaken.
        let mut subscribers = self.inner.subscribers.write().await;
        let last_for_channel = match subscribers.get_mut(&self.channel) {
            Some(handlers) => {
                handlers.remove(&self.id);
                if handlers.is_empty() {
                    subscribers.remove(&self.channel);
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        if last_for_channel {
            self.inner
                .bus
                .unsubscribe(&self.inner.encode(&self.channel))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn capture() -> (Subscriber, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: Subscriber = Arc::new(move |payload: &str| {
            let _ = tx.send(payload.to_string());
        });
        (handler, rx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<String>) -> Option<String> {
        timeout(Duration::from_millis(200), rx.recv())
            .await
            .ok()
            .flatten()
    }

    fn local_pubsub() -> (Arc<LocalBus>, PubSub) {
        let bus = Arc::new(LocalBus::new());
        let pubsub = PubSub::new(bus.clone(), "huddle");
        (bus, pubsub)
    }

    #[test]
    fn channel_name_allow_list() {
        assert!(valid_channel_name("lobby"));
        assert!(valid_channel_name("round_2"));
        assert!(valid_channel_name("ABC123"));
        assert!(!valid_channel_name(""));
        assert!(!valid_channel_name("../etc"));
        assert!(!valid_channel_name("team:lobby"));
        assert!(!valid_channel_name("a b"));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let (bus, pubsub) = local_pubsub();
        pubsub.publish("lobby", "hello").await.unwrap();
        assert!(!bus.is_subscribed("huddle:lobby").await);
    }

    #[tokio::test]
    async fn subscriber_receives_published_message() {
        let (bus, pubsub) = local_pubsub();
        let (handler, mut rx) = capture();

        let sub = pubsub.subscribe("team-42:lobby", handler).await.unwrap();
        assert!(bus.is_subscribed("huddle:team-42:lobby").await);

        pubsub.publish("team-42:lobby", "hello").await.unwrap();
        assert_eq!(recv(&mut rx).await.as_deref(), Some("hello"));

        sub.unsubscribe().await.unwrap();
    }

    #[tokio::test]
    async fn each_subscriber_receives_exactly_one_delivery() {
        let (_bus, pubsub) = local_pubsub();
        let (handler_a, mut rx_a) = capture();
        let (handler_b, mut rx_b) = capture();

        let sub_a = pubsub.subscribe("team-42:lobby", handler_a).await.unwrap();
        let sub_b = pubsub.subscribe("team-42:lobby", handler_b).await.unwrap();

        pubsub.publish("team-42:lobby", "hello").await.unwrap();

        assert_eq!(recv(&mut rx_a).await.as_deref(), Some("hello"));
        assert_eq!(recv(&mut rx_b).await.as_deref(), Some("hello"));
        assert!(recv(&mut rx_a).await.is_none());

        sub_a.unsubscribe().await.unwrap();
        sub_b.unsubscribe().await.unwrap();
    }

    #[tokio::test]
    async fn last_unsubscribe_tears_down_bus_subscription() {
        let (bus, pubsub) = local_pubsub();
        let (handler_a, _rx_a) = capture();
        let (handler_b, mut rx_b) = capture();

        let sub_a = pubsub.subscribe("ch", handler_a).await.unwrap();
        let sub_b = pubsub.subscribe("ch", handler_b).await.unwrap();

        sub_a.unsubscribe().await.unwrap();
        // One subscriber left: bus interest must survive.
        assert!(bus.is_subscribed("huddle:ch").await);
        pubsub.publish("ch", "still-on").await.unwrap();
        assert_eq!(recv(&mut rx_b).await.as_deref(), Some("still-on"));

        sub_b.unsubscribe().await.unwrap();
        assert!(!bus.is_subscribed("huddle:ch").await);
        assert_eq!(pubsub.subscriber_count("ch").await, 0);

        // Nobody listening and no bus interest: publish delivers to nobody.
        pubsub.publish("ch", "dropped").await.unwrap();
        assert!(recv(&mut rx_b).await.is_none());
    }

    #[tokio::test]
    async fn unsubscribed_handler_stops_receiving() {
        let (_bus, pubsub) = local_pubsub();
        let (handler, mut rx) = capture();

        let sub = pubsub.subscribe("ch", handler).await.unwrap();
        pubsub.publish("ch", "one").await.unwrap();
        assert_eq!(recv(&mut rx).await.as_deref(), Some("one"));

        sub.unsubscribe().await.unwrap();
        pubsub.publish("ch", "two").await.unwrap();
        assert!(recv(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn churned_channel_keeps_bus_interest_consistent() {
        let (bus, pubsub) = local_pubsub();

        // Concurrent subscribe/unsubscribe storms on one channel race the
        // first-subscriber and last-unsubscriber bus commands.
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let pubsub = pubsub.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..25 {
                    let (handler, _rx) = capture();
                    let sub = pubsub.subscribe("busy", handler).await.unwrap();
                    sub.unsubscribe().await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // Quiescent: no handlers, no bus interest.
        assert_eq!(pubsub.subscriber_count("busy").await, 0);
        assert!(!bus.is_subscribed("huddle:busy").await);

        // A fresh subscriber after the churn must be wired to the bus and
        // still receive traffic.
        let (handler, mut rx) = capture();
        let sub = pubsub.subscribe("busy", handler).await.unwrap();
        assert!(bus.is_subscribed("huddle:busy").await);
        pubsub.publish("busy", "after-churn").await.unwrap();
        assert_eq!(recv(&mut rx).await.as_deref(), Some("after-churn"));
        sub.unsubscribe().await.unwrap();
    }

    #[tokio::test]
    async fn foreign_namespace_deliveries_are_dropped() {
        let (bus, pubsub) = local_pubsub();
        let (handler, mut rx) = capture();
        let _sub = pubsub.subscribe("ch", handler).await.unwrap();

        // Force a raw-channel delivery outside our namespace.
        bus.subscribe("other:ch").await.unwrap();
        bus.publish("other:ch", "foreign").await.unwrap();

        assert!(recv(&mut rx).await.is_none());
    }
}
