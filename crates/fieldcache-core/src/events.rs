//! Event bus
//!
//! Fans events out to subscribers of their type. A panicking subscriber is
//! isolated: delivery to the others and the publisher are unaffected.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::partition::Partition;
use crate::sync::SyncResult;

/// Kinds of events subscribers can register for
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    SyncComplete,
    CacheUpdated,
    OfflineFallbackServed,
    ActionQueued,
    PushReceived,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SyncComplete => "sync-complete",
            EventType::CacheUpdated => "cache-updated",
            EventType::OfflineFallbackServed => "offline-fallback-served",
            EventType::ActionQueued => "action-queued",
            EventType::PushReceived => "push-received",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event payloads
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Event {
    /// Terminal outcome of a queued action
    SyncComplete(SyncResult),
    /// A background revalidation refreshed an entry
    CacheUpdated { partition: Partition, key: String },
    /// A fallback response was served
    OfflineFallbackServed { url: String, navigation: bool },
    /// A mutating request was persisted to the sync queue
    ActionQueued { action_id: String, category: String },
    /// A push message arrived
    PushReceived {
        title: String,
        tag: Option<String>,
    },
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::SyncComplete(_) => EventType::SyncComplete,
            Event::CacheUpdated { .. } => EventType::CacheUpdated,
            Event::OfflineFallbackServed { .. } => EventType::OfflineFallbackServed,
            Event::ActionQueued { .. } => EventType::ActionQueued,
            Event::PushReceived { .. } => EventType::PushReceived,
        }
    }
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Publish/subscribe fan-out
pub struct EventBus {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<EventType, Vec<(SubscriptionId, Handler)>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for one event type
    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(event_type)
            .or_default()
            .push((id, Arc::new(handler)));
        debug!("Subscription {:?} registered for {}", id, event_type);
        id
    }

    /// Receive events of one type on a channel
    pub fn subscribe_channel(
        &self,
        event_type: EventType,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(event_type, move |event| {
            // Receiver gone; the subscription is inert until removed
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let mut removed = false;
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|(sid, _)| *sid != id);
            removed |= list.len() != before;
        }
        removed
    }

    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.handlers
            .read()
            .get(&event_type)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Deliver an event to every subscriber of its type. Returns the number
    /// of handlers that completed.
    pub fn publish(&self, event: Event) -> usize {
        let event_type = event.event_type();
        let handlers: Vec<Handler> = match self.handlers.read().get(&event_type) {
            Some(list) => list.iter().map(|(_, h)| h.clone()).collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!("Subscriber for {} panicked", event_type),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn queued(id: &str) -> Event {
        Event::ActionQueued {
            action_id: id.to_string(),
            category: "leads".to_string(),
        }
    }

    #[test]
    fn test_fan_out_by_type() {
        let bus = EventBus::new();
        let queued_count = Arc::new(AtomicUsize::new(0));
        let updated_count = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let c = queued_count.clone();
            bus.subscribe(EventType::ActionQueued, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        let c = updated_count.clone();
        bus.subscribe(EventType::CacheUpdated, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.publish(queued("a")), 2);
        assert_eq!(queued_count.load(Ordering::SeqCst), 2);
        assert_eq!(updated_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        bus.subscribe(EventType::ActionQueued, |_| panic!("subscriber bug"));
        let c = seen.clone();
        bus.subscribe(EventType::ActionQueued, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.publish(queued("a")), 1);
        assert_eq!(bus.publish(queued("b")), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let id = bus.subscribe(EventType::PushReceived, |_| {});
        assert_eq!(bus.subscriber_count(EventType::PushReceived), 1);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.publish(Event::PushReceived {
            title: "x".to_string(),
            tag: None,
        }), 0);
    }

    #[tokio::test]
    async fn test_channel_subscription() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.subscribe_channel(EventType::ActionQueued);

        bus.publish(queued("a"));
        assert_eq!(rx.recv().await, Some(queued("a")));
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(Event::CacheUpdated {
            partition: Partition::Dynamic,
            key: "GET https://crm.local/".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "cache-updated");
        assert_eq!(json["partition"], "dynamic");
    }
}
