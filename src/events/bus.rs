// src/events/bus.rs
//! In-process publish/subscribe registry
//!
//! Delivery is synchronous: `publish` invokes every current subscriber of
//! the event's topic, in subscription order, on the caller's task. The
//! subscriber list is copied out before handlers run, so a handler may
//! publish or (un)subscribe without deadlocking the bus.

use crate::events::event::{Event, EventPayload, Topic};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error};

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

struct BusInner {
    subscribers: RwLock<HashMap<Topic, Vec<(u64, Handler)>>>,
    next_id: AtomicU64,
    published: AtomicU64,
}

/// Cloneable handle to a shared event bus
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                published: AtomicU64::new(0),
            }),
        }
    }

    /// Register `handler` for `topic`.
    ///
    /// The returned [`Subscription`] does not unsubscribe on drop; call
    /// [`Subscription::unsubscribe`] explicitly.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .write()
            .entry(topic)
            .or_default()
            .push((id, Arc::new(handler)));

        debug!("Subscribed {} to {}", id, topic);

        Subscription {
            bus: Arc::downgrade(&self.inner),
            topic,
            id,
        }
    }

    /// Wrap `payload` in an envelope and deliver it to the topic's subscribers.
    ///
    /// A panicking handler is logged and skipped; later handlers still run.
    pub fn publish(&self, payload: EventPayload) -> Event {
        let event = Event::new(payload);
        let handlers: Vec<Handler> = self
            .inner
            .subscribers
            .read()
            .get(&event.topic)
            .map(|subs| subs.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        self.inner.published.fetch_add(1, Ordering::Relaxed);

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                error!("Subscriber for {} panicked (event {})", event.topic, event.id);
            }
        }

        event
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.inner
            .subscribers
            .read()
            .get(&topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Total events published since creation
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Unsubscribe capability returned by [`EventBus::subscribe`]
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<BusInner>,
    topic: Topic,
    id: u64,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Remove the handler. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(bus) = self.bus.upgrade() else {
            return false;
        };

        let mut subscribers = bus.subscribers.write();
        let Some(list) = subscribers.get_mut(&self.topic) else {
            return false;
        };

        let before = list.len();
        list.retain(|(id, _)| *id != self.id);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(&self.topic);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn stopped(agent_id: &str) -> EventPayload {
        EventPayload::AgentStopped {
            agent_id: agent_id.to_string(),
        }
    }

    #[test]
    fn test_delivery_in_subscription_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let seen = Arc::clone(&seen);
            bus.subscribe(Topic::AgentStopped, move |_| seen.lock().push(n));
        }

        bus.publish(stopped("a1"));
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_only_matching_topic() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));

        let h = Arc::clone(&hits);
        bus.subscribe(Topic::AgentStarted, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(stopped("a1"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.published_count(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));

        let h = Arc::clone(&hits);
        let sub = bus.subscribe(Topic::AgentStopped, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(bus.subscriber_count(Topic::AgentStopped), 1);

        bus.publish(stopped("a1"));
        assert!(sub.unsubscribe());
        bus.publish(stopped("a1"));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(Topic::AgentStopped), 0);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));

        bus.subscribe(Topic::AgentStopped, |_| panic!("boom"));
        let h = Arc::clone(&hits);
        bus.subscribe(Topic::AgentStopped, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(stopped("a1"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_publish() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));

        let inner_bus = bus.clone();
        bus.subscribe(Topic::AgentStarted, move |_| {
            inner_bus.publish(stopped("a1"));
        });
        let h = Arc::clone(&hits);
        bus.subscribe(Topic::AgentStopped, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(EventPayload::AgentStarted {
            agent_id: "a1".into(),
            worker_id: "a1-0".into(),
            name: "Dev".into(),
            status: crate::domain::agent::AgentStatus::Idle,
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
