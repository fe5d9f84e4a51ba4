// src/events/journal.rs
//! Bounded lock-free record of recently published events
//!
//! Subscribes to every topic and keeps the newest `capacity` events. When
//! full, the oldest event is overwritten.

use crate::events::bus::{EventBus, Subscription};
use crate::events::event::{Event, Topic};
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct JournalInner {
    queue: ArrayQueue<Event>,
    push_count: AtomicU64,
    drain_count: AtomicU64,
    overwrite_count: AtomicU64,
}

impl JournalInner {
    fn record(&self, event: Event) {
        self.push_count.fetch_add(1, Ordering::Relaxed);
        if self.queue.force_push(event).is_some() {
            self.overwrite_count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

pub struct EventJournal {
    inner: Arc<JournalInner>,
    subscriptions: Vec<Subscription>,
}

impl EventJournal {
    /// Attach a journal to `bus`. `capacity` must be non-zero.
    pub fn attach(bus: &EventBus, capacity: usize) -> Self {
        let inner = Arc::new(JournalInner {
            queue: ArrayQueue::new(capacity.max(1)),
            push_count: AtomicU64::new(0),
            drain_count: AtomicU64::new(0),
            overwrite_count: AtomicU64::new(0),
        });

        let subscriptions = Topic::ALL
            .iter()
            .map(|&topic| {
                let inner = Arc::clone(&inner);
                bus.subscribe(topic, move |event| inner.record(event.clone()))
            })
            .collect();

        Self {
            inner,
            subscriptions,
        }
    }

    /// Remove and return every recorded event, oldest first
    pub fn drain(&self) -> Vec<Event> {
        let mut events = Vec::with_capacity(self.inner.queue.len());
        while let Some(event) = self.inner.queue.pop() {
            events.push(event);
        }
        self.inner
            .drain_count
            .fetch_add(events.len() as u64, Ordering::Relaxed);
        events
    }

    pub fn len(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.queue.capacity()
    }

    pub fn stats(&self) -> JournalStats {
        JournalStats {
            push_count: self.inner.push_count.load(Ordering::Relaxed),
            drain_count: self.inner.drain_count.load(Ordering::Relaxed),
            overwrite_count: self.inner.overwrite_count.load(Ordering::Relaxed),
            current_size: self.inner.queue.len(),
            capacity: self.inner.queue.capacity(),
        }
    }

    /// Stop recording. Already recorded events stay drainable.
    pub fn detach(&mut self) {
        for sub in self.subscriptions.drain(..) {
            sub.unsubscribe();
        }
    }
}

/// Journal statistics
#[derive(Debug, Clone)]
pub struct JournalStats {
    /// Total events recorded
    pub push_count: u64,

    /// Total events drained
    pub drain_count: u64,

    /// Events lost to overwrite (journal full)
    pub overwrite_count: u64,

    pub current_size: usize,
    pub capacity: usize,
}

impl JournalStats {
    pub fn fill_percentage(&self) -> f64 {
        (self.current_size as f64 / self.capacity as f64) * 100.0
    }

    /// Percentage of recorded events that were overwritten
    pub fn overwrite_rate(&self) -> f64 {
        if self.push_count == 0 {
            0.0
        } else {
            (self.overwrite_count as f64 / self.push_count as f64) * 100.0
        }
    }
}
