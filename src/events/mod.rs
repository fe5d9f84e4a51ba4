// src/events/mod.rs
//! Event bus
//!
//! The only coupling between the task queue and the agent runtime: the
//! queue publishes `task.*` events, the runtime publishes `agent.*` events
//! and subscribes to `task.enqueued` for low-latency dispatch.

pub mod bus;
pub mod event;
pub mod journal;

pub use bus::{EventBus, Subscription};
pub use event::{Event, EventPayload, Topic};
pub use journal::{EventJournal, JournalStats};
