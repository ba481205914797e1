//! Sequenced broadcast channels for agent output.
//!
//! The [`EventBus`] carries two independent channels:
//! - `logs`: every raw line the agent prints ([`RawLogLine`])
//! - `events`: classified records ([`StructuredEvent`])
//!
//! Publishing stamps each item with the channel's next sequence number and the
//! current time, then hands it to a tokio broadcast channel. Sequence numbers
//! only grow for the lifetime of the bus; they are not reset when the agent
//! restarts.
//!
//! Every subscriber reads with its own cursor, starting at the first item
//! published after it subscribed. Publishing never waits on a subscriber:
//! once a subscriber falls `capacity` items behind, its oldest unread items
//! are dropped for that subscriber only and it resumes at the oldest item
//! still buffered. Delivery is at-most-once.
//!
//! # Example
//!
//! ```rust
//! use parley_core::event::EventKind;
//! use parley_core::event_bus::EventBus;
//!
//! let bus = EventBus::new();
//!
//! // Subscribe to structured events
//! let _sub = bus.events().subscribe();
//!
//! // Publish a state change
//! let seq = bus.publish_event(EventKind::AgentState("listening".into()));
//! assert_eq!(seq, 1);
//!
//! // Receive it (in async context)
//! // let event = sub.recv().await.unwrap();
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::event::{EventKind, RawLogLine, StructuredEvent};

/// Default per-subscriber backlog for the logs channel.
pub const DEFAULT_LOGS_CAPACITY: usize = 500;

/// Default per-subscriber backlog for the events channel.
pub const DEFAULT_EVENTS_CAPACITY: usize = 200;

/// The two logical channels of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelName {
    Logs,
    Events,
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelName::Logs => write!(f, "logs"),
            ChannelName::Events => write!(f, "events"),
        }
    }
}

/// An item the bus stamps with a sequence number and timestamp on publish.
pub trait Sequenced: fmt::Debug + Send + Sync + 'static {
    /// What the publisher hands over.
    type Body;

    fn stamp(seq: u64, ts: DateTime<Utc>, body: Self::Body) -> Self;

    fn seq(&self) -> u64;
}

impl Sequenced for RawLogLine {
    type Body = String;

    fn stamp(seq: u64, ts: DateTime<Utc>, line: String) -> Self {
        Self { seq, ts, line }
    }

    fn seq(&self) -> u64 {
        self.seq
    }
}

impl Sequenced for StructuredEvent {
    type Body = EventKind;

    fn stamp(seq: u64, ts: DateTime<Utc>, kind: EventKind) -> Self {
        Self { kind, seq, ts }
    }

    fn seq(&self) -> u64 {
        self.seq
    }
}

struct ChannelInner<T> {
    next_seq: u64,
    /// `None` once the channel has been closed.
    sender: Option<broadcast::Sender<Arc<T>>>,
}

/// One broadcast channel of the bus.
pub struct Channel<T: Sequenced> {
    name: ChannelName,
    capacity: usize,
    inner: Mutex<ChannelInner<T>>,
}

impl<T: Sequenced> Channel<T> {
    /// Create a channel buffering up to `capacity` items per subscriber.
    pub fn new(name: ChannelName, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            name,
            capacity,
            inner: Mutex::new(ChannelInner {
                next_seq: 1,
                sender: Some(sender),
            }),
        }
    }

    // The guarded data is a counter and a sender, both valid at every point.
    fn lock(&self) -> MutexGuard<'_, ChannelInner<T>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn name(&self) -> ChannelName {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Publish an item to every current subscriber.
    ///
    /// Returns the sequence number assigned to the item. A number is assigned
    /// even when nobody is subscribed or the channel is closed; the item is
    /// then simply not delivered.
    pub fn publish(&self, body: T::Body) -> u64 {
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let item = Arc::new(T::stamp(seq, Utc::now(), body));
        if let Some(sender) = &inner.sender {
            // Err only means there are no subscribers right now.
            let _ = sender.send(item);
        }
        seq
    }

    /// Subscribe to items published from now on.
    ///
    /// Subscribing to a closed channel yields a subscription that is already
    /// finished.
    pub fn subscribe(&self) -> Subscription<T> {
        let rx = self.lock().sender.as_ref().map(|sender| sender.subscribe());
        if rx.is_some() {
            log::debug!("New {} subscriber", self.name);
        }
        Subscription {
            channel: self.name,
            rx,
            dropped: 0,
        }
    }

    /// Get the current number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock()
            .sender
            .as_ref()
            .map_or(0, |sender| sender.receiver_count())
    }

    /// Sequence number of the most recently published item (0 if none).
    pub fn last_seq(&self) -> u64 {
        self.lock().next_seq - 1
    }

    /// Close the channel. Subscribers drain what they already have buffered,
    /// then their `recv` returns `None`.
    pub fn close(&self) {
        if self.lock().sender.take().is_some() {
            log::debug!("Closed {} channel", self.name);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().sender.is_none()
    }
}

/// A subscriber's cursor into one channel.
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription<T> {
    channel: ChannelName,
    rx: Option<broadcast::Receiver<Arc<T>>>,
    dropped: u64,
}

impl<T> Subscription<T> {
    /// Wait for the next item.
    ///
    /// Skips over items lost to lag (counted in [`Subscription::dropped`]).
    /// Returns `None` once unsubscribed or once the channel is closed and
    /// drained.
    pub async fn recv(&mut self) -> Option<Arc<T>> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.recv().await {
                Ok(item) => return Some(item),
                Err(RecvError::Lagged(count)) => self.record_lag(count),
                Err(RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Take the next item if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Arc<T>> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.try_recv() {
                Ok(item) => return Some(item),
                Err(TryRecvError::Lagged(count)) => self.record_lag(count),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    fn record_lag(&mut self, count: u64) {
        self.dropped += count;
        log::warn!(
            "{} subscriber fell behind, dropped {} oldest items",
            self.channel,
            count
        );
    }

    /// Total number of items this subscriber lost to lag.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn channel(&self) -> ChannelName {
        self.channel
    }

    /// Whether this subscription can still yield items.
    pub fn is_active(&self) -> bool {
        self.rx.is_some()
    }

    /// Release the subscription. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        if self.rx.take().is_some() {
            log::debug!("{} subscriber unsubscribed", self.channel);
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// The logs and events channels, shared by the supervisor and every stream.
pub struct EventBus {
    logs: Channel<RawLogLine>,
    events: Channel<StructuredEvent>,
}

impl EventBus {
    /// Create a new EventBus with default capacities.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOGS_CAPACITY, DEFAULT_EVENTS_CAPACITY)
    }

    /// Create a new EventBus with the given per-subscriber capacities.
    pub fn with_capacity(logs_capacity: usize, events_capacity: usize) -> Self {
        Self {
            logs: Channel::new(ChannelName::Logs, logs_capacity),
            events: Channel::new(ChannelName::Events, events_capacity),
        }
    }

    pub fn logs(&self) -> &Channel<RawLogLine> {
        &self.logs
    }

    pub fn events(&self) -> &Channel<StructuredEvent> {
        &self.events
    }

    /// Publish a raw output line on the logs channel.
    pub fn publish_log(&self, line: impl Into<String>) -> u64 {
        self.logs.publish(line.into())
    }

    /// Publish a structured event on the events channel.
    pub fn publish_event(&self, kind: EventKind) -> u64 {
        self.events.publish(kind)
    }

    /// Close both channels, ending every open subscription.
    pub fn close(&self) {
        self.logs.close();
        self.events.close();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
