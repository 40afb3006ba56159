//! In-process event bus with one bounded queue per subscriber.
//!
//! Publishing never blocks: a subscriber whose queue is full is considered
//! stalled and is dropped on the spot, so one slow listener cannot hold back
//! the rules or the other listeners.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::Stream;

use hubwatch_domain::event::RuleEvent;

use crate::sync::lock;

/// Default queue capacity per subscriber.
pub const DEFAULT_CAPACITY: usize = 128;

/// Identifier of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Inner {
    capacity: usize,
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<RuleEvent>>>,
}

/// Fan-out of rule events to any number of listeners.
///
/// Cloning is cheap; clones share the same subscriber set.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus whose subscribers each buffer up to `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity: capacity.max(1),
                next_id: AtomicU64::new(1),
                subscribers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a new listener.
    ///
    /// The subscription only sees events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.inner.capacity);
        lock(&self.inner.subscribers).insert(id, sender);
        tracing::debug!(subscriber = %id, "subscriber registered");
        Subscription {
            id,
            receiver,
            bus: Arc::clone(&self.inner),
        }
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        if lock(&self.inner.subscribers).remove(&id).is_some() {
            tracing::debug!(subscriber = %id, "subscriber removed");
        }
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    /// Deliver an event to every listener without waiting.
    pub fn publish(&self, event: RuleEvent) {
        let mut subscribers = lock(&self.inner.subscribers);
        subscribers.retain(|id, sender| match sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(subscriber = %id, "subscriber queue full, dropping subscriber");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(subscriber = %id, "subscriber gone");
                false
            }
        });
    }
}

/// A listener's end of the bus.
///
/// Yields events until the subscriber is removed (explicitly or for being
/// too slow). Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<RuleEvent>,
    bus: Arc<Inner>,
}

impl Subscription {
    /// This subscription's id.
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next event; `None` once the subscriber was removed and
    /// its queue is drained.
    pub async fn recv(&mut self) -> Option<RuleEvent> {
        self.receiver.recv().await
    }

    /// The next queued event, without waiting.
    pub fn try_recv(&mut self) -> Option<RuleEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = RuleEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        lock(&self.bus.subscribers).remove(&self.id);
    }
}
