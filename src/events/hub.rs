//! Fan-out publish/subscribe hub for push-channel clients.
//!
//! Every subscriber owns a bounded queue. Publishing never waits: when a
//! subscriber's queue is full the event is dropped for that subscriber only.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use super::Event;
use crate::util::sync::{read_lock, write_lock};

/// Opaque subscriber identifier.
pub type SubscriberId = Uuid;

type EventFilter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

struct SubscriberSlot {
    tx: mpsc::Sender<Arc<Event>>,
    filter: Option<EventFilter>,
}

/// Registry of connected subscribers.
pub struct EventHub {
    subscribers: RwLock<HashMap<SubscriberId, SubscriberSlot>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl EventHub {
    /// Create a hub whose subscribers each buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a subscriber that receives every event.
    pub fn register(&self) -> Subscriber {
        self.insert(None)
    }

    /// Register a subscriber that only receives events accepted by `filter`.
    pub fn register_filtered<F>(&self, filter: F) -> Subscriber
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.insert(Some(Arc::new(filter)))
    }

    /// Register a subscriber for one session's events plus global events.
    pub fn register_for_session(&self, session_id: impl Into<String>) -> Subscriber {
        let session_id = session_id.into();
        self.register_filtered(move |event| {
            event
                .session_id
                .as_deref()
                .map_or(true, |id| id == session_id)
        })
    }

    fn insert(&self, filter: Option<EventFilter>) -> Subscriber {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = Uuid::new_v4();
        write_lock(&self.subscribers).insert(id, SubscriberSlot { tx, filter });
        tracing::debug!(subscriber_id = %id, "subscriber registered");
        Subscriber { id, rx }
    }

    /// Remove a subscriber and close its queue. Returns `false` if it was
    /// already gone.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let removed = write_lock(&self.subscribers).remove(&id).is_some();
        if removed {
            tracing::debug!(subscriber_id = %id, "subscriber unregistered");
        }
        removed
    }

    /// Deliver `event` to every registered subscriber without blocking.
    /// Returns the number of subscribers that accepted it.
    pub fn broadcast(&self, event: Event) -> usize {
        let event = Arc::new(event);
        let mut delivered = 0usize;
        let mut closed = Vec::new();
        {
            let subscribers = read_lock(&self.subscribers);
            for (id, slot) in subscribers.iter() {
                if let Some(filter) = &slot.filter {
                    match panic::catch_unwind(AssertUnwindSafe(|| filter(&event))) {
                        Ok(true) => {}
                        Ok(false) => continue,
                        Err(_) => {
                            tracing::warn!(
                                subscriber_id = %id,
                                event_type = %event.kind,
                                "subscriber filter panicked; event skipped"
                            );
                            continue;
                        }
                    }
                }
                match slot.tx.try_send(Arc::clone(&event)) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            subscriber_id = %id,
                            event_type = %event.kind,
                            "subscriber queue full; event dropped"
                        );
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }
        if !closed.is_empty() {
            let mut subscribers = write_lock(&self.subscribers);
            for id in closed {
                subscribers.remove(&id);
                tracing::debug!(subscriber_id = %id, "pruned disconnected subscriber");
            }
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        read_lock(&self.subscribers).len()
    }

    /// Total events dropped because a subscriber queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.subscriber_count())
            .field("capacity", &self.capacity)
            .field("dropped", &self.dropped_events())
            .finish()
    }
}

/// Receiving side of one connected client.
#[derive(Debug)]
pub struct Subscriber {
    id: SubscriberId,
    rx: mpsc::Receiver<Arc<Event>>,
}

impl Subscriber {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next event. `None` once unregistered and drained.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.rx.recv().await
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        self.rx.try_recv().ok()
    }

    /// Drain everything currently queued.
    pub fn drain(&mut self) -> Vec<Arc<Event>> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn into_stream(self) -> ReceiverStream<Arc<Event>> {
        ReceiverStream::new(self.rx)
    }
}
