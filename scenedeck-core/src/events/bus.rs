use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use scenedeck_model::{ProcessingEvent, SubscriberId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default per-subscriber buffer. Slow consumers lose events past this
/// depth; streaming clients are expected to refresh on reconnect.
const SUBSCRIBER_BUFFER: usize = 50;

pub type EventStream = mpsc::Receiver<ProcessingEvent>;

/// Process-wide fan-out of typed processing events.
///
/// Publishing never blocks: each subscriber owns a bounded buffer and a
/// full buffer drops the event for that subscriber only. Per-subscriber
/// ordering is FIFO for delivered events; there is no ordering guarantee
/// across subscribers.
#[derive(Debug)]
pub struct EventBus {
    subscribers: RwLock<HashMap<SubscriberId, mpsc::Sender<ProcessingEvent>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(SUBSCRIBER_BUFFER)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Registers a new subscriber and returns its id plus the stream of
    /// events published after this call.
    pub fn subscribe(&self) -> (SubscriberId, EventStream) {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.write().insert(id, tx);
        debug!(subscriber = %id, "event bus subscriber added");
        (id, rx)
    }

    /// Drops the subscriber's sender, which closes its stream.
    pub fn unsubscribe(&self, id: SubscriberId) {
        if self.subscribers.write().remove(&id).is_some() {
            debug!(subscriber = %id, "event bus subscriber removed");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Fans the event out to every subscriber with a non-blocking send.
    pub fn publish(&self, event: ProcessingEvent) {
        let mut closed = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for (id, tx) in subscribers.iter() {
                match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(
                            subscriber = %id,
                            kind = %event.kind,
                            "subscriber buffer full, dropping event"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }
        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in closed {
                subscribers.remove(&id);
            }
        }
    }
}
