//! Bounded event queues connecting component groups.
//!
//! A component group's `num_instances` workers share a single bounded
//! queue: the sender side is a plain clone-able handle, the receiver
//! side multiplexes one `mpsc` receiver behind an async mutex so that
//! any idle worker can pick up the next event (MPMC). Backpressure is
//! the queue bound itself - a full queue blocks the producer's send.

use crate::Event;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

/// Default input queue capacity per component group.
pub const DEFAULT_QUEUE_DEPTH: usize = 5;

/// The receiving half of a queue has been dropped.
#[derive(Debug, Error)]
#[error("event queue closed")]
pub struct QueueClosed;

/// Creates a bounded event queue of the given depth.
///
/// # Panics
///
/// Panics if `depth` is zero; configuration validation rejects
/// `queue_depth: 0` before a queue is ever created.
#[must_use]
pub fn event_channel(depth: usize) -> (EventSender, EventReceiver) {
    assert!(depth > 0, "queue depth must be at least 1");
    let (tx, rx) = mpsc::channel(depth);
    (
        EventSender { tx },
        EventReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Producer endpoint of a bounded event queue.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
}

impl EventSender {
    /// Enqueues an event, waiting while the queue is full.
    pub async fn send(&self, event: Event) -> Result<(), QueueClosed> {
        self.tx.send(event).await.map_err(|_| QueueClosed)
    }

    /// Enqueues an event without waiting. Returns `false` when the
    /// queue is full or closed.
    pub fn try_send(&self, event: Event) -> bool {
        self.tx.try_send(event).is_ok()
    }

    /// Returns true if the consuming side is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl std::fmt::Debug for EventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSender")
            .field("capacity", &self.tx.max_capacity())
            .finish()
    }
}

/// Consumer endpoint of a bounded event queue, shareable by a worker
/// group.
#[derive(Clone)]
pub struct EventReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Event>>>,
}

impl EventReceiver {
    /// Receives the next event; `None` when every sender is gone.
    ///
    /// Only one worker of the group waits on the underlying receiver
    /// at a time; the others queue on the mutex and take subsequent
    /// events.
    pub async fn recv(&self) -> Option<Event> {
        self.rx.lock().await.recv().await
    }

    /// Takes an already-queued event without waiting.
    pub fn try_recv(&self) -> Option<Event> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}

impl std::fmt::Debug for EventReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EventReceiver")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;
    use braid_types::Payload;

    #[tokio::test]
    async fn events_flow_in_order() {
        let (tx, rx) = event_channel(4);
        tx.send(Event::message(Message::new(Payload::Text("a".into()))))
            .await
            .expect("send");
        tx.send(Event::Stop).await.expect("send");

        assert!(matches!(rx.recv().await, Some(Event::Message(_))));
        assert!(matches!(rx.recv().await, Some(Event::Stop)));
    }

    #[tokio::test]
    async fn full_queue_blocks_until_consumed() {
        let (tx, rx) = event_channel(1);
        tx.send(Event::Stop).await.expect("send");
        assert!(!tx.try_send(Event::Stop));

        rx.recv().await.expect("recv");
        assert!(tx.try_send(Event::Stop));
    }

    #[tokio::test]
    async fn two_consumers_share_one_queue() {
        let (tx, rx) = event_channel(8);
        let rx_b = rx.clone();

        for _ in 0..2 {
            tx.send(Event::Stop).await.expect("send");
        }
        assert!(matches!(rx.recv().await, Some(Event::Stop)));
        assert!(matches!(rx_b.recv().await, Some(Event::Stop)));
    }
}
