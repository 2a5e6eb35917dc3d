//! Heap-based timer manager.
//!
//! One task per connector owns a min-heap of pending timers on the
//! monotonic clock. Firing enqueues a TIMER event onto the owning
//! component's input queue; interval timers reschedule from the last
//! scheduled firing time, so they do not drift under load.

use braid_component::{OwnerId, TimerService};
use braid_event::{Event, EventSender, TimerEvent};
use parking_lot::Mutex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct TimerEntry {
    deadline: Instant,
    interval: Option<Duration>,
    owner: OwnerId,
    timer_id: String,
    payload: Option<Value>,
    target: EventSender,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    // Reversed: BinaryHeap is a max-heap, the earliest deadline must
    // surface first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.deadline.cmp(&self.deadline)
    }
}

struct TimerShared {
    heap: Mutex<BinaryHeap<TimerEntry>>,
    notify: Notify,
}

/// The connector's timer service.
pub struct TimerManager {
    shared: Arc<TimerShared>,
}

impl TimerManager {
    /// Creates the manager and spawns its dispatch task. Must be
    /// called within a tokio runtime.
    #[must_use]
    pub fn new(stop: CancellationToken) -> Self {
        let shared = Arc::new(TimerShared {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
        });
        tokio::spawn(run(shared.clone(), stop));
        Self { shared }
    }
}

async fn run(shared: Arc<TimerShared>, stop: CancellationToken) {
    loop {
        // Pop everything due, reschedule intervals, note the next wake.
        let (due, next_deadline) = {
            let mut heap = shared.heap.lock();
            let now = Instant::now();
            let mut due = Vec::new();
            while heap.peek().map(|e| e.deadline <= now).unwrap_or(false) {
                if let Some(mut entry) = heap.pop() {
                    due.push((
                        entry.target.clone(),
                        TimerEvent {
                            timer_id: entry.timer_id.clone(),
                            payload: entry.payload.clone(),
                        },
                    ));
                    if let Some(interval) = entry.interval {
                        entry.deadline += interval;
                        heap.push(entry);
                    }
                }
            }
            (due, heap.peek().map(|e| e.deadline))
        };

        // Delivery happens outside the lock; a full input queue
        // backpressures timer dispatch, the same as any producer.
        for (target, event) in due {
            tokio::select! {
                _ = stop.cancelled() => return,
                result = target.send(Event::Timer(event)) => {
                    if result.is_err() {
                        debug!("timer target queue closed, dropping event");
                    }
                }
            }
        }

        let notified = shared.notify.notified();
        tokio::pin!(notified);
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = &mut notified => {}
            () = async {
                match next_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            } => {}
        }
    }
}

impl TimerService for TimerManager {
    fn add_timer(
        &self,
        owner: OwnerId,
        target: EventSender,
        delay: Duration,
        timer_id: &str,
        interval: Option<Duration>,
        payload: Option<Value>,
    ) {
        {
            let mut heap = self.shared.heap.lock();
            // Re-registering an id replaces the pending timer.
            let retained: Vec<TimerEntry> = heap
                .drain()
                .filter(|e| !(e.owner == owner && e.timer_id == timer_id))
                .collect();
            heap.extend(retained);
            heap.push(TimerEntry {
                deadline: Instant::now() + delay,
                interval,
                owner,
                timer_id: timer_id.to_string(),
                payload,
                target,
            });
        }
        self.shared.notify.notify_one();
    }

    fn cancel_timer(&self, owner: OwnerId, timer_id: &str) {
        let mut heap = self.shared.heap.lock();
        let retained: Vec<TimerEntry> = heap
            .drain()
            .filter(|e| !(e.owner == owner && e.timer_id == timer_id))
            .collect();
        heap.extend(retained);
    }

    fn cancel_owner(&self, owner: OwnerId) {
        let mut heap = self.shared.heap.lock();
        let retained: Vec<TimerEntry> = heap.drain().filter(|e| e.owner != owner).collect();
        heap.extend(retained);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_event::event_channel;

    #[tokio::test]
    async fn one_shot_timer_fires_once() {
        let stop = CancellationToken::new();
        let timers = TimerManager::new(stop.clone());
        let (tx, rx) = event_channel(8);

        timers.add_timer(
            1,
            tx,
            Duration::from_millis(10),
            "tick",
            None,
            Some(serde_json::json!({"n": 1})),
        );

        match rx.recv().await {
            Some(Event::Timer(event)) => {
                assert_eq!(event.timer_id, "tick");
                assert_eq!(event.payload, Some(serde_json::json!({"n": 1})));
            }
            other => panic!("expected timer event, got {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(rx.try_recv().is_none(), "one-shot fired twice");
        stop.cancel();
    }

    #[tokio::test]
    async fn interval_timer_reschedules() {
        let stop = CancellationToken::new();
        let timers = TimerManager::new(stop.clone());
        let (tx, rx) = event_channel(8);

        timers.add_timer(
            1,
            tx,
            Duration::from_millis(5),
            "beat",
            Some(Duration::from_millis(5)),
            None,
        );

        for _ in 0..3 {
            assert!(matches!(rx.recv().await, Some(Event::Timer(_))));
        }
        timers.cancel_timer(1, "beat");
        stop.cancel();
    }

    #[tokio::test]
    async fn cancel_owner_purges_pending_timers() {
        let stop = CancellationToken::new();
        let timers = TimerManager::new(stop.clone());
        let (tx, rx) = event_channel(8);

        timers.add_timer(7, tx.clone(), Duration::from_millis(30), "a", None, None);
        timers.add_timer(7, tx, Duration::from_millis(30), "b", None, None);
        timers.cancel_owner(7);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_none());
        stop.cancel();
    }
}
