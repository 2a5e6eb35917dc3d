//! In-process broker for development and tests.
//!
//! Implements the full [`Messaging`] contract over named FIFO queues
//! and wildcard topic subscriptions. Connections built from the same
//! `broker_url` share one broker state, so an input and an output
//! stage of the same app see each other's messages.

use super::{
    subscription_to_regex, DeliveryReceipt, InboundMessage, Messaging, MessagingError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Clone)]
struct StoredMessage {
    payload: Vec<u8>,
    topic: String,
    user_properties: Map<String, Value>,
    redelivery_count: u32,
}

struct SubscriptionEntry {
    raw: String,
    pattern: Regex,
    queue: String,
}

#[derive(Default)]
struct BrokerInner {
    queues: HashMap<String, VecDeque<StoredMessage>>,
    subscriptions: Vec<SubscriptionEntry>,
    in_flight: HashMap<u64, (String, StoredMessage)>,
}

/// Shared state of one dev broker "server", keyed by URL in the
/// [`MessagingBuilder`](super::MessagingBuilder).
pub(crate) struct DevBrokerState {
    inner: Mutex<BrokerInner>,
    notify: Notify,
    delivery_counter: AtomicU64,
}

impl DevBrokerState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(BrokerInner::default()),
            notify: Notify::new(),
            delivery_counter: AtomicU64::new(1),
        })
    }
}

/// One connection to a dev broker.
pub struct DevBroker {
    state: Arc<DevBrokerState>,
    connected: AtomicBool,
}

impl DevBroker {
    pub(crate) fn with_state(state: Arc<DevBrokerState>) -> Self {
        Self {
            state,
            connected: AtomicBool::new(false),
        }
    }

    fn ensure_connected(&self) -> Result<(), MessagingError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(MessagingError::NotConnected)
        }
    }
}

#[async_trait]
impl Messaging for DevBroker {
    async fn connect(&self) -> Result<(), MessagingError> {
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }

    async fn bind_queue(
        &self,
        queue: &str,
        create_if_missing: bool,
    ) -> Result<(), MessagingError> {
        self.ensure_connected()?;
        let mut inner = self.state.inner.lock();
        if !inner.queues.contains_key(queue) {
            if !create_if_missing {
                return Err(MessagingError::QueueNotFound(queue.to_string()));
            }
            inner.queues.insert(queue.to_string(), VecDeque::new());
        }
        Ok(())
    }

    async fn subscribe(&self, pattern: &str, queue: &str) -> Result<(), MessagingError> {
        self.ensure_connected()?;
        let compiled = subscription_to_regex(pattern)?;
        let mut inner = self.state.inner.lock();
        inner
            .queues
            .entry(queue.to_string())
            .or_insert_with(VecDeque::new);
        let exists = inner
            .subscriptions
            .iter()
            .any(|s| s.raw == pattern && s.queue == queue);
        if !exists {
            inner.subscriptions.push(SubscriptionEntry {
                raw: pattern.to_string(),
                pattern: compiled,
                queue: queue.to_string(),
            });
        }
        Ok(())
    }

    async fn unsubscribe(&self, pattern: &str, queue: &str) -> Result<(), MessagingError> {
        self.ensure_connected()?;
        let mut inner = self.state.inner.lock();
        inner
            .subscriptions
            .retain(|s| !(s.raw == pattern && s.queue == queue));
        Ok(())
    }

    async fn receive(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<InboundMessage>, MessagingError> {
        self.ensure_connected()?;
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.state.inner.lock();
                let pending = inner
                    .queues
                    .get_mut(queue)
                    .ok_or_else(|| MessagingError::QueueNotFound(queue.to_string()))?;
                if let Some(message) = pending.pop_front() {
                    let delivery_id =
                        self.state.delivery_counter.fetch_add(1, Ordering::Relaxed);
                    let receipt = DeliveryReceipt {
                        queue: queue.to_string(),
                        redelivery_count: message.redelivery_count,
                        delivery_id,
                    };
                    inner
                        .in_flight
                        .insert(delivery_id, (queue.to_string(), message.clone()));
                    return Ok(Some(InboundMessage {
                        payload: message.payload,
                        topic: message.topic,
                        user_properties: message.user_properties,
                        receipt,
                    }));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn send(
        &self,
        destination: &str,
        payload: Vec<u8>,
        user_properties: &Map<String, Value>,
    ) -> Result<(), MessagingError> {
        self.ensure_connected()?;
        let message = StoredMessage {
            payload,
            topic: destination.to_string(),
            user_properties: user_properties.clone(),
            redelivery_count: 0,
        };

        let mut inner = self.state.inner.lock();
        let matching: HashSet<String> = inner
            .subscriptions
            .iter()
            .filter(|s| s.pattern.is_match(destination))
            .map(|s| s.queue.clone())
            .collect();
        for queue in matching {
            if let Some(pending) = inner.queues.get_mut(&queue) {
                // Each queue gets its own copy; consumers never share.
                pending.push_back(message.clone());
            }
        }
        drop(inner);
        self.state.notify.notify_waiters();
        Ok(())
    }

    async fn ack(&self, receipt: &DeliveryReceipt) -> Result<(), MessagingError> {
        self.state.inner.lock().in_flight.remove(&receipt.delivery_id);
        Ok(())
    }

    async fn nack(&self, receipt: &DeliveryReceipt) -> Result<(), MessagingError> {
        let mut inner = self.state.inner.lock();
        if let Some((queue, mut message)) = inner.in_flight.remove(&receipt.delivery_id) {
            message.redelivery_count += 1;
            if let Some(pending) = inner.queues.get_mut(&queue) {
                pending.push_front(message);
            }
        }
        drop(inner);
        self.state.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn broker() -> DevBroker {
        let broker = DevBroker::with_state(DevBrokerState::new());
        broker.connect().await.expect("connect");
        broker
    }

    #[tokio::test]
    async fn publish_reaches_matching_queue() {
        let broker = broker().await;
        broker.bind_queue("q", true).await.expect("bind");
        broker.subscribe("orders/>", "q").await.expect("subscribe");

        let mut props = Map::new();
        props.insert("k".to_string(), json!("v"));
        broker
            .send("orders/new/1", b"{}".to_vec(), &props)
            .await
            .expect("send");

        let received = broker
            .receive("q", Duration::from_millis(100))
            .await
            .expect("receive")
            .expect("message");
        assert_eq!(received.topic, "orders/new/1");
        assert_eq!(received.user_properties.get("k"), Some(&json!("v")));
        assert_eq!(received.receipt.redelivery_count, 0);
    }

    #[tokio::test]
    async fn non_matching_topic_is_dropped() {
        let broker = broker().await;
        broker.bind_queue("q", true).await.expect("bind");
        broker.subscribe("orders/>", "q").await.expect("subscribe");

        broker
            .send("invoices/new", b"x".to_vec(), &Map::new())
            .await
            .expect("send");
        assert!(broker
            .receive("q", Duration::from_millis(20))
            .await
            .expect("receive")
            .is_none());
    }

    #[tokio::test]
    async fn nack_redelivers_with_incremented_count() {
        let broker = broker().await;
        broker.bind_queue("q", true).await.expect("bind");
        broker.subscribe("t", "q").await.expect("subscribe");
        broker.send("t", b"x".to_vec(), &Map::new()).await.expect("send");

        let first = broker
            .receive("q", Duration::from_millis(100))
            .await
            .expect("receive")
            .expect("message");
        broker.nack(&first.receipt).await.expect("nack");

        let second = broker
            .receive("q", Duration::from_millis(100))
            .await
            .expect("receive")
            .expect("message");
        assert_eq!(second.receipt.redelivery_count, 1);

        broker.ack(&second.receipt).await.expect("ack");
        assert!(broker
            .receive("q", Duration::from_millis(20))
            .await
            .expect("receive")
            .is_none());
    }

    #[tokio::test]
    async fn receive_before_publish_wakes_up() {
        let broker = Arc::new(broker().await);
        broker.bind_queue("q", true).await.expect("bind");
        broker.subscribe("t", "q").await.expect("subscribe");

        let receiver = broker.clone();
        let handle = tokio::spawn(async move {
            receiver.receive("q", Duration::from_secs(2)).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.send("t", b"x".to_vec(), &Map::new()).await.expect("send");

        let received = handle.await.expect("join").expect("receive");
        assert!(received.is_some());
    }

    #[tokio::test]
    async fn operations_require_connection() {
        let broker = DevBroker::with_state(DevBrokerState::new());
        assert!(broker.bind_queue("q", true).await.is_err());
        assert!(broker.send("t", vec![], &Map::new()).await.is_err());
    }
}
