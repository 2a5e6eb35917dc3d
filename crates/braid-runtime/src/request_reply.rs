//! Broker request/reply: correlation, expiry, streaming.
//!
//! The controller turns a publish-and-await into a synchronous (or
//! streaming) call:
//!
//! ```text
//! do request ──► publish on message.topic
//!                 user_properties[reply_topic_key] = reply/<correlation>
//!                      │
//!                      ▼
//!            responder publishes replies on reply/<correlation>
//!                      │
//!                      ▼
//! reply queue ──► receiver task ──► pending[<reply topic>] ──► caller
//! ```
//!
//! Each outstanding request owns a per-correlation reply topic
//! subscribed onto the controller's dedicated reply queue. Completion,
//! expiry or the caller dropping its stream tears the subscription
//! down; replies for unknown or completed correlations are dropped.

use crate::config::BrokerSection;
use crate::messaging::codec::{decode_payload, encode_payload, PayloadEncoding, PayloadFormat};
use crate::messaging::Messaging;
use braid_component::ComponentError;
use braid_event::Message;
use braid_expression::{is_truthy, Expression};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const RECEIVE_TIMEOUT: Duration = Duration::from_millis(200);

/// Requester side of broker request/reply.
pub struct RequestResponseController {
    messaging: Arc<dyn Messaging>,
    reply_queue: String,
    topic_prefix: String,
    topic_suffix: Option<String>,
    reply_topic_key: String,
    reply_metadata_key: String,
    default_expiry: Duration,
    encoding: PayloadEncoding,
    format: PayloadFormat,
    pending: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Message>>>>,
    stop: CancellationToken,
}

impl RequestResponseController {
    /// Binds the dedicated reply queue and spawns the receiver task.
    /// The messaging session must already be connected.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::Connection`] when the reply queue
    /// cannot be bound, and [`ComponentError::Config`] for malformed
    /// encoding settings.
    pub async fn start(
        config: &BrokerSection,
        messaging: Arc<dyn Messaging>,
        stop: CancellationToken,
    ) -> Result<Arc<Self>, ComponentError> {
        let encoding = PayloadEncoding::parse(&config.payload_encoding).ok_or_else(|| {
            ComponentError::config(
                "request_response",
                format!("unknown payload_encoding '{}'", config.payload_encoding),
            )
        })?;
        let format = PayloadFormat::parse(&config.payload_format).ok_or_else(|| {
            ComponentError::config(
                "request_response",
                format!("unknown payload_format '{}'", config.payload_format),
            )
        })?;

        let reply_queue = format!("{}-{}", config.response_queue_prefix, uuid::Uuid::new_v4());
        messaging
            .bind_queue(&reply_queue, true)
            .await
            .map_err(|e| ComponentError::Connection(e.to_string()))?;

        let controller = Arc::new(Self {
            messaging,
            reply_queue,
            topic_prefix: config.response_topic_prefix.clone(),
            topic_suffix: config.response_topic_suffix.clone(),
            reply_topic_key: config.user_properties_reply_topic_key.clone(),
            reply_metadata_key: config.user_properties_reply_metadata_key.clone(),
            default_expiry: Duration::from_millis(config.request_expiry_ms.max(1)),
            encoding,
            format,
            pending: Arc::new(Mutex::new(HashMap::new())),
            stop,
        });
        tokio::spawn(receive_replies(controller.clone()));
        Ok(controller)
    }

    fn reply_topic(&self, correlation: &str) -> String {
        match &self.topic_suffix {
            Some(suffix) => format!("{}/{correlation}/{suffix}", self.topic_prefix),
            None => format!("{}/{correlation}", self.topic_prefix),
        }
    }

    async fn open(
        &self,
    ) -> Result<(String, mpsc::UnboundedReceiver<Message>), ComponentError> {
        let correlation = uuid::Uuid::new_v4().to_string();
        let reply_topic = self.reply_topic(&correlation);
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending.lock().insert(reply_topic.clone(), tx);

        if let Err(error) = self
            .messaging
            .subscribe(&reply_topic, &self.reply_queue)
            .await
        {
            self.pending.lock().remove(&reply_topic);
            return Err(ComponentError::Connection(error.to_string()));
        }
        Ok((reply_topic, rx))
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &Value,
        mut user_properties: Map<String, Value>,
        reply_topic: &str,
        metadata: Option<Value>,
    ) -> Result<(), ComponentError> {
        user_properties.insert(
            self.reply_topic_key.clone(),
            Value::String(reply_topic.to_string()),
        );
        if let Some(metadata) = metadata {
            user_properties.insert(self.reply_metadata_key.clone(), metadata);
        }
        let bytes = encode_payload(payload, self.encoding, self.format)
            .map_err(|e| ComponentError::Invoke(e.to_string()))?;
        self.messaging
            .send(topic, bytes, &user_properties)
            .await
            .map_err(|e| ComponentError::Connection(e.to_string()))
    }

    async fn teardown(&self, reply_topic: &str) {
        self.pending.lock().remove(reply_topic);
        let _ = self
            .messaging
            .unsubscribe(reply_topic, &self.reply_queue)
            .await;
    }

    /// Issues a request and awaits the single reply.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::RequestTimeout`] on expiry and
    /// [`ComponentError::Cancelled`] on shutdown.
    pub async fn request(
        &self,
        topic: &str,
        payload: &Value,
        user_properties: Map<String, Value>,
        metadata: Option<Value>,
        expiry: Option<Duration>,
    ) -> Result<Message, ComponentError> {
        let expiry = expiry.unwrap_or(self.default_expiry);
        let (reply_topic, mut replies) = self.open().await?;
        if let Err(error) = self
            .publish(topic, payload, user_properties, &reply_topic, metadata)
            .await
        {
            self.teardown(&reply_topic).await;
            return Err(error);
        }

        let outcome = tokio::select! {
            _ = self.stop.cancelled() => Err(ComponentError::Cancelled),
            reply = tokio::time::timeout(expiry, replies.recv()) => match reply {
                Ok(Some(reply)) => Ok(reply),
                Ok(None) => Err(ComponentError::Cancelled),
                Err(_) => Err(ComponentError::RequestTimeout(expiry.as_millis() as u64)),
            },
        };
        self.teardown(&reply_topic).await;
        outcome
    }

    /// Issues a request whose reply arrives in parts. The returned
    /// stream yields `(reply, is_last)` until
    /// `streaming_complete_expression` evaluates truthy on a reply,
    /// expiry elapses, or the stream is dropped.
    ///
    /// # Errors
    ///
    /// Returns connection and encoding failures from the publish.
    pub async fn request_stream(
        self: &Arc<Self>,
        topic: &str,
        payload: &Value,
        user_properties: Map<String, Value>,
        metadata: Option<Value>,
        complete: Expression,
        expiry: Option<Duration>,
    ) -> Result<ReplyStream, ComponentError> {
        let expiry = expiry.unwrap_or(self.default_expiry);
        let (reply_topic, replies) = self.open().await?;
        if let Err(error) = self
            .publish(topic, payload, user_properties, &reply_topic, metadata)
            .await
        {
            self.teardown(&reply_topic).await;
            return Err(error);
        }
        Ok(ReplyStream {
            controller: self.clone(),
            reply_topic,
            replies,
            complete,
            deadline: Instant::now() + expiry,
            expiry_ms: expiry.as_millis() as u64,
            done: false,
        })
    }
}

async fn receive_replies(controller: Arc<RequestResponseController>) {
    loop {
        let received = tokio::select! {
            _ = controller.stop.cancelled() => break,
            received = controller
                .messaging
                .receive(&controller.reply_queue, RECEIVE_TIMEOUT) => received,
        };
        match received {
            Ok(None) => {}
            Ok(Some(inbound)) => {
                // Replies settle immediately; redelivering one to a
                // finished correlation helps nobody.
                let _ = controller.messaging.ack(&inbound.receipt).await;
                let payload =
                    match decode_payload(&inbound.payload, controller.encoding, controller.format)
                    {
                        Ok(payload) => payload,
                        Err(error) => {
                            warn!("reply decode failed: {error}");
                            continue;
                        }
                    };
                let sender = controller.pending.lock().get(&inbound.topic).cloned();
                match sender {
                    Some(sender) => {
                        let message = Message::new(payload)
                            .with_topic(inbound.topic)
                            .with_user_properties(inbound.user_properties);
                        // Receive order is preserved: one unbounded
                        // channel per correlation, fed by this task.
                        let _ = sender.send(message);
                    }
                    None => {
                        debug!(
                            "reply on '{}' has no outstanding request, dropping",
                            inbound.topic
                        );
                    }
                }
            }
            Err(error) => {
                warn!("reply queue receive failed: {error}");
                tokio::time::sleep(RECEIVE_TIMEOUT).await;
            }
        }
    }
}

/// Lazy, finite, non-restartable stream of reply chunks.
pub struct ReplyStream {
    controller: Arc<RequestResponseController>,
    reply_topic: String,
    replies: mpsc::UnboundedReceiver<Message>,
    complete: Expression,
    deadline: Instant,
    expiry_ms: u64,
    done: bool,
}

impl ReplyStream {
    /// Yields the next `(reply, is_last)` pair; `None` after the final
    /// chunk. Expiry surfaces as one terminal
    /// [`ComponentError::RequestTimeout`] item.
    pub async fn next(&mut self) -> Option<Result<(Message, bool), ComponentError>> {
        if self.done {
            return None;
        }
        let outcome = tokio::select! {
            _ = self.controller.stop.cancelled() => Err(ComponentError::Cancelled),
            reply = tokio::time::timeout_at(self.deadline, self.replies.recv()) => match reply {
                Ok(Some(reply)) => Ok(reply),
                Ok(None) => Err(ComponentError::Cancelled),
                Err(_) => Err(ComponentError::RequestTimeout(self.expiry_ms)),
            },
        };
        match outcome {
            Ok(reply) => {
                let is_last = is_truthy(&self.complete.evaluate(&reply, None));
                if is_last {
                    self.finish().await;
                }
                Some(Ok((reply, is_last)))
            }
            Err(error) => {
                self.finish().await;
                Some(Err(error))
            }
        }
    }

    async fn finish(&mut self) {
        if !self.done {
            self.done = true;
            self.controller.teardown(&self.reply_topic).await;
        }
    }
}

impl Drop for ReplyStream {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        // Closing an unfinished stream releases its correlation; the
        // unsubscribe is detached since drop cannot await.
        self.controller.pending.lock().remove(&self.reply_topic);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let controller = self.controller.clone();
            let reply_topic = std::mem::take(&mut self.reply_topic);
            handle.spawn(async move {
                let _ = controller
                    .messaging
                    .unsubscribe(&reply_topic, &controller.reply_queue)
                    .await;
            });
        }
    }
}
