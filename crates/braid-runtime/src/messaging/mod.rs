//! Broker messaging abstraction.
//!
//! The runtime talks to brokers through the [`Messaging`] trait only;
//! concrete drivers are external. The in-process [`DevBroker`] backs
//! development and tests with the same queue/subscription semantics.

pub mod builder;
pub mod codec;
pub mod dev_broker;

pub use builder::MessagingBuilder;
pub use dev_broker::DevBroker;

use crate::config::BrokerSection;
use async_trait::async_trait;
use braid_types::ErrorCode;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Messaging layer errors.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// Operation attempted on an unconnected session.
    #[error("not connected to the broker")]
    NotConnected,

    /// Connecting (or reconnecting) failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A named queue does not exist and creation was not requested.
    #[error("queue '{0}' not found")]
    QueueNotFound(String),

    /// A publish was not accepted.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// A subscription pattern could not be compiled.
    #[error("invalid subscription '{pattern}': {reason}")]
    InvalidSubscription {
        /// The offending pattern.
        pattern: String,
        /// Compiler diagnostics.
        reason: String,
    },
}

impl ErrorCode for MessagingError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotConnected => "MESSAGING_NOT_CONNECTED",
            Self::ConnectionFailed(_) => "MESSAGING_CONNECTION_FAILED",
            Self::QueueNotFound(_) => "MESSAGING_QUEUE_NOT_FOUND",
            Self::SendFailed(_) => "MESSAGING_SEND_FAILED",
            Self::InvalidSubscription { .. } => "MESSAGING_INVALID_SUBSCRIPTION",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::ConnectionFailed(_) | Self::SendFailed(_)
        )
    }
}

/// Settlement handle of one received message.
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    /// Queue the message was consumed from.
    pub queue: String,
    /// How many times this message was redelivered already.
    pub redelivery_count: u32,
    /// Broker-assigned delivery identity.
    pub delivery_id: u64,
}

/// One message received from a broker queue.
#[derive(Debug)]
pub struct InboundMessage {
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
    /// Destination topic it was published on.
    pub topic: String,
    /// User properties.
    pub user_properties: Map<String, Value>,
    /// Settlement handle.
    pub receipt: DeliveryReceipt,
}

/// Minimal messaging capability required by the core.
///
/// All operations are safe to call concurrently; settlement
/// (`ack`/`nack`) is idempotent per receipt.
#[async_trait]
pub trait Messaging: Send + Sync {
    /// Establishes the session.
    async fn connect(&self) -> Result<(), MessagingError>;

    /// Tears the session down.
    async fn disconnect(&self);

    /// Binds to a named queue, creating it when asked to.
    async fn bind_queue(&self, queue: &str, create_if_missing: bool)
        -> Result<(), MessagingError>;

    /// Attracts messages matching a topic pattern to a queue.
    async fn subscribe(&self, pattern: &str, queue: &str) -> Result<(), MessagingError>;

    /// Removes a subscription.
    async fn unsubscribe(&self, pattern: &str, queue: &str) -> Result<(), MessagingError>;

    /// Receives the next message of a queue, or `None` on timeout.
    async fn receive(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<InboundMessage>, MessagingError>;

    /// Publishes a message to a topic.
    async fn send(
        &self,
        destination: &str,
        payload: Vec<u8>,
        user_properties: &Map<String, Value>,
    ) -> Result<(), MessagingError>;

    /// Settles a delivery positively.
    async fn ack(&self, receipt: &DeliveryReceipt) -> Result<(), MessagingError>;

    /// Requeues a delivery for redelivery.
    async fn nack(&self, receipt: &DeliveryReceipt) -> Result<(), MessagingError>;
}

/// Compiles a subscription pattern into a topic regex.
///
/// Grammar: `/` separates levels, `*` matches exactly one level, a
/// trailing `>` matches one or more levels.
///
/// # Errors
///
/// Returns [`MessagingError::InvalidSubscription`] when the compiled
/// pattern is rejected.
pub fn subscription_to_regex(pattern: &str) -> Result<Regex, MessagingError> {
    let mut regex = String::from("^");
    let levels: Vec<&str> = pattern.split('/').collect();
    for (index, level) in levels.iter().enumerate() {
        if index > 0 {
            regex.push('/');
        }
        match *level {
            "*" => regex.push_str("[^/]+"),
            ">" if index == levels.len() - 1 => {
                regex.push_str(".+");
            }
            literal => regex.push_str(&regex::escape(literal)),
        }
    }
    regex.push('$');
    Regex::new(&regex).map_err(|e| MessagingError::InvalidSubscription {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Connects with the configured reconnection strategy:
/// `forever_retry` keeps trying until shutdown, `parametrized` gives
/// up after `retry_count` attempts.
///
/// # Errors
///
/// Returns the last connection error once the strategy is exhausted,
/// or [`MessagingError::ConnectionFailed`] on shutdown.
pub async fn connect_with_retry(
    messaging: &Arc<dyn Messaging>,
    config: &BrokerSection,
    stop: &CancellationToken,
) -> Result<(), MessagingError> {
    let mut attempts: u32 = 0;
    loop {
        match messaging.connect().await {
            Ok(()) => return Ok(()),
            Err(error) => {
                attempts += 1;
                let exhausted = config.reconnection_strategy == "parametrized"
                    && attempts >= config.retry_count.max(1);
                if exhausted {
                    return Err(error);
                }
                warn!(
                    attempt = attempts,
                    error = %error,
                    "broker connect failed, retrying in {} ms",
                    config.retry_interval
                );
                tokio::select! {
                    _ = stop.cancelled() => {
                        return Err(MessagingError::ConnectionFailed("shutdown".to_string()))
                    }
                    () = tokio::time::sleep(Duration::from_millis(config.retry_interval)) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, topic: &str) -> bool {
        subscription_to_regex(pattern).expect("compile").is_match(topic)
    }

    #[test]
    fn star_matches_exactly_one_level() {
        assert!(matches("orders/*/created", "orders/42/created"));
        assert!(!matches("orders/*/created", "orders/42/43/created"));
        assert!(!matches("orders/*/created", "orders//created"));
    }

    #[test]
    fn gt_matches_one_or_more_trailing_levels() {
        assert!(matches("orders/new/>", "orders/new/42"));
        assert!(matches("orders/new/>", "orders/new/42/x"));
        assert!(!matches("orders/new/>", "orders/new"));
    }

    #[test]
    fn literals_are_escaped() {
        assert!(matches("metrics.cpu/host", "metrics.cpu/host"));
        assert!(!matches("metrics.cpu/host", "metricsXcpu/host"));
    }

    #[test]
    fn exact_topic_requires_full_match() {
        assert!(matches("a/b", "a/b"));
        assert!(!matches("a/b", "a/b/c"));
        assert!(!matches("a/b", "x/a/b"));
    }
}
