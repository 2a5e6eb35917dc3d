//! Broker connection factory.

use super::dev_broker::{DevBroker, DevBrokerState};
use super::{Messaging, MessagingError};
use crate::config::BrokerSection;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds broker connections from configuration.
///
/// One builder lives in the connector services. Dev brokers with the
/// same `broker_url` share server state; components with the same
/// `broker_connection_share` key share a single connection object.
pub struct MessagingBuilder {
    dev_states: Mutex<HashMap<String, Arc<DevBrokerState>>>,
    shared_connections: Mutex<HashMap<String, Arc<dyn Messaging>>>,
}

impl MessagingBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dev_states: Mutex::new(HashMap::new()),
            shared_connections: Mutex::new(HashMap::new()),
        }
    }

    /// Builds (or reuses) a connection for a broker section.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::ConnectionFailed`] for broker types
    /// without an in-tree driver.
    pub fn build(&self, config: &BrokerSection) -> Result<Arc<dyn Messaging>, MessagingError> {
        if let Some(share_key) = &config.broker_connection_share {
            if let Some(existing) = self.shared_connections.lock().get(share_key) {
                return Ok(existing.clone());
            }
        }

        let connection: Arc<dyn Messaging> = match config.broker_type.as_str() {
            "dev" | "dev_broker" => {
                let state = {
                    let mut states = self.dev_states.lock();
                    states
                        .entry(config.broker_url.clone())
                        .or_insert_with(DevBrokerState::new)
                        .clone()
                };
                Arc::new(DevBroker::with_state(state))
            }
            other => {
                return Err(MessagingError::ConnectionFailed(format!(
                    "no driver available for broker_type '{other}'"
                )))
            }
        };

        if let Some(share_key) = &config.broker_connection_share {
            self.shared_connections
                .lock()
                .insert(share_key.clone(), connection.clone());
        }
        Ok(connection)
    }
}

impl Default for MessagingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_url_shares_dev_broker_state() {
        let builder = MessagingBuilder::new();
        let config = BrokerSection::default();

        let producer = builder.build(&config).expect("build");
        let consumer = builder.build(&config).expect("build");
        producer.connect().await.expect("connect");
        consumer.connect().await.expect("connect");

        consumer.bind_queue("q", true).await.expect("bind");
        consumer.subscribe("t", "q").await.expect("subscribe");
        producer
            .send("t", b"x".to_vec(), &serde_json::Map::new())
            .await
            .expect("send");

        let received = consumer
            .receive("q", std::time::Duration::from_millis(100))
            .await
            .expect("receive");
        assert!(received.is_some());
    }

    #[test]
    fn shared_key_reuses_the_connection_object() {
        let builder = MessagingBuilder::new();
        let config = BrokerSection {
            broker_connection_share: Some("pair".to_string()),
            ..Default::default()
        };

        let a = builder.build(&config).expect("build");
        let b = builder.build(&config).expect("build");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn unknown_broker_type_is_rejected() {
        let builder = MessagingBuilder::new();
        let config = BrokerSection {
            broker_type: "solace".to_string(),
            ..Default::default()
        };
        assert!(builder.build(&config).is_err());
    }
}
