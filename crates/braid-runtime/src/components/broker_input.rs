//! Broker input stage: queue binding, decoding, settlement.

use crate::config::BrokerSection;
use crate::messaging::codec::{decode_payload, PayloadEncoding, PayloadFormat};
use crate::messaging::{connect_with_retry, InboundMessage, Messaging};
use crate::services::RuntimeServices;
use async_trait::async_trait;
use braid_component::{Component, ComponentContext, ComponentError, ComponentInfo};
use braid_event::{ErrorDetail, ErrorEnvelope, Event, Message};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const RECEIVE_TIMEOUT: Duration = Duration::from_millis(200);

/// Source stage consuming a broker queue.
///
/// Each received message is decoded per the configured encoding and
/// format and enters the flow with settlement callbacks attached: the
/// flow's terminal ack settles the delivery, a nack redelivers it.
/// Messages that fail to decode are nacked until
/// `max_redelivery_count`, then treated as poison: reported to the
/// error flow and settled.
pub struct BrokerInput {
    info: ComponentInfo,
    config: BrokerSection,
    encoding: PayloadEncoding,
    format: PayloadFormat,
    queue_name: String,
    services: Arc<RuntimeServices>,
    messaging: Option<Arc<dyn Messaging>>,
}

impl BrokerInput {
    /// Builds the stage from its component configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::Config`] for missing or malformed
    /// broker settings.
    pub fn new(
        ctx: &ComponentContext,
        services: Arc<RuntimeServices>,
    ) -> Result<Self, ComponentError> {
        let config = BrokerSection::from_value(ctx.literal_config_object()?)
            .map_err(|e| ComponentError::config(ctx.name(), e.to_string()))?;
        let encoding = PayloadEncoding::parse(&config.payload_encoding).ok_or_else(|| {
            ComponentError::config(
                ctx.name(),
                format!("unknown payload_encoding '{}'", config.payload_encoding),
            )
        })?;
        let format = PayloadFormat::parse(&config.payload_format).ok_or_else(|| {
            ComponentError::config(
                ctx.name(),
                format!("unknown payload_format '{}'", config.payload_format),
            )
        })?;
        let queue_name = config
            .queue_name
            .clone()
            .ok_or_else(|| ComponentError::config(ctx.name(), "queue_name is required"))?;

        Ok(Self {
            info: ComponentInfo::new("broker_input", "Receives messages from a broker queue"),
            config,
            encoding,
            format,
            queue_name,
            services,
            messaging: None,
        })
    }

    async fn handle_decode_failure(
        &self,
        ctx: &ComponentContext,
        inbound: &InboundMessage,
        reason: String,
    ) {
        let Some(messaging) = &self.messaging else {
            return;
        };
        if inbound.receipt.redelivery_count >= self.config.max_redelivery_count {
            warn!(
                "{} poison message on topic '{}' after {} redeliveries",
                ctx.identifier(),
                inbound.topic,
                inbound.receipt.redelivery_count
            );
            ctx.emit_error(ErrorEnvelope {
                error: ErrorDetail {
                    message: reason,
                    exception_kind: "COMPONENT_POISON_MESSAGE".to_string(),
                },
                message: Some(json!({
                    "topic": inbound.topic,
                    "user_properties": Value::Object(inbound.user_properties.clone()),
                })),
                location: ctx.location(),
            })
            .await;
            // Settle: the broker must not redeliver poison forever.
            let _ = messaging.ack(&inbound.receipt).await;
        } else {
            debug!(
                "{} decode failed ({reason}), redelivering",
                ctx.identifier()
            );
            let _ = messaging.nack(&inbound.receipt).await;
        }
    }
}

#[async_trait]
impl Component for BrokerInput {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }

    fn is_source(&self) -> bool {
        true
    }

    async fn start(&mut self, ctx: &ComponentContext) -> Result<(), ComponentError> {
        let messaging = self
            .services
            .messaging
            .build(&self.config)
            .map_err(|e| ComponentError::Connection(e.to_string()))?;
        connect_with_retry(&messaging, &self.config, ctx.stop_token())
            .await
            .map_err(|e| ComponentError::Connection(e.to_string()))?;
        messaging
            .bind_queue(&self.queue_name, self.config.create_queue_on_start)
            .await
            .map_err(|e| ComponentError::Connection(e.to_string()))?;
        for subscription in &self.config.subscriptions {
            messaging
                .subscribe(&subscription.topic, &self.queue_name)
                .await
                .map_err(|e| ComponentError::Connection(e.to_string()))?;
        }
        self.messaging = Some(messaging);
        Ok(())
    }

    async fn next_event(
        &mut self,
        ctx: &ComponentContext,
    ) -> Result<Option<Event>, ComponentError> {
        let Some(messaging) = self.messaging.clone() else {
            return Ok(Some(Event::Stop));
        };
        if ctx.is_stopping() {
            return Ok(Some(Event::Stop));
        }

        let received = tokio::select! {
            _ = ctx.stop_token().cancelled() => return Ok(Some(Event::Stop)),
            received = messaging.receive(&self.queue_name, RECEIVE_TIMEOUT) => {
                received.map_err(|e| ComponentError::Connection(e.to_string()))?
            }
        };
        let Some(inbound) = received else {
            return Ok(None);
        };

        match decode_payload(&inbound.payload, self.encoding, self.format) {
            Err(error) => {
                self.handle_decode_failure(ctx, &inbound, error.to_string())
                    .await;
                Ok(None)
            }
            Ok(payload) => {
                let mut message = Message::new(payload)
                    .with_topic(inbound.topic)
                    .with_user_properties(inbound.user_properties);

                let ack_messaging = messaging.clone();
                let ack_receipt = inbound.receipt.clone();
                message.add_ack_callback(Box::new(move || {
                    tokio::spawn(async move {
                        let _ = ack_messaging.ack(&ack_receipt).await;
                    });
                }));
                let nack_messaging = messaging;
                let nack_receipt = inbound.receipt;
                message.add_nack_callback(Box::new(move |_info| {
                    tokio::spawn(async move {
                        let _ = nack_messaging.nack(&nack_receipt).await;
                    });
                }));

                Ok(Some(Event::message(message)))
            }
        }
    }

    async fn invoke(
        &mut self,
        _ctx: &ComponentContext,
        message: &mut Message,
        _data: Value,
    ) -> Result<Option<Value>, ComponentError> {
        Ok(Some(json!({
            "payload": message.payload().to_value(),
            "topic": message.topic(),
            "user_properties": Value::Object(message.user_properties().clone()),
        })))
    }

    async fn stop(&mut self, _ctx: &ComponentContext) {
        if let Some(messaging) = self.messaging.take() {
            messaging.disconnect().await;
        }
    }
}
