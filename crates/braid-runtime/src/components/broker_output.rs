//! Broker output stage: encoding and publishing.

use crate::config::BrokerSection;
use crate::messaging::codec::{encode_payload, PayloadEncoding, PayloadFormat};
use crate::messaging::{connect_with_retry, Messaging};
use crate::services::RuntimeServices;
use async_trait::async_trait;
use braid_component::{Component, ComponentContext, ComponentError, ComponentInfo};
use braid_event::{ErrorDetail, ErrorEnvelope, Message, NackInfo};
use braid_types::ErrorCode;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

/// Sink stage publishing `previous.{payload, topic, user_properties}`
/// to the broker.
///
/// With `propagate_acknowledgements` (the default) the upstream ack
/// fires after the publish is confirmed and a failed publish nacks;
/// without it the ack fires up front and failures are only logged.
/// Messages injected directly by `App::send_message` carry no
/// upstream callbacks; acking them here is what settles them.
pub struct BrokerOutput {
    info: ComponentInfo,
    config: BrokerSection,
    encoding: PayloadEncoding,
    format: PayloadFormat,
    services: Arc<RuntimeServices>,
    messaging: Option<Arc<dyn Messaging>>,
}

impl BrokerOutput {
    /// Builds the stage from its component configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::Config`] for malformed broker
    /// settings.
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

        Ok(Self {
            info: ComponentInfo::new("broker_output", "Publishes messages to the broker"),
            config,
            encoding,
            format,
            services,
            messaging: None,
        })
    }

    async fn fail(&self, ctx: &ComponentContext, message: &mut Message, error: ComponentError) {
        warn!("{} {error}", ctx.identifier());
        let snapshot = message.snapshot();
        message.call_negative_acknowledgements(NackInfo::new(error.code(), error.to_string()));
        ctx.emit_error(ErrorEnvelope {
            error: ErrorDetail {
                message: error.to_string(),
                exception_kind: error.code().to_string(),
            },
            message: Some(snapshot),
            location: ctx.location(),
        })
        .await;
    }
}

#[async_trait]
impl Component for BrokerOutput {
    fn info(&self) -> &ComponentInfo {
        &self.info
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
        self.messaging = Some(messaging);
        Ok(())
    }

    async fn invoke(
        &mut self,
        _ctx: &ComponentContext,
        _message: &mut Message,
        data: Value,
    ) -> Result<Option<Value>, ComponentError> {
        Ok(Some(data))
    }

    async fn send_output(
        &mut self,
        ctx: &ComponentContext,
        mut message: Message,
    ) -> Result<(), ComponentError> {
        let Some(messaging) = self.messaging.clone() else {
            self.fail(
                ctx,
                &mut message,
                ComponentError::Connection("broker output not connected".to_string()),
            )
            .await;
            return Ok(());
        };

        let outbound = message.previous().cloned().unwrap_or(Value::Null);
        let Some(topic) = outbound.get("topic").and_then(Value::as_str).map(String::from)
        else {
            self.fail(
                ctx,
                &mut message,
                ComponentError::Invoke("broker output needs previous.topic".to_string()),
            )
            .await;
            return Ok(());
        };
        let payload = outbound.get("payload").cloned().unwrap_or(Value::Null);

        let mut user_properties: Map<String, Value> = outbound
            .get("user_properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        if self.config.copy_user_properties {
            for (key, value) in message.user_properties() {
                user_properties
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }

        let bytes = match encode_payload(&payload, self.encoding, self.format) {
            Ok(bytes) => bytes,
            Err(error) => {
                self.fail(ctx, &mut message, ComponentError::Invoke(error.to_string()))
                    .await;
                return Ok(());
            }
        };

        if !self.config.propagate_acknowledgements {
            message.call_acknowledgements();
        }

        match messaging.send(&topic, bytes, &user_properties).await {
            Ok(()) => {
                if self.config.propagate_acknowledgements {
                    message.call_acknowledgements();
                }
            }
            Err(error) => {
                if self.config.propagate_acknowledgements {
                    self.fail(ctx, &mut message, ComponentError::Connection(error.to_string()))
                        .await;
                } else {
                    warn!("{} publish failed: {error}", ctx.identifier());
                }
            }
        }
        Ok(())
    }

    async fn stop(&mut self, _ctx: &ComponentContext) {
        if let Some(messaging) = self.messaging.take() {
            messaging.disconnect().await;
        }
    }
}
