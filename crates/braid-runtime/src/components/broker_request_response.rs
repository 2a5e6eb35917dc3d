//! Per-message broker request/reply stage.

use crate::config::BrokerSection;
use crate::messaging::{connect_with_retry, Messaging};
use crate::request_reply::RequestResponseController;
use crate::services::RuntimeServices;
use async_trait::async_trait;
use braid_component::{Component, ComponentContext, ComponentError, ComponentInfo};
use braid_event::Message;
use braid_expression::Expression;
use braid_types::Payload;
use serde_json::{json, Map, Value};
use std::sync::Arc;

fn reply_value(reply: &Message) -> Value {
    json!({
        "payload": reply.payload().to_value(),
        "topic": reply.topic(),
        "user_properties": Value::Object(reply.user_properties().clone()),
    })
}

/// Issues one broker request per input message.
///
/// The selected input must carry `{payload, topic, user_properties?}`.
/// Non-streaming mode returns the single reply as the component
/// result. Streaming mode forwards each `(chunk, is_last)` downstream
/// as its own message and terminates on the reply matching
/// `streaming_complete_expression`.
pub struct BrokerRequestResponse {
    info: ComponentInfo,
    config: BrokerSection,
    streaming: bool,
    complete: Option<Expression>,
    services: Arc<RuntimeServices>,
    messaging: Option<Arc<dyn Messaging>>,
    controller: Option<Arc<RequestResponseController>>,
}

impl BrokerRequestResponse {
    /// Builds the stage from its component configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::Config`] for malformed broker
    /// settings, or streaming without a completion expression.
    pub fn new(
        ctx: &ComponentContext,
        services: Arc<RuntimeServices>,
    ) -> Result<Self, ComponentError> {
        let raw = ctx.literal_config_object()?;
        let streaming = raw
            .get("streaming")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let complete = match raw.get("streaming_complete_expression").and_then(Value::as_str) {
            Some(text) => Some(Expression::parse(text)?),
            None => None,
        };
        if streaming && complete.is_none() {
            return Err(ComponentError::config(
                ctx.name(),
                "streaming requires streaming_complete_expression",
            ));
        }
        let config = BrokerSection::from_value(raw)
            .map_err(|e| ComponentError::config(ctx.name(), e.to_string()))?;

        Ok(Self {
            info: ComponentInfo::new(
                "broker_request_response",
                "Performs a broker request/reply per message",
            ),
            config,
            streaming,
            complete,
            services,
            messaging: None,
            controller: None,
        })
    }
}

#[async_trait]
impl Component for BrokerRequestResponse {
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
        self.controller = Some(
            RequestResponseController::start(
                &self.config,
                messaging.clone(),
                ctx.stop_token().clone(),
            )
            .await?,
        );
        self.messaging = Some(messaging);
        Ok(())
    }

    async fn invoke(
        &mut self,
        ctx: &ComponentContext,
        message: &mut Message,
        data: Value,
    ) -> Result<Option<Value>, ComponentError> {
        let Some(controller) = self.controller.clone() else {
            return Err(ComponentError::Connection(
                "request/reply controller not started".to_string(),
            ));
        };
        let topic = data
            .get("topic")
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| message.topic().map(String::from))
            .ok_or_else(|| ComponentError::Invoke("request needs a topic".to_string()))?;
        let payload = data.get("payload").cloned().unwrap_or(Value::Null);
        let user_properties: Map<String, Value> = data
            .get("user_properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        if !self.streaming {
            let reply = controller
                .request(&topic, &payload, user_properties, None, None)
                .await?;
            return Ok(Some(reply_value(&reply)));
        }

        let complete = self
            .complete
            .clone()
            .ok_or_else(|| ComponentError::config(ctx.name(), "missing completion expression"))?;
        let mut stream = controller
            .request_stream(&topic, &payload, user_properties, None, complete, None)
            .await?;

        while let Some(item) = stream.next().await {
            let (reply, is_last) = item?;
            let mut chunk = Message::new(Payload::Structured(reply.payload().to_value()))
                .with_user_properties(reply.user_properties().clone());
            if let Some(reply_topic) = reply.topic() {
                chunk = chunk.with_topic(reply_topic);
            }
            let mut value = reply_value(&reply);
            if let Some(object) = value.as_object_mut() {
                object.insert("is_last".to_string(), Value::Bool(is_last));
            }
            chunk.set_previous(value);
            ctx.forward(chunk).await?;
        }
        // Chunks went downstream; the worker acks the request message.
        Ok(None)
    }

    async fn stop(&mut self, _ctx: &ComponentContext) {
        self.controller = None;
        if let Some(messaging) = self.messaging.take() {
            messaging.disconnect().await;
        }
    }
}
