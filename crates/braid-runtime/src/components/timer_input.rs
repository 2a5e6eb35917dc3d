//! Generate messages on a periodic timer.

use async_trait::async_trait;
use braid_component::{Component, ComponentContext, ComponentError, ComponentInfo, ConfigParameter};
use braid_event::{Message, TimerEvent};
use braid_types::Payload;
use serde_json::{json, Value};
use std::time::Duration;

const TICK_TIMER_ID: &str = "timer_input_tick";

/// First-stage component emitting one message per `interval_ms`, with
/// an optional constant `payload`.
pub struct TimerInput {
    info: ComponentInfo,
}

impl TimerInput {
    /// Creates a timer input stage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            info: ComponentInfo::new("timer_input", "Emits a message on a periodic timer")
                .with_parameter(ConfigParameter::optional("interval_ms", json!(1000)))
                .with_parameter(ConfigParameter::optional("payload", Value::Null)),
        }
    }
}

impl Default for TimerInput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Component for TimerInput {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }

    async fn start(&mut self, ctx: &ComponentContext) -> Result<(), ComponentError> {
        let interval_ms = ctx.get_config_u64("interval_ms")?.unwrap_or(1000).max(1);
        let payload = ctx.get_config("payload")?.filter(|v| !v.is_null());
        let interval = Duration::from_millis(interval_ms);
        ctx.add_timer(interval, TICK_TIMER_ID, Some(interval), payload);
        Ok(())
    }

    async fn handle_timer_event(
        &mut self,
        ctx: &ComponentContext,
        event: TimerEvent,
    ) -> Result<(), ComponentError> {
        if event.timer_id != TICK_TIMER_ID {
            return Ok(());
        }
        let payload = event.payload.unwrap_or(Value::Null);
        let mut message = Message::new(Payload::Structured(payload.clone()));
        message.set_previous(payload);
        ctx.forward(message).await
    }

    async fn invoke(
        &mut self,
        _ctx: &ComponentContext,
        _message: &mut Message,
        data: Value,
    ) -> Result<Option<Value>, ComponentError> {
        Ok(Some(data))
    }

    async fn stop(&mut self, ctx: &ComponentContext) {
        ctx.cancel_timer(TICK_TIMER_ID);
    }
}
