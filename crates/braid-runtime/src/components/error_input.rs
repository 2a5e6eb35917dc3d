//! Source stage consuming the connector error queue.
//!
//! A flow whose first component is `error_input` becomes the error
//! flow: every error envelope produced by any worker arrives here as
//! an ordinary message and can be logged, transformed or published
//! downstream.

use async_trait::async_trait;
use braid_component::{Component, ComponentContext, ComponentError, ComponentInfo};
use braid_event::{Event, EventReceiver, Message};
use serde_json::Value;

/// Consumes the connector-internal error queue.
pub struct ErrorInput {
    info: ComponentInfo,
    errors: EventReceiver,
}

impl ErrorInput {
    /// Creates an error-flow input over the given error queue.
    #[must_use]
    pub fn new(errors: EventReceiver) -> Self {
        Self {
            info: ComponentInfo::new("error_input", "Receives runtime error events"),
            errors,
        }
    }
}

#[async_trait]
impl Component for ErrorInput {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }

    fn is_source(&self) -> bool {
        true
    }

    async fn next_event(
        &mut self,
        ctx: &ComponentContext,
    ) -> Result<Option<Event>, ComponentError> {
        tokio::select! {
            _ = ctx.stop_token().cancelled() => Ok(Some(Event::Stop)),
            event = self.errors.recv() => Ok(Some(event.unwrap_or(Event::Stop))),
        }
    }

    async fn invoke(
        &mut self,
        _ctx: &ComponentContext,
        message: &mut Message,
        _data: Value,
    ) -> Result<Option<Value>, ComponentError> {
        Ok(Some(message.payload().to_value()))
    }
}
