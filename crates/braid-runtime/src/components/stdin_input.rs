//! Read lines from stdin as messages.

use async_trait::async_trait;
use braid_component::{Component, ComponentContext, ComponentError, ComponentInfo};
use braid_event::{Event, Message};
use braid_types::Payload;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

/// Source stage emitting one Text message per stdin line. EOF stops
/// the worker.
pub struct StdinInput {
    info: ComponentInfo,
    lines: Option<Lines<BufReader<Stdin>>>,
}

impl StdinInput {
    /// Creates a stdin input stage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            info: ComponentInfo::new("stdin_input", "Reads messages from stdin, one per line"),
            lines: None,
        }
    }
}

impl Default for StdinInput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Component for StdinInput {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }

    fn is_source(&self) -> bool {
        true
    }

    async fn start(&mut self, _ctx: &ComponentContext) -> Result<(), ComponentError> {
        self.lines = Some(BufReader::new(tokio::io::stdin()).lines());
        Ok(())
    }

    async fn next_event(
        &mut self,
        ctx: &ComponentContext,
    ) -> Result<Option<Event>, ComponentError> {
        let Some(lines) = self.lines.as_mut() else {
            return Ok(Some(Event::Stop));
        };
        tokio::select! {
            _ = ctx.stop_token().cancelled() => Ok(Some(Event::Stop)),
            line = lines.next_line() => match line {
                Ok(Some(line)) => Ok(Some(Event::message(Message::new(Payload::Text(line))))),
                Ok(None) => Ok(Some(Event::Stop)),
                Err(error) => Err(ComponentError::Invoke(format!("stdin read failed: {error}"))),
            }
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
