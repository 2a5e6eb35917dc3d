//! Print the selected input to stdout.

use async_trait::async_trait;
use braid_component::{Component, ComponentContext, ComponentError, ComponentInfo, ConfigParameter};
use braid_event::Message;
use serde_json::{json, Value};

/// Sink stage writing each message's selected input to stdout.
pub struct StdoutOutput {
    info: ComponentInfo,
}

impl StdoutOutput {
    /// Creates a stdout output stage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            info: ComponentInfo::new("stdout_output", "Prints its input to stdout")
                .with_parameter(ConfigParameter::optional("pretty_print", json!(false))),
        }
    }
}

impl Default for StdoutOutput {
    fn default() -> Self {
        Self::new()
    }
}

fn render(data: &Value, pretty: bool) -> String {
    match data {
        Value::String(text) => text.clone(),
        other if pretty => serde_json::to_string_pretty(other).unwrap_or_default(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[async_trait]
impl Component for StdoutOutput {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }

    async fn invoke(
        &mut self,
        ctx: &ComponentContext,
        _message: &mut Message,
        data: Value,
    ) -> Result<Option<Value>, ComponentError> {
        let pretty = ctx.get_config_bool("pretty_print")?.unwrap_or(false);
        println!("{}", render(&data, pretty));
        Ok(Some(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_render_verbatim() {
        assert_eq!(render(&json!("HELLO"), false), "HELLO");
    }

    #[test]
    fn structures_render_as_json() {
        assert_eq!(render(&json!({"a": 1}), false), r#"{"a":1}"#);
    }
}
