//! Forward the selected input unchanged.

use async_trait::async_trait;
use braid_component::{Component, ComponentContext, ComponentError, ComponentInfo};
use braid_event::Message;
use serde_json::Value;

/// Identity stage, useful for wiring and testing flows.
pub struct PassThrough {
    info: ComponentInfo,
}

impl PassThrough {
    /// Creates a pass-through component.
    #[must_use]
    pub fn new() -> Self {
        Self {
            info: ComponentInfo::new("pass_through", "Forwards its input unchanged"),
        }
    }
}

impl Default for PassThrough {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Component for PassThrough {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }

    async fn invoke(
        &mut self,
        _ctx: &ComponentContext,
        _message: &mut Message,
        data: Value,
    ) -> Result<Option<Value>, ComponentError> {
        Ok(Some(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_component::testing::ComponentTestHarness;
    use braid_types::Payload;
    use serde_json::json;

    #[tokio::test]
    async fn returns_input_unchanged() {
        let mut harness = ComponentTestHarness::new(PassThrough::new());
        let mut message = Message::new(Payload::default());
        let result = harness.invoke(&mut message, json!({"x": 1})).await.expect("invoke");
        assert_eq!(result, Some(json!({"x": 1})));
    }
}
