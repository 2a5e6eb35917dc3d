//! Split a list input into one message per element.

use async_trait::async_trait;
use braid_component::{Component, ComponentContext, ComponentError, ComponentInfo};
use braid_event::Message;
use braid_types::Payload;
use serde_json::Value;

/// Emits each element of its (list-shaped) input as a separate
/// downstream message.
///
/// The siblings share the input message's acknowledgement through an
/// iteration join: the upstream ack fires only after every emitted
/// message reaches a terminal disposition.
pub struct Iterate {
    info: ComponentInfo,
}

impl Iterate {
    /// Creates an iterate stage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            info: ComponentInfo::new(
                "iterate",
                "Outputs each item of a list input as a separate message",
            ),
        }
    }
}

impl Default for Iterate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Component for Iterate {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }

    async fn invoke(
        &mut self,
        ctx: &ComponentContext,
        message: &mut Message,
        data: Value,
    ) -> Result<Option<Value>, ComponentError> {
        let Value::Array(items) = data else {
            return Err(ComponentError::Invoke(
                "iterate requires a list input".to_string(),
            ));
        };
        if items.is_empty() {
            // Nothing to emit; the worker acks the input.
            return Ok(None);
        }

        let join = message.begin_iteration(items.len());
        for item in items {
            let mut child = Message::new(Payload::Structured(item.clone()))
                .with_user_properties(message.user_properties().clone());
            if let Some(topic) = message.topic() {
                child = child.with_topic(topic);
            }
            child.set_iteration_state(join.clone());
            child.set_previous(item);
            ctx.forward(child).await?;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_component::testing::ComponentTestHarness;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn emits_one_message_per_item() {
        let mut harness = ComponentTestHarness::new(Iterate::new());
        let mut message = Message::new(Payload::default()).with_topic("t/1");

        let result = harness
            .invoke(&mut message, json!([1, 2, 3]))
            .await
            .expect("invoke");
        assert_eq!(result, None);

        let children = harness.forwarded();
        assert_eq!(children.len(), 3);
        assert_eq!(children[0].previous(), Some(&json!(1)));
        assert_eq!(children[2].previous(), Some(&json!(3)));
        assert_eq!(children[1].topic(), Some("t/1"));
    }

    #[tokio::test]
    async fn upstream_ack_waits_for_all_children() {
        let mut harness = ComponentTestHarness::new(Iterate::new());
        let acks = Arc::new(AtomicUsize::new(0));

        let mut message = Message::new(Payload::default());
        let counter = acks.clone();
        message.add_ack_callback(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        harness
            .invoke(&mut message, json!(["a", "b"]))
            .await
            .expect("invoke");
        // The worker acks the consumed input; its disposition moved
        // into the join, so this must not fire the upstream ack.
        message.call_acknowledgements();
        assert_eq!(acks.load(Ordering::SeqCst), 0);

        let mut children = harness.forwarded();
        children[0].call_acknowledgements();
        assert_eq!(acks.load(Ordering::SeqCst), 0);
        children[1].call_acknowledgements();
        assert_eq!(acks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_list_input_is_an_error() {
        let mut harness = ComponentTestHarness::new(Iterate::new());
        let mut message = Message::new(Payload::default());
        assert!(harness.invoke(&mut message, json!("scalar")).await.is_err());
    }

    #[tokio::test]
    async fn empty_list_emits_nothing() {
        let mut harness = ComponentTestHarness::new(Iterate::new());
        let mut message = Message::new(Payload::default());
        let result = harness.invoke(&mut message, json!([])).await.expect("invoke");
        assert_eq!(result, None);
        assert!(harness.forwarded().is_empty());
    }
}
