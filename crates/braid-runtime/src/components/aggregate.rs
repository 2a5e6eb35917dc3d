//! Batch messages by count or time.

use async_trait::async_trait;
use braid_component::{Component, ComponentContext, ComponentError, ComponentInfo, ConfigParameter};
use braid_event::{AckBundle, Message, TimerEvent};
use braid_types::Payload;
use serde_json::{json, Value};
use std::time::Duration;

const FLUSH_TIMER_ID: &str = "aggregate_flush";

/// Collects selected inputs and emits them as one list-shaped message
/// once `max_items` arrived or `max_time_ms` elapsed since the first.
///
/// Buffered inputs keep their pending acknowledgements: the batch
/// message absorbs them, so upstream acks fire when the batch reaches
/// its terminal disposition.
pub struct Aggregate {
    info: ComponentInfo,
    items: Vec<Value>,
    acks: AckBundle,
    max_items: usize,
    max_time: Option<Duration>,
}

impl Aggregate {
    /// Creates an aggregate stage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            info: ComponentInfo::new(
                "aggregate",
                "Collects messages into a list, flushed by count or timeout",
            )
            .with_parameter(ConfigParameter::optional("max_items", json!(10)))
            .with_parameter(ConfigParameter::optional("max_time_ms", json!(1000))),
            items: Vec::new(),
            acks: AckBundle::default(),
            max_items: 10,
            max_time: None,
        }
    }

    async fn flush(&mut self, ctx: &ComponentContext) -> Result<(), ComponentError> {
        ctx.cancel_timer(FLUSH_TIMER_ID);
        if self.items.is_empty() {
            return Ok(());
        }
        let items = std::mem::take(&mut self.items);
        let acks = std::mem::take(&mut self.acks);

        let mut batch = Message::new(Payload::Structured(Value::Null));
        batch.absorb_acknowledgements(acks);
        batch.set_previous(Value::Array(items));
        ctx.forward(batch).await
    }
}

impl Default for Aggregate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Component for Aggregate {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }

    async fn start(&mut self, ctx: &ComponentContext) -> Result<(), ComponentError> {
        self.max_items = ctx.get_config_u64("max_items")?.unwrap_or(10).max(1) as usize;
        let max_time_ms = ctx.get_config_u64("max_time_ms")?.unwrap_or(1000);
        self.max_time = (max_time_ms > 0).then(|| Duration::from_millis(max_time_ms));
        Ok(())
    }

    async fn invoke(
        &mut self,
        ctx: &ComponentContext,
        message: &mut Message,
        data: Value,
    ) -> Result<Option<Value>, ComponentError> {
        if self.items.is_empty() {
            if let Some(max_time) = self.max_time {
                ctx.add_timer(max_time, FLUSH_TIMER_ID, None, None);
            }
        }
        self.items.push(data);
        self.acks.merge(message.take_acknowledgements());

        if self.items.len() >= self.max_items {
            self.flush(ctx).await?;
        }
        Ok(None)
    }

    async fn handle_timer_event(
        &mut self,
        ctx: &ComponentContext,
        event: TimerEvent,
    ) -> Result<(), ComponentError> {
        if event.timer_id == FLUSH_TIMER_ID {
            self.flush(ctx).await?;
        }
        Ok(())
    }

    async fn stop(&mut self, ctx: &ComponentContext) {
        // Flush what is buffered rather than dropping it unsettled.
        let _ = self.flush(ctx).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_component::testing::ComponentTestHarness;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn harness(config: Value) -> ComponentTestHarness {
        ComponentTestHarness::with_config(Aggregate::new(), config)
    }

    #[tokio::test]
    async fn flushes_at_max_items() {
        let mut harness = harness(json!({"max_items": 2, "max_time_ms": 0}));
        harness.start().await.expect("start");

        let mut first = Message::new(Payload::default());
        harness.invoke(&mut first, json!(1)).await.expect("invoke");
        assert!(harness.forwarded().is_empty());

        let mut second = Message::new(Payload::default());
        harness.invoke(&mut second, json!(2)).await.expect("invoke");

        let batches = harness.forwarded();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].previous(), Some(&json!([1, 2])));
    }

    #[tokio::test]
    async fn batch_carries_upstream_acks() {
        let mut harness = harness(json!({"max_items": 2, "max_time_ms": 0}));
        harness.start().await.expect("start");
        let acks = Arc::new(AtomicUsize::new(0));

        for value in [json!(1), json!(2)] {
            let mut message = Message::new(Payload::default());
            let counter = acks.clone();
            message.add_ack_callback(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
            harness.invoke(&mut message, value).await.expect("invoke");
            // Worker-side terminal ack of the consumed input is inert.
            message.call_acknowledgements();
        }
        assert_eq!(acks.load(Ordering::SeqCst), 0);

        let mut batches = harness.forwarded();
        batches[0].call_acknowledgements();
        assert_eq!(acks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn timer_flushes_partial_batch() {
        let mut harness = harness(json!({"max_items": 100, "max_time_ms": 50}));
        harness.start().await.expect("start");

        let mut message = Message::new(Payload::default());
        harness.invoke(&mut message, json!("only")).await.expect("invoke");

        harness
            .fire_timer(TimerEvent {
                timer_id: FLUSH_TIMER_ID.to_string(),
                payload: None,
            })
            .await
            .expect("timer");

        let batches = harness.forwarded();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].previous(), Some(&json!(["only"])));
    }
}
