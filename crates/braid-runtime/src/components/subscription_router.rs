//! Route messages from one broker input to user components by topic.

use async_trait::async_trait;
use braid_component::{Component, ComponentContext, ComponentError, ComponentInfo};
use braid_event::{Event, EventSender, Message};
use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// One routable destination: a user component's input queue plus its
/// precompiled subscription patterns.
pub(crate) struct RouterTarget {
    pub name: String,
    pub patterns: Vec<Regex>,
    pub queue: EventSender,
}

/// Synthetic stage between a simplified app's broker input and its
/// user components.
///
/// Targets are checked in declaration order and exactly the first
/// match receives the message; an unroutable topic is logged, the
/// message acked upstream and dropped.
pub(crate) struct SubscriptionRouter {
    info: ComponentInfo,
    targets: Vec<RouterTarget>,
}

impl SubscriptionRouter {
    pub(crate) fn new(targets: Vec<RouterTarget>) -> Self {
        Self {
            info: ComponentInfo::new(
                "subscription_router",
                "Routes messages to the first component with a matching subscription",
            ),
            targets,
        }
    }
}

#[async_trait]
impl Component for SubscriptionRouter {
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

    async fn send_output(
        &mut self,
        ctx: &ComponentContext,
        mut message: Message,
    ) -> Result<(), ComponentError> {
        let topic = message.topic().unwrap_or("").to_string();
        for target in &self.targets {
            if target.patterns.iter().any(|pattern| pattern.is_match(&topic)) {
                debug!(
                    "{} routing topic '{topic}' to '{}'",
                    ctx.identifier(),
                    target.name
                );
                return target
                    .queue
                    .send(Event::message(message))
                    .await
                    .map_err(|_| ComponentError::Cancelled);
            }
        }
        debug!(
            "{} no subscription matches topic '{topic}', dropping",
            ctx.identifier()
        );
        message.call_acknowledgements();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::subscription_to_regex;
    use braid_event::event_channel;
    use braid_types::Payload;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn target(name: &str, patterns: &[&str], queue: EventSender) -> RouterTarget {
        RouterTarget {
            name: name.to_string(),
            patterns: patterns
                .iter()
                .map(|p| subscription_to_regex(p).expect("compile"))
                .collect(),
            queue,
        }
    }

    #[tokio::test]
    async fn first_declared_match_wins() {
        let (tx_a, rx_a) = event_channel(4);
        let (tx_b, rx_b) = event_channel(4);
        let mut router = SubscriptionRouter::new(vec![
            target("a", &["orders/new/>"], tx_a),
            target("b", &["orders/>"], tx_b),
        ]);
        let ctx = ComponentContext::builder("router").build();

        let message = Message::new(Payload::default()).with_topic("orders/new/42");
        router.send_output(&ctx, message).await.expect("send");

        assert!(rx_a.try_recv().is_some());
        assert!(rx_b.try_recv().is_none());
    }

    #[tokio::test]
    async fn only_matching_component_receives() {
        let (tx_a, rx_a) = event_channel(4);
        let (tx_b, rx_b) = event_channel(4);
        let mut router = SubscriptionRouter::new(vec![
            target("a", &["orders/new/>"], tx_a),
            target("b", &["orders/updates/>"], tx_b),
        ]);
        let ctx = ComponentContext::builder("router").build();

        let message = Message::new(Payload::default()).with_topic("orders/updates/42");
        router.send_output(&ctx, message).await.expect("send");

        assert!(rx_a.try_recv().is_none());
        assert!(rx_b.try_recv().is_some());
    }

    #[tokio::test]
    async fn unroutable_topic_is_acked_and_dropped() {
        let (tx_a, rx_a) = event_channel(4);
        let mut router = SubscriptionRouter::new(vec![target("a", &["orders/>"], tx_a)]);
        let ctx = ComponentContext::builder("router").build();

        let acked = Arc::new(AtomicBool::new(false));
        let flag = acked.clone();
        let mut message = Message::new(Payload::default()).with_topic("invoices/1");
        message.add_ack_callback(Box::new(move || flag.store(true, Ordering::SeqCst)));

        router.send_output(&ctx, message).await.expect("send");
        assert!(rx_a.try_recv().is_none());
        assert!(acked.load(Ordering::SeqCst));
    }
}
