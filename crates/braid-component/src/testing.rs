//! Test harness for driving a component without a flow.
//!
//! The harness builds a context with noop services, captures the
//! downstream queue, and exposes the worker-side entry points
//! directly:
//!
//! ```
//! use braid_component::testing::ComponentTestHarness;
//! use braid_component::{Component, ComponentContext, ComponentError, ComponentInfo};
//! use async_trait::async_trait;
//! use braid_event::Message;
//! use braid_types::Payload;
//! use serde_json::{json, Value};
//!
//! struct Doubler { info: ComponentInfo }
//!
//! #[async_trait]
//! impl Component for Doubler {
//!     fn info(&self) -> &ComponentInfo { &self.info }
//!     async fn invoke(
//!         &mut self,
//!         _ctx: &ComponentContext,
//!         _message: &mut Message,
//!         data: Value,
//!     ) -> Result<Option<Value>, ComponentError> {
//!         Ok(Some(json!(data.as_i64().unwrap_or(0) * 2)))
//!     }
//! }
//!
//! # tokio_test();
//! # fn tokio_test() {
//! # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! # rt.block_on(async {
//! let mut harness = ComponentTestHarness::new(Doubler {
//!     info: ComponentInfo::new("doubler", ""),
//! });
//! let mut message = Message::new(Payload::default());
//! let result = harness.invoke(&mut message, json!(21)).await.unwrap();
//! assert_eq!(result, Some(json!(42)));
//! # });
//! # }
//! ```

use crate::{Component, ComponentContext, ComponentError, ContextBuilder};
use braid_event::{event_channel, Event, EventReceiver, Message, TimerEvent};
use braid_expression::{resolve_config_map, InvokeRegistry};
use serde_json::Value;

const HARNESS_QUEUE_DEPTH: usize = 16;

/// Drives a single component instance in isolation.
pub struct ComponentTestHarness {
    component: Box<dyn Component>,
    ctx: ComponentContext,
    downstream: EventReceiver,
    input: EventReceiver,
}

impl ComponentTestHarness {
    /// Wraps a pre-built component with a default context.
    pub fn new(component: impl Component + 'static) -> Self {
        Self::with_context(component, ComponentContext::builder("under-test"))
    }

    /// Wraps a component, resolving the given raw `component_config`.
    ///
    /// # Panics
    ///
    /// Panics when the config cannot be resolved; harness setup is
    /// test code.
    pub fn with_config(component: impl Component + 'static, config: Value) -> Self {
        let resolved = resolve_config_map(&config, &InvokeRegistry::with_builtins())
            .expect("harness config should resolve");
        Self::with_context(
            component,
            ComponentContext::builder("under-test").component_config(resolved),
        )
    }

    /// Wraps a component with a caller-prepared context builder. The
    /// harness installs its own input and downstream queues.
    pub fn with_context(component: impl Component + 'static, builder: ContextBuilder) -> Self {
        let (input_tx, input_rx) = event_channel(HARNESS_QUEUE_DEPTH);
        let (downstream_tx, downstream_rx) = event_channel(HARNESS_QUEUE_DEPTH);
        let ctx = builder
            .input_sender(input_tx)
            .downstream(Some(downstream_tx))
            .build();
        Self {
            component: Box::new(component),
            ctx,
            downstream: downstream_rx,
            input: input_rx,
        }
    }

    /// The context the component sees.
    #[must_use]
    pub fn ctx(&self) -> &ComponentContext {
        &self.ctx
    }

    /// Runs the component's startup hook.
    ///
    /// # Errors
    ///
    /// Propagates startup failures.
    pub async fn start(&mut self) -> Result<(), ComponentError> {
        self.component.start(&self.ctx).await
    }

    /// Calls invoke directly.
    ///
    /// # Errors
    ///
    /// Propagates invoke failures.
    pub async fn invoke(
        &mut self,
        message: &mut Message,
        data: Value,
    ) -> Result<Option<Value>, ComponentError> {
        self.component.invoke(&self.ctx, message, data).await
    }

    /// Calls the output hook directly.
    ///
    /// # Errors
    ///
    /// Propagates send failures.
    pub async fn send_output(&mut self, message: Message) -> Result<(), ComponentError> {
        self.component.send_output(&self.ctx, message).await
    }

    /// Delivers a timer event to the component.
    ///
    /// # Errors
    ///
    /// Propagates handler failures.
    pub async fn fire_timer(&mut self, event: TimerEvent) -> Result<(), ComponentError> {
        self.component.handle_timer_event(&self.ctx, event).await
    }

    /// Drains messages the component forwarded downstream.
    pub fn forwarded(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(event) = self.downstream.try_recv() {
            if let Event::Message(message) = event {
                messages.push(*message);
            }
        }
        messages
    }

    /// Drains events delivered to the component's own input queue
    /// (timer targets point here).
    pub fn own_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.input.try_recv() {
            events.push(event);
        }
        events
    }
}
