//! The component trait.

use crate::{ComponentContext, ComponentError, ComponentInfo};
use async_trait::async_trait;
use braid_event::{CacheExpiryEvent, Event, Message, TimerEvent};
use serde_json::Value;

/// A processing stage of a flow.
///
/// The runtime drives each instance from a worker loop:
///
/// 1. take the next [`Event`] - from the shared input queue, or from
///    [`next_event`](Self::next_event) for source stages
/// 2. for MESSAGE events: apply the configured transforms, evaluate
///    `input_selection`, call [`invoke`](Self::invoke)
/// 3. a non-null result becomes `message.previous` and the message is
///    handed to [`send_output`](Self::send_output); a null result (or
///    a discarded message) is a terminal hop and the message is acked
/// 4. an error nacks the message, reports to the error flow, and the
///    worker continues with the next event
///
/// Implementations hold their own per-worker state; sibling workers of
/// one component never share it. Cross-message state belongs in the
/// cache service.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use braid_component::{Component, ComponentContext, ComponentError, ComponentInfo};
/// use braid_event::Message;
/// use serde_json::Value;
///
/// struct Reverse {
///     info: ComponentInfo,
/// }
///
/// #[async_trait]
/// impl Component for Reverse {
///     fn info(&self) -> &ComponentInfo {
///         &self.info
///     }
///
///     async fn invoke(
///         &mut self,
///         _ctx: &ComponentContext,
///         _message: &mut Message,
///         data: Value,
///     ) -> Result<Option<Value>, ComponentError> {
///         let text = data.as_str().unwrap_or_default();
///         Ok(Some(Value::String(text.chars().rev().collect())))
///     }
/// }
/// ```
#[async_trait]
pub trait Component: Send {
    /// Static metadata: registry name and declared parameters.
    fn info(&self) -> &ComponentInfo;

    /// One-time async initialization before any event is processed.
    /// Broker stages connect here. A failure aborts flow startup.
    async fn start(&mut self, _ctx: &ComponentContext) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Cleanup when the worker exits. Pending timers are purged by the
    /// runtime afterwards.
    async fn stop(&mut self, _ctx: &ComponentContext) {}

    /// Whether this stage produces events from an external source
    /// instead of the shared input queue.
    fn is_source(&self) -> bool {
        false
    }

    /// Produces the next event for a source stage.
    ///
    /// Must observe [`ComponentContext::stop_token`] and return
    /// [`Event::Stop`] when shutdown is requested. Returning
    /// `Ok(None)` means "nothing yet, poll again".
    ///
    /// # Errors
    ///
    /// Errors are reported to the error flow; the worker keeps
    /// polling.
    async fn next_event(&mut self, _ctx: &ComponentContext) -> Result<Option<Event>, ComponentError> {
        Ok(None)
    }

    /// Processes one message. `data` is the evaluated
    /// `input_selection` (default: the `previous` plane).
    ///
    /// Returning `Ok(Some(result))` forwards the message downstream
    /// with `previous = result`; `Ok(None)` ends the message's journey
    /// with an ack.
    ///
    /// # Errors
    ///
    /// An error nacks the message and emits an error-flow event.
    async fn invoke(
        &mut self,
        ctx: &ComponentContext,
        message: &mut Message,
        data: Value,
    ) -> Result<Option<Value>, ComponentError>;

    /// Hands a processed message onward. Output stages override this
    /// to perform their external action; the default forwards to the
    /// downstream queue (or acks at the end of a flow).
    ///
    /// # Errors
    ///
    /// Implementations must settle the message (ack or nack) before
    /// returning an error.
    async fn send_output(
        &mut self,
        ctx: &ComponentContext,
        message: Message,
    ) -> Result<(), ComponentError> {
        ctx.forward(message).await
    }

    /// Handles a fired timer. Cancelled-but-already-enqueued timer
    /// events may still arrive here.
    ///
    /// # Errors
    ///
    /// Errors are reported to the error flow.
    async fn handle_timer_event(
        &mut self,
        _ctx: &ComponentContext,
        _event: TimerEvent,
    ) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Handles the expiry of a cache entry this component owns.
    ///
    /// # Errors
    ///
    /// Errors are reported to the error flow.
    async fn handle_cache_expiry_event(
        &mut self,
        _ctx: &ComponentContext,
        _event: CacheExpiryEvent,
    ) -> Result<(), ComponentError> {
        Ok(())
    }
}
