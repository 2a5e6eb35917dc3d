//! The message envelope passed between components.

use crate::ack::{AckBundle, AckCallback, IterationState, NackCallback, NackInfo};
use braid_types::Payload;
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;

/// The unit of work flowing through a braid pipeline.
///
/// A message is created by an input stage, owned by exactly one worker
/// at a time, and handed off between components through bounded event
/// queues. The originating input's `payload`, `topic` and
/// `user_properties` are immutable for the lifetime of the flow;
/// components communicate through `previous` (the last invoke result)
/// and the named `user_data` scratch regions.
pub struct Message {
    payload: Payload,
    topic: Option<String>,
    user_properties: Map<String, Value>,
    user_data: Map<String, Value>,
    previous: Option<Value>,
    discarded: bool,
    acked: bool,
    nacked: bool,
    on_ack: Vec<AckCallback>,
    on_nack: Vec<NackCallback>,
    iteration: Option<Arc<IterationState>>,
}

impl Message {
    /// Creates a message with the given payload and no topic.
    #[must_use]
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            topic: None,
            user_properties: Map::new(),
            user_data: Map::new(),
            previous: None,
            discarded: false,
            acked: false,
            nacked: false,
            on_ack: Vec::new(),
            on_nack: Vec::new(),
            iteration: None,
        }
    }

    /// Sets the originating topic.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Sets the originating user properties.
    #[must_use]
    pub fn with_user_properties(mut self, properties: Map<String, Value>) -> Self {
        self.user_properties = properties;
        self
    }

    /// Returns the decoded payload of the originating input.
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Returns the originating topic, if any.
    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    /// Returns the topic split on `/`, empty when there is no topic.
    #[must_use]
    pub fn topic_levels(&self) -> Vec<&str> {
        self.topic
            .as_deref()
            .map(|t| t.split('/').collect())
            .unwrap_or_default()
    }

    /// Returns the originating user properties.
    #[must_use]
    pub fn user_properties(&self) -> &Map<String, Value> {
        &self.user_properties
    }

    /// Returns the named scratch regions.
    #[must_use]
    pub fn user_data(&self) -> &Map<String, Value> {
        &self.user_data
    }

    /// Returns the named scratch regions for mutation.
    pub fn user_data_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.user_data
    }

    /// Returns the previous component's invoke result.
    #[must_use]
    pub fn previous(&self) -> Option<&Value> {
        self.previous.as_ref()
    }

    /// Returns the previous result for in-place mutation, creating a
    /// null slot when none is set yet (transform `previous` writes).
    pub fn previous_mut(&mut self) -> &mut Value {
        self.previous.get_or_insert(Value::Null)
    }

    /// Replaces the previous result. Called at every component boundary.
    pub fn set_previous(&mut self, value: Value) {
        self.previous = Some(value);
    }

    /// Marks this message so the current component suppresses its
    /// output; the worker acks it instead of forwarding.
    pub fn discard(&mut self) {
        self.discarded = true;
    }

    /// Returns whether the current component discarded this message.
    #[must_use]
    pub fn is_discarded(&self) -> bool {
        self.discarded
    }

    /// Resets the discard mark before each invoke.
    pub fn clear_discard(&mut self) {
        self.discarded = false;
    }

    /// Registers a callback fired on positive terminal disposition.
    pub fn add_ack_callback(&mut self, callback: AckCallback) {
        self.on_ack.push(callback);
    }

    /// Registers a callback fired on negative terminal disposition.
    pub fn add_nack_callback(&mut self, callback: NackCallback) {
        self.on_nack.push(callback);
    }

    /// Fires the ack callbacks, exactly once, in registration order.
    ///
    /// Subsequent calls (and any later nack) are no-ops: the first
    /// terminal disposition wins.
    pub fn call_acknowledgements(&mut self) {
        if self.acked || self.nacked {
            return;
        }
        self.acked = true;
        for callback in self.on_ack.drain(..) {
            callback();
        }
        self.on_nack.clear();
        if let Some(state) = self.iteration.take() {
            state.child_done();
        }
    }

    /// Fires the nack callbacks with `info`, exactly once.
    pub fn call_negative_acknowledgements(&mut self, info: NackInfo) {
        if self.acked || self.nacked {
            return;
        }
        self.nacked = true;
        for callback in self.on_nack.drain(..) {
            callback(info.clone());
        }
        self.on_ack.clear();
        if let Some(state) = self.iteration.take() {
            state.child_failed(info);
        }
    }

    /// Detaches the pending terminal disposition from this message.
    ///
    /// Afterwards this message's own disposition is a no-op; the
    /// returned bundle must be settled (or attached to another message)
    /// by the caller.
    pub fn take_acknowledgements(&mut self) -> AckBundle {
        AckBundle {
            on_ack: std::mem::take(&mut self.on_ack),
            on_nack: std::mem::take(&mut self.on_nack),
            iteration: self.iteration.take(),
        }
    }

    /// Attaches a detached disposition to this message.
    pub fn absorb_acknowledgements(&mut self, bundle: AckBundle) {
        let mut own = self.take_acknowledgements();
        own.merge(bundle);
        self.on_ack = own.on_ack;
        self.on_nack = own.on_nack;
        self.iteration = own.iteration;
    }

    /// Moves this message's disposition into an iteration join that
    /// expects `expected` sibling completions.
    ///
    /// Attach the returned state to each emitted sibling with
    /// [`set_iteration_state`](Self::set_iteration_state). This
    /// message's own disposition becomes a no-op.
    pub fn begin_iteration(&mut self, expected: usize) -> Arc<IterationState> {
        IterationState::new(expected, self.take_acknowledgements())
    }

    /// Links this message into an iteration join as one sibling.
    pub fn set_iteration_state(&mut self, state: Arc<IterationState>) {
        self.iteration = Some(state);
    }

    /// Returns a structural snapshot of the message for error reporting.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        json!({
            "payload": self.payload.to_value(),
            "topic": self.topic,
            "user_properties": Value::Object(self.user_properties.clone()),
            "user_data": Value::Object(self.user_data.clone()),
            "previous": self.previous.clone().unwrap_or(Value::Null),
        })
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("topic", &self.topic)
            .field("payload", &self.payload)
            .field("previous", &self.previous)
            .field("discarded", &self.discarded)
            .field("acked", &self.acked)
            .field("nacked", &self.nacked)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn ack_fires_once_in_registration_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut message = Message::new(Payload::Text("x".into()));

        for tag in ["first", "second"] {
            let order = order.clone();
            message.add_ack_callback(Box::new(move || order.lock().push(tag)));
        }

        message.call_acknowledgements();
        message.call_acknowledgements();
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[test]
    fn nack_wins_over_later_ack() {
        let acks = Arc::new(AtomicUsize::new(0));
        let nacks = Arc::new(AtomicUsize::new(0));
        let mut message = Message::new(Payload::default());

        let a = acks.clone();
        message.add_ack_callback(Box::new(move || {
            a.fetch_add(1, Ordering::SeqCst);
        }));
        let n = nacks.clone();
        message.add_nack_callback(Box::new(move |_| {
            n.fetch_add(1, Ordering::SeqCst);
        }));

        message.call_negative_acknowledgements(NackInfo::new("COMPONENT_INVOKE", "boom"));
        message.call_acknowledgements();

        assert_eq!(acks.load(Ordering::SeqCst), 0);
        assert_eq!(nacks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn taken_acknowledgements_leave_noop_disposition() {
        let acks = Arc::new(AtomicUsize::new(0));
        let mut message = Message::new(Payload::default());
        let a = acks.clone();
        message.add_ack_callback(Box::new(move || {
            a.fetch_add(1, Ordering::SeqCst);
        }));

        let bundle = message.take_acknowledgements();
        message.call_acknowledgements();
        assert_eq!(acks.load(Ordering::SeqCst), 0);

        bundle.acknowledge();
        assert_eq!(acks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn iteration_defers_parent_ack() {
        let acks = Arc::new(AtomicUsize::new(0));
        let mut parent = Message::new(Payload::default());
        let a = acks.clone();
        parent.add_ack_callback(Box::new(move || {
            a.fetch_add(1, Ordering::SeqCst);
        }));

        let state = parent.begin_iteration(2);
        let mut child_a = Message::new(Payload::default());
        child_a.set_iteration_state(state.clone());
        let mut child_b = Message::new(Payload::default());
        child_b.set_iteration_state(state);

        parent.call_acknowledgements();
        assert_eq!(acks.load(Ordering::SeqCst), 0);

        child_a.call_acknowledgements();
        assert_eq!(acks.load(Ordering::SeqCst), 0);
        child_b.call_acknowledgements();
        assert_eq!(acks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn topic_levels_split_on_slash() {
        let message = Message::new(Payload::default()).with_topic("orders/new/42");
        assert_eq!(message.topic_levels(), vec!["orders", "new", "42"]);
        assert!(Message::new(Payload::default()).topic_levels().is_empty());
    }
}
