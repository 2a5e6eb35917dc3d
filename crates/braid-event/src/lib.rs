//! Message and event envelopes for braid.
//!
//! This crate defines the in-flight data model of a braid flow:
//!
//! ```text
//! broker ──► Message ──► [Event queue] ──► worker ──► [Event queue] ──► ...
//!               │
//!               ├─ payload / topic / user_properties   (immutable input)
//!               ├─ user_data                           (scratch space)
//!               ├─ previous                            (last invoke result)
//!               └─ ack / nack callbacks                (terminal disposition)
//! ```
//!
//! # Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Message`] | the envelope passed between components |
//! | [`Event`] | queue element: MESSAGE, TIMER, CACHE_EXPIRY or STOP |
//! | [`EventSender`] / [`EventReceiver`] | bounded MPMC queue endpoints |
//! | [`NackInfo`] / [`AckBundle`] / [`IterationState`] | acknowledgement state |
//! | [`ErrorEnvelope`] | payload of events emitted onto the error flow |
//!
//! # Acknowledgement Contract
//!
//! For every message produced by an input stage, exactly one of
//! [`Message::call_acknowledgements`] or
//! [`Message::call_negative_acknowledgements`] fires, exactly once,
//! before the message is dropped. Callbacks run in registration order.
//! When a component fans one message out into several
//! ([`Message::begin_iteration`]), the upstream disposition is deferred
//! until every sibling terminates.

mod ack;
mod error_event;
mod event;
mod message;
mod queue;

pub use ack::{AckBundle, AckCallback, IterationState, NackCallback, NackInfo};
pub use error_event::{ErrorDetail, ErrorEnvelope, ErrorLocation};
pub use event::{CacheExpiryEvent, Event, TimerEvent};
pub use message::Message;
pub use queue::{event_channel, EventReceiver, EventSender, QueueClosed, DEFAULT_QUEUE_DEPTH};
