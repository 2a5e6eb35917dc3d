//! Queue events consumed by component workers.

use crate::Message;
use serde_json::Value;

/// An element of a component's input queue.
#[derive(Debug)]
pub enum Event {
    /// A message to process through the component.
    Message(Box<Message>),
    /// A timer registered by the component has fired.
    Timer(TimerEvent),
    /// A cache entry owned by the component has expired.
    CacheExpiry(CacheExpiryEvent),
    /// The worker consuming this event must exit.
    Stop,
}

impl Event {
    /// Wraps a message as a queue event.
    #[must_use]
    pub fn message(message: Message) -> Self {
        Self::Message(Box::new(message))
    }

    /// Short label for logging and tracing.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "MESSAGE",
            Self::Timer(_) => "TIMER",
            Self::CacheExpiry(_) => "CACHE_EXPIRY",
            Self::Stop => "STOP",
        }
    }
}

/// Data delivered with a TIMER event.
#[derive(Debug, Clone)]
pub struct TimerEvent {
    /// The id the component registered the timer under.
    pub timer_id: String,
    /// Optional payload supplied at registration.
    pub payload: Option<Value>,
}

/// Data delivered with a CACHE_EXPIRY event.
#[derive(Debug, Clone)]
pub struct CacheExpiryEvent {
    /// The expired cache key.
    pub key: String,
    /// Metadata supplied when the entry was added.
    pub metadata: Option<Value>,
    /// The value that was stored under the key.
    pub expired_data: Value,
}
