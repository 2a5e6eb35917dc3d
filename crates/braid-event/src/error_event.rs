//! Envelope of events emitted onto the error flow.

use serde::Serialize;
use serde_json::Value;

/// Payload of a message delivered to the error flow's input queue.
///
/// Carries enough context to reconstruct the failure externally: which
/// worker failed, why, and a snapshot of the in-flight message (when
/// one was being processed).
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    /// What went wrong.
    pub error: ErrorDetail,
    /// Snapshot of the offending message, if the failure happened
    /// while processing one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    /// Where it went wrong.
    pub location: ErrorLocation,
}

/// The failure itself.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    /// Human-readable failure description.
    pub message: String,
    /// Machine-readable error kind (an `ErrorCode` code).
    pub exception_kind: String,
}

/// The worker that reported the failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorLocation {
    /// Connector instance name.
    pub instance_name: String,
    /// Owning flow.
    pub flow_name: String,
    /// Failing component.
    pub component_name: String,
    /// Index of the component within the flow.
    pub component_index: usize,
}

impl ErrorEnvelope {
    /// Serializes the envelope into a payload tree.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
