//! Decoded payload content of an input event.

use base64::Engine as _;
use serde_json::Value;

/// The decoded content carried by a message envelope.
///
/// Broker payloads arrive as opaque bytes and are decoded per the input
/// stage's `payload_encoding` / `payload_format` configuration into one
/// of three shapes. The shape is fixed for the lifetime of the message;
/// transforms write to the scratch planes, never to the payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw bytes that could not (or should not) be interpreted further.
    Bytes(Vec<u8>),
    /// Plain text.
    Text(String),
    /// A structured tree (objects, arrays, scalars).
    Structured(Value),
}

impl Payload {
    /// Returns the payload as an expression-navigable value.
    ///
    /// Bytes are textualized as base64 so that expressions and
    /// templates always see a value; `Text` becomes a string value and
    /// `Structured` is returned as-is.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Bytes(bytes) => {
                Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            Self::Text(text) => Value::String(text.clone()),
            Self::Structured(value) => value.clone(),
        }
    }

    /// Returns the structured tree, if this payload is one.
    #[must_use]
    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Self::Structured(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the text content, if this payload is plain text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::Structured(Value::Null)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Structured(value)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structured_to_value_is_identity() {
        let payload = Payload::Structured(json!({"a": 1}));
        assert_eq!(payload.to_value(), json!({"a": 1}));
    }

    #[test]
    fn text_to_value_is_string() {
        assert_eq!(
            Payload::Text("hello".into()).to_value(),
            Value::String("hello".into())
        );
    }

    #[test]
    fn bytes_to_value_is_base64() {
        let payload = Payload::Bytes(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(payload.to_value(), Value::String("3q2+7w==".into()));
    }

    #[test]
    fn default_is_null_tree() {
        assert_eq!(Payload::default().to_value(), Value::Null);
    }
}
