//! Expression-addressed data access on [`Message`].

use crate::expr::Expression;
use crate::ExpressionError;
use braid_event::Message;
use serde_json::Value;

/// Expression-addressed reads and writes on a message.
///
/// ```
/// use braid_event::Message;
/// use braid_expression::MessageData;
/// use braid_types::Payload;
/// use serde_json::json;
///
/// let mut message = Message::new(Payload::Structured(json!({"n": 1})));
/// message.set_data("user_data.temp:n", json!(2)).unwrap();
/// assert_eq!(message.get_data("user_data.temp:n").unwrap(), json!(2));
/// assert_eq!(message.get_data("input.payload:n").unwrap(), json!(1));
/// ```
pub trait MessageData {
    /// Evaluates an expression; missing data yields null.
    ///
    /// # Errors
    ///
    /// Returns an error only when the expression text is malformed.
    fn get_data(&self, expression: &str) -> Result<Value, ExpressionError>;

    /// Writes a value at an expression location. Only the
    /// `user_data.<name>` planes are writable through this interface.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed expressions or read-only planes.
    fn set_data(&mut self, expression: &str, value: Value) -> Result<(), ExpressionError>;
}

impl MessageData for Message {
    fn get_data(&self, expression: &str) -> Result<Value, ExpressionError> {
        Ok(Expression::parse(expression)?.evaluate(self, None))
    }

    fn set_data(&mut self, expression: &str, value: Value) -> Result<(), ExpressionError> {
        Expression::parse(expression)?.write(self, value, false)
    }
}
