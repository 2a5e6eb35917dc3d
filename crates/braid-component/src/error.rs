//! Component error type.

use braid_expression::ExpressionError;
use braid_types::ErrorCode;
use thiserror::Error;

/// Errors raised by components and the workers driving them.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// A static invariant of the component's configuration is violated.
    #[error("configuration error in '{component}': {reason}")]
    Config {
        /// The component reporting the problem.
        component: String,
        /// What is wrong.
        reason: String,
    },

    /// The component's invoke failed.
    #[error("invoke failed: {0}")]
    Invoke(String),

    /// An input payload could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The broker link is unavailable.
    #[error("connection error: {0}")]
    Connection(String),

    /// A request/reply call expired before a (final) reply arrived.
    #[error("request timed out after {0} ms")]
    RequestTimeout(u64),

    /// The runtime is shutting down.
    #[error("operation cancelled by shutdown")]
    Cancelled,

    /// An expression, template or transform failed.
    #[error(transparent)]
    Expression(#[from] ExpressionError),
}

impl ComponentError {
    /// Shorthand for a configuration error.
    pub fn config(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            component: component.into(),
            reason: reason.into(),
        }
    }
}

impl ErrorCode for ComponentError {
    fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "COMPONENT_CONFIG",
            Self::Invoke(_) => "COMPONENT_INVOKE",
            Self::Decode(_) => "COMPONENT_DECODE",
            Self::Connection(_) => "COMPONENT_CONNECTION",
            Self::RequestTimeout(_) => "COMPONENT_REQUEST_TIMEOUT",
            Self::Cancelled => "COMPONENT_CANCELLED",
            Self::Expression(inner) => inner.code(),
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::RequestTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_types::assert_error_codes;

    #[test]
    fn codes_follow_conventions() {
        assert_error_codes(
            &[
                ComponentError::config("c", "bad"),
                ComponentError::Invoke("x".into()),
                ComponentError::Decode("x".into()),
                ComponentError::Connection("x".into()),
                ComponentError::RequestTimeout(1000),
                ComponentError::Cancelled,
            ],
            "COMPONENT_",
        );
    }

    #[test]
    fn only_transport_errors_are_recoverable() {
        assert!(ComponentError::Connection("down".into()).is_recoverable());
        assert!(ComponentError::RequestTimeout(1).is_recoverable());
        assert!(!ComponentError::config("c", "bad").is_recoverable());
    }
}
