//! Expression engine errors.

use braid_types::ErrorCode;
use thiserror::Error;

/// Errors raised while parsing or resolving expressions, templates,
/// invoke blocks and transforms.
#[derive(Debug, Error)]
pub enum ExpressionError {
    /// The expression text does not follow the locator grammar.
    #[error("invalid expression '{expression}': {reason}")]
    InvalidExpression {
        /// The offending expression text.
        expression: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A write targeted a read-only plane.
    #[error("plane '{0}' is not writable")]
    NotWritable(String),

    /// An invoke block referenced an unregistered function.
    #[error("unknown invoke target '{0}'")]
    UnknownInvokeTarget(String),

    /// An invoke function failed.
    #[error("invoke '{target}' failed: {reason}")]
    InvokeFailed {
        /// `module.function` of the failing call.
        target: String,
        /// Why it failed.
        reason: String,
    },

    /// A deferred value was resolved in a context without a message.
    #[error("deferred expression requires a message in this context")]
    MessageRequired,

    /// A transform operator could not be parsed or applied.
    #[error("transform {index} ({kind}): {reason}")]
    Transform {
        /// Position of the transform in the configured list.
        index: usize,
        /// Operator type.
        kind: String,
        /// Why it failed.
        reason: String,
    },
}

impl ErrorCode for ExpressionError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidExpression { .. } => "EXPR_INVALID_EXPRESSION",
            Self::NotWritable(_) => "EXPR_NOT_WRITABLE",
            Self::UnknownInvokeTarget(_) => "EXPR_UNKNOWN_INVOKE_TARGET",
            Self::InvokeFailed { .. } => "EXPR_INVOKE_FAILED",
            Self::MessageRequired => "EXPR_MESSAGE_REQUIRED",
            Self::Transform { .. } => "EXPR_TRANSFORM",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

impl ExpressionError {
    pub(crate) fn invalid(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidExpression {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_types::assert_error_codes;

    #[test]
    fn error_codes_follow_conventions() {
        assert_error_codes(
            &[
                ExpressionError::invalid("x", "y"),
                ExpressionError::NotWritable("input".into()),
                ExpressionError::MessageRequired,
            ],
            "EXPR_",
        );
    }
}
