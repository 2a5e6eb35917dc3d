//! Unified error interface for braid.
//!
//! All braid error types implement [`ErrorCode`] so that the runtime,
//! the error flow, and operators see one consistent error surface:
//!
//! - **Machine-readable codes** for the error-flow envelope and logs
//! - **Recoverability info** for retry and reconnect decisions
//!
//! # Code Format
//!
//! Codes are UPPER_SNAKE_CASE, prefixed with the owning domain
//! (`CONFIG_`, `EXPR_`, `COMPONENT_`, `MESSAGING_`), and stable once
//! published - the error flow is an external interface.

/// Unified error code interface for braid errors.
///
/// # Recoverability
///
/// An error is recoverable when retrying may succeed (broker
/// reconnects, request timeouts). Configuration and expression errors
/// are not: they will not change until the operator changes the
/// configuration.
///
/// # Example
///
/// ```
/// use braid_types::ErrorCode;
///
/// #[derive(Debug)]
/// enum BrokerError {
///     LinkDown,
///     BadCredentials,
/// }
///
/// impl ErrorCode for BrokerError {
///     fn code(&self) -> &'static str {
///         match self {
///             Self::LinkDown => "MESSAGING_LINK_DOWN",
///             Self::BadCredentials => "MESSAGING_BAD_CREDENTIALS",
///         }
///     }
///
///     fn is_recoverable(&self) -> bool {
///         matches!(self, Self::LinkDown)
///     }
/// }
///
/// assert!(BrokerError::LinkDown.is_recoverable());
/// ```
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    ///
    /// UPPER_SNAKE_CASE, domain-prefixed, stable across versions.
    fn code(&self) -> &'static str;

    /// Returns whether retrying the failed operation may succeed.
    fn is_recoverable(&self) -> bool;
}

/// Asserts that an error code follows braid conventions.
///
/// Checks that the code is non-empty, UPPER_SNAKE_CASE, and starts
/// with the expected domain prefix.
///
/// # Panics
///
/// Panics with a descriptive message if validation fails. Intended for
/// use in tests.
pub fn assert_error_code<E: ErrorCode>(err: &E, expected_prefix: &str) {
    let code = err.code();

    assert!(!code.is_empty(), "error code must not be empty");
    assert!(
        code.starts_with(expected_prefix),
        "error code '{code}' must start with prefix '{expected_prefix}'"
    );
    assert!(
        is_upper_snake_case(code),
        "error code '{code}' must be UPPER_SNAKE_CASE"
    );
}

/// Asserts conventions for every variant of an error enum at once.
pub fn assert_error_codes<E: ErrorCode>(errors: &[E], expected_prefix: &str) {
    for err in errors {
        assert_error_code(err, expected_prefix);
    }
}

fn is_upper_snake_case(s: &str) -> bool {
    if s.is_empty() || s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
