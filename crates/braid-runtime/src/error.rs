//! Top-level runtime error.

use crate::config::ConfigError;
use crate::messaging::MessagingError;
use braid_component::ComponentError;
use braid_types::ErrorCode;
use thiserror::Error;

/// Errors surfaced by connector construction, start and stop.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Invalid configuration; fatal before anything starts.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A component failed to build or start.
    #[error(transparent)]
    Component(#[from] ComponentError),

    /// A broker connection failed outside a component's own recovery.
    #[error(transparent)]
    Messaging(#[from] MessagingError),
}

impl ErrorCode for RuntimeError {
    fn code(&self) -> &'static str {
        match self {
            Self::Config(inner) => inner.code(),
            Self::Component(inner) => inner.code(),
            Self::Messaging(inner) => inner.code(),
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(inner) => inner.is_recoverable(),
            Self::Component(inner) => inner.is_recoverable(),
            Self::Messaging(inner) => inner.is_recoverable(),
        }
    }
}
