//! Configuration: loading, merging, typed model and validation.
//!
//! One or more YAML documents are merged (mappings deep-union, later
//! documents win, sequences replace), environment variables are
//! substituted on the raw text, and the result is deserialized into
//! [`ConnectorConfig`]. `invoke` blocks inside component configuration
//! resolve later, when flows are built, against the connector's
//! [`InvokeRegistry`](braid_expression::InvokeRegistry).

mod loader;
mod types;
mod validator;

pub use loader::{load_documents, load_files, substitute_env_vars};
pub use types::{
    AppInfo, BrokerSection, CacheConfig, ComponentSpec, ConnectorConfig, FlowConfig,
    InputSelection, LogConfig, Subscription, TraceConfig,
};
pub use validator::validate;

use braid_types::ErrorCode;
use thiserror::Error;

/// Fatal configuration errors; the connector refuses to start.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Offending path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A document is not valid YAML or does not fit the model.
    #[error("failed to parse {path}: {reason}")]
    Parse {
        /// Offending document.
        path: String,
        /// Parser diagnostics.
        reason: String,
    },

    /// `${NAME}` references without defaults that are not set.
    #[error("missing environment variable(s): {0}")]
    MissingEnvVar(String),

    /// A static invariant of the configuration is violated.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// An `invoke` block or captured expression failed to resolve.
    #[error(transparent)]
    Expression(#[from] braid_expression::ExpressionError),
}

impl ErrorCode for ConfigError {
    fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "CONFIG_IO",
            Self::Parse { .. } => "CONFIG_PARSE",
            Self::MissingEnvVar(_) => "CONFIG_MISSING_ENV_VAR",
            Self::Invalid(_) => "CONFIG_INVALID",
            Self::Expression(inner) => inner.code(),
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}
