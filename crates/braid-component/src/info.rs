//! Static component metadata.

use crate::ComponentError;
use braid_expression::ConfigMap;
use serde_json::Value;

/// Describes a component type: its registry name and the configuration
/// parameters it understands.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    /// Registry name (`component_module` in configuration).
    pub name: &'static str,
    /// One-line description shown in diagnostics.
    pub description: &'static str,
    /// Declared configuration parameters.
    pub config_parameters: Vec<ConfigParameter>,
}

/// One declared configuration parameter.
#[derive(Debug, Clone)]
pub struct ConfigParameter {
    /// Key within `component_config`.
    pub name: &'static str,
    /// Whether configuration without this key is rejected.
    pub required: bool,
    /// Fallback used by `get_config` when the key is absent.
    pub default: Option<Value>,
}

impl ConfigParameter {
    /// A parameter that must be configured.
    #[must_use]
    pub fn required(name: &'static str) -> Self {
        Self {
            name,
            required: true,
            default: None,
        }
    }

    /// A parameter with a static default.
    #[must_use]
    pub fn optional(name: &'static str, default: Value) -> Self {
        Self {
            name,
            required: false,
            default: Some(default),
        }
    }
}

impl ComponentInfo {
    /// Creates metadata with no declared parameters.
    #[must_use]
    pub fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            config_parameters: Vec::new(),
        }
    }

    /// Adds a declared parameter.
    #[must_use]
    pub fn with_parameter(mut self, parameter: ConfigParameter) -> Self {
        self.config_parameters.push(parameter);
        self
    }

    /// Returns the declared default for a key.
    #[must_use]
    pub fn default_for(&self, key: &str) -> Option<&Value> {
        self.config_parameters
            .iter()
            .find(|p| p.name == key)
            .and_then(|p| p.default.as_ref())
    }

    /// Checks that every required parameter is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::Config`] naming the first missing key.
    pub fn validate(&self, component_name: &str, config: &ConfigMap) -> Result<(), ComponentError> {
        for parameter in &self.config_parameters {
            if parameter.required && !config.contains_key(parameter.name) {
                return Err(ComponentError::config(
                    component_name,
                    format!("required config parameter '{}' is missing", parameter.name),
                ));
            }
        }
        Ok(())
    }
}
