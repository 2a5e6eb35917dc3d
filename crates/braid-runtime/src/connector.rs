//! Top-level orchestration: services, apps, lifecycle.

use crate::app::{build_app, App};
use crate::components::register_builtins;
use crate::config::{validate, AppInfo, ConfigError, ConnectorConfig};
use crate::services::RuntimeServices;
use crate::RuntimeError;
use braid_component::{ComponentFactory, ComponentRegistry};
use braid_event::{Event, EventSender, Message};
use braid_expression::{InvokeFn, InvokeRegistry};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const DEFAULT_DRAIN_DEADLINE: Duration = Duration::from_secs(10);

/// The runtime's entry point: parses configuration, owns the shared
/// services, constructs apps, and orchestrates start/stop.
pub struct Connector {
    services: Arc<RuntimeServices>,
    apps: Vec<App>,
    flow_inputs: HashMap<String, EventSender>,
    drain_deadline: Duration,
}

impl Connector {
    /// Starts building a connector from a merged configuration.
    #[must_use]
    pub fn builder(config: ConnectorConfig) -> ConnectorBuilder {
        ConnectorBuilder {
            config,
            extra_components: Vec::new(),
            extra_invoke_functions: Vec::new(),
            app_templates: HashMap::new(),
            drain_deadline: DEFAULT_DRAIN_DEADLINE,
        }
    }

    /// Builds a connector with no registrations beyond the builtins.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Config`] for any invalid configuration.
    pub fn new(config: ConnectorConfig) -> Result<Self, RuntimeError> {
        Self::builder(config).build()
    }

    /// The shared services (timers, cache, messaging, error queue).
    #[must_use]
    pub fn services(&self) -> &Arc<RuntimeServices> {
        &self.services
    }

    /// The constructed apps.
    #[must_use]
    pub fn apps(&self) -> &[App] {
        &self.apps
    }

    /// Looks up an app by name (first instance).
    #[must_use]
    pub fn app(&self, name: &str) -> Option<&App> {
        self.apps.iter().find(|app| app.name() == name)
    }

    /// Starts every app.
    ///
    /// # Errors
    ///
    /// Propagates the first start failure; already-started apps keep
    /// running and should be stopped by the caller.
    pub async fn start(&mut self) -> Result<(), RuntimeError> {
        info!(apps = self.apps.len(), "starting connector");
        for app in &mut self.apps {
            app.start().await?;
        }
        info!("connector started");
        Ok(())
    }

    /// Stops everything: signals shutdown, then drains apps in reverse
    /// construction order.
    pub async fn stop(&mut self) {
        info!("stopping connector");
        self.services.stop.cancel();
        for app in self.apps.iter_mut().rev() {
            app.stop(self.drain_deadline).await;
        }
        info!("connector stopped");
    }

    /// Injects a message into a named flow's input queue.
    pub async fn send_message_to_flow(&self, flow_name: &str, message: Message) {
        match self.flow_inputs.get(flow_name) {
            Some(sender) => {
                if sender.send(Event::message(message)).await.is_err() {
                    warn!(flow = flow_name, "flow input queue closed");
                }
            }
            None => error!(flow = flow_name, "cannot send message: flow not found"),
        }
    }
}

/// Configures a [`Connector`] before construction: custom components,
/// invoke functions, and code-defined app templates.
pub struct ConnectorBuilder {
    config: ConnectorConfig,
    extra_components: Vec<(String, ComponentFactory)>,
    extra_invoke_functions: Vec<(String, String, Arc<InvokeFn>)>,
    app_templates: HashMap<String, Value>,
    drain_deadline: Duration,
}

impl ConnectorBuilder {
    /// Registers a custom component factory.
    #[must_use]
    pub fn with_component(mut self, name: impl Into<String>, factory: ComponentFactory) -> Self {
        self.extra_components.push((name.into(), factory));
        self
    }

    /// Registers a custom invoke function as `module.function`.
    #[must_use]
    pub fn with_invoke_function(
        mut self,
        module: impl Into<String>,
        function: impl Into<String>,
        f: Arc<InvokeFn>,
    ) -> Self {
        self.extra_invoke_functions
            .push((module.into(), function.into(), f));
        self
    }

    /// Registers a code-defined app template: its default `app_info`
    /// is deep-merged under the YAML app of the same name, with YAML
    /// winning.
    #[must_use]
    pub fn with_app_template(mut self, name: impl Into<String>, default_app_info: Value) -> Self {
        self.app_templates.insert(name.into(), default_app_info);
        self
    }

    /// Overrides the per-flow drain deadline used at stop.
    #[must_use]
    pub fn with_drain_deadline(mut self, deadline: Duration) -> Self {
        self.drain_deadline = deadline;
        self
    }

    /// Builds the connector: services, registries, validation, apps.
    /// Must be called within a tokio runtime (service tasks spawn
    /// here); nothing starts processing until
    /// [`Connector::start`].
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Config`] for invalid configuration and
    /// propagates component registration failures.
    pub fn build(self) -> Result<Connector, RuntimeError> {
        let config = self.config;
        let services =
            RuntimeServices::new(config.instance_name(), &config.cache, &config.trace)?;

        let mut registry = ComponentRegistry::new();
        register_builtins(&mut registry, &services)?;
        for (name, factory) in self.extra_components {
            registry.register(name, factory)?;
        }

        let mut invoke_registry = InvokeRegistry::with_builtins();
        for (module, function, f) in self.extra_invoke_functions {
            invoke_registry.register(&module, &function, f);
        }

        // Templates first: a YAML app may only be complete once its
        // code-defined defaults are merged in.
        let mut effective = config.clone();
        effective.apps = config
            .apps
            .iter()
            .map(|app| apply_template(app, self.app_templates.get(&app.name)))
            .collect::<Result<_, _>>()?;

        validate(&effective, &registry)?;

        let mut app_infos: Vec<AppInfo> = Vec::new();
        if !effective.flows.is_empty() {
            // Legacy top-level flows become one implicit app.
            app_infos.push(AppInfo {
                name: effective.instance_name().to_string(),
                flows: effective.flows.clone(),
                ..Default::default()
            });
        }
        app_infos.extend(effective.apps.iter().cloned());

        let mut apps = Vec::new();
        let mut flow_inputs = HashMap::new();
        for app_info in &app_infos {
            for _ in 0..app_info.instances() {
                let app = build_app(app_info, &services, &registry, &invoke_registry)?;
                for flow in app.flows() {
                    if let Some(sender) = flow.input_sender() {
                        flow_inputs.insert(flow.name().to_string(), sender.clone());
                    }
                }
                apps.push(app);
            }
        }

        Ok(Connector {
            services,
            apps,
            flow_inputs,
            drain_deadline: self.drain_deadline,
        })
    }
}

fn apply_template(app_info: &AppInfo, template: Option<&Value>) -> Result<AppInfo, ConfigError> {
    let Some(template) = template else {
        return Ok(app_info.clone());
    };
    let mut merged = template.clone();
    let overlay = serde_json::to_value(app_info).map_err(|e| ConfigError::Parse {
        path: format!("app '{}'", app_info.name),
        reason: e.to_string(),
    })?;
    merge_configured(&mut merged, overlay);
    serde_json::from_value(merged).map_err(|e| ConfigError::Parse {
        path: format!("app '{}'", app_info.name),
        reason: e.to_string(),
    })
}

/// Merges the YAML app over a code-defined template. Only values the
/// operator actually configured override: nulls, empty containers,
/// empty strings and zero counts round-trip from unset fields and are
/// skipped.
fn merge_configured(base: &mut Value, overlay: Value) {
    let unset = match &overlay {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Number(n) => n.as_u64() == Some(0),
        Value::Bool(_) => false,
    };
    if unset {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_configured(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
