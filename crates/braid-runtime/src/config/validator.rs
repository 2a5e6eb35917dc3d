//! Static validation, performed before anything starts.

use super::{AppInfo, BrokerSection, ComponentSpec, ConfigError, ConnectorConfig, FlowConfig};
use crate::messaging::codec::{PayloadEncoding, PayloadFormat};
use braid_component::ComponentRegistry;
use braid_expression::{Expression, Plane};

/// Checks every static invariant of a merged configuration.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] describing the first violation;
/// any error here is fatal and the connector refuses to start.
pub fn validate(
    config: &ConnectorConfig,
    registry: &ComponentRegistry,
) -> Result<(), ConfigError> {
    if config.apps.is_empty() && config.flows.is_empty() {
        return Err(invalid("no apps or flows defined"));
    }

    for (index, flow) in config.flows.iter().enumerate() {
        validate_flow(flow, &format!("top-level flow {index}"), registry)?;
    }

    for (index, app) in config.apps.iter().enumerate() {
        let where_ = if app.name.is_empty() {
            format!("app {index}")
        } else {
            format!("app '{}'", app.name)
        };
        if app.name.is_empty() {
            return Err(invalid(format!("{where_}: missing name")));
        }
        validate_app(app, &where_, registry)?;
    }

    let mut names: Vec<&str> = config.apps.iter().map(|a| a.name.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    if names.len() != config.apps.len() {
        return Err(invalid("app names must be unique"));
    }

    Ok(())
}

fn validate_app(
    app: &AppInfo,
    where_: &str,
    registry: &ComponentRegistry,
) -> Result<(), ConfigError> {
    match (&app.broker, app.flows.is_empty(), app.components.is_empty()) {
        (Some(_), false, _) => Err(invalid(format!(
            "{where_}: simplified apps (broker section) cannot also declare flows"
        ))),
        (Some(broker), true, _) => validate_simplified(app, broker, where_, registry),
        (None, true, _) => Err(invalid(format!(
            "{where_}: standard apps must declare at least one flow"
        ))),
        (None, false, false) => Err(invalid(format!(
            "{where_}: components outside a broker section need a flow"
        ))),
        (None, false, true) => {
            for flow in &app.flows {
                validate_flow(flow, where_, registry)?;
            }
            Ok(())
        }
    }
}

fn validate_simplified(
    app: &AppInfo,
    broker: &BrokerSection,
    where_: &str,
    registry: &ComponentRegistry,
) -> Result<(), ConfigError> {
    if app.components.is_empty() {
        return Err(invalid(format!("{where_}: simplified app has no components")));
    }
    validate_broker(broker, where_)?;

    if broker.input_enabled && broker.queue_name.is_none() {
        return Err(invalid(format!(
            "{where_}: input_enabled requires queue_name"
        )));
    }

    for (index, component) in app.components.iter().enumerate() {
        validate_component(component, index, where_, registry)?;
        if broker.input_enabled && component.subscriptions.is_empty() && !component.disabled {
            return Err(invalid(format!(
                "{where_}: component '{}' needs subscriptions when input is enabled",
                component.name
            )));
        }
        for subscription in &component.subscriptions {
            if subscription.topic.is_empty() {
                return Err(invalid(format!(
                    "{where_}: component '{}' has an empty subscription topic",
                    component.name
                )));
            }
        }
    }
    Ok(())
}

fn validate_broker(broker: &BrokerSection, where_: &str) -> Result<(), ConfigError> {
    if PayloadEncoding::parse(&broker.payload_encoding).is_none() {
        return Err(invalid(format!(
            "{where_}: unknown payload_encoding '{}'",
            broker.payload_encoding
        )));
    }
    if PayloadFormat::parse(&broker.payload_format).is_none() {
        return Err(invalid(format!(
            "{where_}: unknown payload_format '{}'",
            broker.payload_format
        )));
    }
    if broker.request_reply_enabled {
        if broker.request_expiry_ms == 0 {
            return Err(invalid(format!(
                "{where_}: request_reply_enabled requires a non-zero request_expiry_ms"
            )));
        }
        if broker.response_topic_prefix.is_empty() || broker.response_queue_prefix.is_empty() {
            return Err(invalid(format!(
                "{where_}: request_reply_enabled requires response topic and queue prefixes"
            )));
        }
    }
    match broker.reconnection_strategy.as_str() {
        "forever_retry" | "parametrized" => Ok(()),
        other => Err(invalid(format!(
            "{where_}: unknown reconnection_strategy '{other}'"
        ))),
    }
}

fn validate_flow(
    flow: &FlowConfig,
    where_: &str,
    registry: &ComponentRegistry,
) -> Result<(), ConfigError> {
    if flow.name.is_empty() {
        return Err(invalid(format!("{where_}: flow is missing a name")));
    }
    let where_ = format!("{where_}, flow '{}'", flow.name);
    let enabled: Vec<&ComponentSpec> =
        flow.components.iter().filter(|c| !c.disabled).collect();
    if enabled.is_empty() {
        return Err(invalid(format!("{where_}: no enabled components")));
    }

    for (index, component) in flow.components.iter().enumerate() {
        validate_component(component, index, &where_, registry)?;
    }

    // The first stage has no upstream; an input selection that reads
    // `previous` can never produce data there.
    if let Some(selection) = &enabled[0].input_selection {
        if let Some(text) = &selection.source_expression {
            let expr = Expression::parse(text).map_err(|e| {
                invalid(format!("{where_}: component '{}': {e}", enabled[0].name))
            })?;
            if matches!(expr.plane(), Plane::Previous) {
                return Err(invalid(format!(
                    "{where_}: first component '{}' selects the previous plane but has no upstream",
                    enabled[0].name
                )));
            }
        }
    }
    Ok(())
}

fn validate_component(
    component: &ComponentSpec,
    index: usize,
    where_: &str,
    registry: &ComponentRegistry,
) -> Result<(), ConfigError> {
    if component.name.is_empty() {
        return Err(invalid(format!("{where_}: component {index} is missing a name")));
    }
    let where_ = format!("{where_}, component '{}'", component.name);
    if component.component_module.is_empty() {
        return Err(invalid(format!("{where_}: missing component_module")));
    }
    if !component.disabled && !registry.contains(&component.component_module) {
        return Err(invalid(format!(
            "{where_}: unknown component_module '{}'",
            component.component_module
        )));
    }
    if component.num_instances == 0 {
        return Err(invalid(format!("{where_}: num_instances must be at least 1")));
    }
    if component.queue_depth == 0 {
        return Err(invalid(format!("{where_}: queue_depth must be at least 1")));
    }
    if let Some(selection) = &component.input_selection {
        let set = [
            selection.source_expression.is_some(),
            selection.source_value.is_some(),
        ];
        if set.iter().filter(|present| **present).count() != 1 {
            return Err(invalid(format!(
                "{where_}: input_selection needs exactly one of source_expression / source_value"
            )));
        }
    }
    Ok(())
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_documents;

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        let services = crate::services::RuntimeServices::for_tests();
        crate::components::register_builtins(&mut registry, &services).expect("builtins");
        registry
    }

    fn check(yaml: &str) -> Result<(), ConfigError> {
        let config = load_documents(&[("test", yaml)]).expect("parse");
        validate(&config, &registry())
    }

    #[test]
    fn minimal_flow_passes() {
        check(
            r"
flows:
  - name: main
    components:
      - name: echo
        component_module: pass_through
",
        )
        .expect("valid");
    }

    #[test]
    fn empty_config_is_rejected() {
        assert!(check("log: {}").is_err());
    }

    #[test]
    fn zero_num_instances_is_rejected() {
        let err = check(
            r"
flows:
  - name: main
    components:
      - name: echo
        component_module: pass_through
        num_instances: 0
",
        )
        .expect_err("invalid");
        assert!(err.to_string().contains("num_instances"));
    }

    #[test]
    fn zero_queue_depth_is_rejected() {
        assert!(check(
            r"
flows:
  - name: main
    components:
      - name: echo
        component_module: pass_through
        queue_depth: 0
",
        )
        .is_err());
    }

    #[test]
    fn unknown_module_is_rejected() {
        assert!(check(
            r"
flows:
  - name: main
    components:
      - name: echo
        component_module: does_not_exist
",
        )
        .is_err());
    }

    #[test]
    fn first_component_selecting_previous_is_rejected() {
        let err = check(
            r"
flows:
  - name: main
    components:
      - name: head
        component_module: pass_through
        input_selection:
          source_expression: previous:data
      - name: tail
        component_module: pass_through
",
        )
        .expect_err("invalid");
        assert!(err.to_string().contains("previous"));
    }

    #[test]
    fn simplified_app_requires_queue_and_subscriptions() {
        assert!(check(
            r"
apps:
  - name: assistant
    broker:
      input_enabled: true
    components:
      - name: a
        component_module: pass_through
        subscriptions:
          - topic: x/>
",
        )
        .is_err());

        assert!(check(
            r"
apps:
  - name: assistant
    broker:
      input_enabled: true
      queue_name: q
    components:
      - name: a
        component_module: pass_through
",
        )
        .is_err());

        check(
            r"
apps:
  - name: assistant
    broker:
      input_enabled: true
      queue_name: q
    components:
      - name: a
        component_module: pass_through
        subscriptions:
          - topic: x/>
",
        )
        .expect("valid");
    }

    #[test]
    fn request_reply_settings_are_enforced() {
        assert!(check(
            r"
apps:
  - name: assistant
    broker:
      request_reply_enabled: true
      request_expiry_ms: 0
    components:
      - name: a
        component_module: pass_through
",
        )
        .is_err());
    }
}
