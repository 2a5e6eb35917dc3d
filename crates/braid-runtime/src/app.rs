//! Apps: flow grouping and simplified-app synthesis.

use crate::components::{RouterTarget, SubscriptionRouter};
use crate::config::{AppInfo, BrokerSection, ComponentSpec, Subscription};
use crate::flow::{self, DownstreamPlan, Flow, FlowContext, GroupFactory, GroupPlan};
use crate::messaging::{connect_with_retry, subscription_to_regex};
use crate::request_reply::RequestResponseController;
use crate::services::RuntimeServices;
use crate::RuntimeError;
use braid_component::{ComponentError, ComponentRegistry};
use braid_event::{Event, EventSender, Message};
use braid_expression::InvokeRegistry;
use braid_types::Payload;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// A named group of flows.
///
/// Simplified apps (a `broker:` section plus `components:`) synthesize
/// one implicit flow:
///
/// ```text
/// [broker_input?] ─► [router iff >1 components] ─► user components ─► [broker_output?]
/// ```
///
/// The router delivers each message to the first component (in
/// declaration order) whose subscriptions match its topic; user
/// components forward to the output stage when one exists.
pub struct App {
    name: String,
    app_config: Map<String, Value>,
    services: Arc<RuntimeServices>,
    flows: Vec<Flow>,
    output_sender: Option<EventSender>,
    request_reply: Option<BrokerSection>,
    controller: Option<Arc<RequestResponseController>>,
}

impl App {
    /// The app's configured name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reads a key of the app-level `config` block.
    #[must_use]
    pub fn get_config(&self, key: &str) -> Option<&Value> {
        self.app_config.get(key)
    }

    /// The app's flows.
    #[must_use]
    pub fn flows(&self) -> &[Flow] {
        &self.flows
    }

    /// The request/reply controller, present after start when
    /// `request_reply_enabled` is configured.
    #[must_use]
    pub fn request_response(&self) -> Option<Arc<RequestResponseController>> {
        self.controller.clone()
    }

    /// Injects a message directly onto the broker output stage.
    ///
    /// The synthesized message carries
    /// `previous = {payload, topic, user_properties}` and no upstream
    /// acknowledgements; the output stage settles it after the broker
    /// confirms. A warning is logged (and nothing sent) when output is
    /// not enabled.
    pub async fn send_message(
        &self,
        payload: Value,
        topic: impl Into<String>,
        user_properties: Option<Map<String, Value>>,
    ) {
        let Some(sender) = &self.output_sender else {
            warn!(app = %self.name, "send_message ignored: output is not enabled");
            return;
        };
        let mut message = Message::new(Payload::Structured(Value::Null));
        message.set_previous(json!({
            "payload": payload,
            "topic": topic.into(),
            "user_properties": Value::Object(user_properties.unwrap_or_default()),
        }));
        if sender.send(Event::message(message)).await.is_err() {
            warn!(app = %self.name, "send_message failed: output queue closed");
        }
    }

    /// Starts the request/reply controller (when configured) and every
    /// flow.
    ///
    /// # Errors
    ///
    /// Propagates broker connection and component start failures.
    pub async fn start(&mut self) -> Result<(), RuntimeError> {
        if let Some(config) = &self.request_reply {
            let messaging = self.services.messaging.build(config)?;
            connect_with_retry(&messaging, config, &self.services.stop)
                .await
                .map_err(|e| ComponentError::Connection(e.to_string()))?;
            self.controller = Some(
                RequestResponseController::start(config, messaging, self.services.stop.clone())
                    .await?,
            );
        }
        for flow in &mut self.flows {
            flow.start().await?;
        }
        Ok(())
    }

    /// Stops every flow with the given drain deadline.
    pub async fn stop(&mut self, drain_deadline: Duration) {
        for flow in &mut self.flows {
            flow.stop(drain_deadline).await;
        }
    }
}

/// Builds one app instance from its (template-merged) configuration.
pub(crate) fn build_app(
    info: &AppInfo,
    services: &Arc<RuntimeServices>,
    registry: &ComponentRegistry,
    invoke_registry: &InvokeRegistry,
) -> Result<App, RuntimeError> {
    if info.is_simplified() {
        build_simplified(info, services, registry, invoke_registry)
    } else {
        build_standard(info, services, registry, invoke_registry)
    }
}

fn build_standard(
    info: &AppInfo,
    services: &Arc<RuntimeServices>,
    registry: &ComponentRegistry,
    invoke_registry: &InvokeRegistry,
) -> Result<App, RuntimeError> {
    let mut flows = Vec::with_capacity(info.flows.len());
    for flow_config in &info.flows {
        flows.push(flow::build_standard(
            flow_config,
            &info.config,
            services,
            registry,
            invoke_registry,
        )?);
    }
    Ok(App {
        name: info.name.clone(),
        app_config: info.config.clone(),
        services: services.clone(),
        flows,
        output_sender: None,
        request_reply: None,
        controller: None,
    })
}

fn build_simplified(
    info: &AppInfo,
    services: &Arc<RuntimeServices>,
    registry: &ComponentRegistry,
    invoke_registry: &InvokeRegistry,
) -> Result<App, RuntimeError> {
    let broker = info
        .broker
        .clone()
        .unwrap_or_default();
    let user_components: Vec<&ComponentSpec> =
        info.components.iter().filter(|c| !c.disabled).collect();

    let has_input = broker.input_enabled;
    let has_router = has_input && user_components.len() > 1;
    let first_user_index = usize::from(has_input) + usize::from(has_router);
    let output_index = first_user_index + user_components.len();

    let mut plans: Vec<GroupPlan> = Vec::new();

    if has_input {
        let mut input_section = broker.clone();
        input_section.subscriptions = union_subscriptions(&user_components);
        let spec = ComponentSpec {
            name: "broker_input".to_string(),
            component_module: "broker_input".to_string(),
            component_config: input_section.to_value(),
            ..Default::default()
        };
        // Linear wiring reaches the router, or the single component.
        plans.push(GroupPlan::from_registry(spec, registry));
    }

    if has_router {
        let spec = ComponentSpec {
            name: "subscription_router".to_string(),
            component_module: "subscription_router".to_string(),
            ..Default::default()
        };
        let routes: Vec<(String, Vec<String>, usize)> = user_components
            .iter()
            .enumerate()
            .map(|(offset, component)| {
                (
                    component.name.clone(),
                    component
                        .subscriptions
                        .iter()
                        .map(|s| s.topic.clone())
                        .collect(),
                    first_user_index + offset,
                )
            })
            .collect();
        let factory: GroupFactory = Box::new(move |_ctx, senders| {
            let mut targets = Vec::with_capacity(routes.len());
            for (name, patterns, group_index) in &routes {
                let compiled = patterns
                    .iter()
                    .map(|pattern| subscription_to_regex(pattern))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| ComponentError::config("subscription_router", e.to_string()))?;
                let queue = senders.get(*group_index).cloned().ok_or_else(|| {
                    ComponentError::config("subscription_router", "target group missing")
                })?;
                targets.push(RouterTarget {
                    name: name.clone(),
                    patterns: compiled,
                    queue,
                });
            }
            Ok(Box::new(SubscriptionRouter::new(targets)))
        });
        plans.push(GroupPlan::from_factory(spec, factory).with_downstream(DownstreamPlan::Terminal));
    }

    for component in &user_components {
        let downstream = if broker.output_enabled {
            DownstreamPlan::Group(output_index)
        } else {
            DownstreamPlan::Terminal
        };
        plans.push(GroupPlan::from_registry((*component).clone(), registry).with_downstream(downstream));
    }

    if broker.output_enabled {
        let spec = ComponentSpec {
            name: "broker_output".to_string(),
            component_module: "broker_output".to_string(),
            component_config: broker.to_value(),
            ..Default::default()
        };
        plans.push(GroupPlan::from_registry(spec, registry).with_downstream(DownstreamPlan::Terminal));
    }

    let fctx = FlowContext {
        flow_name: &info.name,
        app_config: &info.config,
        services,
        invoke_registry,
        trace_enabled: services.trace.is_some(),
    };
    let flow = flow::assemble(&fctx, plans)?;
    let output_sender = broker
        .output_enabled
        .then(|| flow.group_sender(output_index))
        .flatten();

    Ok(App {
        name: info.name.clone(),
        app_config: info.config.clone(),
        services: services.clone(),
        flows: vec![flow],
        output_sender,
        request_reply: broker.request_reply_enabled.then_some(broker),
        controller: None,
    })
}

fn union_subscriptions(components: &[&ComponentSpec]) -> Vec<Subscription> {
    let mut union: Vec<Subscription> = Vec::new();
    for component in components {
        for subscription in &component.subscriptions {
            if !union.iter().any(|s| s.topic == subscription.topic) {
                union.push(subscription.clone());
            }
        }
    }
    union
}
