//! Flows: component groups wired by bounded queues.
//!
//! A flow owns an ordered list of component groups. Group `i` runs
//! `num_instances` workers over one shared input queue of
//! `queue_depth`; its output target is group `i+1`'s queue unless the
//! group plan overrides the wiring (simplified-app routing does).

mod worker;

pub(crate) use worker::{run_worker, Selection, WorkerSetup};

use crate::config::{ComponentSpec, ConfigError, FlowConfig, InputSelection};
use crate::services::RuntimeServices;
use crate::RuntimeError;
use braid_component::{Component, ComponentContext, ComponentError, ComponentRegistry};
use braid_event::{event_channel, Event, EventSender};
use braid_expression::{resolve_config_map, Expression, InvokeRegistry, Transforms};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Where a group's processed messages go.
pub(crate) enum DownstreamPlan {
    /// The next group's queue (or terminal for the last group).
    Linear,
    /// No downstream; the component settles messages itself.
    Terminal,
    /// The queue of another group in this flow, by index.
    Group(usize),
}

/// Creates one component instance per worker. Receives the worker's
/// context and every group input queue of the flow (routers deliver
/// to sibling groups directly).
pub(crate) type GroupFactory = Box<
    dyn Fn(&ComponentContext, &[EventSender]) -> Result<Box<dyn Component>, ComponentError>
        + Send
        + Sync,
>;

/// Build plan of one component group.
pub(crate) struct GroupPlan {
    pub spec: ComponentSpec,
    pub factory: GroupFactory,
    pub downstream: DownstreamPlan,
}

impl GroupPlan {
    /// A plan resolving its component through the registry.
    pub(crate) fn from_registry(spec: ComponentSpec, registry: &ComponentRegistry) -> Self {
        let registry = registry.clone();
        let module = spec.component_module.clone();
        Self {
            spec,
            factory: Box::new(move |ctx, _senders| registry.create(&module, ctx)),
            downstream: DownstreamPlan::Linear,
        }
    }

    /// A plan with an explicit component constructor.
    pub(crate) fn from_factory(spec: ComponentSpec, factory: GroupFactory) -> Self {
        Self {
            spec,
            factory,
            downstream: DownstreamPlan::Linear,
        }
    }

    /// Overrides the output wiring.
    pub(crate) fn with_downstream(mut self, downstream: DownstreamPlan) -> Self {
        self.downstream = downstream;
        self
    }
}

/// Shared inputs of flow assembly.
pub(crate) struct FlowContext<'a> {
    pub flow_name: &'a str,
    pub app_config: &'a Map<String, Value>,
    pub services: &'a Arc<RuntimeServices>,
    pub invoke_registry: &'a InvokeRegistry,
    pub trace_enabled: bool,
}

struct GroupHandle {
    sender: EventSender,
    workers: usize,
    source: bool,
    handles: Vec<JoinHandle<()>>,
}

/// A built flow. Workers exist after [`start`](Flow::start).
pub struct Flow {
    name: String,
    input: Option<EventSender>,
    groups: Vec<GroupHandle>,
    pending: Vec<WorkerSetup>,
}

impl Flow {
    /// The flow's configured name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The first group's input queue, for external injection.
    #[must_use]
    pub fn input_sender(&self) -> Option<&EventSender> {
        self.input.as_ref()
    }

    /// A specific group's input queue (simplified-app wiring).
    #[must_use]
    pub(crate) fn group_sender(&self, index: usize) -> Option<EventSender> {
        self.groups.get(index).map(|group| group.sender.clone())
    }

    /// Starts every worker, front to back. Component `start` hooks run
    /// before any worker task spawns; a failure aborts startup.
    ///
    /// # Errors
    ///
    /// Propagates the first component start failure.
    pub async fn start(&mut self) -> Result<(), RuntimeError> {
        let mut setups = std::mem::take(&mut self.pending);
        for setup in &mut setups {
            setup.component.start(&setup.ctx).await?;
        }
        info!(flow = %self.name, workers = setups.len(), "starting flow");
        for setup in setups {
            let group = setup.ctx.component_index();
            let handle = tokio::spawn(run_worker(setup));
            if let Some(group) = self.groups.get_mut(group) {
                group.handles.push(handle);
            }
        }
        Ok(())
    }

    /// Stops the flow by cascading the STOP sentinel group by group:
    /// a group's STOPs are posted and its workers joined only after
    /// every upstream worker has exited, so in-flight messages a
    /// draining group still forwards always find a live consumer.
    /// Source groups never read their queue - their workers exit on
    /// the out-of-band stop token instead. Each group's join is
    /// bounded by `drain_deadline`.
    pub async fn stop(&mut self, drain_deadline: Duration) {
        for group in &mut self.groups {
            if !group.source {
                for _ in 0..group.workers {
                    let _ = group.sender.send(Event::Stop).await;
                }
            }
            for mut worker in group.handles.drain(..) {
                if tokio::time::timeout(drain_deadline, &mut worker).await.is_err() {
                    warn!(flow = %self.name, "worker exceeded drain deadline, aborting");
                    worker.abort();
                }
            }
        }
    }
}

/// Assembles a flow from group plans: queues first, then contexts and
/// component instances.
pub(crate) fn assemble(
    fctx: &FlowContext<'_>,
    plans: Vec<GroupPlan>,
) -> Result<Flow, RuntimeError> {
    if plans.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "flow '{}' has no enabled components",
            fctx.flow_name
        ))
        .into());
    }

    let queues: Vec<_> = plans
        .iter()
        .map(|plan| event_channel(plan.spec.queue_depth))
        .collect();
    let senders: Vec<EventSender> = queues.iter().map(|(tx, _)| tx.clone()).collect();

    let mut pending = Vec::new();
    let mut groups = Vec::new();

    for (index, plan) in plans.iter().enumerate() {
        let downstream = match plan.downstream {
            DownstreamPlan::Linear => senders.get(index + 1).cloned(),
            DownstreamPlan::Terminal => None,
            DownstreamPlan::Group(target) => Some(
                senders
                    .get(target)
                    .cloned()
                    .ok_or_else(|| {
                        ConfigError::Invalid(format!(
                            "flow '{}': group {index} wired to missing group {target}",
                            fctx.flow_name
                        ))
                    })?,
            ),
        };

        let config_map = resolve_config_map(&plan.spec.component_config, fctx.invoke_registry)
            .map_err(ConfigError::from)?;
        let transforms = Transforms::parse(&plan.spec.input_transforms, fctx.invoke_registry)
            .map_err(ConfigError::from)?;
        let selection = selection_from_config(plan.spec.input_selection.as_ref())?;

        let mut group_is_source = false;
        for _ in 0..plan.spec.num_instances.max(1) {
            let ctx = ComponentContext::builder(plan.spec.name.as_str())
                .flow_name(fctx.flow_name)
                .instance_name(fctx.services.instance_name.as_str())
                .component_index(index)
                .owner(fctx.services.next_owner())
                .component_config(config_map.clone())
                .app_config(fctx.app_config.clone())
                .input_sender(senders[index].clone())
                .downstream(downstream.clone())
                .error_sender(Some(fctx.services.error_sender.clone()))
                .timers(fctx.services.timers.clone())
                .cache(fctx.services.cache.clone())
                .stop(fctx.services.stop.clone())
                .build();

            let component = (plan.factory)(&ctx, &senders)?;
            let info = component.info().clone();
            info.validate(&plan.spec.name, &config_map)?;
            group_is_source = component.is_source();

            pending.push(WorkerSetup {
                component,
                ctx: ctx.with_info(info),
                transforms: transforms.clone(),
                selection: selection.clone(),
                input: queues[index].1.clone(),
                trace: if fctx.trace_enabled {
                    fctx.services.trace.clone()
                } else {
                    None
                },
            });
        }

        groups.push(GroupHandle {
            sender: senders[index].clone(),
            workers: plan.spec.num_instances.max(1),
            source: group_is_source,
            handles: Vec::new(),
        });
    }

    Ok(Flow {
        name: fctx.flow_name.to_string(),
        input: senders.first().cloned(),
        groups,
        pending,
    })
}

/// Builds a standard (linear) flow from its configuration.
pub(crate) fn build_standard(
    flow_config: &FlowConfig,
    app_config: &Map<String, Value>,
    services: &Arc<RuntimeServices>,
    registry: &ComponentRegistry,
    invoke_registry: &InvokeRegistry,
) -> Result<Flow, RuntimeError> {
    let trace_enabled = services.trace.is_some()
        && flow_config.trace_level.as_deref() != Some("off")
        && flow_config.trace_level.as_deref() != Some("none");
    let fctx = FlowContext {
        flow_name: &flow_config.name,
        app_config,
        services,
        invoke_registry,
        trace_enabled,
    };
    let plans: Vec<GroupPlan> = flow_config
        .components
        .iter()
        .filter(|spec| !spec.disabled)
        .map(|spec| GroupPlan::from_registry(spec.clone(), registry))
        .collect();
    assemble(&fctx, plans)
}

fn selection_from_config(selection: Option<&InputSelection>) -> Result<Selection, ConfigError> {
    match selection {
        None => Ok(Selection::previous()),
        Some(InputSelection {
            source_expression: Some(text),
            source_value: None,
        }) => Ok(Selection::Expression(Expression::parse(text)?)),
        Some(InputSelection {
            source_expression: None,
            source_value: Some(value),
        }) => Ok(Selection::Value(value.clone())),
        Some(_) => Err(ConfigError::Invalid(
            "input_selection needs exactly one of source_expression / source_value".to_string(),
        )),
    }
}
