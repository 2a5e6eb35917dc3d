//! Builtin component roster.
//!
//! | Module | Kind | Purpose |
//! |--------|------|---------|
//! | `pass_through` | processing | forward the selected input unchanged |
//! | `stdin_input` | source | one message per stdin line |
//! | `stdout_output` | sink | print the selected input |
//! | `error_input` | source | consume the connector error queue |
//! | `iterate` | processing | split a list into sibling messages |
//! | `aggregate` | processing | batch messages by count or time |
//! | `timer_input` | generator | emit messages on a periodic timer |
//! | `broker_input` | source | consume a broker queue |
//! | `broker_output` | sink | publish to a broker topic |
//! | `broker_request_response` | processing | request/reply over the broker |
//!
//! The subscription router is constructed by simplified-app synthesis
//! with direct references to its target queues and is therefore not
//! registered by name.

mod aggregate;
mod broker_input;
mod broker_output;
mod broker_request_response;
mod error_input;
mod iterate;
mod pass_through;
mod stdin_input;
mod stdout_output;
mod subscription_router;
mod timer_input;

pub use aggregate::Aggregate;
pub use broker_input::BrokerInput;
pub use broker_output::BrokerOutput;
pub use broker_request_response::BrokerRequestResponse;
pub use error_input::ErrorInput;
pub use iterate::Iterate;
pub use pass_through::PassThrough;
pub use stdin_input::StdinInput;
pub use stdout_output::StdoutOutput;
pub(crate) use subscription_router::{RouterTarget, SubscriptionRouter};
pub use timer_input::TimerInput;

use crate::services::RuntimeServices;
use braid_component::{Component, ComponentError, ComponentRegistry};
use std::sync::Arc;

fn boxed(component: impl Component + 'static) -> Box<dyn Component> {
    Box::new(component)
}

/// Registers every builtin component.
///
/// # Errors
///
/// Returns [`ComponentError::Config`] when a name collides with an
/// already-registered component.
pub fn register_builtins(
    registry: &mut ComponentRegistry,
    services: &Arc<RuntimeServices>,
) -> Result<(), ComponentError> {
    registry.register("pass_through", Arc::new(|_ctx| Ok(boxed(PassThrough::new()))))?;
    registry.register("stdin_input", Arc::new(|_ctx| Ok(boxed(StdinInput::new()))))?;
    registry.register("stdout_output", Arc::new(|_ctx| Ok(boxed(StdoutOutput::new()))))?;
    registry.register("iterate", Arc::new(|_ctx| Ok(boxed(Iterate::new()))))?;
    registry.register("aggregate", Arc::new(|_ctx| Ok(boxed(Aggregate::new()))))?;
    registry.register("timer_input", Arc::new(|_ctx| Ok(boxed(TimerInput::new()))))?;

    {
        let services = services.clone();
        registry.register(
            "error_input",
            Arc::new(move |_ctx| Ok(boxed(ErrorInput::new(services.error_receiver.clone())))),
        )?;
    }
    {
        let services = services.clone();
        registry.register(
            "broker_input",
            Arc::new(move |ctx| BrokerInput::new(ctx, services.clone()).map(boxed)),
        )?;
    }
    {
        let services = services.clone();
        registry.register(
            "broker_output",
            Arc::new(move |ctx| BrokerOutput::new(ctx, services.clone()).map(boxed)),
        )?;
    }
    {
        let services = services.clone();
        registry.register(
            "broker_request_response",
            Arc::new(move |ctx| BrokerRequestResponse::new(ctx, services.clone()).map(boxed)),
        )?;
    }
    Ok(())
}
