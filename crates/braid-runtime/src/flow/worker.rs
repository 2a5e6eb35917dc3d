//! The worker loop driving one component instance.

use crate::services::TraceSink;
use braid_component::{Component, ComponentContext, ComponentError};
use braid_event::{ErrorDetail, ErrorEnvelope, Event, EventReceiver, Message, NackInfo};
use braid_expression::{Expression, Transforms};
use braid_types::ErrorCode;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Pause after a failed source poll so a broken input cannot spin.
const SOURCE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// What a component's invoke receives, per configuration.
#[derive(Clone)]
pub(crate) enum Selection {
    /// Evaluate an expression per message (default: `previous`).
    Expression(Expression),
    /// A constant value.
    Value(Value),
}

impl Selection {
    pub(crate) fn previous() -> Self {
        // The default selection is the previous component's result.
        Self::Expression(Expression::parse("previous").unwrap_or_else(|_| {
            unreachable!("'previous' is a valid expression")
        }))
    }

    fn select(&self, message: &Message) -> Value {
        match self {
            Self::Expression(expr) => expr.evaluate(message, None),
            Self::Value(value) => value.clone(),
        }
    }
}

/// Everything one worker needs; built by flow assembly.
pub(crate) struct WorkerSetup {
    pub component: Box<dyn Component>,
    pub ctx: ComponentContext,
    pub transforms: Transforms,
    pub selection: Selection,
    pub input: EventReceiver,
    pub trace: Option<TraceSink>,
}

/// Runs a worker until a STOP event (or queue teardown).
pub(crate) async fn run_worker(mut setup: WorkerSetup) {
    let is_source = setup.component.is_source();
    debug!("{} worker started", setup.ctx.identifier());

    loop {
        let event = if is_source {
            match setup.component.next_event(&setup.ctx).await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    if setup.ctx.is_stopping() {
                        Event::Stop
                    } else {
                        continue;
                    }
                }
                Err(error) => {
                    report_error(&setup.ctx, &error, None).await;
                    tokio::time::sleep(SOURCE_ERROR_BACKOFF).await;
                    continue;
                }
            }
        } else {
            // Non-source workers drain their queue; STOP events are
            // posted behind any in-flight messages.
            match setup.input.recv().await {
                Some(event) => event,
                None => Event::Stop,
            }
        };

        if let Some(trace) = &setup.trace {
            trace.record(setup.ctx.identifier(), "event_received", event.kind());
        }

        match event {
            Event::Stop => break,
            Event::Message(message) => process_message(&mut setup, *message).await,
            Event::Timer(timer) => {
                if let Err(error) = setup.component.handle_timer_event(&setup.ctx, timer).await {
                    report_error(&setup.ctx, &error, None).await;
                }
            }
            Event::CacheExpiry(expiry) => {
                if let Err(error) = setup
                    .component
                    .handle_cache_expiry_event(&setup.ctx, expiry)
                    .await
                {
                    report_error(&setup.ctx, &error, None).await;
                }
            }
        }
    }

    setup.component.stop(&setup.ctx).await;
    setup.ctx.cancel_owned_timers();
    debug!("{} worker stopped", setup.ctx.identifier());
}

async fn process_message(setup: &mut WorkerSetup, mut message: Message) {
    if let Err(error) = setup.transforms.apply(&mut message) {
        fail_message(&setup.ctx, &mut message, &ComponentError::from(error)).await;
        return;
    }

    let data = setup.selection.select(&message);
    message.clear_discard();

    match setup.component.invoke(&setup.ctx, &mut message, data).await {
        Err(error) => fail_message(&setup.ctx, &mut message, &error).await,
        Ok(_) if message.is_discarded() => message.call_acknowledgements(),
        Ok(Some(result)) => {
            message.set_previous(result);
            if let Err(error) = setup.component.send_output(&setup.ctx, message).await {
                // send_output settles the message before erroring;
                // only the report remains.
                report_error(&setup.ctx, &error, None).await;
            }
        }
        // A nil result is a successful terminal hop.
        Ok(None) => message.call_acknowledgements(),
    }
}

async fn fail_message(ctx: &ComponentContext, message: &mut Message, error: &ComponentError) {
    warn!("{} {error}", ctx.identifier());
    let snapshot = message.snapshot();
    message.call_negative_acknowledgements(NackInfo::new(error.code(), error.to_string()));
    report_error(ctx, error, Some(snapshot)).await;
}

async fn report_error(ctx: &ComponentContext, error: &ComponentError, snapshot: Option<Value>) {
    ctx.emit_error(ErrorEnvelope {
        error: ErrorDetail {
            message: error.to_string(),
            exception_kind: error.code().to_string(),
        },
        message: snapshot,
        location: ctx.location(),
    })
    .await;
}
