//! The runtime interface handed to every component instance.

use crate::services::{CacheOwner, CacheService, NoopCacheService, NoopTimerService, OwnerId, TimerService};
use crate::{ComponentError, ComponentInfo};
use braid_event::{ErrorEnvelope, ErrorLocation, Event, EventSender, Message};
use braid_expression::{ConfigMap, ConfigValue};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Everything a component may touch at runtime: its identity, the
/// resolved configuration chain, queue endpoints, and the process-wide
/// services.
///
/// Contexts are cheap to clone; each worker of a group holds its own
/// (differing only in its [`OwnerId`]).
///
/// # Configuration Resolution
///
/// [`get_config`](Self::get_config) resolves, in order:
///
/// 1. the component's own `component_config`
/// 2. the owning app's `config` block
/// 3. the component's declared parameter default
///
/// Deferred values (`evaluate_expression`, deferred `invoke`) resolve
/// against a message via [`get_config_with`](Self::get_config_with);
/// reading them without a message is an error.
#[derive(Clone)]
pub struct ComponentContext {
    component_name: String,
    flow_name: String,
    instance_name: String,
    component_index: usize,
    owner: OwnerId,
    component_config: ConfigMap,
    app_config: Map<String, Value>,
    info: ComponentInfo,
    input_sender: EventSender,
    downstream: Option<EventSender>,
    error_sender: Option<EventSender>,
    timers: Arc<dyn TimerService>,
    cache: Arc<dyn CacheService>,
    stop: CancellationToken,
}

impl ComponentContext {
    /// Starts building a context. Intended for the runtime and tests;
    /// components receive contexts ready-made.
    #[must_use]
    pub fn builder(component_name: impl Into<String>) -> ContextBuilder {
        ContextBuilder::new(component_name)
    }

    /// The component's configured name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.component_name
    }

    /// The owning flow's name.
    #[must_use]
    pub fn flow_name(&self) -> &str {
        &self.flow_name
    }

    /// The connector instance name.
    #[must_use]
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// The component's index within its flow.
    #[must_use]
    pub fn component_index(&self) -> usize {
        self.component_index
    }

    /// The worker identity owning timers and cache entries.
    #[must_use]
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Log prefix identifying this worker.
    #[must_use]
    pub fn identifier(&self) -> String {
        format!(
            "[{}.{}.{}]",
            self.instance_name, self.flow_name, self.component_name
        )
    }

    /// This component group's own input queue (timer delivery target).
    #[must_use]
    pub fn input_sender(&self) -> &EventSender {
        &self.input_sender
    }

    /// The component's static metadata.
    #[must_use]
    pub fn info(&self) -> &ComponentInfo {
        &self.info
    }

    /// Replaces the metadata. The runtime builds contexts before it
    /// can ask the component for its info; factories see a context
    /// without parameter defaults, workers see the final one.
    #[must_use]
    pub fn with_info(mut self, info: ComponentInfo) -> Self {
        self.info = info;
        self
    }

    /// The resolved `component_config` map.
    #[must_use]
    pub fn component_config(&self) -> &ConfigMap {
        &self.component_config
    }

    fn lookup(&self, key: &str) -> Option<ConfigValue> {
        if let Some(value) = self.component_config.get(key) {
            return Some(value.clone());
        }
        if let Some(value) = self.app_config.get(key) {
            return Some(ConfigValue::Literal(value.clone()));
        }
        self.info
            .default_for(key)
            .map(|value| ConfigValue::Literal(value.clone()))
    }

    /// Reads a static configuration value through the resolution chain.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::Config`] when the value is deferred:
    /// deferred values need a message
    /// ([`get_config_with`](Self::get_config_with)).
    pub fn get_config(&self, key: &str) -> Result<Option<Value>, ComponentError> {
        match self.lookup(key) {
            None => Ok(None),
            Some(ConfigValue::Literal(value)) => Ok(Some(value)),
            Some(_) => Err(ComponentError::config(
                &self.component_name,
                format!("config key '{key}' is deferred and needs a message to resolve"),
            )),
        }
    }

    /// Reads a configuration value, resolving deferred values against
    /// the given message.
    ///
    /// # Errors
    ///
    /// Propagates expression and invoke failures.
    pub fn get_config_with(
        &self,
        key: &str,
        message: &Message,
    ) -> Result<Option<Value>, ComponentError> {
        match self.lookup(key) {
            None => Ok(None),
            Some(value) => Ok(Some(value.resolve(Some(message), None)?)),
        }
    }

    /// Reads a string configuration value.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::Config`] when present but not a string.
    pub fn get_config_str(&self, key: &str) -> Result<Option<String>, ComponentError> {
        match self.get_config(key)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(ComponentError::config(
                &self.component_name,
                format!("config key '{key}' must be a string, got {other}"),
            )),
        }
    }

    /// Reads an unsigned integer configuration value.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::Config`] when present but not a
    /// non-negative integer.
    pub fn get_config_u64(&self, key: &str) -> Result<Option<u64>, ComponentError> {
        match self.get_config(key)? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value.as_u64().map(Some).ok_or_else(|| {
                ComponentError::config(
                    &self.component_name,
                    format!("config key '{key}' must be a non-negative integer, got {value}"),
                )
            }),
        }
    }

    /// Reads a boolean configuration value.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::Config`] when present but not a bool.
    pub fn get_config_bool(&self, key: &str) -> Result<Option<bool>, ComponentError> {
        match self.get_config(key)? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value.as_bool().map(Some).ok_or_else(|| {
                ComponentError::config(
                    &self.component_name,
                    format!("config key '{key}' must be a boolean, got {value}"),
                )
            }),
        }
    }

    /// Materializes the whole `component_config` as a plain object.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::Config`] when any entry is deferred;
    /// connection-style configuration must be static.
    pub fn literal_config_object(&self) -> Result<Value, ComponentError> {
        let mut out = Map::new();
        for (key, value) in &self.component_config {
            match value.as_literal() {
                Some(literal) => {
                    out.insert(key.clone(), literal.clone());
                }
                None => {
                    return Err(ComponentError::config(
                        &self.component_name,
                        format!("config key '{key}' must be static"),
                    ))
                }
            }
        }
        Ok(Value::Object(out))
    }

    /// Hands a message to the next stage, or acks it when this is the
    /// end of the flow.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::Cancelled`] when the downstream queue
    /// is gone (shutdown).
    pub async fn forward(&self, mut message: Message) -> Result<(), ComponentError> {
        match &self.downstream {
            Some(downstream) => downstream
                .send(Event::message(message))
                .await
                .map_err(|_| ComponentError::Cancelled),
            None => {
                debug!("{} end of flow, acknowledging", self.identifier());
                message.call_acknowledgements();
                Ok(())
            }
        }
    }

    /// Location descriptor for error envelopes.
    #[must_use]
    pub fn location(&self) -> ErrorLocation {
        ErrorLocation {
            instance_name: self.instance_name.clone(),
            flow_name: self.flow_name.clone(),
            component_name: self.component_name.clone(),
            component_index: self.component_index,
        }
    }

    /// Emits an error envelope onto the error flow, when one is wired.
    ///
    /// Non-blocking: when no error flow drains the queue, excess error
    /// events are dropped (with a warning) rather than stalling the
    /// failing worker.
    pub async fn emit_error(&self, envelope: ErrorEnvelope) {
        let Some(error_sender) = &self.error_sender else {
            debug!("{} no error flow configured, dropping error event", self.identifier());
            return;
        };
        let message = Message::new(envelope.to_value().into());
        if !error_sender.try_send(Event::message(message)) {
            warn!("{} error queue full or closed, dropping error event", self.identifier());
        }
    }

    /// Registers a timer delivered to this component's input queue.
    pub fn add_timer(
        &self,
        delay: Duration,
        timer_id: &str,
        interval: Option<Duration>,
        payload: Option<Value>,
    ) {
        self.timers.add_timer(
            self.owner,
            self.input_sender.clone(),
            delay,
            timer_id,
            interval,
            payload,
        );
    }

    /// Cancels a timer registered by this component.
    pub fn cancel_timer(&self, timer_id: &str) {
        self.timers.cancel_timer(self.owner, timer_id);
    }

    /// Purges every pending timer of this worker. Called at stop.
    pub fn cancel_owned_timers(&self) {
        self.timers.cancel_owner(self.owner);
    }

    /// The process-wide cache service.
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn CacheService> {
        &self.cache
    }

    /// Ownership descriptor for cache entries whose expiry this
    /// component wants delivered.
    #[must_use]
    pub fn cache_owner(&self) -> CacheOwner {
        CacheOwner {
            owner: self.owner,
            target: self.input_sender.clone(),
        }
    }

    /// The connector's shutdown signal.
    #[must_use]
    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }
}

/// Builder for [`ComponentContext`].
pub struct ContextBuilder {
    component_name: String,
    flow_name: String,
    instance_name: String,
    component_index: usize,
    owner: OwnerId,
    component_config: ConfigMap,
    app_config: Map<String, Value>,
    info: ComponentInfo,
    input_sender: Option<EventSender>,
    downstream: Option<EventSender>,
    error_sender: Option<EventSender>,
    timers: Arc<dyn TimerService>,
    cache: Arc<dyn CacheService>,
    stop: CancellationToken,
}

impl ContextBuilder {
    fn new(component_name: impl Into<String>) -> Self {
        Self {
            component_name: component_name.into(),
            flow_name: "flow".to_string(),
            instance_name: "braid".to_string(),
            component_index: 0,
            owner: 0,
            component_config: ConfigMap::new(),
            app_config: Map::new(),
            info: ComponentInfo::new("component", ""),
            input_sender: None,
            downstream: None,
            error_sender: None,
            timers: Arc::new(NoopTimerService),
            cache: Arc::new(NoopCacheService),
            stop: CancellationToken::new(),
        }
    }

    /// Sets the owning flow name.
    #[must_use]
    pub fn flow_name(mut self, name: impl Into<String>) -> Self {
        self.flow_name = name.into();
        self
    }

    /// Sets the connector instance name.
    #[must_use]
    pub fn instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = name.into();
        self
    }

    /// Sets the component's index within its flow.
    #[must_use]
    pub fn component_index(mut self, index: usize) -> Self {
        self.component_index = index;
        self
    }

    /// Sets the worker's owner id.
    #[must_use]
    pub fn owner(mut self, owner: OwnerId) -> Self {
        self.owner = owner;
        self
    }

    /// Sets the resolved `component_config`.
    #[must_use]
    pub fn component_config(mut self, config: ConfigMap) -> Self {
        self.component_config = config;
        self
    }

    /// Sets the app-level `config` block.
    #[must_use]
    pub fn app_config(mut self, config: Map<String, Value>) -> Self {
        self.app_config = config;
        self
    }

    /// Sets the component metadata (parameter defaults).
    #[must_use]
    pub fn info(mut self, info: ComponentInfo) -> Self {
        self.info = info;
        self
    }

    /// Sets the component group's input queue sender.
    #[must_use]
    pub fn input_sender(mut self, sender: EventSender) -> Self {
        self.input_sender = Some(sender);
        self
    }

    /// Sets the next stage's input queue.
    #[must_use]
    pub fn downstream(mut self, sender: Option<EventSender>) -> Self {
        self.downstream = sender;
        self
    }

    /// Sets the error flow's input queue.
    #[must_use]
    pub fn error_sender(mut self, sender: Option<EventSender>) -> Self {
        self.error_sender = sender;
        self
    }

    /// Sets the timer service.
    #[must_use]
    pub fn timers(mut self, timers: Arc<dyn TimerService>) -> Self {
        self.timers = timers;
        self
    }

    /// Sets the cache service.
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn CacheService>) -> Self {
        self.cache = cache;
        self
    }

    /// Sets the shutdown token.
    #[must_use]
    pub fn stop(mut self, stop: CancellationToken) -> Self {
        self.stop = stop;
        self
    }

    /// Finishes the context. A detached input queue is created when
    /// none was provided (harness use).
    #[must_use]
    pub fn build(self) -> ComponentContext {
        let input_sender = self.input_sender.unwrap_or_else(|| {
            let (sender, _receiver) = braid_event::event_channel(braid_event::DEFAULT_QUEUE_DEPTH);
            sender
        });
        ComponentContext {
            component_name: self.component_name,
            flow_name: self.flow_name,
            instance_name: self.instance_name,
            component_index: self.component_index,
            owner: self.owner,
            component_config: self.component_config,
            app_config: self.app_config,
            info: self.info,
            input_sender,
            downstream: self.downstream,
            error_sender: self.error_sender,
            timers: self.timers,
            cache: self.cache,
            stop: self.stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConfigParameter;
    use braid_expression::{resolve_config_map, InvokeRegistry};
    use braid_types::Payload;
    use serde_json::json;

    fn config_map(raw: Value) -> ConfigMap {
        resolve_config_map(&raw, &InvokeRegistry::with_builtins()).expect("resolve")
    }

    #[test]
    fn config_chain_prefers_component_then_app_then_default() {
        let mut app_config = Map::new();
        app_config.insert("shared".to_string(), json!("from-app"));
        app_config.insert("specific".to_string(), json!("overridden"));

        let ctx = ComponentContext::builder("c")
            .component_config(config_map(json!({"specific": "from-component"})))
            .app_config(app_config)
            .info(
                ComponentInfo::new("c", "")
                    .with_parameter(ConfigParameter::optional("fallback", json!(5))),
            )
            .build();

        assert_eq!(ctx.get_config("specific").expect("get"), Some(json!("from-component")));
        assert_eq!(ctx.get_config("shared").expect("get"), Some(json!("from-app")));
        assert_eq!(ctx.get_config("fallback").expect("get"), Some(json!(5)));
        assert_eq!(ctx.get_config("absent").expect("get"), None);
    }

    #[test]
    fn deferred_config_requires_message() {
        let ctx = ComponentContext::builder("c")
            .component_config(config_map(json!({
                "greeting": "evaluate_expression(input.payload:name)"
            })))
            .build();

        assert!(ctx.get_config("greeting").is_err());

        let message = Message::new(Payload::Structured(json!({"name": "ada"})));
        assert_eq!(
            ctx.get_config_with("greeting", &message).expect("get"),
            Some(json!("ada"))
        );
    }

    #[tokio::test]
    async fn forward_without_downstream_acks() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let ctx = ComponentContext::builder("c").build();
        let acked = Arc::new(AtomicBool::new(false));
        let flag = acked.clone();

        let mut message = Message::new(Payload::default());
        message.add_ack_callback(Box::new(move || flag.store(true, Ordering::SeqCst)));

        ctx.forward(message).await.expect("forward");
        assert!(acked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn forward_with_downstream_enqueues() {
        let (tx, rx) = braid_event::event_channel(4);
        let ctx = ComponentContext::builder("c").downstream(Some(tx)).build();

        ctx.forward(Message::new(Payload::default())).await.expect("forward");
        assert!(matches!(rx.recv().await, Some(Event::Message(_))));
    }
}
