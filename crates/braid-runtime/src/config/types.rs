//! Typed configuration model.
//!
//! Every struct tolerates missing keys via defaults; hard requirements
//! are enforced by [`validate`](super::validate) so that error messages
//! name the offending flow and component instead of a serde path.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// The merged top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Logging destinations and levels.
    pub log: LogConfig,
    /// Optional event tracing.
    pub trace: TraceConfig,
    /// Cache service backend selection.
    pub cache: CacheConfig,
    /// Connector instance name (defaults to `braid`).
    pub instance_name: Option<String>,
    /// Host section for YAML anchors; not interpreted.
    pub shared_config: Value,
    /// Declared applications.
    pub apps: Vec<AppInfo>,
    /// Legacy top-level flows, synthesized into one implicit app.
    pub flows: Vec<FlowConfig>,
}

impl ConnectorConfig {
    /// The connector instance name.
    #[must_use]
    pub fn instance_name(&self) -> &str {
        self.instance_name.as_deref().unwrap_or("braid")
    }
}

/// `log:` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level of the stdout sink.
    pub stdout_log_level: String,
    /// Level of the file sink.
    pub log_file_level: String,
    /// File sink path.
    pub log_file: String,
    /// Optional format selector (free-form, reserved).
    pub log_format: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            stdout_log_level: "INFO".to_string(),
            log_file_level: "INFO".to_string(),
            log_file: "braid.log".to_string(),
            log_format: None,
        }
    }
}

/// `trace:` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Append queue-event traces to this file when set.
    pub trace_file: Option<PathBuf>,
    /// Master switch; `trace_file` is ignored when false.
    pub enable_trace: Option<bool>,
}

impl TraceConfig {
    /// Whether tracing is active.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.trace_file.is_some() && self.enable_trace.unwrap_or(true)
    }
}

/// `cache:` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Backend selector; `memory` is built in.
    pub backend: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
        }
    }
}

/// One `apps:` entry.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppInfo {
    /// App name.
    pub name: String,
    /// Whole-app replication factor.
    pub num_instances: usize,
    /// Present iff this is a simplified app.
    pub broker: Option<BrokerSection>,
    /// App-level configuration visible to `get_config`.
    pub config: Map<String, Value>,
    /// Standard mode: explicit flows.
    pub flows: Vec<FlowConfig>,
    /// Simplified mode: user components of the synthesized flow.
    pub components: Vec<ComponentSpec>,
}

impl AppInfo {
    /// Replication factor, never zero.
    #[must_use]
    pub fn instances(&self) -> usize {
        self.num_instances.max(1)
    }

    /// Whether this app uses simplified-mode synthesis.
    #[must_use]
    pub fn is_simplified(&self) -> bool {
        self.broker.is_some()
    }
}

/// One flow of a standard app.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Flow name.
    pub name: String,
    /// Ordered component chain.
    pub components: Vec<ComponentSpec>,
    /// Per-flow trace verbosity; `off` disables tracing for the flow.
    pub trace_level: Option<String>,
}

/// One component of a flow (or of a simplified app).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ComponentSpec {
    /// Component name within the flow.
    #[serde(alias = "component_name")]
    pub name: String,
    /// Registry key of the component implementation.
    pub component_module: String,
    /// Parallel workers over the shared input queue.
    pub num_instances: usize,
    /// Input queue capacity.
    #[serde(alias = "component_queue_max_depth")]
    pub queue_depth: usize,
    /// Skip this component entirely.
    pub disabled: bool,
    /// Component-specific configuration (may contain `invoke` blocks).
    pub component_config: Value,
    /// Ordered transform descriptors applied before invoke.
    pub input_transforms: Vec<Value>,
    /// What invoke receives; defaults to the `previous` plane.
    #[serde(alias = "component_input")]
    pub input_selection: Option<InputSelection>,
    /// Topic subscriptions (simplified apps only).
    pub subscriptions: Vec<Subscription>,
}

impl Default for ComponentSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            component_module: String::new(),
            num_instances: 1,
            queue_depth: braid_event::DEFAULT_QUEUE_DEPTH,
            disabled: false,
            component_config: Value::Null,
            input_transforms: Vec::new(),
            input_selection: None,
            subscriptions: Vec::new(),
        }
    }
}

/// `input_selection` - exactly one of the two fields.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct InputSelection {
    /// Evaluate this expression per message.
    pub source_expression: Option<String>,
    /// Use this constant value.
    pub source_value: Option<Value>,
}

/// One topic subscription.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Subscription {
    /// Topic pattern (`*` one level, `>` one-plus trailing levels).
    pub topic: String,
    /// Delivery quality of service.
    pub qos: u32,
}

impl Default for Subscription {
    fn default() -> Self {
        Self {
            topic: String::new(),
            qos: 1,
        }
    }
}

/// Broker connection and behavior settings.
///
/// Used both as the `broker:` section of a simplified app and as the
/// `component_config` of the broker components in standard flows
/// (legacy `broker_*` key spellings are accepted as aliases).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerSection {
    /// Driver selector; `dev` is the in-process development broker.
    pub broker_type: String,
    /// Connection URL; dev brokers with equal URLs share state.
    pub broker_url: String,
    /// Credentials and TLS material, driver-specific.
    pub broker_username: Option<String>,
    /// See `broker_username`.
    pub broker_password: Option<String>,
    /// Message VPN (solace-style drivers).
    pub broker_vpn: Option<String>,
    /// TLS trust store path.
    pub trust_store_path: Option<String>,
    /// `forever_retry` or `parametrized` (interval + count).
    pub reconnection_strategy: String,
    /// Delay between reconnect attempts, milliseconds.
    pub retry_interval: u64,
    /// Attempt budget of the `parametrized` strategy.
    pub retry_count: u32,
    /// Simplified mode: create a broker input stage.
    pub input_enabled: bool,
    /// Simplified mode: create a broker output stage.
    pub output_enabled: bool,
    /// Simplified mode: create a request/reply controller.
    pub request_reply_enabled: bool,
    /// Queue bound by the input stage.
    #[serde(alias = "broker_queue_name")]
    pub queue_name: Option<String>,
    /// Create the queue when binding.
    pub create_queue_on_start: bool,
    /// `utf-8`, `base64` or `none`.
    pub payload_encoding: String,
    /// `text`, `json` or `yaml`.
    pub payload_format: String,
    /// Nacks before a message counts as poison.
    pub max_redelivery_count: u32,
    /// Request/reply expiry, milliseconds.
    pub request_expiry_ms: u64,
    /// Reply topics are `<prefix>/<correlation>[/<suffix>]`.
    pub response_topic_prefix: String,
    /// See `response_topic_prefix`.
    pub response_topic_suffix: Option<String>,
    /// Reply queue names are `<prefix>-<uuid>`.
    pub response_queue_prefix: String,
    /// User-property key conveying the reply topic.
    pub user_properties_reply_topic_key: String,
    /// User-property key conveying caller metadata.
    pub user_properties_reply_metadata_key: String,
    /// Reuse one connection across components sharing this key.
    pub broker_connection_share: Option<String>,
    /// Subscriptions applied to the bound queue.
    #[serde(alias = "broker_subscriptions")]
    pub subscriptions: Vec<Subscription>,
    /// Output: merge the original message's user properties.
    pub copy_user_properties: bool,
    /// Output: tie the upstream ack to broker confirmation.
    pub propagate_acknowledgements: bool,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            broker_type: "dev".to_string(),
            broker_url: "dev-broker".to_string(),
            broker_username: None,
            broker_password: None,
            broker_vpn: None,
            trust_store_path: None,
            reconnection_strategy: "forever_retry".to_string(),
            retry_interval: 3_000,
            retry_count: 10,
            input_enabled: false,
            output_enabled: false,
            request_reply_enabled: false,
            queue_name: None,
            create_queue_on_start: true,
            payload_encoding: "utf-8".to_string(),
            payload_format: "json".to_string(),
            max_redelivery_count: 3,
            request_expiry_ms: 60_000,
            response_topic_prefix: "reply".to_string(),
            response_topic_suffix: None,
            response_queue_prefix: "reply-queue".to_string(),
            user_properties_reply_topic_key: "reply_topic".to_string(),
            user_properties_reply_metadata_key: "reply_metadata".to_string(),
            broker_connection_share: None,
            subscriptions: Vec::new(),
            copy_user_properties: false,
            propagate_acknowledgements: true,
        }
    }
}

impl BrokerSection {
    /// Deserializes a broker section from a component's configuration.
    ///
    /// # Errors
    ///
    /// Returns the serde diagnostics on shape mismatches.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Serializes this section for use as synthesized component
    /// configuration.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn component_spec_defaults() {
        let spec: ComponentSpec = serde_json::from_value(json!({
            "name": "c",
            "component_module": "pass_through",
        }))
        .expect("deserialize");
        assert_eq!(spec.num_instances, 1);
        assert_eq!(spec.queue_depth, 5);
        assert!(!spec.disabled);
    }

    #[test]
    fn component_spec_accepts_legacy_spellings() {
        let spec: ComponentSpec = serde_json::from_value(json!({
            "component_name": "c",
            "component_module": "pass_through",
            "component_queue_max_depth": 2,
        }))
        .expect("deserialize");
        assert_eq!(spec.name, "c");
        assert_eq!(spec.queue_depth, 2);
    }

    #[test]
    fn broker_section_round_trips_through_component_config() {
        let section = BrokerSection {
            input_enabled: true,
            queue_name: Some("q".to_string()),
            ..Default::default()
        };
        let round_tripped =
            BrokerSection::from_value(section.to_value()).expect("deserialize");
        assert!(round_tripped.input_enabled);
        assert_eq!(round_tripped.queue_name.as_deref(), Some("q"));
    }

    #[test]
    fn trace_disabled_without_file() {
        assert!(!TraceConfig::default().enabled());
        let on = TraceConfig {
            trace_file: Some(PathBuf::from("/tmp/trace.log")),
            enable_trace: None,
        };
        assert!(on.enabled());
    }
}
