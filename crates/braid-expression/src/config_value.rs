//! Resolved configuration values: literal or deferred.
//!
//! `invoke` blocks are resolved recursively at load time. A block whose
//! arguments are all literal executes immediately and collapses into a
//! literal; a block that captures an `evaluate_expression(...)`
//! parameter stays deferred and re-evaluates against the message at
//! each call site.

use crate::expr::{CoerceType, Expression, LocalContext};
use crate::invoke::{InvokeFn, InvokeRegistry};
use crate::ExpressionError;
use braid_event::Message;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A resolved component or app configuration section.
pub type ConfigMap = BTreeMap<String, ConfigValue>;

/// A configuration value after load-time resolution.
#[derive(Clone)]
pub enum ConfigValue {
    /// Plain data, fully resolved at load time.
    Literal(Value),
    /// A mapping with at least one deferred descendant.
    Map(BTreeMap<String, ConfigValue>),
    /// A sequence with at least one deferred descendant.
    List(Vec<ConfigValue>),
    /// A deferred `evaluate_expression(expr[, type])`.
    Expression {
        /// The captured expression.
        expr: Expression,
        /// Optional explicit coercion.
        coerce: Option<CoerceType>,
    },
    /// A deferred `invoke` call.
    Invoke(InvokeCall),
}

/// A deferred invoke block: either a registry function call or an
/// attribute read of a resolved object.
#[derive(Clone)]
pub struct InvokeCall {
    target: String,
    function: Option<Arc<InvokeFn>>,
    object: Option<Box<ConfigValue>>,
    attribute: Option<String>,
    positional: Vec<ConfigValue>,
    keyword: BTreeMap<String, ConfigValue>,
}

impl ConfigValue {
    /// Returns the literal value, when this node is fully static.
    #[must_use]
    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Self::Literal(value) => Some(value),
            _ => None,
        }
    }

    /// Returns true when no deferred evaluation is pending anywhere in
    /// this node.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }

    /// Resolves this node to a plain value.
    ///
    /// Deferred expressions evaluate against `message`; resolving a
    /// deferred node without a message is an error
    /// ([`ExpressionError::MessageRequired`]).
    ///
    /// # Errors
    ///
    /// Propagates invoke failures and the missing-message condition.
    pub fn resolve(
        &self,
        message: Option<&Message>,
        locals: Option<&LocalContext>,
    ) -> Result<Value, ExpressionError> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Map(entries) => {
                let mut out = Map::new();
                for (key, entry) in entries {
                    out.insert(key.clone(), entry.resolve(message, locals)?);
                }
                Ok(Value::Object(out))
            }
            Self::List(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for entry in entries {
                    out.push(entry.resolve(message, locals)?);
                }
                Ok(Value::Array(out))
            }
            Self::Expression { expr, coerce } => {
                let message = message.ok_or(ExpressionError::MessageRequired)?;
                let value = expr.evaluate(message, locals);
                Ok(match coerce {
                    Some(coerce) => coerce.apply(value),
                    None => value,
                })
            }
            Self::Invoke(call) => call.resolve(message, locals),
        }
    }
}

impl fmt::Debug for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => write!(f, "Literal({value})"),
            Self::Map(entries) => f.debug_map().entries(entries.iter()).finish(),
            Self::List(entries) => f.debug_list().entries(entries.iter()).finish(),
            Self::Expression { expr, coerce } => f
                .debug_struct("Expression")
                .field("expr", expr)
                .field("coerce", coerce)
                .finish(),
            Self::Invoke(call) => write!(f, "Invoke({})", call.target),
        }
    }
}

impl InvokeCall {
    fn resolve(
        &self,
        message: Option<&Message>,
        locals: Option<&LocalContext>,
    ) -> Result<Value, ExpressionError> {
        if let Some(function) = &self.function {
            let mut positional = Vec::with_capacity(self.positional.len());
            for entry in &self.positional {
                positional.push(entry.resolve(message, locals)?);
            }
            let mut keyword = Map::new();
            for (key, entry) in &self.keyword {
                keyword.insert(key.clone(), entry.resolve(message, locals)?);
            }
            return function(&positional, &keyword);
        }

        // Attribute read of a resolved object.
        let object = match &self.object {
            Some(object) => object.resolve(message, locals)?,
            None => Value::Null,
        };
        let attribute = self.attribute.as_deref().unwrap_or_default();
        Ok(object.get(attribute).cloned().unwrap_or(Value::Null))
    }

    fn is_static(&self) -> bool {
        self.positional.iter().all(ConfigValue::is_literal)
            && self.keyword.values().all(ConfigValue::is_literal)
            && self.object.as_deref().map(ConfigValue::is_literal).unwrap_or(true)
    }
}

/// Resolves a raw configuration tree into a [`ConfigValue`].
///
/// - `{invoke: {...}}` nodes become calls; all-literal calls execute
///   immediately and collapse to their result
/// - `evaluate_expression(expr[, type])` strings (alias
///   `source_expression(...)`) become deferred expressions
/// - containers with no deferred descendants collapse to literals
///
/// # Errors
///
/// Returns an error for malformed invoke blocks, unknown registry
/// targets, invalid captured expressions, or failures of an eagerly
/// executed call.
pub fn resolve_config_value(
    raw: &Value,
    registry: &InvokeRegistry,
) -> Result<ConfigValue, ExpressionError> {
    match raw {
        Value::String(text) => match parse_deferred_expression(text)? {
            Some((expr, coerce)) => Ok(ConfigValue::Expression { expr, coerce }),
            None => Ok(ConfigValue::Literal(raw.clone())),
        },
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(spec) = map.get("invoke") {
                    return resolve_invoke_block(spec, registry);
                }
            }
            let mut entries = BTreeMap::new();
            let mut all_literal = true;
            for (key, value) in map {
                let resolved = resolve_config_value(value, registry)?;
                all_literal &= resolved.is_literal();
                entries.insert(key.clone(), resolved);
            }
            if all_literal {
                collapse_map(entries)
            } else {
                Ok(ConfigValue::Map(entries))
            }
        }
        Value::Array(items) => {
            let mut entries = Vec::with_capacity(items.len());
            let mut all_literal = true;
            for item in items {
                let resolved = resolve_config_value(item, registry)?;
                all_literal &= resolved.is_literal();
                entries.push(resolved);
            }
            if all_literal {
                collapse_list(entries)
            } else {
                Ok(ConfigValue::List(entries))
            }
        }
        other => Ok(ConfigValue::Literal(other.clone())),
    }
}

/// Resolves an object-valued configuration section into a [`ConfigMap`].
/// Null resolves to an empty map; any other non-object is an error.
pub fn resolve_config_map(
    raw: &Value,
    registry: &InvokeRegistry,
) -> Result<ConfigMap, ExpressionError> {
    match raw {
        Value::Null => Ok(ConfigMap::new()),
        Value::Object(map) => {
            let mut out = ConfigMap::new();
            for (key, value) in map {
                out.insert(key.clone(), resolve_config_value(value, registry)?);
            }
            Ok(out)
        }
        other => Err(ExpressionError::invalid(
            other.to_string(),
            "expected a mapping",
        )),
    }
}

fn collapse_map(entries: BTreeMap<String, ConfigValue>) -> Result<ConfigValue, ExpressionError> {
    let mut out = Map::new();
    for (key, entry) in entries {
        out.insert(key, entry.resolve(None, None)?);
    }
    Ok(ConfigValue::Literal(Value::Object(out)))
}

fn collapse_list(entries: Vec<ConfigValue>) -> Result<ConfigValue, ExpressionError> {
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        out.push(entry.resolve(None, None)?);
    }
    Ok(ConfigValue::Literal(Value::Array(out)))
}

fn resolve_invoke_block(
    spec: &Value,
    registry: &InvokeRegistry,
) -> Result<ConfigValue, ExpressionError> {
    let spec = spec.as_object().ok_or_else(|| {
        ExpressionError::invalid(spec.to_string(), "invoke block must be a mapping")
    })?;

    let module = spec.get("module").and_then(Value::as_str);
    let function_name = spec.get("function").and_then(Value::as_str);
    let attribute = spec.get("attribute").and_then(Value::as_str);

    let object = match spec.get("object") {
        Some(raw) => Some(Box::new(resolve_config_value(raw, registry)?)),
        None => None,
    };

    let function = match (module, function_name) {
        (Some(module), Some(function)) => Some(registry.get(module, function)?),
        (None, None) => None,
        _ => {
            return Err(ExpressionError::invalid(
                "invoke",
                "'module' and 'function' must be given together",
            ))
        }
    };

    if function.is_none() && (object.is_none() || attribute.is_none()) {
        return Err(ExpressionError::invalid(
            "invoke",
            "expected module+function, or object+attribute",
        ));
    }

    let params = spec.get("params").and_then(Value::as_object);
    let mut positional = Vec::new();
    if let Some(raw) = params.and_then(|p| p.get("positional")).and_then(Value::as_array) {
        for item in raw {
            positional.push(resolve_config_value(item, registry)?);
        }
    }
    let mut keyword = BTreeMap::new();
    if let Some(raw) = params.and_then(|p| p.get("keyword")).and_then(Value::as_object) {
        for (key, value) in raw {
            keyword.insert(key.clone(), resolve_config_value(value, registry)?);
        }
    }

    let target = match (module, function_name, attribute) {
        (Some(module), Some(function), _) => format!("{module}.{function}"),
        (_, _, Some(attribute)) => format!("object.{attribute}"),
        _ => "invoke".to_string(),
    };

    let call = InvokeCall {
        target,
        function,
        object,
        attribute: attribute.map(str::to_string),
        positional,
        keyword,
    };

    // Nothing deferred: execute at load time.
    if call.is_static() {
        return Ok(ConfigValue::Literal(call.resolve(None, None)?));
    }
    Ok(ConfigValue::Invoke(call))
}

fn parse_deferred_expression(
    text: &str,
) -> Result<Option<(Expression, Option<CoerceType>)>, ExpressionError> {
    let inner = text
        .strip_prefix("evaluate_expression(")
        .or_else(|| text.strip_prefix("source_expression("));
    let Some(inner) = inner else {
        return Ok(None);
    };
    let Some(inner) = inner.strip_suffix(')') else {
        return Err(ExpressionError::invalid(text, "unterminated expression"));
    };

    let (expr_text, coerce) = match inner.rsplit_once(',') {
        Some((left, right)) if CoerceType::parse(right.trim()).is_some() => {
            (left.trim(), CoerceType::parse(right.trim()))
        }
        _ => (inner.trim(), None),
    };

    Ok(Some((Expression::parse(expr_text)?, coerce)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_types::Payload;
    use serde_json::json;

    fn registry() -> InvokeRegistry {
        InvokeRegistry::with_builtins()
    }

    #[test]
    fn plain_values_stay_literal() {
        let resolved = resolve_config_value(&json!({"a": 1, "b": ["x"]}), &registry())
            .expect("resolve");
        assert_eq!(resolved.as_literal(), Some(&json!({"a": 1, "b": ["x"]})));
    }

    #[test]
    fn static_invoke_executes_at_load_time() {
        let raw = json!({
            "invoke": {
                "module": "string",
                "function": "concat",
                "params": {"positional": ["a", "b"]}
            }
        });
        let resolved = resolve_config_value(&raw, &registry()).expect("resolve");
        assert_eq!(resolved.as_literal(), Some(&json!("ab")));
    }

    #[test]
    fn deferred_expression_resolves_per_message() {
        let raw = json!("evaluate_expression(input.payload:name)");
        let resolved = resolve_config_value(&raw, &registry()).expect("resolve");
        assert!(!resolved.is_literal());

        let message = Message::new(Payload::Structured(json!({"name": "ada"})));
        assert_eq!(resolved.resolve(Some(&message), None).expect("resolve"), json!("ada"));
        assert!(resolved.resolve(None, None).is_err());
    }

    #[test]
    fn deferred_expression_with_coercion() {
        let raw = json!("evaluate_expression(input.payload:count, int)");
        let resolved = resolve_config_value(&raw, &registry()).expect("resolve");

        let message = Message::new(Payload::Structured(json!({"count": "17"})));
        assert_eq!(resolved.resolve(Some(&message), None).expect("resolve"), json!(17));
    }

    #[test]
    fn invoke_with_deferred_param_stays_deferred() {
        let raw = json!({
            "invoke": {
                "module": "string",
                "function": "concat",
                "params": {"positional": ["Echo: ", "evaluate_expression(input.payload:text)"]}
            }
        });
        let resolved = resolve_config_value(&raw, &registry()).expect("resolve");
        assert!(!resolved.is_literal());

        let message = Message::new(Payload::Structured(json!({"text": "hi"})));
        assert_eq!(
            resolved.resolve(Some(&message), None).expect("resolve"),
            json!("Echo: hi")
        );
    }

    #[test]
    fn object_attribute_reads_resolved_object() {
        let raw = json!({
            "invoke": {
                "object": {"endpoint": "https://example.test", "timeout": 5},
                "attribute": "endpoint"
            }
        });
        let resolved = resolve_config_value(&raw, &registry()).expect("resolve");
        assert_eq!(resolved.as_literal(), Some(&json!("https://example.test")));
    }

    #[test]
    fn unknown_invoke_target_fails_at_load() {
        let raw = json!({"invoke": {"module": "nope", "function": "f"}});
        assert!(resolve_config_value(&raw, &registry()).is_err());
    }

    #[test]
    fn nested_deferred_keeps_container_deferred() {
        let raw = json!({
            "outer": {"inner": "evaluate_expression(previous)"}
        });
        let resolved = resolve_config_value(&raw, &registry()).expect("resolve");
        assert!(!resolved.is_literal());

        let mut message = Message::new(Payload::default());
        message.set_previous(json!(5));
        assert_eq!(
            resolved.resolve(Some(&message), None).expect("resolve"),
            json!({"outer": {"inner": 5}})
        );
    }
}
