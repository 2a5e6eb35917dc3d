//! Ordered message transforms applied before a component's invoke.

use crate::config_value::{resolve_config_value, ConfigValue};
use crate::expr::{is_truthy, Expression, LocalContext};
use crate::invoke::InvokeRegistry;
use crate::ExpressionError;
use braid_event::Message;
use serde_json::{Map, Value};

/// Where a transform reads its input from.
#[derive(Debug, Clone)]
pub enum SourceBinding {
    Expression(Expression),
    Value(Value),
}

impl SourceBinding {
    fn parse(spec: &Map<String, Value>, kind: &str) -> Result<Self, String> {
        match (spec.get("source_expression"), spec.get("source_value")) {
            (Some(expr), None) => {
                let text = expr
                    .as_str()
                    .ok_or_else(|| format!("{kind}: source_expression must be a string"))?;
                Expression::parse(text)
                    .map(Self::Expression)
                    .map_err(|e| e.to_string())
            }
            (None, Some(value)) => Ok(Self::Value(value.clone())),
            _ => Err(format!(
                "{kind}: exactly one of source_expression / source_value is required"
            )),
        }
    }

    fn evaluate(&self, message: &Message, locals: Option<&LocalContext>) -> Value {
        match self {
            Self::Expression(expr) => expr.evaluate(message, locals),
            Self::Value(value) => value.clone(),
        }
    }
}

/// A single parsed transform descriptor.
#[derive(Debug, Clone)]
pub enum TransformSpec {
    /// Copy a value to a destination.
    Copy {
        source: SourceBinding,
        dest: Expression,
    },
    /// Append a value to the sequence at a destination.
    Append {
        source: SourceBinding,
        dest: Expression,
    },
    /// Per-element projection of a source list.
    Map {
        source_list: Expression,
        source: Expression,
        processing: Option<ConfigValue>,
        dest_list: Expression,
    },
    /// Fold a source list into an accumulator.
    Reduce {
        source_list: Expression,
        accumulator: ConfigValue,
        initial_value: Value,
        dest: Expression,
    },
    /// Keep the elements of a source list a predicate accepts.
    Filter {
        source_list: Expression,
        predicate: ConfigValue,
        dest_list: Expression,
    },
}

/// The ordered transform list of one component.
#[derive(Debug, Clone, Default)]
pub struct Transforms {
    specs: Vec<TransformSpec>,
}

impl Transforms {
    /// Parses the `input_transforms` configuration list.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError::Transform`] naming the position and
    /// operator of the first malformed descriptor.
    pub fn parse(raw: &[Value], registry: &InvokeRegistry) -> Result<Self, ExpressionError> {
        let mut specs = Vec::with_capacity(raw.len());
        for (index, descriptor) in raw.iter().enumerate() {
            specs.push(parse_one(descriptor, registry).map_err(|reason| {
                ExpressionError::Transform {
                    index,
                    kind: descriptor
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string(),
                    reason,
                }
            })?);
        }
        Ok(Self { specs })
    }

    /// Returns true when no transforms are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Applies every transform, in order, to the message.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError::Transform`] identifying the failing
    /// operator; the message may have been partially transformed.
    pub fn apply(&self, message: &mut Message) -> Result<(), ExpressionError> {
        for (index, spec) in self.specs.iter().enumerate() {
            apply_one(spec, message).map_err(|reason| ExpressionError::Transform {
                index,
                kind: spec_kind(spec).to_string(),
                reason,
            })?;
        }
        Ok(())
    }
}

fn spec_kind(spec: &TransformSpec) -> &'static str {
    match spec {
        TransformSpec::Copy { .. } => "copy",
        TransformSpec::Append { .. } => "append",
        TransformSpec::Map { .. } => "map",
        TransformSpec::Reduce { .. } => "reduce",
        TransformSpec::Filter { .. } => "filter",
    }
}

fn parse_one(descriptor: &Value, registry: &InvokeRegistry) -> Result<TransformSpec, String> {
    let spec = descriptor
        .as_object()
        .ok_or_else(|| "descriptor must be a mapping".to_string())?;
    let kind = spec
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing 'type'".to_string())?;

    let expr_field = |key: &str| -> Result<Expression, String> {
        let text = spec
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| format!("missing '{key}'"))?;
        Expression::parse(text).map_err(|e| e.to_string())
    };
    let function_field = |key: &str| -> Result<ConfigValue, String> {
        let raw = spec.get(key).ok_or_else(|| format!("missing '{key}'"))?;
        resolve_config_value(raw, registry).map_err(|e| e.to_string())
    };

    match kind {
        "copy" => Ok(TransformSpec::Copy {
            source: SourceBinding::parse(spec, kind)?,
            dest: expr_field("dest_expression")?,
        }),
        "append" => Ok(TransformSpec::Append {
            source: SourceBinding::parse(spec, kind)?,
            dest: expr_field("dest_expression")?,
        }),
        "map" => Ok(TransformSpec::Map {
            source_list: expr_field("source_list_expression")?,
            source: match spec.get("source_expression") {
                Some(_) => expr_field("source_expression")?,
                None => Expression::parse("item").map_err(|e| e.to_string())?,
            },
            processing: match spec.get("processing_function") {
                Some(_) => Some(function_field("processing_function")?),
                None => None,
            },
            dest_list: expr_field("dest_list_expression")?,
        }),
        "reduce" => Ok(TransformSpec::Reduce {
            source_list: expr_field("source_list_expression")?,
            accumulator: function_field("accumulator_function")?,
            initial_value: spec.get("initial_value").cloned().unwrap_or(Value::Null),
            dest: expr_field("dest_expression")?,
        }),
        "filter" => Ok(TransformSpec::Filter {
            source_list: expr_field("source_list_expression")?,
            predicate: function_field("filter_function")?,
            dest_list: expr_field("dest_list_expression")?,
        }),
        other => Err(format!("unknown transform type '{other}'")),
    }
}

/// Reads a source list; an absent source is an empty list.
fn source_items(expr: &Expression, message: &Message) -> Result<Vec<Value>, String> {
    match expr.evaluate(message, None) {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items),
        other => Err(format!("source is not a sequence: {other}")),
    }
}

fn apply_one(spec: &TransformSpec, message: &mut Message) -> Result<(), String> {
    match spec {
        TransformSpec::Copy { source, dest } => {
            let value = source.evaluate(message, None);
            dest.write(message, value, true).map_err(|e| e.to_string())
        }
        TransformSpec::Append { source, dest } => {
            let value = source.evaluate(message, None);
            let appended = match dest.evaluate(message, None) {
                Value::Null => Value::Array(vec![value]),
                Value::Array(mut items) => {
                    items.push(value);
                    Value::Array(items)
                }
                other => return Err(format!("append destination is not a sequence: {other}")),
            };
            dest.write(message, appended, true).map_err(|e| e.to_string())
        }
        TransformSpec::Map {
            source_list,
            source,
            processing,
            dest_list,
        } => {
            let items = source_items(source_list, message)?;
            dest_list
                .write(message, Value::Array(Vec::new()), true)
                .map_err(|e| e.to_string())?;
            for (index, item) in items.into_iter().enumerate() {
                let mut locals = LocalContext {
                    item,
                    index: Value::from(index),
                    ..Default::default()
                };
                let mut value = source.evaluate(message, Some(&locals));
                if let Some(processing) = processing {
                    locals.self_value = value;
                    value = processing
                        .resolve(Some(message), Some(&locals))
                        .map_err(|e| e.to_string())?;
                }
                dest_list
                    .child_index(index)
                    .write(message, value, true)
                    .map_err(|e| e.to_string())?;
            }
            Ok(())
        }
        TransformSpec::Reduce {
            source_list,
            accumulator,
            initial_value,
            dest,
        } => {
            let items = source_items(source_list, message)?;
            let mut accumulated = initial_value.clone();
            for (index, item) in items.into_iter().enumerate() {
                let mut keyword_args = Map::new();
                keyword_args.insert("accumulated_value".to_string(), accumulated);
                keyword_args.insert("current_value".to_string(), item);
                keyword_args.insert("index".to_string(), Value::from(index));
                let locals = LocalContext {
                    keyword_args,
                    ..Default::default()
                };
                accumulated = accumulator
                    .resolve(Some(message), Some(&locals))
                    .map_err(|e| e.to_string())?;
            }
            dest.write(message, accumulated, true).map_err(|e| e.to_string())
        }
        TransformSpec::Filter {
            source_list,
            predicate,
            dest_list,
        } => {
            let items = source_items(source_list, message)?;
            let mut kept = Vec::new();
            for (index, item) in items.into_iter().enumerate() {
                let mut keyword_args = Map::new();
                keyword_args.insert("current_value".to_string(), item.clone());
                keyword_args.insert("index".to_string(), Value::from(index));
                let locals = LocalContext {
                    keyword_args,
                    ..Default::default()
                };
                let verdict = predicate
                    .resolve(Some(message), Some(&locals))
                    .map_err(|e| e.to_string())?;
                if is_truthy(&verdict) {
                    kept.push(item);
                }
            }
            dest_list
                .write(message, Value::Array(kept), true)
                .map_err(|e| e.to_string())
        }
    }
}
