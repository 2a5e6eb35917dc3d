//! The `<plane>[:<path>]` locator grammar.

use crate::template::Template;
use crate::ExpressionError;
use braid_event::Message;
use serde_json::{json, Map, Value};

/// Alias selected by the `input` family of planes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputField {
    /// The whole input view: payload, topic, topic_levels, user_properties.
    All,
    /// The decoded payload.
    Payload,
    /// The originating topic string.
    Topic,
    /// The topic split on `/`.
    TopicLevels,
    /// The originating user properties.
    UserProperties,
}

/// A data plane of a [`Message`].
#[derive(Debug, Clone, PartialEq)]
pub enum Plane {
    /// One of the `input` aliases.
    Input(InputField),
    /// The previous component's invoke result.
    Previous,
    /// A named scratch region.
    UserData(String),
    /// A literal string.
    Static(String),
    /// A parsed template rendered per evaluation.
    Template(Template),
    /// Transform-local: the current list element.
    Item,
    /// Transform-local: the current list index.
    Index,
    /// Transform-local: named arguments bound by the operator.
    KeywordArgs,
    /// Transform-local: data produced for an invoke call.
    InvokeData,
    /// Transform-local: the value being processed.
    SelfRef,
}

impl Plane {
    fn name(&self) -> String {
        match self {
            Self::Input(InputField::All) => "input".into(),
            Self::Input(InputField::Payload) => "input.payload".into(),
            Self::Input(InputField::Topic) => "input.topic".into(),
            Self::Input(InputField::TopicLevels) => "input.topic_levels".into(),
            Self::Input(InputField::UserProperties) => "input.user_properties".into(),
            Self::Previous => "previous".into(),
            Self::UserData(name) => format!("user_data.{name}"),
            Self::Static(_) => "static".into(),
            Self::Template(_) => "template".into(),
            Self::Item => "item".into(),
            Self::Index => "index".into(),
            Self::KeywordArgs => "keyword_args".into(),
            Self::InvokeData => "invoke_data".into(),
            Self::SelfRef => "self".into(),
        }
    }
}

/// One step of a dot-delimited path. Integer segments index sequences,
/// everything else indexes mappings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Mapping key.
    Key(String),
    /// Sequence index.
    Index(usize),
}

impl PathSegment {
    fn parse(segment: &str) -> Self {
        match segment.parse::<usize>() {
            Ok(index) => Self::Index(index),
            Err(_) => Self::Key(segment.to_string()),
        }
    }
}

/// Values bound by a transform operator for the duration of one
/// element visit.
#[derive(Debug, Clone, Default)]
pub struct LocalContext {
    /// The `item` plane.
    pub item: Value,
    /// The `index` plane.
    pub index: Value,
    /// The `keyword_args` plane.
    pub keyword_args: Map<String, Value>,
    /// The `invoke_data` plane.
    pub invoke_data: Value,
    /// The `self` plane.
    pub self_value: Value,
}

/// A parsed data locator.
///
/// # Examples
///
/// ```
/// use braid_expression::Expression;
///
/// Expression::parse("input.payload:orders.0.id").unwrap();
/// Expression::parse("user_data.temp:results").unwrap();
/// Expression::parse("static:hello").unwrap();
/// Expression::parse("template:id={{text://input.payload:id}}").unwrap();
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    plane: Plane,
    path: Vec<PathSegment>,
}

impl Expression {
    /// Parses an expression string.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError::InvalidExpression`] when the plane is
    /// unknown or the template syntax is malformed.
    pub fn parse(expression: &str) -> Result<Self, ExpressionError> {
        if expression.is_empty() {
            return Err(ExpressionError::invalid(expression, "empty expression"));
        }

        // static: and template: consume the remainder verbatim, colons
        // included.
        if let Some(literal) = expression.strip_prefix("static:") {
            return Ok(Self {
                plane: Plane::Static(literal.to_string()),
                path: Vec::new(),
            });
        }
        if let Some(text) = expression.strip_prefix("template:") {
            return Ok(Self {
                plane: Plane::Template(Template::parse(text)?),
                path: Vec::new(),
            });
        }

        let (plane_str, path_str) = match expression.split_once(':') {
            Some((plane, path)) => (plane, Some(path)),
            None => (expression, None),
        };

        let plane = match plane_str {
            "input" => Plane::Input(InputField::All),
            "input.payload" => Plane::Input(InputField::Payload),
            "input.topic" => Plane::Input(InputField::Topic),
            "input.topic_levels" => Plane::Input(InputField::TopicLevels),
            "input.user_properties" => Plane::Input(InputField::UserProperties),
            "previous" => Plane::Previous,
            "item" => Plane::Item,
            "index" => Plane::Index,
            "keyword_args" => Plane::KeywordArgs,
            "invoke_data" => Plane::InvokeData,
            "self" => Plane::SelfRef,
            other => match other.strip_prefix("user_data.") {
                Some(name) if !name.is_empty() => Plane::UserData(name.to_string()),
                _ => {
                    return Err(ExpressionError::invalid(
                        expression,
                        format!("unknown data plane '{other}'"),
                    ))
                }
            },
        };

        let path = match path_str {
            Some(path) if !path.is_empty() => path.split('.').map(PathSegment::parse).collect(),
            _ => Vec::new(),
        };

        Ok(Self { plane, path })
    }

    /// Returns the addressed plane.
    #[must_use]
    pub fn plane(&self) -> &Plane {
        &self.plane
    }

    /// Returns a copy of this expression with a sequence index appended
    /// to the path (list operators address `dest_list[i]` this way).
    #[must_use]
    pub fn child_index(&self, index: usize) -> Self {
        let mut child = self.clone();
        child.path.push(PathSegment::Index(index));
        child
    }

    /// Evaluates the expression against a message.
    ///
    /// Any missing intermediate step yields `Value::Null`; evaluation
    /// never fails and is pure with respect to the message.
    #[must_use]
    pub fn evaluate(&self, message: &Message, locals: Option<&LocalContext>) -> Value {
        let root = self.root_value(message, locals);
        lookup(&root, &self.path).cloned().unwrap_or(Value::Null)
    }

    fn root_value(&self, message: &Message, locals: Option<&LocalContext>) -> Value {
        match &self.plane {
            Plane::Input(InputField::All) => json!({
                "payload": message.payload().to_value(),
                "topic": message.topic(),
                "topic_levels": message.topic_levels(),
                "user_properties": Value::Object(message.user_properties().clone()),
            }),
            Plane::Input(InputField::Payload) => message.payload().to_value(),
            Plane::Input(InputField::Topic) => message
                .topic()
                .map(|t| Value::String(t.to_string()))
                .unwrap_or(Value::Null),
            Plane::Input(InputField::TopicLevels) => json!(message.topic_levels()),
            Plane::Input(InputField::UserProperties) => {
                Value::Object(message.user_properties().clone())
            }
            Plane::Previous => message.previous().cloned().unwrap_or(Value::Null),
            Plane::UserData(name) => message
                .user_data()
                .get(name.as_str())
                .cloned()
                .unwrap_or(Value::Null),
            Plane::Static(literal) => Value::String(literal.clone()),
            Plane::Template(template) => Value::String(template.render(message, locals)),
            Plane::Item => locals.map(|l| l.item.clone()).unwrap_or(Value::Null),
            Plane::Index => locals.map(|l| l.index.clone()).unwrap_or(Value::Null),
            Plane::KeywordArgs => locals
                .map(|l| Value::Object(l.keyword_args.clone()))
                .unwrap_or(Value::Null),
            Plane::InvokeData => locals.map(|l| l.invoke_data.clone()).unwrap_or(Value::Null),
            Plane::SelfRef => locals.map(|l| l.self_value.clone()).unwrap_or(Value::Null),
        }
    }

    /// Writes `value` at this expression's location.
    ///
    /// Only `user_data.<name>` is writable; `previous` additionally
    /// when `allow_previous` is set (transform destinations). Missing
    /// intermediate containers are created on demand: a mapping for key
    /// segments, a sequence grown with nulls for index segments.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError::NotWritable`] for any other plane.
    pub fn write(
        &self,
        message: &mut Message,
        value: Value,
        allow_previous: bool,
    ) -> Result<(), ExpressionError> {
        match &self.plane {
            Plane::UserData(name) => {
                let root = message
                    .user_data_mut()
                    .entry(name.clone())
                    .or_insert(Value::Null);
                set_path(root, &self.path, value);
                Ok(())
            }
            Plane::Previous if allow_previous => {
                set_path(message.previous_mut(), &self.path, value);
                Ok(())
            }
            other => Err(ExpressionError::NotWritable(other.name())),
        }
    }
}

fn lookup<'a>(root: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    let mut current = root;
    for segment in path {
        current = match segment {
            PathSegment::Key(key) => current.get(key.as_str())?,
            PathSegment::Index(index) => current.get(index)?,
        };
    }
    Some(current)
}

fn set_path(root: &mut Value, path: &[PathSegment], value: Value) {
    let mut current = root;
    for segment in path {
        current = match segment {
            PathSegment::Key(key) => {
                if !current.is_object() {
                    *current = Value::Object(Map::new());
                }
                match current {
                    Value::Object(map) => map.entry(key.clone()).or_insert(Value::Null),
                    _ => unreachable!("object ensured above"),
                }
            }
            PathSegment::Index(index) => {
                if !current.is_array() {
                    *current = Value::Array(Vec::new());
                }
                match current {
                    Value::Array(items) => {
                        while items.len() <= *index {
                            items.push(Value::Null);
                        }
                        &mut items[*index]
                    }
                    _ => unreachable!("array ensured above"),
                }
            }
        };
    }
    *current = value;
}

/// Truthiness used by filters and streaming-complete checks: null,
/// false, zero, and empty strings/sequences/mappings are falsy.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Explicit type coercion applied by `evaluate_expression(expr, type)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoerceType {
    Int,
    Float,
    Bool,
    String,
}

impl CoerceType {
    /// Parses a coercion name; `None` for anything unrecognized.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "int" => Some(Self::Int),
            "float" => Some(Self::Float),
            "bool" => Some(Self::Bool),
            "string" => Some(Self::String),
            _ => None,
        }
    }

    /// Coerces a value; uncoercible inputs become null.
    #[must_use]
    pub fn apply(&self, value: Value) -> Value {
        match self {
            Self::Int => match &value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().map(|f| f as i64))
                    .map(Value::from)
                    .unwrap_or(Value::Null),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .ok()
                    .or_else(|| s.trim().parse::<f64>().ok().map(|f| f as i64))
                    .map(Value::from)
                    .unwrap_or(Value::Null),
                Value::Bool(b) => Value::from(i64::from(*b)),
                _ => Value::Null,
            },
            Self::Float => match &value {
                Value::Number(n) => n.as_f64().map(Value::from).unwrap_or(Value::Null),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .map(Value::from)
                    .unwrap_or(Value::Null),
                Value::Bool(b) => Value::from(if *b { 1.0 } else { 0.0 }),
                _ => Value::Null,
            },
            Self::Bool => match &value {
                Value::String(s) => match s.to_ascii_lowercase().as_str() {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    _ => Value::Bool(!s.is_empty()),
                },
                other => Value::Bool(is_truthy(other)),
            },
            Self::String => Value::String(crate::template::textualize(&value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_types::Payload;

    fn message() -> Message {
        Message::new(Payload::Structured(json!({
            "text": "world",
            "items": [10, 20, 30],
            "nested": {"a": {"b": 1}},
        })))
        .with_topic("orders/new/42")
    }

    // ── Parsing ──────────────────────────────────────────────

    #[test]
    fn parse_plane_and_path() {
        let expr = Expression::parse("input.payload:nested.a.b").expect("parse");
        assert_eq!(expr.plane(), &Plane::Input(InputField::Payload));
        assert_eq!(
            expr.path,
            vec![
                PathSegment::Key("nested".into()),
                PathSegment::Key("a".into()),
                PathSegment::Key("b".into())
            ]
        );
    }

    #[test]
    fn parse_integer_segments_index_sequences() {
        let expr = Expression::parse("previous:list.2.name").expect("parse");
        assert_eq!(
            expr.path,
            vec![
                PathSegment::Key("list".into()),
                PathSegment::Index(2),
                PathSegment::Key("name".into())
            ]
        );
    }

    #[test]
    fn parse_static_keeps_colons() {
        let expr = Expression::parse("static:a:b:c").expect("parse");
        assert_eq!(expr.plane(), &Plane::Static("a:b:c".into()));
    }

    #[test]
    fn parse_rejects_unknown_plane() {
        assert!(Expression::parse("inputs.payload:x").is_err());
        assert!(Expression::parse("user_data.").is_err());
        assert!(Expression::parse("").is_err());
    }

    // ── Evaluation ───────────────────────────────────────────

    #[test]
    fn evaluate_payload_path() {
        let msg = message();
        let expr = Expression::parse("input.payload:text").expect("parse");
        assert_eq!(expr.evaluate(&msg, None), json!("world"));
    }

    #[test]
    fn evaluate_sequence_index() {
        let msg = message();
        let expr = Expression::parse("input.payload:items.1").expect("parse");
        assert_eq!(expr.evaluate(&msg, None), json!(20));
    }

    #[test]
    fn evaluate_topic_levels() {
        let msg = message();
        let expr = Expression::parse("input.topic_levels:1").expect("parse");
        assert_eq!(expr.evaluate(&msg, None), json!("new"));
    }

    #[test]
    fn evaluate_missing_is_null_not_error() {
        let msg = message();
        for text in [
            "input.payload:no.such.path",
            "previous",
            "user_data.absent:x",
            "input.payload:items.9",
        ] {
            let expr = Expression::parse(text).expect("parse");
            assert_eq!(expr.evaluate(&msg, None), Value::Null, "{text}");
        }
    }

    #[test]
    fn evaluate_is_pure() {
        let msg = message();
        let expr = Expression::parse("input:payload.nested.a").expect("parse");
        assert_eq!(expr.evaluate(&msg, None), expr.evaluate(&msg, None));
    }

    #[test]
    fn evaluate_input_alias_exposes_all_fields() {
        let msg = message();
        let expr = Expression::parse("input:topic").expect("parse");
        assert_eq!(expr.evaluate(&msg, None), json!("orders/new/42"));
    }

    // ── Writing ──────────────────────────────────────────────

    #[test]
    fn write_then_read_user_data_round_trips() {
        let mut msg = message();
        let expr = Expression::parse("user_data.temp:results.0.score").expect("parse");
        expr.write(&mut msg, json!(0.9), false).expect("write");
        assert_eq!(expr.evaluate(&msg, None), json!(0.9));
    }

    #[test]
    fn write_grows_sequences_with_nulls() {
        let mut msg = message();
        let expr = Expression::parse("user_data.buf:list.2").expect("parse");
        expr.write(&mut msg, json!("x"), false).expect("write");
        let list = Expression::parse("user_data.buf:list").expect("parse");
        assert_eq!(list.evaluate(&msg, None), json!([null, null, "x"]));
    }

    #[test]
    fn write_rejects_read_only_planes() {
        let mut msg = message();
        for text in ["input.payload:x", "input.topic", "item", "static:x"] {
            let expr = Expression::parse(text).expect("parse");
            assert!(expr.write(&mut msg, json!(1), false).is_err(), "{text}");
        }
    }

    #[test]
    fn write_previous_requires_transform_context() {
        let mut msg = message();
        let expr = Expression::parse("previous:out").expect("parse");
        assert!(expr.write(&mut msg, json!(1), false).is_err());
        expr.write(&mut msg, json!(1), true).expect("write");
        assert_eq!(expr.evaluate(&msg, None), json!(1));
    }

    // ── Coercion ─────────────────────────────────────────────

    #[test]
    fn coerce_int_from_string() {
        assert_eq!(CoerceType::Int.apply(json!("42")), json!(42));
        assert_eq!(CoerceType::Int.apply(json!("4.7")), json!(4));
        assert_eq!(CoerceType::Int.apply(json!("nope")), Value::Null);
    }

    #[test]
    fn coerce_bool_parses_literals() {
        assert_eq!(CoerceType::Bool.apply(json!("false")), json!(false));
        assert_eq!(CoerceType::Bool.apply(json!("TRUE")), json!(true));
        assert_eq!(CoerceType::Bool.apply(json!(0)), json!(false));
    }

    #[test]
    fn coerce_string_textualizes() {
        assert_eq!(CoerceType::String.apply(json!(1.5)), json!("1.5"));
        assert_eq!(CoerceType::String.apply(json!("x")), json!("x"));
    }

    #[test]
    fn truthiness_matches_emptiness() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(!is_truthy(&json!(0)));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!([1])));
    }
}
