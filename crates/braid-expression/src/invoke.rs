//! Named native functions callable from `invoke` configuration blocks.
//!
//! The configuration language resolves `invoke` blocks against a
//! registry of `module.function` entries instead of importing code by
//! path. The builtin modules cover the small amount of computation
//! integration configs actually need; embedders register their own
//! functions for anything else.

use crate::ExpressionError;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// A native function callable from configuration: positional and
/// keyword arguments in, value out.
pub type InvokeFn =
    dyn Fn(&[Value], &Map<String, Value>) -> Result<Value, ExpressionError> + Send + Sync;

/// Registry of invoke targets, keyed `module.function`.
///
/// # Builtin Modules
///
/// | Target | Behavior |
/// |--------|----------|
/// | `env.get(name, default?)` | environment variable, default or null |
/// | `string.concat(...)` | concatenation of textualized arguments |
/// | `string.upper(s)` / `string.lower(s)` | case conversion |
/// | `string.split(s, separator)` | list of parts |
/// | `math.add/subtract/multiply/divide(a, b)` | arithmetic |
/// | `json.parse(s)` | parse a JSON string |
/// | `json.stringify(v)` | serialize to a JSON string |
#[derive(Clone)]
pub struct InvokeRegistry {
    functions: HashMap<String, Arc<InvokeFn>>,
}

impl InvokeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Creates a registry with the builtin modules registered.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("env", "get", Arc::new(env_get));
        registry.register("string", "concat", Arc::new(string_concat));
        registry.register("string", "upper", Arc::new(string_upper));
        registry.register("string", "lower", Arc::new(string_lower));
        registry.register("string", "split", Arc::new(string_split));
        registry.register("math", "add", Arc::new(|p, k| arith("math.add", p, k, |a, b| Ok(a + b))));
        registry.register("math", "subtract", Arc::new(|p, k| arith("math.subtract", p, k, |a, b| Ok(a - b))));
        registry.register("math", "multiply", Arc::new(|p, k| arith("math.multiply", p, k, |a, b| Ok(a * b))));
        registry.register("math", "divide", Arc::new(|p, k| {
            arith("math.divide", p, k, |a, b| {
                if b == 0.0 {
                    Err("division by zero".to_string())
                } else {
                    Ok(a / b)
                }
            })
        }));
        registry.register("json", "parse", Arc::new(json_parse));
        registry.register("json", "stringify", Arc::new(json_stringify));
        registry
    }

    /// Registers (or replaces) a function under `module.function`.
    pub fn register(&mut self, module: &str, function: &str, f: Arc<InvokeFn>) {
        self.functions.insert(format!("{module}.{function}"), f);
    }

    /// Looks up an invoke target.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError::UnknownInvokeTarget`] when no such
    /// function is registered.
    pub fn get(&self, module: &str, function: &str) -> Result<Arc<InvokeFn>, ExpressionError> {
        let key = format!("{module}.{function}");
        self.functions
            .get(&key)
            .cloned()
            .ok_or(ExpressionError::UnknownInvokeTarget(key))
    }
}

impl Default for InvokeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn arg<'a>(
    positional: &'a [Value],
    keyword: &'a Map<String, Value>,
    index: usize,
    name: &str,
) -> Option<&'a Value> {
    positional.get(index).or_else(|| keyword.get(name))
}

fn required<'a>(
    target: &str,
    positional: &'a [Value],
    keyword: &'a Map<String, Value>,
    index: usize,
    name: &str,
) -> Result<&'a Value, ExpressionError> {
    arg(positional, keyword, index, name).ok_or_else(|| ExpressionError::InvokeFailed {
        target: target.to_string(),
        reason: format!("missing argument '{name}'"),
    })
}

fn text(value: &Value) -> String {
    crate::template::textualize(value)
}

fn env_get(positional: &[Value], keyword: &Map<String, Value>) -> Result<Value, ExpressionError> {
    let name = required("env.get", positional, keyword, 0, "name")?;
    match std::env::var(text(name)) {
        Ok(value) => Ok(Value::String(value)),
        Err(_) => Ok(arg(positional, keyword, 1, "default")
            .cloned()
            .unwrap_or(Value::Null)),
    }
}

fn string_concat(
    positional: &[Value],
    _keyword: &Map<String, Value>,
) -> Result<Value, ExpressionError> {
    Ok(Value::String(
        positional.iter().map(text).collect::<Vec<_>>().concat(),
    ))
}

fn string_upper(
    positional: &[Value],
    keyword: &Map<String, Value>,
) -> Result<Value, ExpressionError> {
    let value = required("string.upper", positional, keyword, 0, "value")?;
    Ok(Value::String(text(value).to_uppercase()))
}

fn string_lower(
    positional: &[Value],
    keyword: &Map<String, Value>,
) -> Result<Value, ExpressionError> {
    let value = required("string.lower", positional, keyword, 0, "value")?;
    Ok(Value::String(text(value).to_lowercase()))
}

fn string_split(
    positional: &[Value],
    keyword: &Map<String, Value>,
) -> Result<Value, ExpressionError> {
    let value = required("string.split", positional, keyword, 0, "value")?;
    let separator = required("string.split", positional, keyword, 1, "separator")?;
    Ok(Value::Array(
        text(value)
            .split(text(separator).as_str())
            .map(|part| Value::String(part.to_string()))
            .collect(),
    ))
}

fn arith(
    target: &str,
    positional: &[Value],
    keyword: &Map<String, Value>,
    op: impl Fn(f64, f64) -> Result<f64, String>,
) -> Result<Value, ExpressionError> {
    let to_number = |value: &Value| -> Result<f64, ExpressionError> {
        match value {
            Value::Number(n) => n.as_f64().ok_or(()),
            Value::String(s) => s.trim().parse::<f64>().map_err(|_| ()),
            _ => Err(()),
        }
        .map_err(|()| ExpressionError::InvokeFailed {
            target: target.to_string(),
            reason: format!("not a number: {value}"),
        })
    };

    let a = to_number(required(target, positional, keyword, 0, "a")?)?;
    let b = to_number(required(target, positional, keyword, 1, "b")?)?;
    let result = op(a, b).map_err(|reason| ExpressionError::InvokeFailed {
        target: target.to_string(),
        reason,
    })?;

    // Integer inputs with an integral result stay integers.
    if result.fract() == 0.0 && result.abs() < i64::MAX as f64 {
        Ok(Value::from(result as i64))
    } else {
        Ok(Value::from(result))
    }
}

fn json_parse(
    positional: &[Value],
    keyword: &Map<String, Value>,
) -> Result<Value, ExpressionError> {
    let value = required("json.parse", positional, keyword, 0, "value")?;
    serde_json::from_str(&text(value)).map_err(|e| ExpressionError::InvokeFailed {
        target: "json.parse".to_string(),
        reason: e.to_string(),
    })
}

fn json_stringify(
    positional: &[Value],
    keyword: &Map<String, Value>,
) -> Result<Value, ExpressionError> {
    let value = required("json.stringify", positional, keyword, 0, "value")?;
    serde_json::to_string(value)
        .map(Value::String)
        .map_err(|e| ExpressionError::InvokeFailed {
            target: "json.stringify".to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(registry: &InvokeRegistry, target: &str, positional: Vec<Value>) -> Value {
        let (module, function) = target.split_once('.').expect("module.function");
        let f = registry.get(module, function).expect("registered");
        f(&positional, &Map::new()).expect("invoke ok")
    }

    #[test]
    fn concat_textualizes_arguments() {
        let registry = InvokeRegistry::with_builtins();
        assert_eq!(
            call(&registry, "string.concat", vec![json!("n="), json!(4)]),
            json!("n=4")
        );
    }

    #[test]
    fn arithmetic_keeps_integers_integral() {
        let registry = InvokeRegistry::with_builtins();
        assert_eq!(call(&registry, "math.add", vec![json!(2), json!(3)]), json!(5));
        assert_eq!(
            call(&registry, "math.divide", vec![json!(5), json!(2)]),
            json!(2.5)
        );
    }

    #[test]
    fn divide_by_zero_fails() {
        let registry = InvokeRegistry::with_builtins();
        let f = registry.get("math", "divide").expect("registered");
        assert!(f(&[json!(1), json!(0)], &Map::new()).is_err());
    }

    #[test]
    fn env_get_falls_back_to_default() {
        let registry = InvokeRegistry::with_builtins();
        assert_eq!(
            call(
                &registry,
                "env.get",
                vec![json!("BRAID_TEST_UNSET_VAR"), json!("fallback")]
            ),
            json!("fallback")
        );
    }

    #[test]
    fn unknown_target_is_an_error() {
        let registry = InvokeRegistry::with_builtins();
        assert!(registry.get("nope", "missing").is_err());
    }

    #[test]
    fn json_round_trip() {
        let registry = InvokeRegistry::with_builtins();
        assert_eq!(
            call(&registry, "json.parse", vec![json!("{\"a\":1}")]),
            json!({"a": 1})
        );
    }
}
