//! Document loading: env substitution, YAML parsing, deep merge.

use super::{ConfigError, ConnectorConfig};
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::LazyLock;

static ENV_VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:,([^}]*))?\}").expect("valid env var regex")
});

/// Substitutes `${NAME}` and `${NAME, default}` from the environment.
///
/// # Errors
///
/// Returns [`ConfigError::MissingEnvVar`] listing every referenced
/// variable that is unset and has no default.
pub fn substitute_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut missing = Vec::new();
    let result = ENV_VAR_RE.replace_all(input, |captures: &regex::Captures<'_>| {
        let name = &captures[1];
        match std::env::var(name) {
            Ok(value) => value,
            Err(_) => match captures.get(2) {
                Some(default) => default.as_str().trim().to_string(),
                None => {
                    missing.push(name.to_string());
                    String::new()
                }
            },
        }
    });

    if missing.is_empty() {
        Ok(result.into_owned())
    } else {
        Err(ConfigError::MissingEnvVar(missing.join(", ")))
    }
}

/// Deep merge: mappings union key-wise with `overlay` winning,
/// everything else (sequences included) is replaced.
pub(crate) fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn yaml_to_json(yaml: serde_yaml::Value) -> Value {
    match yaml {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64().map(Value::from).unwrap_or(Value::Null)
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => {
            Value::Array(items.into_iter().map(yaml_to_json).collect())
        }
        serde_yaml::Value::Mapping(mapping) => {
            let mut map = serde_json::Map::new();
            for (key, value) in mapping {
                let key = match key {
                    serde_yaml::Value::String(s) => s,
                    serde_yaml::Value::Number(n) => n.to_string(),
                    serde_yaml::Value::Bool(b) => b.to_string(),
                    other => serde_yaml::to_string(&other)
                        .map(|s| s.trim().to_string())
                        .unwrap_or_default(),
                };
                map.insert(key, yaml_to_json(value));
            }
            Value::Object(map)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

fn parse_document(name: &str, text: &str) -> Result<Value, ConfigError> {
    let substituted = substitute_env_vars(text)?;
    let mut yaml: serde_yaml::Value =
        serde_yaml::from_str(&substituted).map_err(|e| ConfigError::Parse {
            path: name.to_string(),
            reason: e.to_string(),
        })?;
    // Resolve `<<:` merge keys (shared_config anchors rely on them).
    yaml.apply_merge().map_err(|e| ConfigError::Parse {
        path: name.to_string(),
        reason: e.to_string(),
    })?;
    Ok(yaml_to_json(yaml))
}

/// Parses and merges named configuration documents (for tests and
/// embedders).
///
/// # Errors
///
/// Propagates substitution, parse and model errors.
pub fn load_documents(documents: &[(&str, &str)]) -> Result<ConnectorConfig, ConfigError> {
    let mut merged = Value::Object(serde_json::Map::new());
    for (name, text) in documents {
        deep_merge(&mut merged, parse_document(name, text)?);
    }
    serde_json::from_value(merged).map_err(|e| ConfigError::Parse {
        path: "<merged>".to_string(),
        reason: e.to_string(),
    })
}

/// Reads, merges and deserializes configuration files in order.
///
/// # Errors
///
/// Propagates I/O, substitution, parse and model errors.
pub fn load_files<P: AsRef<Path>>(paths: &[P]) -> Result<ConnectorConfig, ConfigError> {
    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        documents.push((path.display().to_string(), text));
    }
    let borrowed: Vec<(&str, &str)> = documents
        .iter()
        .map(|(name, text)| (name.as_str(), text.as_str()))
        .collect();
    load_documents(&borrowed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn substitutes_set_variables() {
        std::env::set_var("BRAID_TEST_HOST", "broker.example.test");
        let result = substitute_env_vars("url: ${BRAID_TEST_HOST}").expect("substitute");
        assert_eq!(result, "url: broker.example.test");
        std::env::remove_var("BRAID_TEST_HOST");
    }

    #[test]
    fn falls_back_to_inline_default() {
        let result = substitute_env_vars("level: ${BRAID_TEST_UNSET, INFO}").expect("substitute");
        assert_eq!(result, "level: INFO");
    }

    #[test]
    fn reports_every_missing_variable() {
        let err = substitute_env_vars("${BRAID_MISS_A} ${BRAID_MISS_B}").expect_err("missing");
        let text = err.to_string();
        assert!(text.contains("BRAID_MISS_A"));
        assert!(text.contains("BRAID_MISS_B"));
    }

    #[test]
    fn deep_merge_unions_mappings_and_replaces_sequences() {
        let mut base = json!({
            "log": {"stdout_log_level": "INFO", "log_file": "a.log"},
            "apps": [{"name": "one"}],
        });
        deep_merge(
            &mut base,
            json!({
                "log": {"stdout_log_level": "DEBUG"},
                "apps": [{"name": "two"}],
            }),
        );
        assert_eq!(base["log"]["stdout_log_level"], "DEBUG");
        assert_eq!(base["log"]["log_file"], "a.log");
        assert_eq!(base["apps"], json!([{"name": "two"}]));
    }

    #[test]
    fn later_documents_override_earlier() {
        let config = load_documents(&[
            ("base", "log:\n  stdout_log_level: INFO\nflows: []\n"),
            ("override", "log:\n  stdout_log_level: ERROR\n"),
        ])
        .expect("load");
        assert_eq!(config.log.stdout_log_level, "ERROR");
    }

    #[test]
    fn yaml_anchors_resolve_at_parse_time() {
        let config = load_documents(&[(
            "doc",
            r"
shared_config:
  - broker_defaults: &broker_defaults
      broker_type: dev
apps:
  - name: a
    broker:
      <<: *broker_defaults
      input_enabled: true
      queue_name: q
    components: []
",
        )])
        .expect("load");
        let broker = config.apps[0].broker.as_ref().expect("broker");
        assert_eq!(broker.broker_type, "dev");
        assert!(broker.input_enabled);
    }

    #[test]
    fn invalid_yaml_is_a_parse_error() {
        assert!(load_documents(&[("bad", "this: [is: not: {{valid")]).is_err());
    }
}
