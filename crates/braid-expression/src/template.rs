//! `{{encoding://expression}}` template rendering.

use crate::expr::{Expression, LocalContext};
use crate::ExpressionError;
use base64::Engine as _;
use braid_event::Message;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(.+?)://(.+?)\}\}").expect("valid placeholder regex"));

/// How a placeholder's evaluated value is rendered into the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateEncoding {
    /// Plain textualization (default). Absent values render empty.
    Text,
    /// JSON serialization.
    Json,
    /// YAML serialization.
    Yaml,
    /// Base64 of the textualization.
    Base64,
    /// `data:<mime>;base64,...` URI of the textualization.
    DataUri(String),
}

impl TemplateEncoding {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            "yaml" => Some(Self::Yaml),
            "base64" => Some(Self::Base64),
            other => other
                .strip_prefix("datauri:")
                .map(|mime| Self::DataUri(mime.to_string())),
        }
    }

    fn render(&self, value: &Value) -> String {
        match self {
            Self::Text => textualize(value),
            Self::Json => serde_json::to_string(value).unwrap_or_default(),
            Self::Yaml => serde_yaml::to_string(value)
                .map(|s| s.trim_end().to_string())
                .unwrap_or_default(),
            Self::Base64 => {
                base64::engine::general_purpose::STANDARD.encode(textualize(value))
            }
            Self::DataUri(mime) => format!(
                "data:{mime};base64,{}",
                base64::engine::general_purpose::STANDARD.encode(textualize(value))
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TemplatePart {
    Literal(String),
    Placeholder {
        encoding: TemplateEncoding,
        expr: Expression,
    },
}

/// A parsed template. Placeholders are substituted left-to-right; an
/// absent value renders as the empty string.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    parts: Vec<TemplatePart>,
}

impl Template {
    /// Parses template text, compiling every embedded expression.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError::InvalidExpression`] when a
    /// placeholder names an unknown encoding or carries a malformed
    /// inner expression.
    pub fn parse(text: &str) -> Result<Self, ExpressionError> {
        let mut parts = Vec::new();
        let mut last_end = 0;

        for captures in PLACEHOLDER_RE.captures_iter(text) {
            let whole = captures.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
            if whole.0 > last_end {
                parts.push(TemplatePart::Literal(text[last_end..whole.0].to_string()));
            }

            let encoding_str = &captures[1];
            let encoding = TemplateEncoding::parse(encoding_str).ok_or_else(|| {
                ExpressionError::invalid(
                    text,
                    format!("unknown template encoding '{encoding_str}'"),
                )
            })?;
            let expr = Expression::parse(&captures[2])?;
            parts.push(TemplatePart::Placeholder { encoding, expr });
            last_end = whole.1;
        }

        if last_end < text.len() {
            parts.push(TemplatePart::Literal(text[last_end..].to_string()));
        }

        Ok(Self { parts })
    }

    /// Renders the template against a message.
    #[must_use]
    pub fn render(&self, message: &Message, locals: Option<&LocalContext>) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                TemplatePart::Literal(text) => out.push_str(text),
                TemplatePart::Placeholder { encoding, expr } => {
                    out.push_str(&encoding.render(&expr.evaluate(message, locals)));
                }
            }
        }
        out
    }
}

/// Plain-text rendering of a value: strings verbatim, scalars via
/// display, null empty, containers as JSON.
#[must_use]
pub(crate) fn textualize(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_types::Payload;
    use serde_json::json;

    fn message() -> Message {
        Message::new(Payload::Structured(json!({"a": 1, "b": [2, 3]})))
            .with_topic("t/1")
    }

    #[test]
    fn identity_placeholder_textualizes() {
        let template = Template::parse("{{text://input.payload:a}}").expect("parse");
        assert_eq!(template.render(&message(), None), "1");
    }

    #[test]
    fn embedded_json_renders_whole_payload() {
        let template = Template::parse("X={{json://input.payload}}").expect("parse");
        assert_eq!(template.render(&message(), None), r#"X={"a":1,"b":[2,3]}"#);
    }

    #[test]
    fn absent_value_renders_empty() {
        let template = Template::parse("[{{text://previous:missing}}]").expect("parse");
        assert_eq!(template.render(&message(), None), "[]");
    }

    #[test]
    fn placeholders_substitute_left_to_right() {
        let template =
            Template::parse("{{text://input.topic}} then {{text://input.payload:a}}")
                .expect("parse");
        assert_eq!(template.render(&message(), None), "t/1 then 1");
    }

    #[test]
    fn base64_and_datauri_encode_textualization() {
        let template = Template::parse("{{base64://input.payload:a}}").expect("parse");
        assert_eq!(template.render(&message(), None), "MQ==");

        let template =
            Template::parse("{{datauri:text/plain://input.payload:a}}").expect("parse");
        assert_eq!(template.render(&message(), None), "data:text/plain;base64,MQ==");
    }

    #[test]
    fn unknown_encoding_is_rejected() {
        assert!(Template::parse("{{hex://input.payload}}").is_err());
    }

    #[test]
    fn text_without_placeholders_is_literal() {
        let template = Template::parse("no placeholders here").expect("parse");
        assert_eq!(template.render(&message(), None), "no placeholders here");
    }
}
