//! Payload encoding and format conversions for broker stages.

use base64::Engine as _;
use braid_types::Payload;
use serde_json::Value;
use thiserror::Error;

/// Byte-level encoding of a broker payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadEncoding {
    /// Payload bytes are UTF-8 text.
    Utf8,
    /// Payload bytes are base64-encoded content.
    Base64,
    /// Raw bytes, no re-encoding.
    None,
}

impl PayloadEncoding {
    /// Parses the configuration spelling.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "utf-8" | "utf8" => Some(Self::Utf8),
            "base64" => Some(Self::Base64),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

/// Structural format of a broker payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// Plain text.
    Text,
    /// JSON document.
    Json,
    /// YAML document.
    Yaml,
}

impl PayloadFormat {
    /// Parses the configuration spelling.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            "yaml" => Some(Self::Yaml),
            _ => None,
        }
    }
}

/// Codec failures; broker inputs nack on these.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Inbound bytes do not match the configured encoding/format.
    #[error("decode failed: {0}")]
    Decode(String),

    /// A value cannot be serialized with the configured format.
    #[error("encode failed: {0}")]
    Encode(String),
}

/// Decodes wire bytes into a payload per the configured encoding and
/// format.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for invalid base64, non-UTF-8 text,
/// or malformed JSON/YAML.
pub fn decode_payload(
    bytes: &[u8],
    encoding: PayloadEncoding,
    format: PayloadFormat,
) -> Result<Payload, CodecError> {
    let decoded: Vec<u8> = match encoding {
        PayloadEncoding::Utf8 | PayloadEncoding::None => bytes.to_vec(),
        PayloadEncoding::Base64 => base64::engine::general_purpose::STANDARD
            .decode(bytes.iter().filter(|b| !b.is_ascii_whitespace()).copied().collect::<Vec<u8>>())
            .map_err(|e| CodecError::Decode(format!("invalid base64: {e}")))?,
    };

    match format {
        PayloadFormat::Text => match String::from_utf8(decoded) {
            Ok(text) => Ok(Payload::Text(text)),
            // Raw binary stays binary under the text format.
            Err(error) => Ok(Payload::Bytes(error.into_bytes())),
        },
        PayloadFormat::Json => {
            let value: Value = serde_json::from_slice(&decoded)
                .map_err(|e| CodecError::Decode(format!("invalid json: {e}")))?;
            Ok(Payload::Structured(value))
        }
        PayloadFormat::Yaml => {
            let value: Value = serde_yaml::from_slice(&decoded)
                .map_err(|e| CodecError::Decode(format!("invalid yaml: {e}")))?;
            Ok(Payload::Structured(value))
        }
    }
}

/// Encodes an outbound payload value into wire bytes.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] when serialization fails.
pub fn encode_payload(
    value: &Value,
    encoding: PayloadEncoding,
    format: PayloadFormat,
) -> Result<Vec<u8>, CodecError> {
    let formatted: Vec<u8> = match format {
        PayloadFormat::Text => match value {
            Value::String(text) => text.clone().into_bytes(),
            other => serde_json::to_vec(other)
                .map_err(|e| CodecError::Encode(e.to_string()))?,
        },
        PayloadFormat::Json => {
            serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))?
        }
        PayloadFormat::Yaml => serde_yaml::to_string(value)
            .map_err(|e| CodecError::Encode(e.to_string()))?
            .into_bytes(),
    };

    Ok(match encoding {
        PayloadEncoding::Utf8 | PayloadEncoding::None => formatted,
        PayloadEncoding::Base64 => base64::engine::general_purpose::STANDARD
            .encode(formatted)
            .into_bytes(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn utf8_json_decodes_to_structured() {
        let payload =
            decode_payload(br#"{"a": 1}"#, PayloadEncoding::Utf8, PayloadFormat::Json)
                .expect("decode");
        assert_eq!(payload, Payload::Structured(json!({"a": 1})));
    }

    #[test]
    fn invalid_json_is_a_decode_error() {
        assert!(decode_payload(b"{broken", PayloadEncoding::Utf8, PayloadFormat::Json).is_err());
    }

    #[test]
    fn base64_text_round_trips() {
        let bytes =
            encode_payload(&json!("hello"), PayloadEncoding::Base64, PayloadFormat::Text)
                .expect("encode");
        assert_eq!(bytes, b"aGVsbG8=");

        let payload = decode_payload(&bytes, PayloadEncoding::Base64, PayloadFormat::Text)
            .expect("decode");
        assert_eq!(payload, Payload::Text("hello".to_string()));
    }

    #[test]
    fn yaml_format_parses_documents() {
        let payload =
            decode_payload(b"a: 1\nb:\n  - x\n", PayloadEncoding::Utf8, PayloadFormat::Yaml)
                .expect("decode");
        assert_eq!(payload, Payload::Structured(json!({"a": 1, "b": ["x"]})));
    }

    #[test]
    fn binary_under_text_format_stays_bytes() {
        let payload = decode_payload(&[0xff, 0xfe], PayloadEncoding::None, PayloadFormat::Text)
            .expect("decode");
        assert!(matches!(payload, Payload::Bytes(_)));
    }

    #[test]
    fn unknown_spellings_are_rejected() {
        assert!(PayloadEncoding::parse("utf-16").is_none());
        assert!(PayloadFormat::parse("xml").is_none());
    }
}
