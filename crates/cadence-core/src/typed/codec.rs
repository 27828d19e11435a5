//! PayloadCodec - the versioned storage format of a task body.
//!
//! A body is a JSON object `{ "schema": 1, "policy": .., "payload": ..,
//! "description": .. }`. Decoding checks the schema version before anything
//! else, so an unreadable body is a typed [`CodecError`] rather than a
//! guess.

use crate::domain::ExecutionPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SCHEMA_VERSION: u64 = 1;

/// The encoded part of a task. Everything else is stored in columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskBody {
    pub policy: ExecutionPolicy,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("body is not valid JSON: {0}")]
    Syntax(#[source] serde_json::Error),
    #[error("body has no schema version")]
    MissingSchema,
    #[error("unsupported schema version {0}")]
    UnsupportedSchema(u64),
    #[error("body does not match schema {SCHEMA_VERSION}: {0}")]
    Shape(#[source] serde_json::Error),
    #[error("body cannot be encoded: {0}")]
    Encode(#[source] serde_json::Error),
}

pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode(body: &TaskBody) -> Result<String, CodecError> {
        let mut value = serde_json::to_value(body).map_err(CodecError::Encode)?;
        if let Value::Object(map) = &mut value {
            map.insert("schema".to_string(), Value::from(SCHEMA_VERSION));
        }
        Ok(value.to_string())
    }

    pub fn decode(raw: &str) -> Result<TaskBody, CodecError> {
        let value: Value = serde_json::from_str(raw).map_err(CodecError::Syntax)?;
        let schema = value
            .get("schema")
            .and_then(Value::as_u64)
            .ok_or(CodecError::MissingSchema)?;
        if schema != SCHEMA_VERSION {
            return Err(CodecError::UnsupportedSchema(schema));
        }
        serde_json::from_value(value).map_err(CodecError::Shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use serde_json::json;

    fn body() -> TaskBody {
        TaskBody {
            policy: ExecutionPolicy::every(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(), 60),
            payload: json!({ "label": "nightly" }),
            description: "rebuild the index".into(),
        }
    }

    #[test]
    fn encoded_bodies_carry_the_schema_version() {
        let raw = PayloadCodec::encode(&body()).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["schema"], 1);
        assert_eq!(PayloadCodec::decode(&raw).unwrap(), body());
    }

    #[rstest]
    #[case::not_json("O:8:\"stdClass\":0:{}")]
    #[case::no_schema(r#"{"policy":{"type":"single","run_at":"2026-01-01T00:00:00Z"}}"#)]
    #[case::future_schema(r#"{"schema":2,"policy":{"type":"single","run_at":"2026-01-01T00:00:00Z"}}"#)]
    #[case::unknown_policy(r#"{"schema":1,"policy":{"type":"hourly"}}"#)]
    #[case::bad_cron(r#"{"schema":1,"policy":{"type":"recurring","start":"2026-01-01T00:00:00Z","frequency":{"kind":"cron","expression":"99 * * * *"}}}"#)]
    fn unreadable_bodies_are_rejected(#[case] raw: &str) {
        assert!(PayloadCodec::decode(raw).is_err());
    }

    #[test]
    fn missing_optional_fields_take_defaults() {
        let raw = r#"{"schema":1,"policy":{"type":"single","run_at":"2026-01-01T00:00:00Z"}}"#;
        let body = PayloadCodec::decode(raw).unwrap();
        assert_eq!(body.payload, Value::Null);
        assert!(body.description.is_empty());
    }
}
