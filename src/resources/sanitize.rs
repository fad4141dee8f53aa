//! Payload sanitation for create and update.
//!
//! The server treats an absent field as "do not set", while an explicit empty
//! string (notably for identifier fields) fails validation. Every outbound
//! write payload drops empty-string and null fields, recursively, so a payload
//! with blank optional fields is byte-identical to one that omits them.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ApiError;

/// Serialize `payload` and strip blank fields.
pub fn sanitize_payload<P: Serialize + ?Sized>(payload: &P) -> Result<Value, ApiError> {
  Ok(sanitize(serde_json::to_value(payload)?))
}

/// Strip blank fields from an already-built JSON value.
pub fn sanitize(value: Value) -> Value {
  match value {
    Value::Object(fields) => Value::Object(sanitize_object(fields)),
    Value::Array(items) => Value::Array(items.into_iter().map(sanitize).collect()),
    other => other,
  }
}

fn sanitize_object(fields: Map<String, Value>) -> Map<String, Value> {
  fields
    .into_iter()
    .filter(|(_, v)| !is_blank(v))
    .map(|(k, v)| (k, sanitize(v)))
    .collect()
}

fn is_blank(value: &Value) -> bool {
  match value {
    Value::Null => true,
    Value::String(s) => s.is_empty(),
    _ => false,
  }
}
