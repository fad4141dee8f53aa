//! Wire shapes of the API: the success wrapper every response carries, and the
//! request description handed to the transport.
//!
//! These types are separate from caller-facing types so the server's naming
//! never leaks past the resource client.

use reqwest::Method;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;

use crate::error::ApiError;

/// Decode an unwrapped `data` payload into the caller's type.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
  serde_json::from_value(value).map_err(ApiError::from)
}

// ============================================================================
// Response wrapper
// ============================================================================

/// `{success, data, message?, errors?}` wrapper around every response body.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope {
  /// Absent means the server did not flag a failure
  #[serde(default = "default_success")]
  pub success: bool,
  #[serde(default)]
  pub data: Value,
  #[serde(default)]
  pub message: Option<String>,
  #[serde(default)]
  pub errors: Option<Vec<String>>,
}

fn default_success() -> bool {
  true
}

impl ApiEnvelope {
  /// Best-effort human message: explicit message first, then the first field error.
  pub fn describe(&self, fallback: &str) -> String {
    self
      .message
      .clone()
      .filter(|m| !m.is_empty())
      .or_else(|| self.errors.as_ref().and_then(|e| e.first().cloned()))
      .unwrap_or_else(|| fallback.to_string())
  }
}

// ============================================================================
// Request description
// ============================================================================

/// One request as the dispatcher sees it: method, path relative to the API
/// base URL, optional JSON body and query pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
  pub method: Method,
  pub path: String,
  pub body: Option<Value>,
  pub query: Vec<(String, String)>,
}

impl ApiRequest {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      body: None,
      query: Vec::new(),
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::GET, path)
  }

  pub fn post(path: impl Into<String>) -> Self {
    Self::new(Method::POST, path)
  }

  pub fn put(path: impl Into<String>) -> Self {
    Self::new(Method::PUT, path)
  }

  pub fn delete(path: impl Into<String>) -> Self {
    Self::new(Method::DELETE, path)
  }

  pub fn with_body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
    self.query = query;
    self
  }
}
