//! Raw network calls: one request, a fixed deadline, transport-level retry and
//! classification of the response into data or an [`ApiError`].

use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::envelope::{ApiEnvelope, ApiRequest};
use crate::config::ApiConfig;
use crate::error::ApiError;

/// HTTP transport with timeout and transport-failure retry.
///
/// Knows nothing about sessions: the caller passes the bearer token to attach.
#[derive(Clone)]
pub struct Transport {
  client: Client,
  base_url: Url,
  timeout: Duration,
  max_attempts: u32,
  base_backoff: Duration,
}

impl Transport {
  pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
    let base_url = Url::parse(&config.base_url)
      .map_err(|e| ApiError::TransportFailure(format!("invalid base URL: {}", e)))?;

    let client = Client::builder()
      .timeout(config.timeout())
      .build()
      .map_err(|e| ApiError::TransportFailure(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self {
      client,
      base_url,
      timeout: config.timeout(),
      max_attempts: config.max_attempts.max(1),
      base_backoff: config.retry_backoff(),
    })
  }

  /// Full URL for a path relative to the base URL.
  pub fn url_for(&self, path: &str) -> Result<Url, ApiError> {
    let joined = format!(
      "{}/{}",
      self.base_url.as_str().trim_end_matches('/'),
      path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| ApiError::TransportFailure(format!("invalid URL {}: {}", joined, e)))
  }

  /// Send the request and return the unwrapped `data` of the response envelope.
  ///
  /// Transport failures are retried up to the configured attempt count with no
  /// change to the request. Timeouts and every HTTP status are surfaced at once.
  pub async fn execute(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<Value, ApiError> {
    let url = self.url_for(&request.path)?;
    let mut attempt = 0;

    loop {
      attempt += 1;

      let mut builder = self
        .client
        .request(request.method.clone(), url.clone())
        .timeout(self.timeout);
      if let Some(token) = bearer {
        builder = builder.bearer_auth(token);
      }
      if !request.query.is_empty() {
        builder = builder.query(&request.query);
      }
      if let Some(body) = &request.body {
        builder = builder.json(body);
      }

      debug!(attempt, method = %request.method, %url, "sending HTTP request");

      match builder.send().await {
        Ok(response) => {
          debug!(attempt, method = %request.method, %url, status = %response.status(), "received HTTP response");
          return classify(response).await;
        }
        Err(err) if err.is_timeout() => {
          warn!(method = %request.method, %url, "HTTP request timed out");
          return Err(ApiError::Timeout);
        }
        Err(err) => {
          debug!(attempt, method = %request.method, %url, error = %err, "HTTP request failed");

          if attempt >= self.max_attempts {
            warn!(attempts = attempt, %url, error = %err, "giving up after transport failures");
            return Err(ApiError::TransportFailure(err.to_string()));
          }
          self.sleep_with_backoff(attempt).await;
        }
      }
    }
  }

  fn backoff_delay(&self, retry_number: u32) -> Duration {
    let shift = retry_number.saturating_sub(1).min(8);
    self.base_backoff.saturating_mul(1u32 << shift)
  }

  async fn sleep_with_backoff(&self, retry_number: u32) {
    let delay = self.backoff_delay(retry_number);
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }
  }
}

/// Turn a response into the envelope's `data` or a classified error.
async fn classify(response: Response) -> Result<Value, ApiError> {
  let status = response.status();
  let bytes = response.bytes().await.map_err(|e| {
    if e.is_timeout() {
      ApiError::Timeout
    } else {
      ApiError::TransportFailure(e.to_string())
    }
  })?;

  // Error bodies are often not wrapped; missing envelope is fine there
  let envelope: Option<ApiEnvelope> = if bytes.is_empty() {
    None
  } else {
    serde_json::from_slice(&bytes).ok()
  };

  if status.is_success() {
    if bytes.is_empty() {
      return Ok(Value::Null);
    }
    let envelope = envelope.ok_or_else(|| {
      ApiError::Decode(format!(
        "response is not a JSON envelope: {}",
        String::from_utf8_lossy(&bytes[..bytes.len().min(120)])
      ))
    })?;

    if !envelope.success {
      return Err(ApiError::Validation {
        status: status.as_u16(),
        message: envelope.describe("Request was rejected"),
        errors: envelope.errors.unwrap_or_default(),
      });
    }
    return Ok(envelope.data);
  }

  let fallback = status.canonical_reason().unwrap_or("Request failed");
  let message = envelope
    .as_ref()
    .map(|e| e.describe(fallback))
    .unwrap_or_else(|| fallback.to_string());

  Err(match status {
    StatusCode::UNAUTHORIZED => ApiError::Unauthenticated,
    StatusCode::FORBIDDEN => ApiError::Forbidden,
    StatusCode::NOT_FOUND => ApiError::NotFound,
    s if s.is_client_error() => ApiError::Validation {
      status: s.as_u16(),
      message,
      errors: envelope.and_then(|e| e.errors).unwrap_or_default(),
    },
    s => ApiError::ServerFault {
      status: s.as_u16(),
      message,
    },
  })
}
