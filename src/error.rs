//! Error taxonomy surfaced by every network-facing component.

use thiserror::Error;

/// Classified failure of an API interaction.
///
/// Cloneable so a single in-flight fetch or renewal can hand the same outcome
/// to every caller attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
  /// The request exceeded the dispatcher deadline
  #[error("Request timed out")]
  Timeout,

  /// Network unreachable, connection reset, etc. Already retried by the transport.
  #[error("Transport failure: {0}")]
  TransportFailure(String),

  /// 401, or the refresh credential itself was rejected
  #[error("Not authenticated")]
  Unauthenticated,

  /// 403
  #[error("Forbidden")]
  Forbidden,

  /// 404 on a single-entity operation
  #[error("Not found")]
  NotFound,

  /// 4xx carrying server-supplied messages, rendered verbatim by callers
  #[error("{message}")]
  Validation {
    status: u16,
    message: String,
    errors: Vec<String>,
  },

  /// 5xx
  #[error("Server error {status}: {message}")]
  ServerFault { status: u16, message: String },

  /// The response body did not match the expected shape
  #[error("Failed to decode response: {0}")]
  Decode(String),

  /// The resource family does not declare this operation
  #[error("{resource} does not support '{operation}'")]
  Unsupported {
    resource: &'static str,
    operation: String,
  },

  /// Durable session storage could not be written
  #[error("Session storage failure: {0}")]
  Storage(String),

  /// A shared in-flight task ended without producing a result
  #[error("Operation aborted")]
  Aborted,
}

impl ApiError {
  /// Whether a renewal failing with this error means the refresh credential was
  /// rejected (as opposed to the server being unreachable).
  pub fn is_credential_rejection(&self) -> bool {
    matches!(
      self,
      ApiError::Unauthenticated
        | ApiError::Forbidden
        | ApiError::NotFound
        | ApiError::Validation { .. }
    )
  }

  /// Whether callers should force a redirect to re-authentication.
  pub fn requires_login(&self) -> bool {
    matches!(self, ApiError::Unauthenticated)
  }
}

impl From<serde_json::Error> for ApiError {
  fn from(err: serde_json::Error) -> Self {
    ApiError::Decode(err.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_validation_displays_server_message_verbatim() {
    let err = ApiError::Validation {
      status: 422,
      message: "Email is already taken".to_string(),
      errors: vec!["email: duplicate".to_string()],
    };
    assert_eq!(err.to_string(), "Email is already taken");
  }

  #[test]
  fn test_credential_rejection_excludes_transport_problems() {
    assert!(ApiError::Unauthenticated.is_credential_rejection());
    assert!(ApiError::Validation {
      status: 400,
      message: String::new(),
      errors: vec![],
    }
    .is_credential_rejection());
    assert!(!ApiError::Timeout.is_credential_rejection());
    assert!(!ApiError::TransportFailure("refused".into()).is_credential_rejection());
    assert!(!ApiError::ServerFault {
      status: 502,
      message: String::new()
    }
    .is_credential_rejection());
  }
}
