use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Profile of the signed-in user as returned by the auth endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
  pub id: String,
  #[serde(default)]
  pub email: String,
  #[serde(default)]
  pub first_name: Option<String>,
  #[serde(default)]
  pub last_name: Option<String>,
  #[serde(default)]
  pub tenant_id: Option<String>,
  #[serde(default)]
  pub roles: Vec<String>,
}

/// Credential tuple returned by login, registration and renewal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
  pub access_token: String,
  pub refresh_token: String,
  /// Lifetime of the access token in seconds, relative to receipt
  pub expires_in: i64,
  #[serde(default)]
  pub tenant_id: Option<String>,
  #[serde(default)]
  pub user: Option<UserProfile>,
}

/// The authenticated session.
///
/// Fields are private: a session can only be built whole, with an expiry in the
/// future, so the store never holds an access token without a valid expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
  access_token: String,
  refresh_token: String,
  expires_at: DateTime<Utc>,
  tenant_id: Option<String>,
  current_user: Option<UserProfile>,
}

impl Session {
  pub fn new(
    access_token: impl Into<String>,
    refresh_token: impl Into<String>,
    expires_at: DateTime<Utc>,
    tenant_id: Option<String>,
    current_user: Option<UserProfile>,
  ) -> Self {
    Self {
      access_token: access_token.into(),
      refresh_token: refresh_token.into(),
      expires_at,
      tenant_id,
      current_user,
    }
  }

  /// Build a session from an auth response received at `now`.
  ///
  /// `expires_at = now + expires_in`. A non-positive lifetime or an empty access
  /// token is rejected as a malformed response.
  pub fn from_tokens(tokens: AuthTokens, now: DateTime<Utc>) -> Result<Self, ApiError> {
    if tokens.access_token.is_empty() {
      return Err(ApiError::Decode("auth response has an empty accessToken".into()));
    }
    if tokens.expires_in <= 0 {
      return Err(ApiError::Decode(format!(
        "auth response has a non-positive expiresIn ({})",
        tokens.expires_in
      )));
    }

    let expires_at = Duration::try_seconds(tokens.expires_in)
      .and_then(|lifetime| now.checked_add_signed(lifetime))
      .ok_or_else(|| {
        ApiError::Decode(format!(
          "auth response has an out-of-range expiresIn ({})",
          tokens.expires_in
        ))
      })?;

    let tenant_id = tokens
      .tenant_id
      .or_else(|| tokens.user.as_ref().and_then(|u| u.tenant_id.clone()));

    Ok(Self {
      access_token: tokens.access_token,
      refresh_token: tokens.refresh_token,
      expires_at,
      tenant_id,
      current_user: tokens.user,
    })
  }

  pub fn access_token(&self) -> &str {
    &self.access_token
  }

  pub fn refresh_token(&self) -> &str {
    &self.refresh_token
  }

  pub fn expires_at(&self) -> DateTime<Utc> {
    self.expires_at
  }

  pub fn tenant_id(&self) -> Option<&str> {
    self.tenant_id.as_deref()
  }

  pub fn current_user(&self) -> Option<&UserProfile> {
    self.current_user.as_ref()
  }

  /// Same credentials with a different profile attached.
  pub fn with_user(mut self, user: Option<UserProfile>) -> Self {
    self.current_user = user;
    self
  }

  /// Whether the access token expires within `buffer` of `now` (or already has).
  pub fn is_expiring(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
    self
      .expires_at
      .checked_sub_signed(buffer)
      .map_or(true, |renew_at| renew_at <= now)
  }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self.expires_at <= now
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tokens(expires_in: i64) -> AuthTokens {
    AuthTokens {
      access_token: "access".into(),
      refresh_token: "refresh".into(),
      expires_in,
      tenant_id: None,
      user: Some(UserProfile {
        id: "u1".into(),
        email: "ada@example.com".into(),
        first_name: Some("Ada".into()),
        last_name: None,
        tenant_id: Some("t1".into()),
        roles: vec!["admin".into()],
      }),
    }
  }

  #[test]
  fn test_expiry_is_now_plus_expires_in() {
    let now = Utc::now();
    let session = Session::from_tokens(tokens(3600), now).unwrap();
    assert_eq!(session.expires_at(), now + Duration::seconds(3600));
  }

  #[test]
  fn test_tenant_falls_back_to_user_tenant() {
    let session = Session::from_tokens(tokens(60), Utc::now()).unwrap();
    assert_eq!(session.tenant_id(), Some("t1"));
  }

  #[test]
  fn test_non_positive_lifetime_rejected() {
    assert!(matches!(
      Session::from_tokens(tokens(0), Utc::now()),
      Err(ApiError::Decode(_))
    ));
  }

  #[test]
  fn test_out_of_range_lifetime_rejected() {
    for expires_in in [i64::MAX, i64::MAX / 1000, 10_000_000_000_000] {
      assert!(matches!(
        Session::from_tokens(tokens(expires_in), Utc::now()),
        Err(ApiError::Decode(_))
      ));
    }
  }

  #[test]
  fn test_expiring_within_buffer() {
    let now = Utc::now();
    let session = Session::new("a", "r", now + Duration::minutes(4), None, None);
    assert!(session.is_expiring(now, Duration::minutes(5)));
    assert!(!session.is_expiring(now, Duration::minutes(3)));
    assert!(!session.is_expired(now));
  }

  #[test]
  fn test_auth_tokens_wire_names() {
    let json = serde_json::json!({
      "accessToken": "a",
      "refreshToken": "r",
      "expiresIn": 900,
      "tenantId": "acme"
    });
    let tokens: AuthTokens = serde_json::from_value(json).unwrap();
    assert_eq!(tokens.expires_in, 900);
    assert_eq!(tokens.tenant_id.as_deref(), Some("acme"));
    assert!(tokens.user.is_none());
  }
}
