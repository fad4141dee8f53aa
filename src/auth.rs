//! Login, registration, logout and the current-profile endpoint.
//!
//! Every session write made here goes through the refresh coordinator, so it
//! is ordered against a renewal in flight.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::cache::QueryCache;
use crate::config::AuthConfig;
use crate::error::ApiError;
use crate::http::envelope::decode;
use crate::http::{ApiRequest, Dispatcher};
use crate::resources::sanitize::sanitize_payload;
use crate::session::{AuthTokens, RefreshCoordinator, Session, SessionStore, UserProfile};

/// Registration of a new user together with their tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
  pub email: String,
  pub password: String,
  #[serde(default)]
  pub first_name: Option<String>,
  #[serde(default)]
  pub last_name: Option<String>,
  pub tenant_name: String,
  pub company_name: String,
}

#[derive(Clone)]
pub struct AuthClient {
  dispatcher: Dispatcher,
  store: SessionStore,
  refresh: RefreshCoordinator,
  cache: QueryCache,
  config: AuthConfig,
}

impl AuthClient {
  pub fn new(
    dispatcher: Dispatcher,
    store: SessionStore,
    refresh: RefreshCoordinator,
    cache: QueryCache,
    config: AuthConfig,
  ) -> Self {
    Self {
      dispatcher,
      store,
      refresh,
      cache,
      config,
    }
  }

  /// Sign in and install the returned session.
  pub async fn login(&self, email: &str, password: &str) -> Result<Session, ApiError> {
    let request = ApiRequest::post(self.config.login_path.as_str())
      .with_body(json!({ "email": email, "password": password }));
    let session = self.authenticate(&request).await?;
    info!(tenant = session.tenant_id().unwrap_or("-"), "logged in");
    Ok(session)
  }

  /// Create a user and tenant, then install the returned session.
  pub async fn register(&self, registration: &Registration) -> Result<Session, ApiError> {
    let request = ApiRequest::post(self.config.register_path.as_str())
      .with_body(sanitize_payload(registration)?);
    let session = self.authenticate(&request).await?;
    info!(tenant = session.tenant_id().unwrap_or("-"), "registered");
    Ok(session)
  }

  /// End the session.
  ///
  /// The server is told on a best-effort basis; the local session and every
  /// cached read are dropped regardless of its answer.
  pub async fn logout(&self) -> Result<(), ApiError> {
    if let Some(session) = self.store.read() {
      let request = ApiRequest::post(self.config.logout_path.as_str())
        .with_body(json!({ "refreshToken": session.refresh_token() }));
      if let Err(e) = self
        .dispatcher
        .transport()
        .execute(&request, Some(session.access_token()))
        .await
      {
        warn!(error = %e, "server-side logout failed; clearing local session anyway");
      }
    }

    self.cache.clear();
    self.refresh.end_session()?;
    info!("logged out");
    Ok(())
  }

  /// Fetch the signed-in user's profile and attach it to the session.
  ///
  /// The profile is not persisted, so this is how it is recovered after a restart.
  pub async fn current_user(&self) -> Result<UserProfile, ApiError> {
    let request = ApiRequest::get(self.config.profile_path.as_str());
    let profile: UserProfile = decode(self.dispatcher.send(&request).await?)?;

    self.refresh.attach_profile(profile.clone())?;
    Ok(profile)
  }

  async fn authenticate(&self, request: &ApiRequest) -> Result<Session, ApiError> {
    let data = self.dispatcher.transport().execute(request, None).await?;
    let tokens: AuthTokens = decode(data)?;
    let session = Session::from_tokens(tokens, Utc::now())?;

    // Data cached for a previous user must not leak into this session
    self.cache.clear();
    self.refresh.install(session.clone())?;
    Ok(session)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::ApiConfig;
  use crate::http::Transport;
  use crate::session::{CredentialState, MemorySessionStorage};
  use wiremock::matchers::{body_json, header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn auth(server: &MockServer) -> (AuthClient, SessionStore, RefreshCoordinator) {
    let config = AuthConfig::default();
    let store = SessionStore::open(MemorySessionStorage::default());
    let transport = Transport::new(&ApiConfig {
      base_url: server.uri(),
      timeout_secs: 5,
      max_attempts: 1,
      retry_backoff_ms: 0,
    })
    .unwrap();
    let refresh = RefreshCoordinator::new(
      store.clone(),
      transport.clone(),
      config.refresh_path.as_str(),
      config.refresh_buffer(),
    );
    let dispatcher = Dispatcher::new(transport, store.clone(), refresh.clone());
    let client = AuthClient::new(
      dispatcher,
      store.clone(),
      refresh.clone(),
      QueryCache::new(),
      config,
    );
    (client, store, refresh)
  }

  fn tokens(access: &str, expires_in: i64) -> serde_json::Value {
    json!({
      "success": true,
      "data": {
        "accessToken": access,
        "refreshToken": "refresh-1",
        "expiresIn": expires_in,
        "tenantId": "tenant-9",
        "user": { "id": "u-1", "email": "ada@example.com", "roles": ["Admin"] }
      }
    })
  }

  #[tokio::test]
  async fn test_login_installs_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/auth/login"))
      .and(body_json(json!({ "email": "ada@example.com", "password": "pw" })))
      .respond_with(ResponseTemplate::new(200).set_body_json(tokens("access-1", 3600)))
      .expect(1)
      .mount(&server)
      .await;

    let (auth, store, refresh) = auth(&server);
    let before = Utc::now();
    auth.login("ada@example.com", "pw").await.unwrap();
    let after = Utc::now();

    let session = store.read().unwrap();
    assert_eq!(session.access_token(), "access-1");
    assert_eq!(session.tenant_id(), Some("tenant-9"));
    assert_eq!(session.current_user().unwrap().email, "ada@example.com");
    assert!(session.expires_at() >= before + chrono::Duration::seconds(3600));
    assert!(session.expires_at() <= after + chrono::Duration::seconds(3600));
    assert_eq!(refresh.state(), CredentialState::Valid);
  }

  #[tokio::test]
  async fn test_bad_credentials_leave_store_empty() {
    let server = MockServer::start().await;
    Mock::given(path("/auth/login"))
      .respond_with(ResponseTemplate::new(401))
      .mount(&server)
      .await;

    let (auth, store, _) = auth(&server);
    assert_eq!(
      auth.login("ada@example.com", "wrong").await.unwrap_err(),
      ApiError::Unauthenticated
    );
    assert!(store.read().is_none());
  }

  #[tokio::test]
  async fn test_register_sends_tenant_and_company() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/auth/register"))
      .and(body_json(json!({
        "email": "ada@example.com",
        "password": "pw",
        "tenantName": "acme",
        "companyName": "Acme Ltd"
      })))
      .respond_with(ResponseTemplate::new(200).set_body_json(tokens("access-2", 3600)))
      .expect(1)
      .mount(&server)
      .await;

    let (auth, store, _) = auth(&server);
    let registration = Registration {
      email: "ada@example.com".into(),
      password: "pw".into(),
      first_name: Some(String::new()),
      tenant_name: "acme".into(),
      company_name: "Acme Ltd".into(),
      ..Default::default()
    };
    auth.register(&registration).await.unwrap();
    assert_eq!(store.read().unwrap().access_token(), "access-2");
  }

  #[tokio::test]
  async fn test_login_resets_failed_state() {
    let server = MockServer::start().await;
    Mock::given(path("/auth/login"))
      .respond_with(ResponseTemplate::new(200).set_body_json(tokens("access-1", 3600)))
      .mount(&server)
      .await;

    let (auth, _, refresh) = auth(&server);
    refresh.fail();
    assert_eq!(refresh.state(), CredentialState::Failed);

    auth.login("ada@example.com", "pw").await.unwrap();
    assert_eq!(refresh.state(), CredentialState::Valid);
  }

  #[tokio::test]
  async fn test_logout_clears_even_when_server_fails() {
    let server = MockServer::start().await;
    Mock::given(path("/auth/login"))
      .respond_with(ResponseTemplate::new(200).set_body_json(tokens("access-1", 3600)))
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/auth/logout"))
      .and(header("Authorization", "Bearer access-1"))
      .respond_with(ResponseTemplate::new(500))
      .expect(1)
      .mount(&server)
      .await;

    let (auth, store, refresh) = auth(&server);
    auth.login("ada@example.com", "pw").await.unwrap();
    auth.logout().await.unwrap();

    assert!(store.read().is_none());
    assert_eq!(refresh.state(), CredentialState::Anonymous);
  }

  #[tokio::test]
  async fn test_current_user_attaches_profile() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/auth/me"))
      .and(header("Authorization", "Bearer access-3"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "data": { "id": "u-7", "email": "grace@example.com", "firstName": "Grace" }
      })))
      .expect(1)
      .mount(&server)
      .await;

    let (auth, store, _) = auth(&server);
    store
      .replace(Session::new(
        "access-3",
        "refresh-3",
        Utc::now() + chrono::Duration::hours(1),
        None,
        None,
      ))
      .unwrap();

    let profile = auth.current_user().await.unwrap();
    assert_eq!(profile.first_name.as_deref(), Some("Grace"));
    assert_eq!(store.read().unwrap().current_user(), Some(&profile));
  }
}
