//! Authenticated request dispatch.

use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use super::envelope::ApiRequest;
use super::transport::Transport;
use crate::error::ApiError;
use crate::session::{RefreshCoordinator, SessionStore};

/// Sends requests on behalf of the signed-in user.
///
/// Before each request the refresh coordinator gets a chance to renew an
/// expiring credential. A 401 on a credentialed request triggers exactly one
/// renewal and one replay of the original request; a second 401 is final and
/// ends the session.
#[derive(Clone)]
pub struct Dispatcher {
  transport: Transport,
  store: SessionStore,
  refresh: RefreshCoordinator,
}

impl Dispatcher {
  pub fn new(transport: Transport, store: SessionStore, refresh: RefreshCoordinator) -> Self {
    Self {
      transport,
      store,
      refresh,
    }
  }

  pub fn transport(&self) -> &Transport {
    &self.transport
  }

  /// `send(method, path, body?, query?)`.
  pub async fn send_parts(
    &self,
    method: Method,
    path: &str,
    body: Option<Value>,
    query: Vec<(String, String)>,
  ) -> Result<Value, ApiError> {
    let mut request = ApiRequest::new(method, path).with_query(query);
    request.body = body;
    self.send(&request).await
  }

  pub async fn send(&self, request: &ApiRequest) -> Result<Value, ApiError> {
    self.refresh.ensure_valid().await?;

    let token = self.current_token();
    match self.transport.execute(request, token.as_deref()).await {
      Err(ApiError::Unauthenticated) => match token {
        Some(stale) => self.replay_after_renewal(request, &stale).await,
        None => Err(ApiError::Unauthenticated),
      },
      other => other,
    }
  }

  async fn replay_after_renewal(&self, request: &ApiRequest, stale: &str) -> Result<Value, ApiError> {
    debug!(path = %request.path, "credential rejected; renewing and replaying once");
    self.refresh.force_renewal(stale).await?;

    let token = self.current_token();
    match self.transport.execute(request, token.as_deref()).await {
      Err(ApiError::Unauthenticated) => {
        warn!(path = %request.path, "credential rejected after renewal; ending session");
        self.refresh.fail();
        Err(ApiError::Unauthenticated)
      }
      other => other,
    }
  }

  fn current_token(&self) -> Option<String> {
    self.store.read().map(|s| s.access_token().to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::ApiConfig;
  use crate::session::storage::MemorySessionStorage;
  use crate::session::{CredentialState, Session};
  use chrono::{Duration, Utc};
  use futures::future::join_all;
  use serde_json::json;
  use wiremock::matchers::{header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  const REFRESH_PATH: &str = "/auth/refresh-token";

  struct Harness {
    dispatcher: Dispatcher,
    store: SessionStore,
    refresh: RefreshCoordinator,
  }

  fn harness(server: &MockServer, expires_in_minutes: Option<i64>) -> Harness {
    let store = SessionStore::open(MemorySessionStorage::default());
    if let Some(minutes) = expires_in_minutes {
      store
        .replace(Session::new(
          "old-access",
          "old-refresh",
          Utc::now() + Duration::minutes(minutes),
          None,
          None,
        ))
        .unwrap();
    }
    let transport = Transport::new(&ApiConfig {
      base_url: server.uri(),
      timeout_secs: 5,
      max_attempts: 3,
      retry_backoff_ms: 0,
    })
    .unwrap();
    let refresh = RefreshCoordinator::new(
      store.clone(),
      transport.clone(),
      REFRESH_PATH,
      Duration::minutes(5),
    );
    Harness {
      dispatcher: Dispatcher::new(transport, store.clone(), refresh.clone()),
      store,
      refresh,
    }
  }

  fn leads_page() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": { "items": [] } }))
  }

  fn renewal_ok() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
      "success": true,
      "data": { "accessToken": "new-access", "refreshToken": "new-refresh", "expiresIn": 3600 }
    }))
  }

  #[tokio::test]
  async fn test_attaches_current_credential() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/leads"))
      .and(header("Authorization", "Bearer old-access"))
      .respond_with(leads_page())
      .expect(1)
      .mount(&server)
      .await;

    let h = harness(&server, Some(60));
    h.dispatcher.send(&ApiRequest::get("/leads")).await.unwrap();
  }

  #[tokio::test]
  async fn test_expiring_session_renews_once_before_requests() {
    let server = MockServer::start().await;
    Mock::given(path(REFRESH_PATH))
      .respond_with(renewal_ok().set_delay(std::time::Duration::from_millis(80)))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/leads"))
      .and(header("Authorization", "Bearer new-access"))
      .respond_with(leads_page())
      .expect(5)
      .mount(&server)
      .await;

    // 4 minutes left: inside the 5 minute buffer
    let h = harness(&server, Some(4));
    let request = ApiRequest::get("/leads");
    let results = join_all((0..5).map(|_| h.dispatcher.send(&request))).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(h.store.read().unwrap().access_token(), "new-access");
  }

  #[tokio::test]
  async fn test_failed_renewal_leaves_store_empty() {
    let server = MockServer::start().await;
    Mock::given(path(REFRESH_PATH))
      .respond_with(ResponseTemplate::new(401))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(path("/leads"))
      .respond_with(leads_page())
      .expect(0)
      .mount(&server)
      .await;

    let h = harness(&server, Some(4));
    let err = h.dispatcher.send(&ApiRequest::get("/leads")).await.unwrap_err();

    assert_eq!(err, ApiError::Unauthenticated);
    assert!(h.store.read().is_none());
  }

  #[tokio::test]
  async fn test_401_renews_and_replays_once() {
    let server = MockServer::start().await;
    Mock::given(path("/deals"))
      .and(header("Authorization", "Bearer old-access"))
      .respond_with(ResponseTemplate::new(401))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(path("/deals"))
      .and(header("Authorization", "Bearer new-access"))
      .respond_with(leads_page())
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(path(REFRESH_PATH))
      .respond_with(renewal_ok())
      .expect(1)
      .mount(&server)
      .await;

    let h = harness(&server, Some(60));
    h.dispatcher.send(&ApiRequest::get("/deals")).await.unwrap();
    assert_eq!(h.refresh.state(), CredentialState::Valid);
  }

  #[tokio::test]
  async fn test_second_401_after_renewal_forces_logout() {
    let server = MockServer::start().await;
    Mock::given(path("/deals"))
      .respond_with(ResponseTemplate::new(401))
      .expect(2)
      .mount(&server)
      .await;
    Mock::given(path(REFRESH_PATH))
      .respond_with(renewal_ok())
      .expect(1)
      .mount(&server)
      .await;

    let h = harness(&server, Some(60));
    let err = h.dispatcher.send(&ApiRequest::get("/deals")).await.unwrap_err();

    assert_eq!(err, ApiError::Unauthenticated);
    assert!(h.store.read().is_none());
    assert_eq!(h.refresh.state(), CredentialState::Failed);
  }

  #[tokio::test]
  async fn test_anonymous_401_is_not_replayed() {
    let server = MockServer::start().await;
    Mock::given(path("/deals"))
      .respond_with(ResponseTemplate::new(401))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(path(REFRESH_PATH))
      .respond_with(renewal_ok())
      .expect(0)
      .mount(&server)
      .await;

    let h = harness(&server, None);
    let err = h
      .dispatcher
      .send_parts(Method::GET, "/deals", None, vec![])
      .await
      .unwrap_err();
    assert_eq!(err, ApiError::Unauthenticated);
  }

  #[tokio::test]
  async fn test_validation_errors_pass_through_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/contacts"))
      .respond_with(ResponseTemplate::new(400).set_body_json(json!({
        "success": false,
        "message": "Email is required",
        "errors": ["Email is required"]
      })))
      .expect(1)
      .mount(&server)
      .await;

    let h = harness(&server, Some(60));
    let err = h
      .dispatcher
      .send_parts(Method::POST, "/contacts", Some(json!({})), vec![])
      .await
      .unwrap_err();
    assert_eq!(err.to_string(), "Email is required");
  }
}
