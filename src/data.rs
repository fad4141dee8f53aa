//! Data-access facade: cached reads, invalidating writes, and the session.
//!
//! Every service is built once here and handed to the components that need
//! it, so two `DataClient`s never share a cache or a session.

use color_eyre::Result;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::auth::AuthClient;
use crate::cache::{CacheKey, CacheResult, InvalidationMapper, QueryCache, ReadMode};
use crate::config::Config;
use crate::error::ApiError;
use crate::http::envelope::decode;
use crate::http::{Dispatcher, Transport};
use crate::query::Query;
use crate::resources::descriptor::{CREATE, DELETE, UPDATE};
use crate::resources::{ListQuery, Page, Resource, ResourceClient};
use crate::session::{
  CredentialState, RefreshCoordinator, Session, SessionStorage, SessionStore, SqliteSessionStorage,
};

/// Client for every resource family, with transparent caching.
#[derive(Clone)]
pub struct DataClient {
  dispatcher: Dispatcher,
  store: SessionStore,
  refresh: RefreshCoordinator,
  cache: QueryCache,
  invalidation: InvalidationMapper,
  auth: AuthClient,
}

impl DataClient {
  /// Create a client persisting its session in SQLite
  /// (`session.path`, or the default location under the data dir).
  pub fn open(config: &Config) -> Result<Self> {
    let storage = match &config.session.path {
      Some(path) => SqliteSessionStorage::open_at(path)?,
      None => SqliteSessionStorage::open()?,
    };
    Self::new(config, storage)
  }

  /// Create a client over any session storage backend.
  pub fn new(config: &Config, storage: impl SessionStorage + 'static) -> Result<Self> {
    let transport = Transport::new(&config.api)?;
    let store = SessionStore::open(storage);
    let refresh = RefreshCoordinator::new(
      store.clone(),
      transport.clone(),
      config.auth.refresh_path.as_str(),
      config.auth.refresh_buffer(),
    );
    let dispatcher = Dispatcher::new(transport, store.clone(), refresh.clone());
    let cache = QueryCache::with_stale_time(config.cache.stale_time());
    let invalidation = InvalidationMapper::new(cache.clone());
    let auth = AuthClient::new(
      dispatcher.clone(),
      store.clone(),
      refresh.clone(),
      cache.clone(),
      config.auth.clone(),
    );

    Ok(Self {
      dispatcher,
      store,
      refresh,
      cache,
      invalidation,
      auth,
    })
  }

  pub fn auth(&self) -> &AuthClient {
    &self.auth
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  pub fn session(&self) -> Option<Session> {
    self.store.read()
  }

  pub fn credential_state(&self) -> CredentialState {
    self.refresh.state()
  }

  /// Uncached client for one family.
  pub fn resource(&self, resource: Resource) -> ResourceClient {
    ResourceClient::new(resource, self.dispatcher.clone())
  }

  // ==========================================================================
  // Reads
  // ==========================================================================

  /// List entities through the cache.
  pub async fn list<T: DeserializeOwned>(
    &self,
    resource: Resource,
    query: &ListQuery,
  ) -> Result<Page<T>, ApiError> {
    Ok(self.list_with(resource, query, ReadMode::default()).await?.data)
  }

  /// List entities through the cache, reporting where the page came from.
  pub async fn list_with<T: DeserializeOwned>(
    &self,
    resource: Resource,
    query: &ListQuery,
    mode: ReadMode,
  ) -> Result<CacheResult<Page<T>>, ApiError> {
    let key = CacheKey::list(resource, query);
    let client = self.resource(resource);
    let query = query.clone();

    let result = self
      .cache
      .read(&key, mode, move || async move {
        let page = client.list_raw(&query).await?;
        Ok::<_, ApiError>(serde_json::to_value(page)?)
      })
      .await?;

    result.try_map(decode)
  }

  /// Fetch one entity through the cache.
  pub async fn get<T: DeserializeOwned>(&self, resource: Resource, id: &str) -> Result<T, ApiError> {
    Ok(self.get_with(resource, id, ReadMode::default()).await?.data)
  }

  pub async fn get_with<T: DeserializeOwned>(
    &self,
    resource: Resource,
    id: &str,
    mode: ReadMode,
  ) -> Result<CacheResult<T>, ApiError> {
    let key = CacheKey::entity(resource, id);
    let client = self.resource(resource);
    let id = id.to_string();

    let result = self
      .cache
      .read(&key, mode, move || async move { client.get_raw(&id).await })
      .await?;

    result.try_map(decode)
  }

  /// Observer over a list read that refetches when the list is invalidated.
  pub fn watch_list<T>(&self, resource: Resource, query: ListQuery) -> Query<Page<T>>
  where
    T: DeserializeOwned + Send + 'static,
  {
    let key = CacheKey::list(resource, &query);
    let data = self.clone();
    Query::new(move || {
      let data = data.clone();
      let query = query.clone();
      async move { data.list(resource, &query).await }
    })
    .watching(&self.cache, key)
  }

  /// Observer over a single-entity read.
  pub fn watch_entity<T>(&self, resource: Resource, id: &str) -> Query<T>
  where
    T: DeserializeOwned + Send + 'static,
  {
    let key = CacheKey::entity(resource, id);
    let data = self.clone();
    let id = id.to_string();
    Query::new(move || {
      let data = data.clone();
      let id = id.clone();
      async move { data.get(resource, &id).await }
    })
    .watching(&self.cache, key)
  }

  // ==========================================================================
  // Writes
  // ==========================================================================
  //
  // Each write invalidates before returning, so a caller never sees a
  // successful result next to cached data that predates it.

  pub async fn create<T, P>(&self, resource: Resource, payload: &P) -> Result<T, ApiError>
  where
    T: DeserializeOwned,
    P: Serialize + ?Sized,
  {
    let created = self.resource(resource).create(payload).await?;
    self.invalidated(resource, CREATE, None);
    Ok(created)
  }

  pub async fn update<T, P>(&self, resource: Resource, id: &str, payload: &P) -> Result<T, ApiError>
  where
    T: DeserializeOwned,
    P: Serialize + ?Sized,
  {
    let updated = self.resource(resource).update(id, payload).await?;
    self.invalidated(resource, UPDATE, Some(id));
    Ok(updated)
  }

  pub async fn delete(&self, resource: Resource, id: &str) -> Result<(), ApiError> {
    self.resource(resource).delete(id).await?;
    self.invalidated(resource, DELETE, Some(id));
    Ok(())
  }

  pub async fn transition<T, P>(
    &self,
    resource: Resource,
    name: &str,
    id: &str,
    payload: &P,
  ) -> Result<T, ApiError>
  where
    T: DeserializeOwned,
    P: Serialize + ?Sized,
  {
    let result = self.resource(resource).transition(name, id, payload).await?;
    self.invalidated(resource, name, Some(id));
    Ok(result)
  }

  /// Untyped transition for callers that only have JSON at hand.
  pub async fn transition_json(
    &self,
    resource: Resource,
    name: &str,
    id: &str,
    payload: &Value,
  ) -> Result<Value, ApiError> {
    self.transition(resource, name, id, payload).await
  }

  fn invalidated(&self, resource: Resource, operation: &str, id: Option<&str>) {
    let touched = self.invalidation.apply(resource, operation, id);
    debug!(%resource, operation, touched, "write completed");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheEvent, CacheSource, CacheStatus};
  use crate::session::MemorySessionStorage;
  use serde_json::json;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn client(server: &MockServer) -> DataClient {
    DataClient::new(&Config::with_base_url(server.uri()), MemorySessionStorage::default()).unwrap()
  }

  fn wrap(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": data }))
  }

  #[tokio::test]
  async fn test_second_list_read_is_served_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/deals"))
      .respond_with(wrap(json!({ "items": [{ "id": "d-1" }], "pageNumber": 1, "totalPages": 1 })))
      .expect(1)
      .mount(&server)
      .await;

    let data = client(&server);
    let first = data
      .list_with::<Value>(Resource::Deals, &ListQuery::new(), ReadMode::default())
      .await
      .unwrap();
    let second = data
      .list_with::<Value>(Resource::Deals, &ListQuery::new(), ReadMode::default())
      .await
      .unwrap();

    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(second.data.items.len(), 1);
  }

  #[tokio::test]
  async fn test_failed_write_invalidates_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/tickets"))
      .respond_with(wrap(json!({ "items": [] })))
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/tickets"))
      .respond_with(ResponseTemplate::new(400).set_body_json(json!({
        "success": false,
        "message": "Subject is required",
        "errors": ["subject"]
      })))
      .mount(&server)
      .await;

    let data = client(&server);
    data.list::<Value>(Resource::Tickets, &ListQuery::new()).await.unwrap();

    let err = data
      .create::<Value, _>(Resource::Tickets, &json!({ "subject": "" }))
      .await
      .unwrap_err();
    assert_eq!(err.to_string(), "Subject is required");

    let key = CacheKey::list(Resource::Tickets, &ListQuery::new());
    assert_eq!(data.cache().status(&key), CacheStatus::Fresh);
  }

  #[tokio::test]
  async fn test_transition_invalidates_before_returning() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/orders"))
      .respond_with(wrap(json!({ "items": [] })))
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/quotations/q-1/convert-to-order"))
      .respond_with(wrap(json!({ "id": "o-1" })))
      .expect(1)
      .mount(&server)
      .await;

    let data = client(&server);
    data.list::<Value>(Resource::Orders, &ListQuery::new()).await.unwrap();
    let mut events = data.cache().subscribe();

    data
      .transition_json(Resource::Quotations, "convert", "q-1", &json!({}))
      .await
      .unwrap();

    // Already published when the write returned
    let orders = CacheKey::list(Resource::Orders, &ListQuery::new());
    assert_eq!(events.try_recv().unwrap(), CacheEvent::Invalidated(orders.clone()));
    assert_eq!(data.cache().status(&orders), CacheStatus::Stale);
  }

  #[tokio::test]
  async fn test_watch_list_refetches_after_create() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/campaigns"))
      .respond_with(wrap(json!({ "items": [{ "id": "c-1" }] })))
      .up_to_n_times(1)
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/campaigns"))
      .respond_with(wrap(json!({ "items": [{ "id": "c-1" }, { "id": "c-2" }] })))
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/campaigns"))
      .respond_with(wrap(json!({ "id": "c-2" })))
      .mount(&server)
      .await;

    let data = client(&server);
    let mut query = data.watch_list::<Value>(Resource::Campaigns, ListQuery::new());
    query.fetch();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    query.poll();
    assert_eq!(query.data().unwrap().items.len(), 1);

    data
      .create::<Value, _>(Resource::Campaigns, &json!({ "name": "Spring" }))
      .await
      .unwrap();
    // The invalidation from the create starts a refetch on the next poll
    for _ in 0..10 {
      query.poll();
      tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    }
    assert_eq!(query.data().unwrap().items.len(), 2);
  }
}
