use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use super::descriptor::{Resource, ResourceDescriptor, CREATE, DELETE, GET, LIST, UPDATE};
use super::page::{ListQuery, Page};
use super::sanitize::sanitize_payload;
use crate::error::ApiError;
use crate::http::envelope::decode;
use crate::http::{ApiRequest, Dispatcher};

/// API client for one resource family.
///
/// Each operation is exactly one dispatcher call. Server envelopes and
/// pagination naming stop here; callers only see entities and [`Page`].
#[derive(Clone)]
pub struct ResourceClient {
  descriptor: &'static ResourceDescriptor,
  dispatcher: Dispatcher,
}

impl ResourceClient {
  pub fn new(resource: Resource, dispatcher: Dispatcher) -> Self {
    Self {
      descriptor: resource.descriptor(),
      dispatcher,
    }
  }

  pub fn resource(&self) -> Resource {
    self.descriptor.resource
  }

  pub fn descriptor(&self) -> &'static ResourceDescriptor {
    self.descriptor
  }

  /// List entities. The caller's page maps to the server's `pageNumber`.
  pub async fn list<T: DeserializeOwned>(&self, query: &ListQuery) -> Result<Page<T>, ApiError> {
    self.list_raw(query).await?.decode()
  }

  pub async fn list_raw(&self, query: &ListQuery) -> Result<Page<Value>, ApiError> {
    self.ensure_supported(LIST)?;

    let request = ApiRequest::get(self.descriptor.base_path)
      .with_query(query.to_server_params(&self.descriptor.pagination));
    let data = self.dispatcher.send(&request).await?;

    Page::from_server(data, &self.descriptor.pagination)
  }

  /// Fetch one entity. A server 404 surfaces as [`ApiError::NotFound`].
  pub async fn get<T: DeserializeOwned>(&self, id: &str) -> Result<T, ApiError> {
    decode(self.get_raw(id).await?)
  }

  pub async fn get_raw(&self, id: &str) -> Result<Value, ApiError> {
    self.ensure_supported(GET)?;

    let request = ApiRequest::get(self.descriptor.entity_path(id));
    self.dispatcher.send(&request).await
  }

  /// Create an entity. Blank fields are stripped before sending.
  pub async fn create<T, P>(&self, payload: &P) -> Result<T, ApiError>
  where
    T: DeserializeOwned,
    P: Serialize + ?Sized,
  {
    self.ensure_supported(CREATE)?;

    let request = ApiRequest::post(self.descriptor.base_path).with_body(sanitize_payload(payload)?);
    decode(self.dispatcher.send(&request).await?)
  }

  /// Update an entity with a partial payload. Blank fields are stripped before sending.
  pub async fn update<T, P>(&self, id: &str, payload: &P) -> Result<T, ApiError>
  where
    T: DeserializeOwned,
    P: Serialize + ?Sized,
  {
    self.ensure_supported(UPDATE)?;

    let request =
      ApiRequest::put(self.descriptor.entity_path(id)).with_body(sanitize_payload(payload)?);
    decode(self.dispatcher.send(&request).await?)
  }

  /// Delete an entity. Whatever the server answers for an already-deleted id
  /// (typically [`ApiError::NotFound`]) is passed through.
  pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
    self.ensure_supported(DELETE)?;

    let request = ApiRequest::delete(self.descriptor.entity_path(id));
    self.dispatcher.send(&request).await.map(|_| ())
  }

  /// Run a named transition on one entity.
  pub async fn transition<T, P>(&self, name: &str, id: &str, payload: &P) -> Result<T, ApiError>
  where
    T: DeserializeOwned,
    P: Serialize + ?Sized,
  {
    let transition = self
      .descriptor
      .transition(name)
      .ok_or_else(|| self.unsupported(name))?;

    let request = ApiRequest::post(self.descriptor.transition_path(id, transition))
      .with_body(sanitize_payload(payload)?);
    decode(self.dispatcher.send(&request).await?)
  }

  fn ensure_supported(&self, operation: &str) -> Result<(), ApiError> {
    if self.descriptor.supports(operation) {
      Ok(())
    } else {
      Err(self.unsupported(operation))
    }
  }

  fn unsupported(&self, operation: &str) -> ApiError {
    ApiError::Unsupported {
      resource: self.descriptor.name,
      operation: operation.to_string(),
    }
  }
}
