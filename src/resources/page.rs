//! Caller-facing list query and pagination envelope, and their translation
//! to and from the server's naming.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::descriptor::PaginationShape;
use crate::error::ApiError;

/// Filters and pagination for a list read.
///
/// Filters are kept sorted by name, so two queries built in different orders
/// produce the same server request and the same cache fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ListQuery {
  pub page: Option<u32>,
  pub page_size: Option<u32>,
  pub filters: BTreeMap<String, String>,
}

impl ListQuery {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn page(mut self, page: u32) -> Self {
    self.page = Some(page);
    self
  }

  pub fn page_size(mut self, page_size: u32) -> Self {
    self.page_size = Some(page_size);
    self
  }

  pub fn filter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.filters.insert(name.into(), value.into());
    self
  }

  /// Caller-named parameters, used for fingerprinting. Empty filters are
  /// skipped, as they are never sent.
  pub fn params(&self) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = self
      .filters
      .iter()
      .filter(|(_, v)| !v.is_empty())
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect();
    if let Some(page) = self.page {
      params.push(("page".to_string(), page.to_string()));
    }
    if let Some(size) = self.page_size {
      params.push(("pageSize".to_string(), size.to_string()));
    }
    params
  }

  /// Server-named query parameters. Empty filters and no page produce an
  /// empty list so the server applies its default ordering and page size.
  pub fn to_server_params(&self, shape: &PaginationShape) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = self
      .filters
      .iter()
      .filter(|(_, v)| !v.is_empty())
      .map(|(k, v)| {
        let server_name = shape
          .filter_aliases
          .iter()
          .find(|(caller, _)| *caller == k.as_str())
          .map(|(_, server)| server.to_string())
          .unwrap_or_else(|| k.clone());
        (server_name, v.clone())
      })
      .collect();

    if let Some(page) = self.page {
      params.push((shape.page_field.to_string(), page.to_string()));
    }
    if let Some(size) = self.page_size {
      params.push((shape.page_size_field.to_string(), size.to_string()));
    }
    params
  }
}

/// Caller-facing page of entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
  pub items: Vec<T>,
  pub page: u32,
  pub page_size: u32,
  pub total_count: u64,
  pub total_pages: u32,
  pub has_next_page: bool,
  pub has_previous_page: bool,
}

impl Page<Value> {
  /// Re-map a server pagination envelope into the caller shape.
  pub fn from_server(data: Value, shape: &PaginationShape) -> Result<Self, ApiError> {
    let Value::Object(mut fields) = data else {
      return Err(ApiError::Decode("list response is not an object".into()));
    };

    let items = match fields.remove(shape.items_field) {
      Some(Value::Array(items)) => items,
      Some(Value::Null) | None => Vec::new(),
      Some(_) => {
        return Err(ApiError::Decode(format!(
          "list field '{}' is not an array",
          shape.items_field
        )))
      }
    };

    // Missing, negative or out-of-range numbers fall back to the defaults
    let number = |name: &str| fields.get(name).and_then(Value::as_u64);
    let small = |name: &str| number(name).and_then(|n| u32::try_from(n).ok());
    let flag = |name: &str| fields.get(name).and_then(Value::as_bool);
    let item_count = items.len();

    let page = small(shape.page_field).unwrap_or(1);
    let page_size = small(shape.page_size_field)
      .unwrap_or_else(|| u32::try_from(item_count).unwrap_or(u32::MAX));
    let total_count = number(shape.total_count_field).unwrap_or(item_count as u64);
    let total_pages = small(shape.total_pages_field).unwrap_or(1);

    Ok(Page {
      page,
      page_size,
      total_count,
      total_pages,
      has_next_page: flag(shape.has_next_field).unwrap_or(page < total_pages),
      has_previous_page: flag(shape.has_previous_field).unwrap_or(page > 1),
      items,
    })
  }

  /// Deserialize every item into the caller's entity type.
  pub fn decode<T: DeserializeOwned>(self) -> Result<Page<T>, ApiError> {
    let Page {
      items,
      page,
      page_size,
      total_count,
      total_pages,
      has_next_page,
      has_previous_page,
    } = self;

    let items = items
      .into_iter()
      .map(serde_json::from_value)
      .collect::<Result<Vec<T>, _>>()?;

    Ok(Page {
      items,
      page,
      page_size,
      total_count,
      total_pages,
      has_next_page,
      has_previous_page,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::resources::descriptor::STANDARD_PAGINATION;
  use serde_json::json;

  #[test]
  fn test_empty_query_sends_nothing() {
    assert!(ListQuery::new().to_server_params(&STANDARD_PAGINATION).is_empty());
  }

  #[test]
  fn test_page_is_renamed_and_filters_aliased() {
    let query = ListQuery::new()
      .page(3)
      .page_size(25)
      .filter("search", "acme")
      .filter("status", "New")
      .filter("owner", "");

    let params = query.to_server_params(&STANDARD_PAGINATION);
    assert_eq!(
      params,
      vec![
        ("searchTerm".to_string(), "acme".to_string()),
        ("status".to_string(), "New".to_string()),
        ("pageNumber".to_string(), "3".to_string()),
        ("pageSize".to_string(), "25".to_string()),
      ]
    );
  }

  #[test]
  fn test_filter_order_does_not_matter() {
    let a = ListQuery::new().filter("a", "1").filter("b", "2");
    let b = ListQuery::new().filter("b", "2").filter("a", "1");
    assert_eq!(a.params(), b.params());
  }

  #[test]
  fn test_empty_filter_shares_fingerprint_with_no_filter() {
    let blank = ListQuery::new().filter("owner", "");
    assert_eq!(blank.params(), ListQuery::new().params());
    assert_eq!(
      blank.to_server_params(&STANDARD_PAGINATION),
      ListQuery::new().to_server_params(&STANDARD_PAGINATION)
    );
  }

  #[test]
  fn test_out_of_range_numbers_fall_back_to_defaults() {
    let server = json!({
      "items": [{ "id": 1 }],
      "pageNumber": 4_294_967_296u64,
      "pageSize": -5,
      "totalPages": 4_294_967_300u64,
      "totalCount": 4_294_967_300u64
    });

    let page = Page::from_server(server, &STANDARD_PAGINATION).unwrap();
    assert_eq!(page.page, 1);
    assert_eq!(page.page_size, 1);
    assert_eq!(page.total_pages, 1);
    assert_eq!(page.total_count, 4_294_967_300);
  }

  #[test]
  fn test_server_envelope_mapped_to_caller_shape() {
    let server = json!({
      "items": [{ "id": 1 }, { "id": 2 }],
      "pageNumber": 3,
      "pageSize": 2,
      "totalPages": 5,
      "totalCount": 10,
      "hasPreviousPage": true,
      "hasNextPage": true
    });

    let page = Page::from_server(server, &STANDARD_PAGINATION).unwrap();
    assert_eq!(page.page, 3);
    assert_eq!(page.page_size, 2);
    assert_eq!(page.total_count, 10);
    assert_eq!(page.total_pages, 5);
    assert!(page.has_next_page && page.has_previous_page);

    let caller = serde_json::to_value(&page).unwrap();
    assert_eq!(caller["page"], 3);
    assert!(caller.get("pageNumber").is_none());
  }

  #[test]
  fn test_missing_flags_are_derived() {
    let server = json!({ "items": [], "pageNumber": 1, "totalPages": 2 });
    let page = Page::from_server(server, &STANDARD_PAGINATION).unwrap();
    assert!(page.has_next_page);
    assert!(!page.has_previous_page);
  }

  #[test]
  fn test_non_object_rejected() {
    assert!(matches!(
      Page::from_server(json!([1, 2]), &STANDARD_PAGINATION),
      Err(ApiError::Decode(_))
    ));
  }

  #[test]
  fn test_decode_items() {
    #[derive(Debug, Deserialize, PartialEq)]
    struct Row {
      id: u32,
    }

    let page = Page::from_server(json!({ "items": [{ "id": 4 }] }), &STANDARD_PAGINATION)
      .unwrap()
      .decode::<Row>()
      .unwrap();
    assert_eq!(page.items, vec![Row { id: 4 }]);
  }
}
