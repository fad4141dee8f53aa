//! Cache keys for resource reads.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::resources::descriptor::{GET, LIST};
use crate::resources::{ListQuery, Resource};

/// Stable, order-independent encoding of a read's parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
  /// Fingerprint a set of name/value parameters. Order of `params` does not matter.
  pub fn of<K, V>(params: impl IntoIterator<Item = (K, V)>) -> Self
  where
    K: AsRef<str>,
    V: AsRef<str>,
  {
    let mut pairs: Vec<(String, String)> = params
      .into_iter()
      .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
      .collect();
    pairs.sort();

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    for (name, value) in &pairs {
      hasher.update(name.as_bytes());
      hasher.update([0u8]);
      hasher.update(value.as_bytes());
      hasher.update([0xffu8]);
    }
    Self(hex::encode(hasher.finalize()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

/// `(resource family, operation, parameter fingerprint)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  pub resource: Resource,
  pub operation: &'static str,
  pub fingerprint: Fingerprint,
}

impl CacheKey {
  pub fn list(resource: Resource, query: &ListQuery) -> Self {
    Self {
      resource,
      operation: LIST,
      fingerprint: Fingerprint::of(query.params()),
    }
  }

  pub fn entity(resource: Resource, id: &str) -> Self {
    Self {
      resource,
      operation: GET,
      fingerprint: Fingerprint::of([("id", id)]),
    }
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}:{}:{}",
      self.resource,
      self.operation,
      &self.fingerprint.as_str()[..12]
    )
  }
}

/// Leading components of a [`CacheKey`]; matches every key sharing them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPrefix {
  pub resource: Resource,
  pub operation: Option<&'static str>,
  pub fingerprint: Option<Fingerprint>,
}

impl KeyPrefix {
  /// Every cached read of the family.
  pub fn family(resource: Resource) -> Self {
    Self {
      resource,
      operation: None,
      fingerprint: None,
    }
  }

  /// Every cached list read of the family, whatever its filters.
  pub fn lists(resource: Resource) -> Self {
    Self {
      resource,
      operation: Some(LIST),
      fingerprint: None,
    }
  }

  /// The single-entity read for `id`.
  pub fn entity(resource: Resource, id: &str) -> Self {
    let key = CacheKey::entity(resource, id);
    Self {
      resource,
      operation: Some(key.operation),
      fingerprint: Some(key.fingerprint),
    }
  }

  pub fn matches(&self, key: &CacheKey) -> bool {
    self.resource == key.resource
      && self.operation.map_or(true, |op| op == key.operation)
      && self
        .fingerprint
        .as_ref()
        .map_or(true, |fp| *fp == key.fingerprint)
  }
}

impl fmt::Display for KeyPrefix {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.resource)?;
    if let Some(op) = self.operation {
      write!(f, ":{}", op)?;
    }
    if let Some(fp) = &self.fingerprint {
      write!(f, ":{}", &fp.as_str()[..12])?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_fingerprint_is_order_independent() {
    let a = Fingerprint::of([("status", "New"), ("page", "2")]);
    let b = Fingerprint::of([("page", "2"), ("status", "New")]);
    assert_eq!(a, b);
    assert_eq!(a.as_str().len(), 64);
  }

  #[test]
  fn test_fingerprint_separates_names_and_values() {
    assert_ne!(
      Fingerprint::of([("ab", "c")]),
      Fingerprint::of([("a", "bc")])
    );
  }

  #[test]
  fn test_list_keys_differ_by_query() {
    let first = CacheKey::list(Resource::Leads, &ListQuery::new().page(1));
    let second = CacheKey::list(Resource::Leads, &ListQuery::new().page(2));
    assert_ne!(first, second);
    assert_eq!(first, CacheKey::list(Resource::Leads, &ListQuery::new().page(1)));
  }

  #[test]
  fn test_prefix_matching() {
    let list = CacheKey::list(Resource::Contacts, &ListQuery::new());
    let entity = CacheKey::entity(Resource::Contacts, "c-1");
    let other = CacheKey::entity(Resource::Contacts, "c-2");

    assert!(KeyPrefix::family(Resource::Contacts).matches(&list));
    assert!(KeyPrefix::family(Resource::Contacts).matches(&entity));
    assert!(!KeyPrefix::family(Resource::Leads).matches(&list));

    assert!(KeyPrefix::lists(Resource::Contacts).matches(&list));
    assert!(!KeyPrefix::lists(Resource::Contacts).matches(&entity));

    assert!(KeyPrefix::entity(Resource::Contacts, "c-1").matches(&entity));
    assert!(!KeyPrefix::entity(Resource::Contacts, "c-1").matches(&other));
  }
}
