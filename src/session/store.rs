//! In-memory view of the session, written through to durable storage.

use chrono::{DateTime, Utc};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

use super::storage::{
  SessionStorage, ACCESS_TOKEN_KEY, EXPIRES_AT_KEY, REFRESH_TOKEN_KEY, SESSION_KEYS,
  TENANT_ID_KEY,
};
use super::types::Session;
use crate::error::ApiError;

/// Holder of the current session.
///
/// Reads are served from memory. `replace` and `clear` write through to the
/// storage backend before the in-memory copy changes, so a failed write leaves
/// the previous session in place. Outside tests only the refresh coordinator
/// writes to it.
#[derive(Clone)]
pub struct SessionStore {
  inner: Arc<Inner>,
}

struct Inner {
  storage: Box<dyn SessionStorage>,
  current: RwLock<Option<Session>>,
}

impl SessionStore {
  /// Open the store, recovering any session persisted by a previous process.
  pub fn open(storage: impl SessionStorage + 'static) -> Self {
    let current = load(&storage);

    Self {
      inner: Arc::new(Inner {
        storage: Box::new(storage),
        current: RwLock::new(current),
      }),
    }
  }

  /// Current session, if any.
  pub fn read(&self) -> Option<Session> {
    self
      .inner
      .current
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  pub fn is_authenticated(&self) -> bool {
    self
      .inner
      .current
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .is_some()
  }

  /// Replace the whole session.
  pub(crate) fn replace(&self, session: Session) -> Result<(), ApiError> {
    let expires_at = session.expires_at().to_rfc3339();
    self
      .inner
      .storage
      .set_all(&[
        (ACCESS_TOKEN_KEY, Some(session.access_token())),
        (REFRESH_TOKEN_KEY, Some(session.refresh_token())),
        (EXPIRES_AT_KEY, Some(expires_at.as_str())),
        (TENANT_ID_KEY, session.tenant_id()),
      ])
      .map_err(|e| ApiError::Storage(e.to_string()))?;

    *self
      .inner
      .current
      .write()
      .unwrap_or_else(PoisonError::into_inner) = Some(session);

    debug!(expires_at = %expires_at, "session replaced");
    Ok(())
  }

  /// Drop the session entirely.
  ///
  /// The in-memory copy is always cleared, even if the durable delete fails.
  pub(crate) fn clear(&self) -> Result<(), ApiError> {
    *self
      .inner
      .current
      .write()
      .unwrap_or_else(PoisonError::into_inner) = None;

    self
      .inner
      .storage
      .remove_all(&SESSION_KEYS)
      .map_err(|e| ApiError::Storage(e.to_string()))?;

    debug!("session cleared");
    Ok(())
  }
}

/// Rebuild a session from storage. Any missing or unparsable required key
/// yields no session, and leftovers are wiped so the next start is clean.
fn load(storage: &dyn SessionStorage) -> Option<Session> {
  let read = |key: &str| match storage.get(key) {
    Ok(value) => value,
    Err(e) => {
      warn!(key, error = %e, "failed to read persisted session key");
      None
    }
  };

  let access = read(ACCESS_TOKEN_KEY);
  let refresh = read(REFRESH_TOKEN_KEY);
  let expires = read(EXPIRES_AT_KEY);
  let tenant = read(TENANT_ID_KEY);

  let parsed = expires
    .as_deref()
    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    .map(|dt| dt.with_timezone(&Utc));

  match (access, refresh, parsed) {
    (Some(access), Some(refresh), Some(expires_at)) if !access.is_empty() => {
      debug!(%expires_at, "recovered persisted session");
      Some(Session::new(access, refresh, expires_at, tenant, None))
    }
    (None, None, None) if expires.is_none() && tenant.is_none() => None,
    _ => {
      warn!("persisted session is incomplete or corrupt; discarding");
      if let Err(e) = storage.remove_all(&SESSION_KEYS) {
        warn!(error = %e, "failed to wipe corrupt session");
      }
      None
    }
  }
}
