//! Durable key/value backends for the session store.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const EXPIRES_AT_KEY: &str = "tokenExpiresAt";
pub const TENANT_ID_KEY: &str = "tenantId";

/// Every key a persisted session occupies.
pub const SESSION_KEYS: [&str; 4] = [
  ACCESS_TOKEN_KEY,
  REFRESH_TOKEN_KEY,
  EXPIRES_AT_KEY,
  TENANT_ID_KEY,
];

/// Trait for session persistence backends.
///
/// Writes are all-or-nothing: `set_all` and `remove_all` either apply every
/// entry or none.
pub trait SessionStorage: Send + Sync {
  /// Read one value.
  fn get(&self, key: &str) -> Result<Option<String>>;

  /// Write all entries atomically. A `None` value removes the key.
  fn set_all(&self, entries: &[(&str, Option<&str>)]) -> Result<()>;

  /// Remove all keys atomically.
  fn remove_all(&self, keys: &[&str]) -> Result<()>;
}

/// Process-local storage, lost on exit.
#[derive(Default)]
pub struct MemorySessionStorage {
  values: Mutex<HashMap<String, String>>,
}

impl SessionStorage for MemorySessionStorage {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let values = self
      .values
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(values.get(key).cloned())
  }

  fn set_all(&self, entries: &[(&str, Option<&str>)]) -> Result<()> {
    let mut values = self
      .values
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    for (key, value) in entries {
      match value {
        Some(v) => values.insert(key.to_string(), v.to_string()),
        None => values.remove(*key),
      };
    }
    Ok(())
  }

  fn remove_all(&self, keys: &[&str]) -> Result<()> {
    let mut values = self
      .values
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    for key in keys {
      values.remove(*key);
    }
    Ok(())
  }
}

/// SQLite-based session storage.
pub struct SqliteSessionStorage {
  conn: Mutex<Connection>,
}

/// Schema for the session table.
const SESSION_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS session_kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    written_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteSessionStorage {
  /// Open the storage at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the storage at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create session directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open session database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Storage backed by a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory session database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(SESSION_SCHEMA)
      .map_err(|e| eyre!("Failed to run session migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("bizdesk").join("session.db"))
  }
}

impl SessionStorage for SqliteSessionStorage {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row(
        "SELECT value FROM session_kv WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read session key {}: {}", key, e))
  }

  fn set_all(&self, entries: &[(&str, Option<&str>)]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (key, value) in entries {
      match value {
        Some(v) => tx.execute(
          "INSERT OR REPLACE INTO session_kv (key, value, written_at)
           VALUES (?, ?, datetime('now'))",
          params![key, v],
        ),
        None => tx.execute("DELETE FROM session_kv WHERE key = ?", params![key]),
      }
      .map_err(|e| eyre!("Failed to write session key {}: {}", key, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn remove_all(&self, keys: &[&str]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for key in keys {
      tx.execute("DELETE FROM session_kv WHERE key = ?", params![key])
        .map_err(|e| eyre!("Failed to remove session key {}: {}", key, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn exercise(storage: &dyn SessionStorage) {
    storage
      .set_all(&[(ACCESS_TOKEN_KEY, Some("a")), (TENANT_ID_KEY, Some("t"))])
      .unwrap();
    assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("a"));

    storage.set_all(&[(TENANT_ID_KEY, None)]).unwrap();
    assert_eq!(storage.get(TENANT_ID_KEY).unwrap(), None);

    storage.remove_all(&SESSION_KEYS).unwrap();
    assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap(), None);
  }

  #[test]
  fn test_memory_storage() {
    exercise(&MemorySessionStorage::default());
  }

  #[test]
  fn test_sqlite_storage() {
    exercise(&SqliteSessionStorage::open_in_memory().unwrap());
  }

  #[test]
  fn test_sqlite_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("session.db");

    {
      let storage = SqliteSessionStorage::open_at(&path).unwrap();
      storage
        .set_all(&[(REFRESH_TOKEN_KEY, Some("keep-me"))])
        .unwrap();
    }

    let reopened = SqliteSessionStorage::open_at(&path).unwrap();
    assert_eq!(
      reopened.get(REFRESH_TOKEN_KEY).unwrap().as_deref(),
      Some("keep-me")
    );
  }
}
