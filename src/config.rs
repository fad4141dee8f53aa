use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `api.base_url`.
pub const API_URL_ENV: &str = "BIZDESK_API_URL";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub auth: AuthConfig,
  #[serde(default)]
  pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL every resource path is appended to (e.g. "https://crm.example.com/api")
  pub base_url: String,
  /// Per-request deadline
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Total attempts on transport-level failure (initial try + retries)
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,
  /// Base delay between transport retries, doubled on each retry
  #[serde(default = "default_retry_backoff_ms")]
  pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Seconds after which a cached read is considered stale
  #[serde(default = "default_stale_secs")]
  pub stale_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_secs: default_stale_secs(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
  /// Renew the access credential when it expires within this many seconds
  pub refresh_buffer_secs: u64,
  pub login_path: String,
  pub register_path: String,
  pub refresh_path: String,
  pub logout_path: String,
  pub profile_path: String,
}

impl Default for AuthConfig {
  fn default() -> Self {
    Self {
      refresh_buffer_secs: 300,
      login_path: "/auth/login".to_string(),
      register_path: "/auth/register".to_string(),
      refresh_path: "/auth/refresh-token".to_string(),
      logout_path: "/auth/logout".to_string(),
      profile_path: "/auth/me".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfig {
  /// SQLite file holding the persisted session (default: $XDG_DATA_HOME/bizdesk/session.db)
  pub path: Option<PathBuf>,
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_max_attempts() -> u32 {
  3
}

fn default_retry_backoff_ms() -> u64 {
  200
}

fn default_stale_secs() -> u64 {
  60
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  pub fn retry_backoff(&self) -> Duration {
    Duration::from_millis(self.retry_backoff_ms)
  }
}

impl CacheConfig {
  pub fn stale_time(&self) -> Duration {
    Duration::from_secs(self.stale_secs)
  }
}

impl AuthConfig {
  pub fn refresh_buffer(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.refresh_buffer_secs as i64)
  }
}

impl Config {
  /// Configuration with every default applied, pointed at `base_url`.
  pub fn with_base_url(base_url: impl Into<String>) -> Self {
    Self {
      api: ApiConfig {
        base_url: base_url.into(),
        timeout_secs: default_timeout_secs(),
        max_attempts: default_max_attempts(),
        retry_backoff_ms: default_retry_backoff_ms(),
      },
      cache: CacheConfig::default(),
      auth: AuthConfig::default(),
      session: SessionConfig::default(),
    }
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./bizdesk.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/bizdesk/config.yaml
  ///
  /// Without a file, `BIZDESK_API_URL` alone is enough to run with defaults.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let env_url = std::env::var(API_URL_ENV).ok();

    let mut config = match (path, env_url.as_deref()) {
      (Some(p), _) => Self::load_from_path(&p)?,
      (None, Some(url)) => Self::with_base_url(url),
      (None, None) => {
        return Err(eyre!(
          "No configuration file found. Create one at ~/.config/bizdesk/config.yaml \
           or set {}.",
          API_URL_ENV
        ))
      }
    };

    if let Some(url) = env_url {
      config.api.base_url = url;
    }

    config.validate()?;
    Ok(config)
  }

  /// Parse configuration from YAML text.
  pub fn from_yaml_str(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("bizdesk.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("bizdesk").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    url::Url::parse(&self.api.base_url)
      .map_err(|e| eyre!("Invalid api.base_url '{}': {}", self.api.base_url, e))?;
    if self.api.max_attempts == 0 {
      return Err(eyre!("api.max_attempts must be at least 1"));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml_str("api:\n  base_url: https://crm.example.com/api\n").unwrap();

    assert_eq!(config.api.timeout(), Duration::from_secs(30));
    assert_eq!(config.api.max_attempts, 3);
    assert_eq!(config.cache.stale_time(), Duration::from_secs(60));
    assert_eq!(config.auth.refresh_buffer(), chrono::Duration::minutes(5));
    assert_eq!(config.auth.refresh_path, "/auth/refresh-token");
    assert!(config.session.path.is_none());
  }

  #[test]
  fn test_overrides_are_read() {
    let yaml = r#"
api:
  base_url: http://localhost:5000/api
  timeout_secs: 5
cache:
  stale_secs: 10
auth:
  refresh_buffer_secs: 60
  refresh_path: /auth/refresh
session:
  path: /tmp/bizdesk-session.db
"#;
    let config = Config::from_yaml_str(yaml).unwrap();

    assert_eq!(config.api.timeout_secs, 5);
    assert_eq!(config.cache.stale_secs, 10);
    assert_eq!(config.auth.refresh_buffer_secs, 60);
    assert_eq!(config.auth.refresh_path, "/auth/refresh");
    // Unset auth paths keep their defaults
    assert_eq!(config.auth.login_path, "/auth/login");
    assert_eq!(
      config.session.path.as_deref(),
      Some(Path::new("/tmp/bizdesk-session.db"))
    );
  }

  #[test]
  fn test_invalid_base_url_rejected() {
    assert!(Config::from_yaml_str("api:\n  base_url: not a url\n").is_err());
  }

  #[test]
  fn test_zero_attempts_rejected() {
    let yaml = "api:\n  base_url: http://localhost\n  max_attempts: 0\n";
    assert!(Config::from_yaml_str(yaml).is_err());
  }
}
