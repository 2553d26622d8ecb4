use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::lambda::{DEPLOY_MAX_ATTEMPTS, DEPLOY_RETRY_DELAY};
use crate::cache::{LocalStore, DEFAULT_QUOTA_BYTES, HEALTH_CHECK_INTERVAL, KEY_PREFIX, LOCAL_TTL};
use crate::executions::{MAX_EMPTY_RETRIES, POLL_INTERVAL};

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5001";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Base URL of the BRMH backend
  pub backend_url: String,
  /// Base URL of the AWS-facing proxy (defaults to `backend_url`)
  pub aws_url: Option<String>,
  pub cache: CacheConfig,
  pub poller: PollerConfig,
  pub lambda: LambdaConfig,
  pub logging: LoggingConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      backend_url: DEFAULT_BACKEND_URL.to_string(),
      aws_url: None,
      cache: CacheConfig::default(),
      poller: PollerConfig::default(),
      lambda: LambdaConfig::default(),
      logging: LoggingConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub local_ttl_secs: u64,
  pub health_interval_secs: u64,
  pub key_prefix: String,
  /// Local storage budget in bytes; 0 disables the limit
  pub quota_bytes: usize,
  /// SQLite file (default: $XDG_DATA_HOME/brmh/cache.db)
  pub db_path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      local_ttl_secs: LOCAL_TTL.as_secs(),
      health_interval_secs: HEALTH_CHECK_INTERVAL.as_secs(),
      key_prefix: KEY_PREFIX.to_string(),
      quota_bytes: DEFAULT_QUOTA_BYTES,
      db_path: None,
    }
  }
}

impl CacheConfig {
  pub fn db_path(&self) -> PathBuf {
    self.db_path.clone().unwrap_or_else(LocalStore::default_path)
  }

  pub fn local_ttl(&self) -> Duration {
    Duration::from_secs(self.local_ttl_secs)
  }

  pub fn health_interval(&self) -> Duration {
    Duration::from_secs(self.health_interval_secs)
  }

  pub fn quota(&self) -> Option<usize> {
    (self.quota_bytes > 0).then_some(self.quota_bytes)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
  pub interval_ms: u64,
  pub max_empty_retries: u32,
}

impl Default for PollerConfig {
  fn default() -> Self {
    Self {
      interval_ms: POLL_INTERVAL.as_millis() as u64,
      max_empty_retries: MAX_EMPTY_RETRIES,
    }
  }
}

impl PollerConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_millis(self.interval_ms)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LambdaConfig {
  pub max_attempts: u32,
  pub retry_delay_secs: u64,
}

impl Default for LambdaConfig {
  fn default() -> Self {
    Self {
      max_attempts: DEPLOY_MAX_ATTEMPTS,
      retry_delay_secs: DEPLOY_RETRY_DELAY.as_secs(),
    }
  }
}

impl LambdaConfig {
  pub fn retry_delay(&self) -> Duration {
    Duration::from_secs(self.retry_delay_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Default filter directive when RUST_LOG is unset
  pub level: String,
  /// Also write daily-rotated log files here
  pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      dir: None,
    }
  }
}

impl Config {
  /// Load configuration.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./brmh.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/brmh/config.yaml
  ///
  /// Without a file, defaults apply. Environment overrides are applied last.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    config.with_env_overrides(|key| std::env::var(key).ok())
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("brmh.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("brmh").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    // An empty file deserializes to null
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Apply base-URL overrides from the environment and validate them.
  ///
  /// Checks BRMH_BACKEND_URL first, then NEXT_PUBLIC_BACKEND_URL; likewise
  /// BRMH_AWS_URL, then NEXT_PUBLIC_AWS_URL.
  pub fn with_env_overrides<F>(mut self, var: F) -> Result<Self>
  where
    F: Fn(&str) -> Option<String>,
  {
    if let Some(url) = var("BRMH_BACKEND_URL").or_else(|| var("NEXT_PUBLIC_BACKEND_URL")) {
      self.backend_url = url;
    }
    if let Some(url) = var("BRMH_AWS_URL").or_else(|| var("NEXT_PUBLIC_AWS_URL")) {
      self.aws_url = Some(url);
    }

    url::Url::parse(&self.backend_url)
      .map_err(|e| eyre!("Invalid backend URL {:?}: {}", self.backend_url, e))?;
    if let Some(aws_url) = &self.aws_url {
      url::Url::parse(aws_url).map_err(|e| eyre!("Invalid AWS URL {:?}: {}", aws_url, e))?;
    }

    Ok(self)
  }

  pub fn aws_url(&self) -> &str {
    self.aws_url.as_deref().unwrap_or(&self.backend_url)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    move |key: &str| map.get(key).cloned()
  }

  #[test]
  fn test_defaults() {
    let config = Config::from_yaml("").unwrap();
    assert_eq!(config.backend_url, DEFAULT_BACKEND_URL);
    assert_eq!(config.aws_url(), DEFAULT_BACKEND_URL);
    assert_eq!(config.cache.local_ttl_secs, 3600);
    assert_eq!(config.cache.health_interval_secs, 30);
    assert_eq!(config.cache.key_prefix, "brmh:");
    assert_eq!(config.poller.interval(), Duration::from_millis(2000));
    assert_eq!(config.poller.max_empty_retries, 5);
    assert_eq!(config.lambda.max_attempts, 5);
    assert_eq!(config.lambda.retry_delay(), Duration::from_secs(5));
  }

  #[test]
  fn test_partial_yaml() {
    let config = Config::from_yaml(
      "backend_url: https://api.brmh.dev\ncache:\n  quota_bytes: 0\npoller:\n  interval_ms: 500\n",
    )
    .unwrap();
    assert_eq!(config.backend_url, "https://api.brmh.dev");
    assert_eq!(config.cache.quota(), None);
    assert_eq!(config.cache.local_ttl_secs, 3600);
    assert_eq!(config.poller.interval_ms, 500);
  }

  #[test]
  fn test_env_overrides_prefer_brmh_vars() {
    let config = Config::default()
      .with_env_overrides(env(&[
        ("NEXT_PUBLIC_BACKEND_URL", "http://next:1"),
        ("BRMH_BACKEND_URL", "http://brmh:2"),
        ("NEXT_PUBLIC_AWS_URL", "http://aws:3"),
      ]))
      .unwrap();
    assert_eq!(config.backend_url, "http://brmh:2");
    assert_eq!(config.aws_url(), "http://aws:3");
  }

  #[test]
  fn test_invalid_url_is_rejected() {
    let err = Config::default()
      .with_env_overrides(env(&[("BRMH_BACKEND_URL", "not a url")]))
      .unwrap_err();
    assert!(err.to_string().contains("Invalid backend URL"));
  }
}
