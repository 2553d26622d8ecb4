//! Durable local key-value store backed by SQLite.
//!
//! Modelled on browser `localStorage`: a flat string-to-string table. Cache
//! entries are namespaced with a key prefix and wrapped in a JSON envelope
//! carrying the write time, so stale entries can be dropped lazily on read.
//! Un-enveloped "raw" items share the same table for small bits of session
//! state such as the current execution id.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use super::error::CacheError;
use crate::clock::{Clock, SystemClock};

/// Namespace prepended to every cache key.
pub const KEY_PREFIX: &str = "brmh:";

/// Local entries older than this are treated as absent.
pub const LOCAL_TTL: Duration = Duration::from_secs(3600);

/// Default storage budget, matching the usual per-origin browser quota.
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

/// On-disk shape of a cache entry.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
  data: T,
  /// Epoch milliseconds of the write
  timestamp: i64,
}

/// SQLite-based local store.
pub struct LocalStore {
  conn: Mutex<Connection>,
  clock: Arc<dyn Clock>,
  prefix: String,
  ttl: Duration,
  quota_bytes: Option<usize>,
}

/// Schema for the local store.
const LOCAL_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS local_storage (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

impl LocalStore {
  /// Open (or create) a store at `path`.
  pub fn open(path: &Path) -> Result<Self, CacheError> {
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }

    Self::from_connection(Connection::open(path)?)
  }

  /// Open the store at the default data-directory location.
  pub fn open_default() -> Result<Self, CacheError> {
    Self::open(&Self::default_path())
  }

  /// A throwaway store, mostly for tests.
  pub fn in_memory() -> Result<Self, CacheError> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  /// Default database path: `$XDG_DATA_HOME/brmh/cache.db`.
  pub fn default_path() -> PathBuf {
    dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .unwrap_or_else(|| PathBuf::from("."))
      .join("brmh")
      .join("cache.db")
  }

  fn from_connection(conn: Connection) -> Result<Self, CacheError> {
    conn.execute_batch(LOCAL_SCHEMA)?;

    Ok(Self {
      conn: Mutex::new(conn),
      clock: Arc::new(SystemClock),
      prefix: KEY_PREFIX.to_string(),
      ttl: LOCAL_TTL,
      quota_bytes: Some(DEFAULT_QUOTA_BYTES),
    })
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.prefix = prefix.into();
    self
  }

  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  /// Cap the total stored bytes. `None` disables the check.
  pub fn with_quota(mut self, quota_bytes: Option<usize>) -> Self {
    self.quota_bytes = quota_bytes;
    self
  }

  pub fn prefix(&self) -> &str {
    &self.prefix
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
    self
      .conn
      .lock()
      .map_err(|e| CacheError::LockPoisoned(e.to_string()))
  }

  fn full_key(&self, key: &str) -> String {
    format!("{}{}", self.prefix, key)
  }

  /// Read a cache entry. Expired or corrupt entries are deleted and reported
  /// as missing.
  pub fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
    let full_key = self.full_key(key);
    let raw = match self.get_item(&full_key)? {
      Some(raw) => raw,
      None => return Ok(None),
    };

    let envelope: Envelope<Value> = match serde_json::from_str(&raw) {
      Ok(envelope) => envelope,
      Err(e) => {
        debug!(key = %full_key, error = %e, "dropping unreadable local entry");
        self.remove_item(&full_key)?;
        return Ok(None);
      }
    };

    let age = self.clock.now_millis() - envelope.timestamp;
    if age > self.ttl.as_millis() as i64 {
      debug!(key = %full_key, age_ms = age, "local entry expired");
      self.remove_item(&full_key)?;
      return Ok(None);
    }

    Ok(Some(serde_json::from_value(envelope.data)?))
  }

  /// Write a cache entry stamped with the current time.
  pub fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), CacheError> {
    let envelope = Envelope {
      data: value,
      timestamp: self.clock.now_millis(),
    };
    let raw = serde_json::to_string(&envelope)?;
    self.set_item(&self.full_key(key), &raw)
  }

  pub fn remove(&self, key: &str) -> Result<(), CacheError> {
    self.remove_item(&self.full_key(key))
  }

  /// Remove every entry whose key starts with the store prefix followed by
  /// `sub_prefix`. Returns how many entries were removed.
  pub fn clear(&self, sub_prefix: Option<&str>) -> Result<usize, CacheError> {
    let pattern = self.full_key(sub_prefix.unwrap_or(""));
    let conn = self.conn()?;

    let keys: Vec<String> = {
      let mut stmt = conn.prepare("SELECT key FROM local_storage")?;
      let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
      let all: Vec<String> = rows.collect::<Result<_, _>>()?;
      all.into_iter().filter(|k| k.starts_with(&pattern)).collect()
    };

    for key in &keys {
      conn.execute("DELETE FROM local_storage WHERE key = ?", params![key])?;
    }

    Ok(keys.len())
  }

  /// Cache keys currently stored, without the prefix.
  pub fn keys(&self) -> Result<Vec<String>, CacheError> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare("SELECT key FROM local_storage ORDER BY key")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let all: Vec<String> = rows.collect::<Result<_, _>>()?;
    Ok(
      all
        .iter()
        .filter_map(|k| k.strip_prefix(&self.prefix).map(String::from))
        .collect(),
    )
  }

  /// Read an un-enveloped item by its exact key.
  pub fn get_item(&self, key: &str) -> Result<Option<String>, CacheError> {
    let conn = self.conn()?;
    let value = conn
      .query_row(
        "SELECT value FROM local_storage WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  /// Write an un-enveloped item under its exact key, subject to the quota.
  pub fn set_item(&self, key: &str, value: &str) -> Result<(), CacheError> {
    let conn = self.conn()?;

    if let Some(quota) = self.quota_bytes {
      let others: i64 = conn.query_row(
        "SELECT COALESCE(SUM(LENGTH(key) + LENGTH(value)), 0) FROM local_storage WHERE key != ?",
        params![key],
        |row| row.get(0),
      )?;
      let needed = others.max(0) as usize + key.len() + value.len();
      if needed > quota {
        return Err(CacheError::QuotaExceeded { needed, quota });
      }
    }

    conn.execute(
      "INSERT OR REPLACE INTO local_storage (key, value) VALUES (?, ?)",
      params![key, value],
    )?;
    Ok(())
  }

  pub fn remove_item(&self, key: &str) -> Result<(), CacheError> {
    let conn = self.conn()?;
    conn.execute("DELETE FROM local_storage WHERE key = ?", params![key])?;
    Ok(())
  }
}
