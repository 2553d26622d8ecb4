//! Core traits and types for the caching system.

use serde_json::Value;
use std::future::Future;

use super::error::CacheError;

/// A shared key-value cache reachable over the network.
///
/// Implementations report failures honestly; deciding to ignore them is the
/// facade's job.
pub trait RemoteCache: Send + Sync {
  /// Ask the backend whether the remote store is reachable.
  fn health(&self) -> impl Future<Output = Result<bool, CacheError>> + Send;

  /// Fetch the raw JSON stored under `key`. `Ok(None)` is a miss.
  fn get(&self, key: &str) -> impl Future<Output = Result<Option<Value>, CacheError>> + Send;

  /// Store `value` under `key`. Expiry is decided by the backend.
  fn set(&self, key: &str, value: &Value) -> impl Future<Output = Result<(), CacheError>> + Send;

  fn del(&self, key: &str) -> impl Future<Output = Result<(), CacheError>> + Send;

  /// Remove every key starting with `prefix`; `None` clears everything.
  fn clear(&self, prefix: Option<&str>)
    -> impl Future<Output = Result<(), CacheError>> + Send;
}

/// Indicates which tier answered a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Shared remote store
  Remote,
  /// Durable local store
  Local,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CacheSource::Remote => f.write_str("remote"),
      CacheSource::Local => f.write_str("local"),
    }
  }
}
