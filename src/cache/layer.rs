//! Two-tier cache facade over a remote store and the durable local store.

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::error::CacheError;
use super::health::{HealthProber, HealthState};
use super::storage::LocalStore;
use super::traits::{CacheSource, RemoteCache};

/// Cache facade that favours availability over consistency.
///
/// - Writes land in the local store first, then best-effort in the remote
///   store when it is healthy.
/// - Reads prefer the remote store when it is healthy and fall back to the
///   local store on a miss or any failure.
///
/// Tier errors are `Result<_, CacheError>` internally and are absorbed by
/// [`fail_open`] at this boundary; none of the public methods can fail.
pub struct TwoTierCache<R: RemoteCache> {
  remote: R,
  local: LocalStore,
  health: HealthProber,
}

/// Log a tier failure and continue as if the operation had no effect.
fn fail_open<T>(
  result: Result<T, CacheError>,
  op: &str,
  tier: CacheSource,
  key: &str,
) -> Option<T> {
  match result {
    Ok(value) => Some(value),
    Err(e) => {
      warn!(op, %tier, key, error = %e, "cache tier failed, continuing");
      None
    }
  }
}

impl<R: RemoteCache> TwoTierCache<R> {
  pub fn new(remote: R, local: LocalStore, health: HealthProber) -> Self {
    Self {
      remote,
      local,
      health,
    }
  }

  /// Read `key`, preferring the remote tier.
  pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    self.get_with_source(key).await.map(|(value, _)| value)
  }

  /// Like [`get`](Self::get), also reporting which tier answered.
  pub async fn get_with_source<T: DeserializeOwned>(&self, key: &str) -> Option<(T, CacheSource)> {
    if self.health.is_healthy(&self.remote).await {
      match fail_open(self.remote_get(key).await, "get", CacheSource::Remote, key).flatten() {
        Some(value) => {
          debug!(key, "remote cache hit");
          return Some((value, CacheSource::Remote));
        }
        None => debug!(key, "remote cache miss"),
      }
    }

    let value = fail_open(self.local.read(key), "get", CacheSource::Local, key).flatten();
    if value.is_some() {
      debug!(key, "local cache hit");
    }
    value.map(|v| (v, CacheSource::Local))
  }

  async fn remote_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
    match self.remote.get(key).await? {
      Some(value) => Ok(Some(serde_json::from_value(value)?)),
      None => Ok(None),
    }
  }

  /// Store `value` locally, then remotely if the remote tier is healthy.
  pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
    let value = match serde_json::to_value(value) {
      Ok(value) => value,
      Err(e) => {
        warn!(key, error = %e, "value is not serializable, not cached");
        return;
      }
    };

    fail_open(self.local.write(key, &value), "set", CacheSource::Local, key);

    if self.health.is_healthy(&self.remote).await {
      fail_open(self.remote.set(key, &value).await, "set", CacheSource::Remote, key);
    }
  }

  pub async fn del(&self, key: &str) {
    fail_open(self.local.remove(key), "del", CacheSource::Local, key);

    if self.health.is_healthy(&self.remote).await {
      fail_open(self.remote.del(key).await, "del", CacheSource::Remote, key);
    }
  }

  /// Remove every entry whose key starts with `prefix` (everything when `None`).
  pub async fn clear(&self, prefix: Option<&str>) {
    let label = prefix.unwrap_or("*");
    if let Some(removed) = fail_open(self.local.clear(prefix), "clear", CacheSource::Local, label) {
      debug!(prefix = label, removed, "cleared local entries");
    }

    if self.health.is_healthy(&self.remote).await {
      fail_open(self.remote.clear(prefix).await, "clear", CacheSource::Remote, label);
    }
  }

  /// Probe (subject to throttling) and return the resulting health state.
  pub async fn health(&self) -> HealthState {
    self.health.is_healthy(&self.remote).await;
    self.health.state().await
  }

  pub fn local(&self) -> &LocalStore {
    &self.local
  }
}
