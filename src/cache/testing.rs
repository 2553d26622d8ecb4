//! In-memory remote tier for tests.

use reqwest::StatusCode;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::error::CacheError;
use super::traits::RemoteCache;

pub struct FakeRemote {
  healthy: AtomicBool,
  failing: AtomicBool,
  ops_failing: AtomicBool,
  health_calls: AtomicUsize,
  data: Mutex<BTreeMap<String, Value>>,
}

impl FakeRemote {
  pub fn healthy() -> Self {
    Self {
      healthy: AtomicBool::new(true),
      failing: AtomicBool::new(false),
      ops_failing: AtomicBool::new(false),
      health_calls: AtomicUsize::new(0),
      data: Mutex::new(BTreeMap::new()),
    }
  }

  pub fn unhealthy() -> Self {
    let remote = Self::healthy();
    remote.set_healthy(false);
    remote
  }

  pub fn set_healthy(&self, healthy: bool) {
    self.healthy.store(healthy, Ordering::SeqCst);
  }

  /// Make every operation, including the probe, return an error.
  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  /// Make data operations fail while the probe keeps reporting healthy.
  pub fn set_ops_failing(&self, failing: bool) {
    self.ops_failing.store(failing, Ordering::SeqCst);
  }

  pub fn health_calls(&self) -> usize {
    self.health_calls.load(Ordering::SeqCst)
  }

  pub fn insert(&self, key: &str, value: Value) {
    self.data.lock().unwrap().insert(key.to_string(), value);
  }

  pub fn value(&self, key: &str) -> Option<Value> {
    self.data.lock().unwrap().get(key).cloned()
  }

  fn check(&self) -> Result<(), CacheError> {
    if self.failing.load(Ordering::SeqCst) {
      Err(CacheError::Status(StatusCode::SERVICE_UNAVAILABLE))
    } else {
      Ok(())
    }
  }

  fn check_op(&self) -> Result<(), CacheError> {
    self.check()?;
    if self.ops_failing.load(Ordering::SeqCst) {
      Err(CacheError::Status(StatusCode::INTERNAL_SERVER_ERROR))
    } else {
      Ok(())
    }
  }
}

impl RemoteCache for FakeRemote {
  async fn health(&self) -> Result<bool, CacheError> {
    self.health_calls.fetch_add(1, Ordering::SeqCst);
    self.check()?;
    Ok(self.healthy.load(Ordering::SeqCst))
  }

  async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
    self.check_op()?;
    Ok(self.value(key))
  }

  async fn set(&self, key: &str, value: &Value) -> Result<(), CacheError> {
    self.check_op()?;
    self.insert(key, value.clone());
    Ok(())
  }

  async fn del(&self, key: &str) -> Result<(), CacheError> {
    self.check_op()?;
    self.data.lock().unwrap().remove(key);
    Ok(())
  }

  async fn clear(&self, prefix: Option<&str>) -> Result<(), CacheError> {
    self.check_op()?;
    let prefix = prefix.unwrap_or("");
    self
      .data
      .lock()
      .unwrap()
      .retain(|k, _| !k.starts_with(prefix));
    Ok(())
  }
}
