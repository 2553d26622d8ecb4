//! Cache error types

use reqwest::StatusCode;

/// Errors raised inside a single cache tier.
///
/// These never leave [`TwoTierCache`](super::TwoTierCache); the facade logs them
/// and degrades to the other tier or to a miss.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  #[error("Local storage error: {0}")]
  Storage(#[from] rusqlite::Error),

  #[error("Local storage I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("Remote cache request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("Remote cache returned {0}")]
  Status(StatusCode),

  #[error("Local storage quota exceeded: {needed} bytes needed, quota is {quota}")]
  QuotaExceeded { needed: usize, quota: usize },

  #[error("Lock poisoned: {0}")]
  LockPoisoned(String),
}
