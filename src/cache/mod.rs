//! Two-tier client-side cache.
//!
//! This module provides a best-effort acceleration layer that:
//! - Keeps a durable local copy of every write (SQLite, TTL-checked on read)
//! - Mirrors reads and writes to the backend's shared cache while it is healthy
//! - Probes backend health at most once per interval
//! - Never surfaces a failure to its caller

mod error;
mod health;
mod layer;
mod remote;
mod storage;
#[cfg(test)]
pub(crate) mod testing;
mod traits;

pub use error::CacheError;
pub use health::{HealthProber, HealthState, HEALTH_CHECK_INTERVAL};
pub use layer::TwoTierCache;
pub use remote::HttpRemoteCache;
pub use storage::{LocalStore, DEFAULT_QUOTA_BYTES, KEY_PREFIX, LOCAL_TTL};
pub use traits::{CacheSource, RemoteCache};
