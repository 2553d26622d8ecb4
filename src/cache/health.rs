//! Throttled reachability check for the remote cache tier.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::traits::RemoteCache;
use crate::clock::Clock;

/// Minimum time between two health probes.
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Last known health of the remote tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HealthState {
  pub is_healthy: bool,
  /// `None` until the first probe has run
  pub last_checked_at: Option<DateTime<Utc>>,
}

/// Remembers the outcome of the last probe and only asks again once the
/// interval has elapsed.
pub struct HealthProber {
  state: Mutex<HealthState>,
  interval: Duration,
  clock: Arc<dyn Clock>,
}

impl HealthProber {
  pub fn new(clock: Arc<dyn Clock>) -> Self {
    Self {
      state: Mutex::new(HealthState::default()),
      interval: HEALTH_CHECK_INTERVAL,
      clock,
    }
  }

  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = interval;
    self
  }

  /// Snapshot of the current state without probing.
  pub async fn state(&self) -> HealthState {
    *self.state.lock().await
  }

  /// Whether the remote tier is usable right now.
  ///
  /// Probe failures of any kind count as unhealthy. The state lock is held
  /// for the duration of a probe, so concurrent callers wait for its result
  /// instead of probing again.
  pub async fn is_healthy<R: RemoteCache>(&self, remote: &R) -> bool {
    let mut state = self.state.lock().await;
    let now = self.clock.now();

    // A clock that stepped backwards forces a fresh probe
    if let Some(last) = state.last_checked_at {
      let elapsed_ms = (now - last).num_milliseconds();
      if (0..self.interval.as_millis() as i64).contains(&elapsed_ms) {
        return state.is_healthy;
      }
    }

    let healthy = match remote.health().await {
      Ok(healthy) => healthy,
      Err(e) => {
        warn!(error = %e, "remote cache health check failed");
        false
      }
    };

    if healthy != state.is_healthy {
      debug!(healthy, "remote cache health changed");
    }

    state.is_healthy = healthy;
    state.last_checked_at = Some(now);
    healthy
  }
}
