//! Polls the execution log until an execution finishes.
//!
//! Each poll is awaited before the next one is scheduled, so a slow backend
//! can never have two queries for the same execution in flight.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::group::{group_executions, is_terminal_status};
use super::types::{ExecutionGroup, ExecutionLogRow};
use crate::backend::BackendError;

/// Pause between two polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Consecutive empty results tolerated before giving up.
pub const MAX_EMPTY_RETRIES: u32 = 5;

/// Where log rows come from.
pub trait ExecutionSource: Send + Sync {
  fn query(
    &self,
    exec_id: &str,
  ) -> impl Future<Output = Result<Vec<ExecutionLogRow>, BackendError>> + Send;
}

/// Persisted "current execution" marker, used to resume polling after a
/// restart.
pub trait ExecutionIdStore: Send + Sync {
  fn load(&self) -> Option<String>;
  fn save(&self, exec_id: &str);
  fn clear(&self);
}

/// Why polling stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalReason {
  /// The parent row reached a terminal status
  Finished { status: String },
  /// Too many polls in a row came back empty
  EmptyRetriesExhausted,
  /// A query failed; polling does not continue past errors
  QueryFailed(String),
}

impl std::fmt::Display for TerminalReason {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      TerminalReason::Finished { status } => write!(f, "execution finished with status {}", status),
      TerminalReason::EmptyRetriesExhausted => f.write_str("no execution rows found, gave up"),
      TerminalReason::QueryFailed(e) => write!(f, "execution query failed: {}", e),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerState {
  Idle,
  Polling { exec_id: String, empty_retries: u32 },
  Terminal(TerminalReason),
}

impl PollerState {
  pub fn polling(exec_id: impl Into<String>) -> Self {
    PollerState::Polling {
      exec_id: exec_id.into(),
      empty_retries: 0,
    }
  }

  /// Apply one poll result. Returns the next state and, for non-empty
  /// results, the grouped rows of the polled execution.
  ///
  /// `Idle` and `Terminal` ignore results.
  pub fn on_poll(
    self,
    result: Result<Vec<ExecutionLogRow>, BackendError>,
    max_empty_retries: u32,
  ) -> (PollerState, Option<ExecutionGroup>) {
    let (exec_id, empty_retries) = match self {
      PollerState::Polling {
        exec_id,
        empty_retries,
      } => (exec_id, empty_retries),
      other => return (other, None),
    };

    let rows = match result {
      Ok(rows) => rows,
      Err(e) => return (PollerState::Terminal(TerminalReason::QueryFailed(e.to_string())), None),
    };

    // Rows of other executions do not count as progress for this one
    let mut groups = group_executions(rows);
    let group = match groups.iter().position(|g| g.exec_id == exec_id) {
      Some(idx) => groups.swap_remove(idx),
      None => {
        let empty_retries = empty_retries + 1;
        if empty_retries >= max_empty_retries {
          return (PollerState::Terminal(TerminalReason::EmptyRetriesExhausted), None);
        }
        return (
          PollerState::Polling {
            exec_id,
            empty_retries,
          },
          None,
        );
      }
    };

    let next = match group.status() {
      Some(status) if is_terminal_status(status) => PollerState::Terminal(TerminalReason::Finished {
        status: status.to_string(),
      }),
      _ => PollerState::Polling {
        exec_id,
        empty_retries: 0,
      },
    };

    (next, Some(group))
  }
}

/// Drives [`PollerState`] against a live source.
pub struct ExecutionPoller<S, I> {
  source: S,
  ids: I,
  interval: Duration,
  max_empty_retries: u32,
}

impl<S: ExecutionSource, I: ExecutionIdStore> ExecutionPoller<S, I> {
  pub fn new(source: S, ids: I) -> Self {
    Self {
      source,
      ids,
      interval: POLL_INTERVAL,
      max_empty_retries: MAX_EMPTY_RETRIES,
    }
  }

  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = interval;
    self
  }

  pub fn with_max_empty_retries(mut self, max_empty_retries: u32) -> Self {
    self.max_empty_retries = max_empty_retries.max(1);
    self
  }

  pub fn ids(&self) -> &I {
    &self.ids
  }

  /// Remember `exec_id` and poll it to completion.
  pub async fn start<F>(&self, exec_id: &str, on_update: F) -> TerminalReason
  where
    F: FnMut(&ExecutionGroup),
  {
    self.ids.save(exec_id);
    self.run(exec_id, on_update).await
  }

  /// Resume polling the persisted execution, if there is one.
  pub async fn resume<F>(&self, on_update: F) -> Option<TerminalReason>
  where
    F: FnMut(&ExecutionGroup),
  {
    let exec_id = self.ids.load()?;
    info!(exec_id = %exec_id, "resuming execution polling");
    Some(self.run(&exec_id, on_update).await)
  }

  async fn run<F>(&self, exec_id: &str, mut on_update: F) -> TerminalReason
  where
    F: FnMut(&ExecutionGroup),
  {
    let mut state = PollerState::polling(exec_id);

    loop {
      let result = self.source.query(exec_id).await;
      if let Err(e) = &result {
        warn!(exec_id, error = %e, "execution query failed");
      }

      let (next, update) = state.on_poll(result, self.max_empty_retries);
      if let Some(group) = &update {
        debug!(exec_id, children = group.children.len(), status = ?group.status(), "execution update");
        on_update(group);
      }

      match next {
        PollerState::Terminal(reason) => {
          info!(exec_id, %reason, "stopped polling execution");
          self.ids.clear();
          return reason;
        }
        PollerState::Polling { empty_retries, .. } if empty_retries > 0 => {
          debug!(exec_id, empty_retries, "no execution rows yet");
        }
        _ => {}
      }

      state = next;
      tokio::time::sleep(self.interval).await;
    }
  }
}
