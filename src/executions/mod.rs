//! Execution log polling and grouping.

mod group;
mod poller;
mod types;

pub use group::{group_executions, is_terminal_status, TERMINAL_STATUSES};
pub use poller::{
  ExecutionIdStore, ExecutionPoller, ExecutionSource, PollerState, TerminalReason,
  MAX_EMPTY_RETRIES, POLL_INTERVAL,
};
pub use types::{ExecutionData, ExecutionGroup, ExecutionLogRow};

use tracing::warn;

use crate::backend::{BackendClient, BackendError};
use crate::cache::LocalStore;

/// Local storage key holding the execution being watched.
pub const CURRENT_EXECUTION_KEY: &str = "currentExecutionId";

impl ExecutionIdStore for LocalStore {
  fn load(&self) -> Option<String> {
    match self.get_item(CURRENT_EXECUTION_KEY) {
      Ok(id) => id.filter(|id| !id.is_empty()),
      Err(e) => {
        warn!(error = %e, "failed to read current execution id");
        None
      }
    }
  }

  fn save(&self, exec_id: &str) {
    if let Err(e) = self.set_item(CURRENT_EXECUTION_KEY, exec_id) {
      warn!(error = %e, "failed to persist current execution id");
    }
  }

  fn clear(&self) {
    if let Err(e) = self.remove_item(CURRENT_EXECUTION_KEY) {
      warn!(error = %e, "failed to clear current execution id");
    }
  }
}

impl ExecutionSource for BackendClient {
  async fn query(&self, exec_id: &str) -> Result<Vec<ExecutionLogRow>, BackendError> {
    self.query_executions(exec_id).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_local_store_persists_execution_id() {
    let store = LocalStore::in_memory().unwrap();
    assert_eq!(ExecutionIdStore::load(&store), None);

    ExecutionIdStore::save(&store, "exec-42");
    assert_eq!(ExecutionIdStore::load(&store).as_deref(), Some("exec-42"));
    assert_eq!(store.get_item("currentExecutionId").unwrap().as_deref(), Some("exec-42"));

    ExecutionIdStore::clear(&store);
    assert_eq!(ExecutionIdStore::load(&store), None);
  }
}
