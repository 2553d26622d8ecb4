use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One row of the execution log table.
///
/// A row whose `exec_id` equals its `child_exec_id` is the parent of its
/// execution; every other row with the same `exec_id` is a child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLogRow {
  pub exec_id: String,
  pub child_exec_id: String,
  #[serde(default)]
  pub data: ExecutionData,
}

impl ExecutionLogRow {
  pub fn is_parent(&self) -> bool {
    self.exec_id == self.child_exec_id
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionData {
  #[serde(default)]
  pub iteration_no: i64,
  #[serde(default)]
  pub status: String,
  #[serde(default)]
  pub is_last: bool,
  #[serde(default)]
  pub timestamp: String,
  /// Step-specific payload (method name, request, response, error, ...)
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// A parent row together with its children, ordered by iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionGroup {
  pub exec_id: String,
  pub parent: Option<ExecutionLogRow>,
  pub children: Vec<ExecutionLogRow>,
}

impl ExecutionGroup {
  /// Status of the parent row, if it has arrived yet.
  pub fn status(&self) -> Option<&str> {
    self.parent.as_ref().map(|p| p.data.status.as_str())
  }
}
