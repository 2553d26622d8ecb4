use super::types::{ExecutionGroup, ExecutionLogRow};

/// Parent statuses after which an execution will not change again.
pub const TERMINAL_STATUSES: [&str; 2] = ["completed", "error"];

pub fn is_terminal_status(status: &str) -> bool {
  TERMINAL_STATUSES.contains(&status)
}

/// Group log rows by execution.
///
/// The parent of each group is the row whose two ids are equal; nothing
/// else is consulted. Children are sorted by ascending iteration number,
/// keeping arrival order for ties. Groups appear in the order their
/// execution id was first seen.
pub fn group_executions(rows: Vec<ExecutionLogRow>) -> Vec<ExecutionGroup> {
  let mut groups: Vec<ExecutionGroup> = Vec::new();

  for row in rows {
    let idx = match groups.iter().position(|g| g.exec_id == row.exec_id) {
      Some(idx) => idx,
      None => {
        groups.push(ExecutionGroup {
          exec_id: row.exec_id.clone(),
          parent: None,
          children: Vec::new(),
        });
        groups.len() - 1
      }
    };

    let group = &mut groups[idx];
    if row.is_parent() {
      group.parent = Some(row);
    } else {
      group.children.push(row);
    }
  }

  for group in &mut groups {
    group.children.sort_by_key(|c| c.data.iteration_no);
  }

  groups
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::executions::types::ExecutionData;

  fn row(exec_id: &str, child: &str, iteration_no: i64, status: &str) -> ExecutionLogRow {
    ExecutionLogRow {
      exec_id: exec_id.to_string(),
      child_exec_id: child.to_string(),
      data: ExecutionData {
        iteration_no,
        status: status.to_string(),
        ..Default::default()
      },
    }
  }

  #[test]
  fn test_children_sorted_by_iteration() {
    let groups = group_executions(vec![
      row("e1", "c3", 3, "completed"),
      row("e1", "e1", 0, "inProgress"),
      row("e1", "c1", 1, "completed"),
      row("e1", "c2", 2, "completed"),
    ]);

    assert_eq!(groups.len(), 1);
    let group = &groups[0];
    assert_eq!(group.status(), Some("inProgress"));
    let order: Vec<i64> = group.children.iter().map(|c| c.data.iteration_no).collect();
    assert_eq!(order, vec![1, 2, 3]);
  }

  #[test]
  fn test_parent_is_decided_by_id_equality_only() {
    let groups = group_executions(vec![row("e1", "c1", 0, "completed")]);
    assert!(groups[0].parent.is_none());
    assert_eq!(groups[0].children.len(), 1);
  }

  #[test]
  fn test_multiple_executions_keep_first_seen_order() {
    let groups = group_executions(vec![
      row("b", "b", 0, "inProgress"),
      row("a", "a1", 1, "completed"),
      row("b", "b1", 1, "completed"),
    ]);

    let ids: Vec<&str> = groups.iter().map(|g| g.exec_id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);
    assert_eq!(groups[0].children.len(), 1);
  }

  #[test]
  fn test_terminal_statuses() {
    assert!(is_terminal_status("completed"));
    assert!(is_terminal_status("error"));
    assert!(!is_terminal_status("inProgress"));
    assert!(!is_terminal_status("Completed"));
  }
}
