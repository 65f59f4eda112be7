use serde::{Deserialize, Serialize};
use strum::Display;

use crate::adapter::CellValue;

/// Identifies one worksheet tab.
pub type TabId = u64;

/// Identifies one spawned execution. Allocated from a process-wide counter;
/// the coordinator only applies an outcome when the id still matches the
/// tab's tracked task (supersession check).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "task-{}", self.0)
  }
}

/// Terminal result of one execution. Exactly one of these is produced per
/// task; states are final and mutually exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskOutcome {
  Succeeded { columns: Vec<String>, rows: Vec<Vec<CellValue>>, affected: u64, elapsed_ms: u64 },
  Failed { message: String, elapsed_ms: u64 },
  Cancelled { elapsed_ms: u64 },
  TimedOut { elapsed_ms: u64 },
}

impl TaskOutcome {
  pub fn elapsed_ms(&self) -> u64 {
    match self {
      TaskOutcome::Succeeded { elapsed_ms, .. }
      | TaskOutcome::Failed { elapsed_ms, .. }
      | TaskOutcome::Cancelled { elapsed_ms }
      | TaskOutcome::TimedOut { elapsed_ms } => *elapsed_ms,
    }
  }

  pub fn row_count(&self) -> u64 {
    match self {
      TaskOutcome::Succeeded { rows, affected, .. } => {
        if rows.is_empty() {
          *affected
        } else {
          rows.len() as u64
        }
      },
      _ => 0,
    }
  }
}

/// Messages delivered from worker tasks back to the single consuming loop on
/// the interactive thread. All shared state mutation happens while handling
/// one of these, never from a worker.
#[derive(Debug, Clone, PartialEq, Display, Serialize, Deserialize)]
pub enum EngineEvent {
  QuerySubmitted { tab: TabId, task: TaskId },
  QueryProgress { tab: TabId, task: TaskId, elapsed_ms: u64 },
  QueryFinished { tab: TabId, task: TaskId, outcome: TaskOutcome },
  ProcessStarted { pid: i64 },
  ProcessFinished { pid: i64, detail: String },
  ProcessFailed { pid: i64, detail: String },
}
