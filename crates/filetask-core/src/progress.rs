//! Task state, progress snapshots and state-change events.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::ErrorRecord;
use crate::overwrite::Conflict;
use crate::task::{TaskId, TaskKind};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TaskState {
    /// Created, `run()` not called yet.
    Pending,
    Running,
    Paused,
    Queued,
    /// Sampling the total size before the first unit of work.
    SizeDiscovery,
    /// Blocked until an overwrite decision arrives.
    QueryOverwrite,
    /// An error was just recorded; processing continues at the next checkpoint.
    Error,
    Finished,
}

impl TaskState {
    /// Whether the worker is (or will be, at its next checkpoint) making progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Running | Self::SizeDiscovery | Self::QueryOverwrite | Self::Error
        )
    }

    /// Whether the worker is parked at a checkpoint.
    pub fn is_held(&self) -> bool {
        matches!(self, Self::Paused | Self::Queued)
    }

    /// Check if this is the terminal state.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

/// How a finished task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
pub enum TaskOutcome {
    /// Every unit succeeded.
    Completed,
    /// Finished, but some units failed.
    #[strum(to_string = "Completed with errors")]
    CompletedWithErrors,
    /// Stopped or failed because of the error policy.
    Failed,
    /// Aborted on request.
    Aborted,
}

/// Consistent point-in-time copy of a task's progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Task identifier.
    pub id: TaskId,
    /// Operation kind.
    pub kind: TaskKind,
    /// Current state.
    pub state: TaskState,
    /// Outcome, once finished.
    pub outcome: Option<TaskOutcome>,
    /// Total bytes to process (None = unknown).
    pub total_bytes: Option<u64>,
    /// Bytes processed so far.
    pub bytes_done: u64,
    /// Total units to process (None = unknown).
    pub total_items: Option<u64>,
    /// Units completed so far.
    pub items_done: u64,
    /// Completion percentage (None = cannot be estimated).
    pub percent: Option<u8>,
    /// Smoothed throughput over the recent window, in bytes per second.
    pub current_speed: f64,
    /// Average throughput since start, in bytes per second.
    pub average_speed: f64,
    /// Running time, excluding paused and queued time.
    pub elapsed: Duration,
    /// Remaining time at the current speed.
    pub remaining_current: Option<Duration>,
    /// Remaining time at the average speed.
    pub remaining_average: Option<Duration>,
    /// Source of the unit being processed.
    pub current_source: Option<PathBuf>,
    /// Destination of the unit being processed.
    pub current_destination: Option<PathBuf>,
    /// Number of recorded errors.
    pub error_count: usize,
    /// The first recorded error.
    pub first_error: Option<ErrorRecord>,
    /// Most recent recorded errors.
    pub errors: Vec<ErrorRecord>,
    /// Collision waiting for a decision.
    pub pending_conflict: Option<Conflict>,
    /// Task log lines.
    pub log: Vec<String>,
}

impl ProgressSnapshot {
    /// Check if the task has any errors.
    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    /// Check if the total size could not be determined.
    pub fn size_unknown(&self) -> bool {
        self.total_bytes.is_none()
    }

    /// Get a human-readable summary of the task.
    pub fn summary(&self) -> String {
        let action = match self.kind {
            TaskKind::Copy => "Copied",
            TaskKind::Move => "Moved",
            TaskKind::Link => "Linked",
            TaskKind::Delete => "Deleted",
            TaskKind::Trash => "Trashed",
            TaskKind::Chmod => "Changed",
            TaskKind::Exec => "Ran",
        };

        match self.outcome {
            Some(TaskOutcome::Aborted) => format!(
                "Aborted after {} of {} items",
                self.items_done,
                self.total_items.map_or("?".to_string(), |t| t.to_string())
            ),
            _ if self.error_count == 0 => format!("{} {} items", action, self.items_done),
            _ => format!(
                "{} {} items, {} failed",
                action, self.items_done, self.error_count
            ),
        }
    }
}

/// Notification pushed to observers.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// The task moved between states.
    StateChanged {
        id: TaskId,
        from: TaskState,
        to: TaskState,
    },
    /// A collision is waiting for `resolve_overwrite`.
    OverwriteQuery { id: TaskId, conflict: Conflict },
    /// An error was recorded.
    ErrorRecorded { id: TaskId, record: ErrorRecord },
    /// The task finished.
    Finished { id: TaskId, outcome: TaskOutcome },
}

impl TaskEvent {
    /// The task this event belongs to.
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::StateChanged { id, .. }
            | Self::OverwriteQuery { id, .. }
            | Self::ErrorRecorded { id, .. }
            | Self::Finished { id, .. } => *id,
        }
    }
}
