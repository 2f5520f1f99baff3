//! Task status state machine shared by analysis tasks and subtasks

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a task or subtask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created, not yet handed to a manager
    Pending,

    /// Handed to a manager
    Assigned,

    /// A worker is actively processing it
    InProgress,

    /// Finished with an output
    Completed,

    /// Gave up after exhausting recovery options
    Failed,

    /// Moved to another manager, about to be assigned again
    Reassigned,
}

impl TaskStatus {
    /// Whether no further transitions are allowed
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the task still counts as outstanding work
    pub const fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Check whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;

        match (self, next) {
            (Completed | Failed, _) => false,
            (_, Failed) => true,
            (Pending, Assigned) => true,
            (Pending | Assigned | InProgress, Reassigned) => true,
            (Assigned, InProgress) => true,
            (InProgress, Completed) => true,
            (Reassigned, Assigned) => true,
            _ => false,
        }
    }

    /// Wire name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Assigned => "ASSIGNED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Reassigned => "REASSIGNED",
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
