//! Task Model
//!
//! Top-level [`AnalysisTask`]s, their [`SubTask`] decompositions, the shared
//! [`TaskStatus`] state machine, agent outputs and the synthesized
//! [`FinalResult`]. The [`TaskBoard`] owns every live task and serializes
//! mutations per task id.
//!
//! # State Machine
//!
//! ```text
//! Pending -> Assigned -> InProgress -> Completed*
//!    |          |            |
//!    +----------+------------+--> Failed*
//!    |          |            |
//!    +-> Reassigned <--------+
//!            |
//!            +--> Assigned
//! ```

pub mod status;
pub mod model;
pub mod output;
pub mod board;

pub use status::*;
pub use model::*;
pub use output::*;
pub use board::*;

/// Result type for task model operations
pub type Result<T> = std::result::Result<T, TaskError>;

/// Task model errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task {task_id} is already {status}")]
    Terminal { task_id: String, status: TaskStatus },
}
