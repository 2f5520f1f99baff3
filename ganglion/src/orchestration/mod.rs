//! Orchestration Engine
//!
//! Hierarchical supervisor/manager orchestration of analysis tasks.
//!
//! # Features
//!
//! - Oracle-driven task decomposition with a single-subtask fallback
//! - Capacity- and performance-aware manager assignment
//! - Escalation handling (reassign, guide, decompose, abandon, resolve directly)
//! - Conversational routing between analysis teams
//! - Progressive result synthesis with a deterministic fallback merge

pub mod manager_registry;
pub mod prompts;
pub mod decomposition;
pub mod direct;
pub mod escalation;
pub mod routing;
pub mod result_synthesizer;
pub mod supervisor;

pub use manager_registry::*;
pub use decomposition::*;
pub use direct::*;
pub use escalation::*;
pub use routing::*;
pub use result_synthesizer::*;
pub use supervisor::*;

use crate::coordination::CoordinationError;
use crate::oracle::OracleError;
use crate::tasks::{GoalType, TaskError};

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Orchestration errors
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("Unsupported task type for direct processing: {goal_type}")]
    UnsupportedTaskType { goal_type: GoalType },

    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
