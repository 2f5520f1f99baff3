//! Ganglion - Hierarchical Analysis Orchestration
//!
//! Ganglion coordinates a tree of specialized analysis workers, grouped under
//! managers and overseen by a single supervisor, that cooperatively produce a
//! structured analysis of a long-form transcript.
//!
//! # Architecture
//!
//! - `agents` - Agent identifiers and expertise areas
//! - `tasks` - Analysis tasks, subtasks, their status machine and outputs
//! - `coordination` - Message bus for actor-to-actor communication
//! - `oracle` - Language-generation oracle interface and structured calls
//! - `orchestration` - Supervisor, manager registry, escalation, routing and synthesis
//! - `state` - Versioned key-value store interface for job snapshots
//! - `config` - Configuration loading and environment overrides
//! - `telemetry` - Logging bootstrap

#![warn(missing_docs)]

pub mod agents;
pub mod tasks;
pub mod coordination;
pub mod oracle;
pub mod orchestration;
pub mod state;

pub mod config;
pub mod telemetry;

// Re-export key types
pub use agents::{AgentId, Expertise};
pub use config::GanglionConfig;
pub use coordination::{AgentMessage, MessageBus, MessageKind, Recipients};
pub use oracle::{Oracle, OracleGateway};
pub use orchestration::{OrchestrationError, Supervisor};
pub use tasks::{AnalysisTask, ConfidenceLevel, FinalResult, SubTask, TaskStatus};

/// Ganglion version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
