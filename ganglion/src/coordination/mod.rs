//! Inter-Actor Coordination
//!
//! Actors (supervisor, managers, workers) communicate exclusively through the
//! [`MessageBus`]. Messages are append-only event records: the bus keeps an
//! ordered history and never mutates a message after it is sent.

pub mod message_bus;

pub use message_bus::*;

/// Result type for coordination operations
pub type Result<T> = std::result::Result<T, CoordinationError>;

/// Coordination errors
#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Message {message_id} has no recipients")]
    NoRecipients { message_id: String },

    #[error("Communication error: {0}")]
    CommunicationError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
