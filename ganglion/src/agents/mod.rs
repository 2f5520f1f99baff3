//! Agent Identities and Expertise
//!
//! Every actor in the hierarchy (the supervisor, its managers and the workers
//! they oversee) is addressed by an [`AgentId`]. Managers advertise the
//! [`Expertise`] areas they cover; tasks are routed to managers by expertise.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod expertise;

pub use expertise::*;

/// Unique identifier for an agent
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(String);

impl AgentId {
    /// Create a new unique agent ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from string (for deserialization/testing)
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Supervisor ID used when no explicit one is configured
    pub fn supervisor() -> Self {
        Self("supervisor".to_string())
    }

    /// Synthesize a placeholder manager ID for degraded assignment
    pub fn placeholder_manager() -> Self {
        Self(format!(
            "{}{}",
            PLACEHOLDER_MANAGER_PREFIX,
            chrono::Utc::now().timestamp_millis()
        ))
    }

    /// Whether this ID was synthesized because no manager was available
    pub fn is_placeholder(&self) -> bool {
        self.0.starts_with(PLACEHOLDER_MANAGER_PREFIX)
    }

    /// Borrow the raw string form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

const PLACEHOLDER_MANAGER_PREFIX: &str = "manager-placeholder-";

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
