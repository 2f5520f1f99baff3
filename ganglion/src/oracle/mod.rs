//! Language-Generation Oracle
//!
//! The oracle is the external service consulted for decomposition, escalation
//! decisions, routing decisions and synthesis text. Every call is treated as
//! possibly slow, failing or malformed; call sites go through
//! [`OracleGateway::call_with_fallback`] so each one has a named fallback.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod gateway;
pub mod json;
pub mod scripted;

pub use gateway::*;
pub use json::*;
pub use scripted::*;

/// Language-generation service
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Submit a prompt, optionally constrained by a decision tool
    async fn complete(&self, request: OracleRequest) -> Result<OracleResponse, OracleError>;
}

/// Integration point an oracle call originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallSite {
    Decomposition,
    Escalation,
    Routing,
    Synthesis,
    DirectProcessing,
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Decomposition => "decomposition",
            Self::Escalation => "escalation",
            Self::Routing => "routing",
            Self::Synthesis => "synthesis",
            Self::DirectProcessing => "direct_processing",
        };
        f.write_str(name)
    }
}

/// Constrained decision schema offered to the oracle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTool {
    pub name: String,
    pub description: String,

    /// JSON schema of the decision object
    pub parameters: serde_json::Value,
}

/// Request sent to the oracle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleRequest {
    pub call_site: CallSite,
    pub prompt: String,
    pub decision_tool: Option<DecisionTool>,
}

impl OracleRequest {
    /// Free-text request
    pub fn text(call_site: CallSite, prompt: impl Into<String>) -> Self {
        Self {
            call_site,
            prompt: prompt.into(),
            decision_tool: None,
        }
    }

    /// Request constrained by a decision tool
    pub fn with_tool(mut self, tool: DecisionTool) -> Self {
        self.decision_tool = Some(tool);
        self
    }
}

/// Oracle reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OracleResponse {
    /// Free text
    Text(String),

    /// Structured decision produced through a decision tool
    Decision(serde_json::Value),
}

impl OracleResponse {
    /// Text body, if any
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Decision(_) => None,
        }
    }

    /// Best-effort JSON object: the decision itself, or one extracted from text
    pub fn into_json(self) -> Option<serde_json::Value> {
        match self {
            Self::Decision(value) => Some(value),
            Self::Text(text) => extract_json_object(&text),
        }
    }
}

/// Oracle errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum OracleError {
    #[error("Oracle call failed: {0}")]
    CallFailed(String),

    #[error("Oracle call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Malformed oracle response: {0}")]
    Malformed(String),
}
