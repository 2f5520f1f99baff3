//! Agent outputs, result collections and synthesized final results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::agents::AgentId;

/// Metadata key holding the producing task ID
pub const META_TASK_ID: &str = "task_id";

/// Metadata key holding the producing component label
pub const META_COMPONENT: &str = "component";

/// Component label used when an output does not declare one
pub const DEFAULT_COMPONENT: &str = "general";

// ============================================================================
// Confidence
// ============================================================================

/// Ordered confidence scale, `High > Medium > Low > Uncertain`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceLevel {
    Uncertain,
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    /// Map a quality score in [0, 1] onto the confidence scale
    pub fn from_quality(quality: f64) -> Self {
        if (0.8..=1.0).contains(&quality) {
            Self::High
        } else if (0.6..0.8).contains(&quality) {
            Self::Medium
        } else if (0.4..0.6).contains(&quality) {
            Self::Low
        } else {
            Self::Uncertain
        }
    }

    /// Parse a free-text label, case-insensitively
    pub fn parse_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" | "moderate" => Some(Self::Medium),
            "low" => Some(Self::Low),
            "uncertain" | "unknown" => Some(Self::Uncertain),
            _ => None,
        }
    }

    /// Wire name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::Uncertain => "UNCERTAIN",
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Agent Output
// ============================================================================

/// Result of one unit of work. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    content: serde_json::Value,
    confidence: ConfidenceLevel,
    reasoning: Option<String>,
    metadata: HashMap<String, String>,
    timestamp: DateTime<Utc>,
}

impl AgentOutput {
    /// Create an output tagged with the producing task and component
    pub fn new(
        task_id: impl Into<String>,
        component: impl Into<String>,
        content: serde_json::Value,
        confidence: ConfidenceLevel,
    ) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(META_TASK_ID.to_string(), task_id.into());
        metadata.insert(META_COMPONENT.to_string(), component.into());

        Self {
            content,
            confidence,
            reasoning: None,
            metadata,
            timestamp: Utc::now(),
        }
    }

    /// Attach reasoning
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Override the timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn content(&self) -> &serde_json::Value {
        &self.content
    }

    pub fn confidence(&self) -> ConfidenceLevel {
        self.confidence
    }

    pub fn reasoning(&self) -> Option<&str> {
        self.reasoning.as_deref()
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Producing task ID
    pub fn task_id(&self) -> Option<&str> {
        self.metadata.get(META_TASK_ID).map(String::as_str)
    }

    /// Producing component label, `"general"` when absent
    pub fn component(&self) -> &str {
        self.metadata
            .get(META_COMPONENT)
            .map(String::as_str)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_COMPONENT)
    }
}

// ============================================================================
// Result Collection
// ============================================================================

/// Metadata describing who contributed to a collection and when
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionMetadata {
    pub worker_ids: Vec<AgentId>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Batch of outputs produced for one task, built transiently for synthesis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResultCollection {
    pub task_id: String,
    pub outputs: Vec<AgentOutput>,
    pub metadata: CollectionMetadata,
}

impl AgentResultCollection {
    /// Build a collection, deriving the time window from the outputs
    pub fn new(task_id: impl Into<String>, outputs: Vec<AgentOutput>, worker_ids: Vec<AgentId>) -> Self {
        let now = Utc::now();
        let started_at = outputs.iter().map(AgentOutput::timestamp).min().unwrap_or(now);
        let finished_at = outputs.iter().map(AgentOutput::timestamp).max().unwrap_or(now);

        Self {
            task_id: task_id.into(),
            outputs,
            metadata: CollectionMetadata {
                worker_ids,
                started_at,
                finished_at,
            },
        }
    }

    /// Group outputs by component label, preserving arrival order in each group
    pub fn group_by_component(&self) -> BTreeMap<String, Vec<&AgentOutput>> {
        let mut groups: BTreeMap<String, Vec<&AgentOutput>> = BTreeMap::new();
        for output in &self.outputs {
            groups.entry(output.component().to_string()).or_default().push(output);
        }
        groups
    }
}

// ============================================================================
// Final Result
// ============================================================================

/// Synthesis bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisMetadata {
    /// Job the synthesis belongs to
    pub job_id: String,

    /// Number of outputs merged
    pub component_count: usize,

    /// Distinct component labels merged
    pub component_types: Vec<String>,

    /// Agents whose reports were merged
    #[serde(default)]
    pub contributors: Vec<AgentId>,

    /// When the synthesis ran
    pub synthesized_at: DateTime<Utc>,

    /// Whether the deterministic fallback produced this result
    pub fallback: bool,
}

/// Synthesized deliverable for one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalResult {
    /// Executive summary
    pub summary: String,

    /// Section name to structured content
    pub sections: BTreeMap<String, serde_json::Value>,

    /// Cross-cutting insights, most important first
    pub insights: Vec<String>,

    /// Overall confidence
    pub confidence: ConfidenceLevel,

    pub metadata: SynthesisMetadata,

    pub timestamp: DateTime<Utc>,
}
