//! Analysis tasks and subtasks

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::agents::{AgentId, Expertise};
use super::{AgentOutput, Result, TaskError, TaskStatus};

// ============================================================================
// Goal Types
// ============================================================================

/// Kind of analysis a task asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    /// Main topics and their progression
    TopicExtraction,
    /// Sentiment and tone
    SentimentAnalysis,
    /// Named entities
    EntityRecognition,
    /// Key points
    KeyPoints,
    /// Condensed summary
    Summary,
    /// Action items and decisions
    ActionItems,
    /// Composite job covering the whole transcript
    FullAnalysis,
}

impl GoalType {
    /// Wire name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TopicExtraction => "topic_extraction",
            Self::SentimentAnalysis => "sentiment_analysis",
            Self::EntityRecognition => "entity_recognition",
            Self::KeyPoints => "key_points",
            Self::Summary => "summary",
            Self::ActionItems => "action_items",
            Self::FullAnalysis => "full_analysis",
        }
    }

    /// Expertise responsible for this goal, if it is a specialist goal
    pub const fn expertise(self) -> Option<Expertise> {
        match self {
            Self::TopicExtraction => Some(Expertise::TopicAnalysis),
            Self::SentimentAnalysis => Some(Expertise::SentimentAnalysis),
            Self::EntityRecognition => Some(Expertise::EntityExtraction),
            Self::KeyPoints => Some(Expertise::KeyPointExtraction),
            Self::Summary => Some(Expertise::Summarization),
            Self::ActionItems => Some(Expertise::ActionItemExtraction),
            Self::FullAnalysis => None,
        }
    }

    /// Whether the supervisor can process this goal without delegation
    pub const fn is_directly_processable(self) -> bool {
        self.expertise().is_some()
    }

    /// Empty structure a specialist returns when its output cannot be parsed
    pub fn default_output(self) -> serde_json::Value {
        match self {
            Self::TopicExtraction => serde_json::json!({ "topics": [] }),
            Self::SentimentAnalysis => serde_json::json!({
                "overall": "neutral",
                "score": 0.0,
                "segments": [],
            }),
            Self::EntityRecognition => serde_json::json!({ "entities": [] }),
            Self::KeyPoints => serde_json::json!({ "key_points": [] }),
            Self::Summary => serde_json::json!({ "summary": "" }),
            Self::ActionItems => serde_json::json!({ "action_items": [] }),
            Self::FullAnalysis => serde_json::json!({}),
        }
    }
}

impl fmt::Display for GoalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Next `updated` value: the current time, forced strictly past `previous`
fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

// ============================================================================
// Analysis Task
// ============================================================================

/// Top-level unit of work owned by the supervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisTask {
    /// Task ID
    pub id: String,

    /// Requested analysis
    pub goal_type: GoalType,

    /// Current status
    pub status: TaskStatus,

    /// Agent currently responsible, if any
    pub assigned_to: Option<AgentId>,

    /// Opaque input payload (typically the transcript)
    pub input: serde_json::Value,

    /// Output once completed
    pub output: Option<AgentOutput>,

    /// Priority, lower is more urgent
    pub priority: u8,

    /// IDs of tasks this one depends on
    pub dependencies: Vec<String>,

    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl AnalysisTask {
    /// Create a pending task with a fresh ID
    pub fn new(goal_type: GoalType, input: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            goal_type,
            status: TaskStatus::Pending,
            assigned_to: None,
            input,
            output: None,
            priority: 3,
            dependencies: Vec::new(),
            created: now,
            updated: now,
        }
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Set the dependency list
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Apply a status transition, bumping `updated`
    pub fn transition_to(&mut self, next: TaskStatus) -> Result<()> {
        if self.status.is_terminal() {
            return Err(TaskError::Terminal {
                task_id: self.id.clone(),
                status: self.status,
            });
        }
        if !self.status.can_transition_to(next) {
            return Err(TaskError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Record the output and walk the task to `Completed`
    pub fn complete(&mut self, output: AgentOutput) -> Result<()> {
        advance_to_in_progress(&self.id, &mut self.status)?;
        self.output = Some(output);
        self.transition_to(TaskStatus::Completed)
    }

    /// Mark the task failed
    pub fn fail(&mut self) -> Result<()> {
        self.transition_to(TaskStatus::Failed)
    }

    /// Bump `updated`
    pub fn touch(&mut self) {
        self.updated = next_timestamp(self.updated);
    }
}

// ============================================================================
// SubTask
// ============================================================================

/// Free-form context carried by a subtask
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubTaskContext {
    /// Raw description proposed during decomposition
    pub description: String,

    /// Expertise the subtask requires
    pub expertise: Expertise,

    /// Dependency subtask IDs (descriptions until resolution completes)
    pub dependencies: Vec<String>,

    /// Additional context (escalation notes, parent input copies, ...)
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Decomposition of an analysis task, owned by a manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    /// Subtask ID
    pub id: String,

    /// Parent analysis task; never changes after creation
    parent_task_id: String,

    /// Requested analysis
    pub goal_type: GoalType,

    /// Current status
    pub status: TaskStatus,

    /// Manager currently responsible
    pub managed_by: AgentId,

    /// Output once completed
    pub output: Option<AgentOutput>,

    /// Description, expertise and dependencies
    pub context: SubTaskContext,

    /// Priority, lower is more urgent
    pub priority: u8,

    /// Number of reassignments
    pub attempts: u32,

    /// Number of escalations raised against this subtask
    pub escalations: u32,

    /// Managers that previously held this subtask, oldest first
    pub previously_assigned_to: Vec<AgentId>,

    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl SubTask {
    /// Create a pending subtask with a fresh ID
    pub fn new(
        parent_task_id: impl Into<String>,
        goal_type: GoalType,
        managed_by: AgentId,
        context: SubTaskContext,
        priority: u8,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            parent_task_id: parent_task_id.into(),
            goal_type,
            status: TaskStatus::Pending,
            managed_by,
            output: None,
            context,
            priority,
            attempts: 0,
            escalations: 0,
            previously_assigned_to: Vec::new(),
            created: now,
            updated: now,
        }
    }

    /// Parent analysis task ID
    pub fn parent_task_id(&self) -> &str {
        &self.parent_task_id
    }

    /// Expertise this subtask requires
    pub fn expertise(&self) -> Expertise {
        self.context.expertise
    }

    /// Apply a status transition, bumping `updated`
    pub fn transition_to(&mut self, next: TaskStatus) -> Result<()> {
        if self.status.is_terminal() {
            return Err(TaskError::Terminal {
                task_id: self.id.clone(),
                status: self.status,
            });
        }
        if !self.status.can_transition_to(next) {
            return Err(TaskError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Move the subtask to `new_manager`.
    ///
    /// Returns `Ok(false)` without touching the subtask when `new_manager`
    /// already holds it, so repeated reassignment to the same manager records
    /// the previous holder exactly once.
    pub fn reassign(&mut self, new_manager: AgentId) -> Result<bool> {
        if self.status.is_terminal() {
            return Err(TaskError::Terminal {
                task_id: self.id.clone(),
                status: self.status,
            });
        }
        if self.managed_by == new_manager {
            return Ok(false);
        }

        if self.status != TaskStatus::Reassigned {
            self.transition_to(TaskStatus::Reassigned)?;
        }
        let previous = std::mem::replace(&mut self.managed_by, new_manager);
        self.previously_assigned_to.push(previous);
        self.attempts += 1;
        self.transition_to(TaskStatus::Assigned)?;
        Ok(true)
    }

    /// Record the output and walk the subtask to `Completed`
    pub fn complete(&mut self, output: AgentOutput) -> Result<()> {
        advance_to_in_progress(&self.id, &mut self.status)?;
        self.output = Some(output);
        self.transition_to(TaskStatus::Completed)
    }

    /// Mark the subtask failed
    pub fn fail(&mut self) -> Result<()> {
        self.transition_to(TaskStatus::Failed)
    }

    /// Bump `updated`
    pub fn touch(&mut self) {
        self.updated = next_timestamp(self.updated);
    }
}

/// Walk intermediate states so that `Completed` is reached legally
fn advance_to_in_progress(task_id: &str, status: &mut TaskStatus) -> Result<()> {
    loop {
        let next = match *status {
            TaskStatus::Pending | TaskStatus::Reassigned => TaskStatus::Assigned,
            TaskStatus::Assigned => TaskStatus::InProgress,
            TaskStatus::InProgress => return Ok(()),
            terminal => {
                return Err(TaskError::Terminal {
                    task_id: task_id.to_string(),
                    status: terminal,
                });
            }
        };
        *status = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::ConfidenceLevel;

    fn subtask(manager: &str) -> SubTask {
        SubTask::new(
            "parent-1",
            GoalType::TopicExtraction,
            AgentId::from(manager),
            SubTaskContext {
                description: "Find topics".to_string(),
                ..Default::default()
            },
            2,
        )
    }

    #[test]
    fn test_reassignment_records_history_once() {
        let mut task = subtask("manager-a");
        task.transition_to(TaskStatus::Assigned).unwrap();

        assert!(task.reassign(AgentId::from("manager-b")).unwrap());
        assert!(!task.reassign(AgentId::from("manager-b")).unwrap());

        assert_eq!(task.managed_by, AgentId::from("manager-b"));
        assert_eq!(task.previously_assigned_to, vec![AgentId::from("manager-a")]);
        assert_eq!(task.attempts, 1);
        assert_eq!(task.status, TaskStatus::Assigned);
    }

    #[test]
    fn test_parent_id_survives_reassignment() {
        let mut task = subtask("manager-a");
        task.reassign(AgentId::from("manager-b")).unwrap();
        assert_eq!(task.parent_task_id(), "parent-1");
    }

    #[test]
    fn test_complete_walks_intermediate_states() {
        let mut task = subtask("manager-a");
        let output = AgentOutput::new(&task.id, "topics", serde_json::json!({}), ConfidenceLevel::High);

        task.complete(output).unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.output.is_some());
    }

    #[test]
    fn test_terminal_subtask_rejects_changes() {
        let mut task = subtask("manager-a");
        task.fail().unwrap();

        assert!(matches!(task.reassign(AgentId::from("manager-b")), Err(TaskError::Terminal { .. })));
        assert!(task.transition_to(TaskStatus::Assigned).is_err());
    }

    #[test]
    fn test_updated_is_strictly_monotonic() {
        let mut task = subtask("manager-a");
        let mut last = task.updated;
        for _ in 0..100 {
            task.touch();
            assert!(task.updated > last);
            last = task.updated;
        }
    }

    #[test]
    fn test_full_analysis_is_not_directly_processable() {
        assert!(!GoalType::FullAnalysis.is_directly_processable());
        assert!(GoalType::Summary.is_directly_processable());
    }
}
