//! Task Decomposition
//!
//! Splits an analysis task into subtasks proposed by the oracle, assigns each
//! one to a manager and registers the batch on the task board. Decomposition
//! never fails: an unusable oracle reply degrades to a single subtask that
//! copies the parent's input and goal type.

use std::collections::HashMap;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::agents::{AgentId, Expertise};
use crate::oracle::{CallSite, OracleGateway, OracleRequest, OracleResponse};
use crate::tasks::{AnalysisTask, SubTask, SubTaskContext, TaskBoard};
use super::{ManagerRegistry, prompts};

/// Lowest and highest priority a subtask may carry
pub const PRIORITY_RANGE: (u8, u8) = (1, 5);

/// Default subtask priority
pub const DEFAULT_PRIORITY: u8 = 3;

/// Decomposition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompositionConfig {
    /// Subtasks requested from the oracle (lower bound)
    pub min_subtasks: usize,

    /// Subtasks kept from the oracle reply (upper bound)
    pub max_subtasks: usize,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            min_subtasks: 3,
            max_subtasks: 5,
        }
    }
}

/// Subtask proposal decoded from the oracle reply
#[derive(Debug, Clone, PartialEq)]
pub struct SubTaskDescriptor {
    pub description: String,

    /// Raw expertise tag, validated during materialization
    pub expertise: String,

    pub priority: u8,

    /// Descriptions of sibling subtasks this one depends on
    pub dependencies: Vec<String>,
}

impl SubTaskDescriptor {
    fn from_value(value: &serde_json::Value) -> Option<Self> {
        let description = value.get("description")?.as_str()?.trim();
        if description.is_empty() {
            return None;
        }

        let expertise = value
            .get("expertise")
            .and_then(|e| e.as_str())
            .unwrap_or_default()
            .to_string();

        let dependencies = value
            .get("dependencies")
            .and_then(|d| d.as_array())
            .map(|deps| {
                deps.iter()
                    .filter_map(|d| d.as_str())
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            description: description.to_string(),
            expertise,
            priority: coerce_priority(value.get("priority")),
            dependencies,
        })
    }
}

/// Read a priority from a number or numeric string, clamped into range
fn coerce_priority(value: Option<&serde_json::Value>) -> u8 {
    let raw = match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match raw {
        Some(p) if p.is_finite() => {
            p.round().clamp(f64::from(PRIORITY_RANGE.0), f64::from(PRIORITY_RANGE.1)) as u8
        }
        _ => DEFAULT_PRIORITY,
    }
}

/// Decode the `subtasks` array of a decomposition reply
pub fn decode_descriptors(
    response: OracleResponse,
    max_subtasks: usize,
) -> std::result::Result<Vec<SubTaskDescriptor>, String> {
    let json = response
        .into_json()
        .ok_or_else(|| "no JSON object in reply".to_string())?;

    let entries = json
        .get("subtasks")
        .and_then(|s| s.as_array())
        .ok_or_else(|| "missing `subtasks` array".to_string())?;

    let mut descriptors: Vec<SubTaskDescriptor> =
        entries.iter().filter_map(SubTaskDescriptor::from_value).collect();

    if descriptors.is_empty() {
        return Err("no usable subtask descriptors".to_string());
    }
    if descriptors.len() > max_subtasks {
        debug!("Truncating {} proposed subtasks to {}", descriptors.len(), max_subtasks);
        descriptors.truncate(max_subtasks);
    }
    Ok(descriptors)
}

// ============================================================================
// Task Decomposer
// ============================================================================

/// Oracle-driven decomposition of analysis tasks
pub struct TaskDecomposer {
    gateway: OracleGateway,
    registry: Arc<RwLock<ManagerRegistry>>,
    board: Arc<TaskBoard>,
    config: DecompositionConfig,
}

impl TaskDecomposer {
    /// Create a new decomposer
    pub fn new(
        gateway: OracleGateway,
        registry: Arc<RwLock<ManagerRegistry>>,
        board: Arc<TaskBoard>,
        config: DecompositionConfig,
    ) -> Self {
        info!("Initializing Task Decomposer");

        Self {
            gateway,
            registry,
            board,
            config,
        }
    }

    /// Pick a manager for `expertise` (see [`ManagerRegistry::select_for_expertise`])
    pub async fn assign_manager_for_expertise(&self, expertise: Expertise) -> AgentId {
        self.registry.read().await.select_for_expertise(expertise)
    }

    /// Decompose `task` into registered subtasks.
    ///
    /// Always returns at least one subtask.
    pub async fn decompose_task(&self, task: &AnalysisTask) -> Vec<SubTask> {
        info!("Decomposing task {} ({})", task.id, task.goal_type);

        let max_subtasks = self.config.max_subtasks.max(1);
        let request = OracleRequest::text(
            CallSite::Decomposition,
            prompts::decomposition(task, self.config.min_subtasks, max_subtasks),
        );

        let descriptors = self
            .gateway
            .call_with_fallback(
                request,
                |response| decode_descriptors(response, max_subtasks),
                |_| Vec::new(),
            )
            .await;

        let subtasks = if descriptors.is_empty() {
            vec![self.fallback_subtask(task).await]
        } else {
            if descriptors.len() < self.config.min_subtasks {
                debug!(
                    "Oracle proposed {} subtasks for {} (fewer than {})",
                    descriptors.len(),
                    task.id,
                    self.config.min_subtasks
                );
            }
            self.materialize(task, descriptors).await
        };

        for subtask in &subtasks {
            self.board.insert_subtask(subtask.clone()).await;
        }

        info!("Task {} decomposed into {} subtasks", task.id, subtasks.len());
        subtasks
    }

    async fn materialize(&self, task: &AnalysisTask, descriptors: Vec<SubTaskDescriptor>) -> Vec<SubTask> {
        let mut subtasks = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            let expertise = Expertise::parse(&descriptor.expertise).unwrap_or_else(|| {
                warn!(
                    "Unknown expertise '{}' for subtask '{}'; using {}",
                    descriptor.expertise,
                    descriptor.description,
                    Expertise::default()
                );
                Expertise::default()
            });

            let manager = self.assign_manager_for_expertise(expertise).await;
            let context = SubTaskContext {
                description: descriptor.description,
                expertise,
                dependencies: descriptor.dependencies,
                extra: serde_json::Map::new(),
            };

            subtasks.push(SubTask::new(
                task.id.clone(),
                expertise.goal_type(),
                manager,
                context,
                descriptor.priority,
            ));
        }

        resolve_dependencies(&mut subtasks);
        subtasks
    }

    async fn fallback_subtask(&self, task: &AnalysisTask) -> SubTask {
        warn!("Decomposition of {} degraded to a single subtask", task.id);

        let expertise = Expertise::default();
        let manager = self.assign_manager_for_expertise(expertise).await;

        let mut extra = serde_json::Map::new();
        extra.insert("input".to_string(), task.input.clone());
        extra.insert("fallback".to_string(), serde_json::Value::Bool(true));

        let context = SubTaskContext {
            description: format!("Complete the {} analysis", task.goal_type),
            expertise,
            dependencies: Vec::new(),
            extra,
        };

        SubTask::new(task.id.clone(), task.goal_type, manager, context, task.priority)
    }
}

/// Rewrite description-keyed dependencies into sibling subtask IDs.
///
/// Descriptions that match no sibling, and self references, are dropped.
pub fn resolve_dependencies(subtasks: &mut [SubTask]) {
    let ids_by_description: HashMap<String, String> = subtasks
        .iter()
        .map(|s| (s.context.description.to_lowercase(), s.id.clone()))
        .collect();

    for subtask in subtasks.iter_mut() {
        let own_id = subtask.id.clone();
        let mut resolved = Vec::new();

        for dependency in &subtask.context.dependencies {
            match ids_by_description.get(&dependency.to_lowercase()) {
                Some(id) if *id != own_id => {
                    if !resolved.contains(id) {
                        resolved.push(id.clone());
                    }
                }
                Some(_) => debug!("Dropping self dependency of subtask {}", own_id),
                None => warn!(
                    "Dropping unresolvable dependency '{}' of subtask {}",
                    dependency, own_id
                ),
            }
        }

        subtask.context.dependencies = resolved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::ScriptedOracle;
    use crate::tasks::{GoalType, TaskStatus};
    use serde_json::json;
    use std::time::Duration;

    fn decomposer(oracle: ScriptedOracle, registry: ManagerRegistry) -> (TaskDecomposer, Arc<TaskBoard>) {
        let board = Arc::new(TaskBoard::new());
        let decomposer = TaskDecomposer::new(
            OracleGateway::new(Arc::new(oracle), Duration::from_millis(200)),
            Arc::new(RwLock::new(registry)),
            board.clone(),
            DecompositionConfig::default(),
        );
        (decomposer, board)
    }

    fn staffed_registry() -> ManagerRegistry {
        let mut registry = ManagerRegistry::default();
        registry.register_manager(AgentId::from("content"), [Expertise::TopicAnalysis, Expertise::Summarization]);
        registry.register_manager(AgentId::from("sentiment"), [Expertise::SentimentAnalysis]);
        registry
    }

    #[tokio::test]
    async fn test_decomposition_resolves_dependencies() {
        let reply = json!({
            "subtasks": [
                { "description": "Find topics", "expertise": "topic_analysis", "priority": 1, "dependencies": [] },
                { "description": "Score sentiment", "expertise": "sentiment_analysis", "priority": 2,
                  "dependencies": ["find topics", "unknown step"] },
                { "description": "Summarize", "expertise": "summarization", "priority": 9,
                  "dependencies": ["Find topics", "Score sentiment"] }
            ]
        });
        let (decomposer, board) = decomposer(
            ScriptedOracle::new().with_text(format!("```json\n{reply}\n```")),
            staffed_registry(),
        );
        let task = AnalysisTask::new(GoalType::FullAnalysis, json!({ "transcript": "..." }));

        let subtasks = decomposer.decompose_task(&task).await;

        assert_eq!(subtasks.len(), 3);
        assert_eq!(subtasks[1].context.dependencies, vec![subtasks[0].id.clone()]);
        assert_eq!(
            subtasks[2].context.dependencies,
            vec![subtasks[0].id.clone(), subtasks[1].id.clone()]
        );
        assert_eq!(subtasks[2].priority, 5);
        assert_eq!(subtasks[1].managed_by, AgentId::from("sentiment"));
        assert_eq!(subtasks[2].goal_type, GoalType::Summary);
        assert!(subtasks.iter().all(|s| s.status == TaskStatus::Pending));
        assert!(subtasks.iter().all(|s| s.parent_task_id() == task.id));
        assert_eq!(board.subtask_count().await, 3);
    }

    #[tokio::test]
    async fn test_unknown_expertise_defaults_to_topic_analysis() {
        let reply = json!({ "subtasks": [{ "description": "Vibes", "expertise": "astrology" }] });
        let (decomposer, _) = decomposer(ScriptedOracle::new().with_decision(reply), staffed_registry());
        let task = AnalysisTask::new(GoalType::FullAnalysis, json!("t"));

        let subtasks = decomposer.decompose_task(&task).await;

        assert_eq!(subtasks[0].expertise(), Expertise::TopicAnalysis);
        assert_eq!(subtasks[0].managed_by, AgentId::from("content"));
        assert_eq!(subtasks[0].priority, DEFAULT_PRIORITY);
    }

    #[tokio::test]
    async fn test_unparsable_reply_yields_single_fallback() {
        let (decomposer, board) = decomposer(
            ScriptedOracle::new().with_text("I would rather not."),
            staffed_registry(),
        );
        let task = AnalysisTask::new(GoalType::FullAnalysis, json!({ "transcript": "hi" }));

        let subtasks = decomposer.decompose_task(&task).await;

        assert_eq!(subtasks.len(), 1);
        assert_eq!(subtasks[0].goal_type, GoalType::FullAnalysis);
        assert_eq!(subtasks[0].context.extra["input"], task.input);
        assert_eq!(subtasks[0].managed_by, AgentId::from("content"));
        assert_eq!(board.subtask_count().await, 1);
    }

    #[tokio::test]
    async fn test_empty_subtask_list_counts_as_unparsable() {
        let (decomposer, _) = decomposer(
            ScriptedOracle::new().with_decision(json!({ "subtasks": [] })),
            ManagerRegistry::default(),
        );
        let task = AnalysisTask::new(GoalType::Summary, json!("t"));

        let subtasks = decomposer.decompose_task(&task).await;

        assert_eq!(subtasks.len(), 1);
        assert!(subtasks[0].managed_by.is_placeholder());
    }

    #[tokio::test]
    async fn test_oracle_failure_yields_fallback() {
        let (decomposer, _) = decomposer(ScriptedOracle::new().with_error("down"), staffed_registry());
        let task = AnalysisTask::new(GoalType::KeyPoints, json!("t"));

        let subtasks = decomposer.decompose_task(&task).await;
        assert_eq!(subtasks.len(), 1);
        assert_eq!(subtasks[0].goal_type, GoalType::KeyPoints);
    }

    #[test]
    fn test_decode_truncates_to_max() {
        let entries: Vec<_> = (0..8)
            .map(|i| json!({ "description": format!("step {i}"), "expertise": "summarization" }))
            .collect();
        let response = OracleResponse::Decision(json!({ "subtasks": entries }));

        let descriptors = decode_descriptors(response, 5).unwrap();
        assert_eq!(descriptors.len(), 5);
        assert_eq!(descriptors[4].description, "step 4");
    }

    #[test]
    fn test_priority_coercion() {
        assert_eq!(coerce_priority(Some(&json!(0))), 1);
        assert_eq!(coerce_priority(Some(&json!(2.4))), 2);
        assert_eq!(coerce_priority(Some(&json!("4"))), 4);
        assert_eq!(coerce_priority(Some(&json!(null))), DEFAULT_PRIORITY);
        assert_eq!(coerce_priority(None), DEFAULT_PRIORITY);
    }
}
