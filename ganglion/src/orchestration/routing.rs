//! Routing Engine
//!
//! Picks the team that should act next in a conversational replanning loop,
//! or decides the job is finished. The oracle answers through a decision tool
//! whose `next` field is restricted to the team keys and `FINISH`; anything
//! it cannot map, including a failed call, routes to `FINISH`.

use std::fmt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::coordination::AgentMessage;
use crate::oracle::{CallSite, DecisionTool, OracleGateway, OracleRequest, OracleResponse};
use crate::tasks::{AgentOutput, AnalysisTask, GoalType, TaskStatus};

/// Decision value that ends the job
pub const FINISH: &str = "FINISH";

/// Message metadata key naming the task type a message is about
pub const META_TASK_TYPE: &str = "task_type";

// ============================================================================
// Teams
// ============================================================================

/// Analysis team the supervisor can hand control to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    ContentAnalysis,
    SentimentAnalysis,
    EntityAnalysis,
    Synthesis,
}

/// Decision key to team
const TEAM_TABLE: [(&str, Team); 4] = [
    ("content_analysis", Team::ContentAnalysis),
    ("sentiment_analysis", Team::SentimentAnalysis),
    ("entity_analysis", Team::EntityAnalysis),
    ("synthesis", Team::Synthesis),
];

impl Team {
    /// Decision key
    pub fn key(self) -> &'static str {
        TEAM_TABLE
            .iter()
            .find(|(_, team)| *team == self)
            .map(|(key, _)| *key)
            .unwrap_or("content_analysis")
    }

    /// Look up a decision key, case-insensitively
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim().to_lowercase().replace([' ', '-'], "_");
        TEAM_TABLE
            .iter()
            .find(|(candidate, _)| *candidate == key)
            .map(|(_, team)| *team)
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Routing outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteDecision {
    Team(Team),
    Finish,
}

impl fmt::Display for RouteDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Team(team) => write!(f, "{}", team),
            Self::Finish => f.write_str(FINISH),
        }
    }
}

/// Map a decision value to a route; anything unrecognized finishes
pub fn route_for(next: Option<&str>) -> RouteDecision {
    match next {
        Some(value) if value.trim().eq_ignore_ascii_case(FINISH) => RouteDecision::Finish,
        Some(value) => match Team::from_key(value) {
            Some(team) => RouteDecision::Team(team),
            None => {
                warn!("Unrecognized routing decision '{}'; finishing", value);
                RouteDecision::Finish
            }
        },
        None => {
            warn!("Routing reply carried no decision; finishing");
            RouteDecision::Finish
        }
    }
}

fn decode_route(response: OracleResponse) -> std::result::Result<RouteDecision, String> {
    let next = response
        .into_json()
        .and_then(|json| json.get("next").and_then(|n| n.as_str()).map(str::to_string));
    Ok(route_for(next.as_deref()))
}

// ============================================================================
// Routing Context
// ============================================================================

/// Completed task as shown to the router
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedTaskView {
    pub id: String,
    pub goal_type: GoalType,
    pub status: TaskStatus,
    pub output: Option<AgentOutput>,
}

/// Outstanding task as shown to the router
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTaskView {
    pub id: String,
    pub goal_type: GoalType,
    pub status: TaskStatus,
    pub priority: u8,
}

/// State summary handed to the routing oracle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingContext {
    pub completed: Vec<CompletedTaskView>,
    pub pending: Vec<PendingTaskView>,

    /// Completed share of all tasks, in percent
    pub progress: f64,

    /// Task type currently in focus, `"none"` when nothing is
    pub current_focus: String,
}

impl RoutingContext {
    /// Summarize message history and task state.
    ///
    /// Failed tasks count toward the total but are never pending.
    pub fn build(history: &[AgentMessage], tasks: &[AnalysisTask]) -> Self {
        let completed: Vec<CompletedTaskView> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| CompletedTaskView {
                id: t.id.clone(),
                goal_type: t.goal_type,
                status: t.status,
                output: t.output.clone(),
            })
            .collect();

        let mut pending: Vec<PendingTaskView> = tasks
            .iter()
            .filter(|t| t.status.is_active())
            .map(|t| PendingTaskView {
                id: t.id.clone(),
                goal_type: t.goal_type,
                status: t.status,
                priority: t.priority,
            })
            .collect();
        pending.sort_by_key(|p| p.priority);

        let progress = if tasks.is_empty() {
            0.0
        } else {
            completed.len() as f64 / tasks.len() as f64 * 100.0
        };

        let current_focus = history
            .last()
            .and_then(|m| m.metadata.get(META_TASK_TYPE).cloned())
            .or_else(|| pending.first().map(|p| p.goal_type.as_str().to_string()))
            .unwrap_or_else(|| "none".to_string());

        Self {
            completed,
            pending,
            progress,
            current_focus,
        }
    }

    /// Routing prompt
    pub fn render(&self) -> String {
        let completed = if self.completed.is_empty() {
            "  (none)".to_string()
        } else {
            self.completed
                .iter()
                .map(|t| {
                    let output = t
                        .output
                        .as_ref()
                        .map(|o| o.content().to_string())
                        .unwrap_or_else(|| "no output".to_string());
                    format!("  - {} [{}] {}: {}", t.id, t.goal_type, t.status, output)
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let pending = if self.pending.is_empty() {
            "  (none)".to_string()
        } else {
            self.pending
                .iter()
                .map(|t| format!("  - {} [{}] {} priority {}", t.id, t.goal_type, t.status, t.priority))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let teams = TEAM_TABLE
            .iter()
            .map(|(key, _)| *key)
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "You coordinate transcript analysis teams: {teams}.\n\n\
             Progress: {progress:.0}%\n\
             Current focus: {focus}\n\n\
             Completed tasks:\n{completed}\n\n\
             Pending tasks:\n{pending}\n\n\
             Decide which team should act next, or {FINISH} if the analysis is complete.",
            progress = self.progress,
            focus = self.current_focus,
        )
    }
}

fn decision_tool() -> DecisionTool {
    let mut options: Vec<&str> = TEAM_TABLE.iter().map(|(key, _)| *key).collect();
    options.push(FINISH);

    DecisionTool {
        name: "route".to_string(),
        description: "Select the next team to act".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "next": { "type": "string", "enum": options }
            },
            "required": ["next"]
        }),
    }
}

// ============================================================================
// Routing Engine
// ============================================================================

/// Oracle-backed next-actor selection
#[derive(Clone)]
pub struct RoutingEngine {
    gateway: OracleGateway,
}

impl RoutingEngine {
    /// Create a new routing engine
    pub fn new(gateway: OracleGateway) -> Self {
        Self { gateway }
    }

    /// Decide which team acts next. Never fails.
    pub async fn decide_next_agent(&self, history: &[AgentMessage], tasks: &[AnalysisTask]) -> RouteDecision {
        if tasks.is_empty() {
            debug!("No tasks to route; finishing");
            return RouteDecision::Finish;
        }

        let context = RoutingContext::build(history, tasks);
        let request = OracleRequest::text(CallSite::Routing, context.render()).with_tool(decision_tool());

        let decision = self
            .gateway
            .call_with_fallback(request, decode_route, |_| RouteDecision::Finish)
            .await;

        info!(
            "Routing at {:.0}% progress (focus {}): {}",
            context.progress, context.current_focus, decision
        );
        decision
    }
}
