//! Escalation Handling
//!
//! Resolves subtasks a manager reported it cannot complete. The oracle picks
//! one of five actions; every path, including an unusable decision, ends in at
//! least one message to the escalating manager or the newly assigned one.

use std::fmt;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::agents::AgentId;
use crate::coordination::{AgentMessage, MessageBus, MessageKind};
use crate::oracle::{CallSite, DecisionTool, OracleGateway, OracleRequest, OracleResponse};
use crate::tasks::{AgentOutput, AnalysisTask, SubTask, TaskBoard, TaskStatus};
use super::{DirectProcessor, ManagerRegistry, TaskDecomposer, prompts};

/// Guidance sent when the oracle gives no usable decision
pub const GENERIC_GUIDANCE: &str =
    "Simplify the approach and focus on the core objective of the task; report partial results if needed.";

/// Subtask context key listing the subtasks a further decomposition produced
pub const DECOMPOSED_INTO: &str = "decomposed_into";

/// Subtask context key naming the task a further decomposition was run on
pub const DERIVED_TASK: &str = "derived_task_id";

// ============================================================================
// Escalation Request
// ============================================================================

/// Payload of an `ESCALATE` message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRequest {
    #[serde(alias = "task_id")]
    pub subtask_id: String,

    /// Why the manager is stuck
    #[serde(default)]
    pub reason: String,

    /// Supplementary context from the manager
    #[serde(default)]
    pub context: serde_json::Value,
}

impl EscalationRequest {
    /// Decode from an escalation message payload
    pub fn from_message(message: &AgentMessage) -> Option<Self> {
        serde_json::from_value(message.content.clone()).ok()
    }

    /// Wrap into an `ESCALATE` message addressed to `supervisor`
    pub fn into_message(self, manager: AgentId, supervisor: AgentId) -> AgentMessage {
        let content = serde_json::to_value(&self).unwrap_or_else(|_| json!({}));
        AgentMessage::to(MessageKind::Escalate, manager, supervisor, content)
    }
}

// ============================================================================
// Decisions
// ============================================================================

/// Action chosen for an escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationAction {
    Reassign,
    Guide,
    DecomposeFurther,
    Abandon,
    ResolveDirectly,
}

impl EscalationAction {
    /// Map the oracle's 1-5 numbering
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Reassign),
            2 => Some(Self::Guide),
            3 => Some(Self::DecomposeFurther),
            4 => Some(Self::Abandon),
            5 => Some(Self::ResolveDirectly),
            _ => None,
        }
    }

    /// Parse a number, numeric string or action name
    pub fn parse(value: &serde_json::Value) -> Option<Self> {
        if let Some(code) = value.as_i64() {
            return Self::from_code(code);
        }
        let text = value.as_str()?.trim().to_lowercase();
        if let Ok(code) = text.parse::<i64>() {
            return Self::from_code(code);
        }
        match text.as_str() {
            "reassign" => Some(Self::Reassign),
            "guide" | "guidance" => Some(Self::Guide),
            "decompose" | "decompose_further" => Some(Self::DecomposeFurther),
            "abandon" => Some(Self::Abandon),
            "resolve" | "resolve_directly" => Some(Self::ResolveDirectly),
            _ => None,
        }
    }
}

impl fmt::Display for EscalationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Reassign => "reassign",
            Self::Guide => "guide",
            Self::DecomposeFurther => "decompose_further",
            Self::Abandon => "abandon",
            Self::ResolveDirectly => "resolve_directly",
        };
        f.write_str(name)
    }
}

/// Decoded oracle decision
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationDecision {
    pub action: EscalationAction,
    pub guidance: Option<String>,
}

impl EscalationDecision {
    /// Decision used when the oracle gives nothing usable
    pub fn generic_guidance() -> Self {
        Self {
            action: EscalationAction::Guide,
            guidance: Some(GENERIC_GUIDANCE.to_string()),
        }
    }
}

/// Decode an escalation decision
pub fn decode_decision(response: OracleResponse) -> std::result::Result<EscalationDecision, String> {
    let json = response
        .into_json()
        .ok_or_else(|| "no JSON object in reply".to_string())?;

    let action = json
        .get("action")
        .and_then(EscalationAction::parse)
        .ok_or_else(|| format!("missing or invalid action in {}", json))?;

    let guidance = json
        .get("guidance")
        .and_then(|g| g.as_str())
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string);

    Ok(EscalationDecision { action, guidance })
}

fn decision_tool() -> DecisionTool {
    DecisionTool {
        name: "escalation_decision".to_string(),
        description: "Choose how to resolve an escalated subtask".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "action": { "type": "integer", "enum": [1, 2, 3, 4, 5] },
                "guidance": { "type": "string" },
                "rationale": { "type": "string" }
            },
            "required": ["action"]
        }),
    }
}

/// What handling an escalation did
#[derive(Debug, Clone)]
pub enum EscalationOutcome {
    /// Payload undecodable or subtask unknown; nothing sent
    Ignored,

    /// Subtask was already terminal; the escalator was told so
    AlreadyClosed,

    Reassigned { to: AgentId },
    Guided,
    Decomposed { subtask_ids: Vec<String> },
    Abandoned,

    /// Direct resolution produced an output and completed the subtask
    Resolved { output: AgentOutput },

    /// Direct resolution failed; the subtask is `Failed`
    ResolutionFailed,
}

// ============================================================================
// Escalation Handler
// ============================================================================

/// Escalation handler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Escalations tolerated per subtask before it is abandoned
    pub max_escalations: u32,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self { max_escalations: 3 }
    }
}

/// Executes escalation decisions on behalf of the supervisor
pub struct EscalationHandler {
    supervisor_id: AgentId,
    gateway: OracleGateway,
    registry: Arc<RwLock<ManagerRegistry>>,
    board: Arc<TaskBoard>,
    bus: Arc<MessageBus>,
    decomposer: Arc<TaskDecomposer>,
    direct: DirectProcessor,
    config: EscalationConfig,
}

impl EscalationHandler {
    /// Create a new escalation handler
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        supervisor_id: AgentId,
        gateway: OracleGateway,
        registry: Arc<RwLock<ManagerRegistry>>,
        board: Arc<TaskBoard>,
        bus: Arc<MessageBus>,
        decomposer: Arc<TaskDecomposer>,
        direct: DirectProcessor,
        config: EscalationConfig,
    ) -> Self {
        info!("Initializing Escalation Handler (max {} escalations)", config.max_escalations);

        Self {
            supervisor_id,
            gateway,
            registry,
            board,
            bus,
            decomposer,
            direct,
            config,
        }
    }

    /// Handle an `ESCALATE` message
    pub async fn handle_escalation(&self, message: &AgentMessage) -> EscalationOutcome {
        let Some(request) = EscalationRequest::from_message(message) else {
            warn!("Ignoring escalation {} without a subtask id", message.id);
            return EscalationOutcome::Ignored;
        };
        let escalator = message.sender.clone();

        let Some(subtask) = self.board.subtask(&request.subtask_id).await else {
            warn!("Ignoring escalation for unknown subtask {}", request.subtask_id);
            return EscalationOutcome::Ignored;
        };

        info!(
            "Escalation from {} for subtask {}: {}",
            escalator, subtask.id, request.reason
        );

        if subtask.status.is_terminal() {
            self.reply_closed(message, &subtask.id, subtask.status).await;
            return EscalationOutcome::AlreadyClosed;
        }

        let escalations = self
            .board
            .update_subtask(&subtask.id, |s| {
                s.escalations += 1;
                s.touch();
                s.escalations
            })
            .await
            .unwrap_or(subtask.escalations + 1);

        let decision = if escalations > self.config.max_escalations {
            warn!(
                "Subtask {} escalated {} times (max {}); abandoning",
                subtask.id, escalations, self.config.max_escalations
            );
            EscalationDecision {
                action: EscalationAction::Abandon,
                guidance: None,
            }
        } else {
            let oracle_request = OracleRequest::text(
                CallSite::Escalation,
                prompts::escalation(&subtask, &request.reason, &request.context),
            )
            .with_tool(decision_tool());

            self.gateway
                .call_with_fallback(oracle_request, decode_decision, |_| {
                    EscalationDecision::generic_guidance()
                })
                .await
        };

        debug!("Escalation of {} resolved to {}", subtask.id, decision.action);

        match decision.action {
            EscalationAction::Reassign => self.reassign(message, &request, &subtask).await,
            EscalationAction::Guide => {
                let guidance = decision
                    .guidance
                    .unwrap_or_else(|| GENERIC_GUIDANCE.to_string());
                self.guide(message, &subtask, &guidance).await;
                EscalationOutcome::Guided
            }
            EscalationAction::DecomposeFurther => self.decompose_further(message, &subtask).await,
            EscalationAction::Abandon => self.abandon(message, &subtask).await,
            EscalationAction::ResolveDirectly => self.resolve_directly(message, &subtask).await,
        }
    }

    // ========================================================================
    // Actions
    // ========================================================================

    async fn reassign(
        &self,
        message: &AgentMessage,
        request: &EscalationRequest,
        subtask: &SubTask,
    ) -> EscalationOutcome {
        let candidate = self
            .registry
            .read()
            .await
            .select_for_expertise(subtask.expertise());

        if candidate.is_placeholder() {
            return self.no_alternative(message, subtask).await;
        }

        let result = self
            .board
            .update_subtask(&subtask.id, |s| {
                s.reassign(candidate.clone())
                    .map(|moved| (moved, s.clone()))
                    .map_err(|e| (e, s.status))
            })
            .await;

        match result {
            Some(Ok((true, updated))) => {
                let previous = updated
                    .previously_assigned_to
                    .last()
                    .cloned()
                    .unwrap_or_else(|| subtask.managed_by.clone());
                info!("Subtask {} reassigned from {} to {}", updated.id, previous, candidate);

                let delegate = AgentMessage::to(
                    MessageKind::Delegate,
                    self.supervisor_id.clone(),
                    candidate.clone(),
                    json!({
                        "subtask": updated,
                        "previous_manager": previous,
                        "escalation": {
                            "reason": request.reason,
                            "context": request.context,
                        },
                    }),
                )
                .with_metadata("task_type", updated.goal_type.as_str())
                .in_reply_to(message.id.clone());
                self.send(delegate).await;

                EscalationOutcome::Reassigned { to: candidate }
            }
            Some(Ok((false, _))) => self.no_alternative(message, subtask).await,
            Some(Err((e, status))) => {
                warn!("Reassignment of {} rejected: {}", subtask.id, e);
                self.reply_closed(message, &subtask.id, status).await;
                EscalationOutcome::AlreadyClosed
            }
            None => EscalationOutcome::Ignored,
        }
    }

    async fn no_alternative(&self, message: &AgentMessage, subtask: &SubTask) -> EscalationOutcome {
        debug!("No alternative manager for {}; sending guidance", subtask.id);
        let guidance = format!(
            "No other manager is available for this subtask. {}",
            GENERIC_GUIDANCE
        );
        self.guide(message, subtask, &guidance).await;
        EscalationOutcome::Guided
    }

    async fn guide(&self, message: &AgentMessage, subtask: &SubTask, guidance: &str) {
        let response = AgentMessage::to(
            MessageKind::Response,
            self.supervisor_id.clone(),
            message.sender.clone(),
            json!({
                "subtask_id": subtask.id,
                "action": EscalationAction::Guide,
                "guidance": guidance,
                "priority": subtask.priority,
            }),
        )
        .in_reply_to(message.id.clone());
        self.send(response).await;
    }

    async fn decompose_further(&self, message: &AgentMessage, subtask: &SubTask) -> EscalationOutcome {
        let mut clone = AnalysisTask::new(subtask.goal_type, self.subtask_input(subtask).await)
            .with_priority(subtask.priority);
        clone.assigned_to = Some(self.supervisor_id.clone());
        if let Err(e) = clone.transition_to(TaskStatus::Assigned) {
            warn!("Could not assign derived task {}: {}", clone.id, e);
        }
        self.board.insert_task(clone.clone()).await;

        let children = self.decomposer.decompose_task(&clone).await;
        let subtask_ids: Vec<String> = children.iter().map(|c| c.id.clone()).collect();

        self.board
            .update_subtask(&subtask.id, |s| {
                s.context.extra.insert(DECOMPOSED_INTO.to_string(), json!(subtask_ids));
                s.context.extra.insert(DERIVED_TASK.to_string(), json!(clone.id));
                s.touch();
            })
            .await;

        let notice = AgentMessage::to(
            MessageKind::Notification,
            self.supervisor_id.clone(),
            message.sender.clone(),
            json!({
                "subtask_id": subtask.id,
                "action": EscalationAction::DecomposeFurther,
                "task_id": clone.id,
                "subtask_ids": subtask_ids,
            }),
        )
        .in_reply_to(message.id.clone());
        self.send(notice).await;

        for child in &children {
            let delegated = self
                .board
                .update_subtask(&child.id, |c| c.transition_to(TaskStatus::Assigned).map(|_| c.clone()))
                .await;
            let child = match delegated {
                Some(Ok(updated)) => updated,
                _ => child.clone(),
            };
            let delegate = AgentMessage::to(
                MessageKind::Delegate,
                self.supervisor_id.clone(),
                child.managed_by.clone(),
                json!({ "subtask": child, "parent_subtask_id": subtask.id }),
            )
            .with_metadata("task_type", child.goal_type.as_str());
            self.send(delegate).await;
        }

        info!("Subtask {} decomposed further into {} subtasks", subtask.id, children.len());
        EscalationOutcome::Decomposed { subtask_ids }
    }

    async fn abandon(&self, message: &AgentMessage, subtask: &SubTask) -> EscalationOutcome {
        match self
            .board
            .update_subtask(&subtask.id, |s| s.fail().map_err(|e| (e, s.status)))
            .await
        {
            Some(Err((e, status))) => {
                debug!("Subtask {} already closed: {}", subtask.id, e);
                self.reply_closed(message, &subtask.id, status).await;
                return EscalationOutcome::AlreadyClosed;
            }
            _ => info!("Subtask {} abandoned", subtask.id),
        }

        let response = AgentMessage::to(
            MessageKind::Response,
            self.supervisor_id.clone(),
            message.sender.clone(),
            json!({
                "subtask_id": subtask.id,
                "action": EscalationAction::Abandon,
                "status": "cancelled",
            }),
        )
        .in_reply_to(message.id.clone());
        self.send(response).await;

        EscalationOutcome::Abandoned
    }

    async fn resolve_directly(&self, message: &AgentMessage, subtask: &SubTask) -> EscalationOutcome {
        let mut simplified = AnalysisTask::new(subtask.goal_type, self.subtask_input(subtask).await)
            .with_priority(subtask.priority);
        simplified.id = subtask.id.clone();

        let (outcome, content) = match self.direct.process_directly(&simplified).await {
            Ok(output) => {
                let completed = self
                    .board
                    .update_subtask(&subtask.id, |s| s.complete(output.clone()).map_err(|e| (e, s.status)))
                    .await;
                match completed {
                    Some(Ok(())) => {
                        info!("Subtask {} resolved directly", subtask.id);
                        let content = json!({
                            "subtask_id": subtask.id,
                            "action": EscalationAction::ResolveDirectly,
                            "status": TaskStatus::Completed,
                            "output": output.content(),
                        });
                        (EscalationOutcome::Resolved { output }, content)
                    }
                    Some(Err((e, status))) => {
                        warn!("Direct resolution of {} discarded: {}", subtask.id, e);
                        self.reply_closed(message, &subtask.id, status).await;
                        return EscalationOutcome::AlreadyClosed;
                    }
                    None => return EscalationOutcome::Ignored,
                }
            }
            Err(e) => {
                error!("Direct resolution of {} failed: {}", subtask.id, e);
                let failed = self
                    .board
                    .update_subtask(&subtask.id, |s| s.fail().map_err(|e| (e, s.status)))
                    .await;
                if let Some(Err((closed, status))) = failed {
                    debug!("Subtask {} already closed: {}", subtask.id, closed);
                    self.reply_closed(message, &subtask.id, status).await;
                    return EscalationOutcome::AlreadyClosed;
                }
                let content = json!({
                    "subtask_id": subtask.id,
                    "action": EscalationAction::ResolveDirectly,
                    "status": TaskStatus::Failed,
                    "error": e.to_string(),
                });
                (EscalationOutcome::ResolutionFailed, content)
            }
        };

        let response = AgentMessage::to(
            MessageKind::Response,
            self.supervisor_id.clone(),
            message.sender.clone(),
            content,
        )
        .in_reply_to(message.id.clone());
        self.send(response).await;

        outcome
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Input for work derived from a subtask: its own copy, else the parent's
    async fn subtask_input(&self, subtask: &SubTask) -> serde_json::Value {
        if let Some(input) = subtask.context.extra.get("input") {
            return input.clone();
        }
        match self.board.task(subtask.parent_task_id()).await {
            Some(parent) => parent.input,
            None => serde_json::Value::Null,
        }
    }

    async fn reply_closed(&self, message: &AgentMessage, subtask_id: &str, status: TaskStatus) {
        info!("Escalation for closed subtask {} ({})", subtask_id, status);
        let response = AgentMessage::to(
            MessageKind::Response,
            self.supervisor_id.clone(),
            message.sender.clone(),
            json!({
                "subtask_id": subtask_id,
                "status": status,
                "note": "subtask is already closed",
            }),
        )
        .in_reply_to(message.id.clone());
        self.send(response).await;
    }

    async fn send(&self, message: AgentMessage) {
        let kind = message.kind;
        if let Err(e) = self.bus.send(message).await {
            error!("Failed to send {} message: {}", kind, e);
        }
    }
}
