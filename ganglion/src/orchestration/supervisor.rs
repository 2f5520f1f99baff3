//! Supervisor - Hierarchical Orchestration Entry Point
//!
//! The supervisor composes the manager registry, decomposer, escalation
//! handler, routing engine and result synthesizer into one workflow:
//!
//! 1. Decompose a submitted job into subtasks
//! 2. Assign each subtask to a manager and delegate it over the bus
//! 3. Track completion, failure and escalation reports from managers
//! 4. Synthesize progressively once enough components are in
//! 5. Close the job when every subtask reached a terminal state
//!
//! Messages are handled concurrently; per-subtask locks on the task board keep
//! reports about the same subtask from interleaving.

use std::sync::Arc;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};

use crate::agents::{AgentId, Expertise};
use crate::config::GanglionConfig;
use crate::coordination::{AgentMessage, Delivery, MessageBus, MessageKind};
use crate::oracle::{Oracle, OracleGateway};
use crate::state::StateStore;
use crate::tasks::{
    AgentOutput, AgentResultCollection, AnalysisTask, ConfidenceLevel, FinalResult, SubTask,
    TaskBoard, TaskStatus,
};
use super::{
    DecompositionConfig, DirectProcessor, EscalationConfig, EscalationHandler, EscalationOutcome,
    EscalationRequest, ManagerRegistry, OrchestrationError, Result, ResultSynthesizer,
    RouteDecision, RoutingEngine, TaskDecomposer, DERIVED_TASK,
};

/// Component label of a job's own synthesized output
const SYNTHESIS_COMPONENT: &str = "synthesis";

// ============================================================================
// Configuration
// ============================================================================

/// Supervisor limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Escalations tolerated per subtask before it is abandoned
    pub max_escalations: u32,

    /// Subtasks requested per decomposition (lower bound)
    pub min_subtasks: usize,

    /// Subtasks kept per decomposition (upper bound)
    pub max_subtasks: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_escalations: 3,
            min_subtasks: 3,
            max_subtasks: 5,
        }
    }
}

// ============================================================================
// Manager Reports
// ============================================================================

/// `NOTIFICATION` payloads understood by the supervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ManagerEvent {
    /// The sender is a manager covering these expertise tags
    Register { expertise: Vec<String> },
    Unavailable,
    Available,
    AgentAssigned { agent_id: AgentId },
    AgentReleased { agent_id: AgentId },
    SubtaskStarted { subtask_id: String },
    SubtaskFailed {
        subtask_id: String,
        #[serde(default)]
        reason: String,
    },
}

impl ManagerEvent {
    /// Wrap into a `NOTIFICATION` from `manager` to `supervisor`
    pub fn into_message(self, manager: AgentId, supervisor: AgentId) -> AgentMessage {
        let content = serde_json::to_value(&self).unwrap_or_else(|_| json!({}));
        AgentMessage::to(MessageKind::Notification, manager, supervisor, content)
    }
}

/// `RESPONSE` payload reporting a finished subtask
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionReport {
    pub subtask_id: String,

    /// Result content
    pub result: serde_json::Value,

    /// Quality score (0.0 - 1.0)
    #[serde(default)]
    pub quality: Option<f64>,

    /// Confidence label, used when no quality is given
    #[serde(default)]
    pub confidence: Option<String>,

    #[serde(default)]
    pub reasoning: Option<String>,
}

impl CompletionReport {
    /// Wrap into a `RESPONSE` from `manager` to `supervisor`
    pub fn into_message(self, manager: AgentId, supervisor: AgentId) -> AgentMessage {
        let content = serde_json::to_value(&self).unwrap_or_else(|_| json!({}));
        AgentMessage::to(MessageKind::Response, manager, supervisor, content)
    }
}

/// Quality of an output: explicit metadata, else derived from confidence
fn output_quality(output: &AgentOutput) -> f64 {
    output
        .metadata()
        .get("quality")
        .and_then(|q| q.parse::<f64>().ok())
        .unwrap_or(match output.confidence() {
            ConfidenceLevel::High => 0.9,
            ConfidenceLevel::Medium => 0.7,
            ConfidenceLevel::Low => 0.5,
            ConfidenceLevel::Uncertain => 0.3,
        })
}

/// Routing view of a subtask
fn subtask_view(subtask: &SubTask) -> AnalysisTask {
    AnalysisTask {
        id: subtask.id.clone(),
        goal_type: subtask.goal_type,
        status: subtask.status,
        assigned_to: Some(subtask.managed_by.clone()),
        input: serde_json::Value::Null,
        output: subtask.output.clone(),
        priority: subtask.priority,
        dependencies: subtask.context.dependencies.clone(),
        created: subtask.created,
        updated: subtask.updated,
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Top-level orchestrating actor
pub struct Supervisor {
    id: AgentId,
    config: GanglionConfig,
    bus: Arc<MessageBus>,
    board: Arc<TaskBoard>,
    registry: Arc<RwLock<ManagerRegistry>>,
    decomposer: Arc<TaskDecomposer>,
    direct: DirectProcessor,
    escalation: EscalationHandler,
    routing: RoutingEngine,
    synthesizer: ResultSynthesizer,
    store: Option<Arc<dyn StateStore>>,
}

impl Supervisor {
    /// Create a supervisor talking to `oracle` over `bus`
    pub fn new(oracle: Arc<dyn Oracle>, bus: Arc<MessageBus>, config: GanglionConfig) -> Self {
        info!("Initializing Supervisor");

        let id = AgentId::supervisor();
        let gateway = OracleGateway::new(oracle, config.oracle.timeout());
        let board = Arc::new(TaskBoard::new());
        let registry = Arc::new(RwLock::new(ManagerRegistry::new(config.registry.clone())));

        let decomposer = Arc::new(TaskDecomposer::new(
            gateway.clone(),
            registry.clone(),
            board.clone(),
            DecompositionConfig {
                min_subtasks: config.supervisor.min_subtasks,
                max_subtasks: config.supervisor.max_subtasks,
            },
        ));
        let direct = DirectProcessor::new(gateway.clone());
        let escalation = EscalationHandler::new(
            id.clone(),
            gateway.clone(),
            registry.clone(),
            board.clone(),
            bus.clone(),
            decomposer.clone(),
            direct.clone(),
            EscalationConfig {
                max_escalations: config.supervisor.max_escalations,
            },
        );
        let routing = RoutingEngine::new(gateway.clone());
        let synthesizer = ResultSynthesizer::new(gateway, config.synthesis.clone());

        Self {
            id,
            config,
            bus,
            board,
            registry,
            decomposer,
            direct,
            escalation,
            routing,
            synthesizer,
            store: None,
        }
    }

    /// Persist job and subtask snapshots to `store`
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn config(&self) -> &GanglionConfig {
        &self.config
    }

    /// Shared manager registry
    pub fn registry(&self) -> &Arc<RwLock<ManagerRegistry>> {
        &self.registry
    }

    // ========================================================================
    // Message Loop
    // ========================================================================

    /// Register the supervisor on the bus and return its inbox
    pub async fn connect(&self) -> mpsc::UnboundedReceiver<Delivery> {
        self.bus.register(self.id.clone()).await
    }

    /// Handle inbound messages until the inbox closes.
    ///
    /// Each message is handled on its own task so a slow oracle call for one
    /// escalation does not hold up unrelated reports.
    pub async fn run(self: Arc<Self>, mut inbox: mpsc::UnboundedReceiver<Delivery>) {
        info!("Supervisor {} listening", self.id);

        while let Some(delivery) = inbox.recv().await {
            let supervisor = self.clone();
            tokio::spawn(async move {
                if let Err(e) = supervisor.handle_message(&delivery.message).await {
                    error!("Failed to handle message {}: {}", delivery.message.id, e);
                }
            });
        }

        info!("Supervisor {} inbox closed", self.id);
    }

    /// Dispatch one inbound message
    pub async fn handle_message(&self, message: &AgentMessage) -> Result<()> {
        debug!("Supervisor received {} from {}", message.kind, message.sender);

        match message.kind {
            MessageKind::Notification => {
                match serde_json::from_value::<ManagerEvent>(message.content.clone()) {
                    Ok(event) => self.handle_manager_event(&message.sender, event).await,
                    Err(e) => {
                        debug!("Ignoring notification {}: {}", message.id, e);
                        Ok(())
                    }
                }
            }
            MessageKind::Response => {
                match serde_json::from_value::<CompletionReport>(message.content.clone()) {
                    Ok(report) => self.handle_completion(&message.sender, report).await,
                    Err(e) => {
                        debug!("Ignoring response {}: {}", message.id, e);
                        Ok(())
                    }
                }
            }
            MessageKind::Escalate => {
                self.handle_escalation(message).await;
                Ok(())
            }
            MessageKind::Request | MessageKind::Delegate => {
                debug!("Supervisor does not act on {} messages", message.kind);
                Ok(())
            }
        }
    }

    async fn handle_manager_event(&self, sender: &AgentId, event: ManagerEvent) -> Result<()> {
        match event {
            ManagerEvent::Register { expertise } => {
                let parsed: Vec<Expertise> = expertise
                    .iter()
                    .map(|tag| {
                        Expertise::parse(tag).unwrap_or_else(|| {
                            warn!("Manager {} advertised unknown expertise '{}'", sender, tag);
                            Expertise::default()
                        })
                    })
                    .collect();
                self.register_manager(sender.clone(), parsed).await;
            }
            ManagerEvent::Unavailable => {
                self.registry.write().await.mark_unavailable(sender);
            }
            ManagerEvent::Available => {
                self.registry.write().await.mark_available(sender);
            }
            ManagerEvent::AgentAssigned { agent_id } => {
                self.registry.write().await.assign_agent(sender, agent_id);
            }
            ManagerEvent::AgentReleased { agent_id } => {
                self.registry.write().await.release_agent(sender, &agent_id);
            }
            ManagerEvent::SubtaskStarted { subtask_id } => {
                self.start_subtask(&subtask_id).await?;
            }
            ManagerEvent::SubtaskFailed { subtask_id, reason } => {
                self.fail_subtask(&subtask_id, &reason).await?;
            }
        }
        Ok(())
    }

    async fn handle_completion(&self, sender: &AgentId, report: CompletionReport) -> Result<()> {
        let subtask = self
            .board
            .subtask(&report.subtask_id)
            .await
            .ok_or_else(|| OrchestrationError::TaskNotFound {
                task_id: report.subtask_id.clone(),
            })?;

        let quality = report.quality.filter(|q| !q.is_nan()).map(|q| q.clamp(0.0, 1.0));
        let confidence = match (quality, report.confidence.as_deref()) {
            (Some(quality), _) => ConfidenceLevel::from_quality(quality),
            (None, Some(label)) => ConfidenceLevel::parse_label(label).unwrap_or(ConfidenceLevel::Medium),
            (None, None) => ConfidenceLevel::Medium,
        };

        let mut output = AgentOutput::new(subtask.id.clone(), subtask.goal_type.as_str(), report.result, confidence)
            .with_metadata("reported_by", sender.as_str());
        if let Some(quality) = quality {
            output = output.with_metadata("quality", quality.to_string());
        }
        if let Some(reasoning) = report.reasoning {
            output = output.with_reasoning(reasoning);
        }

        self.complete_subtask(&subtask.id, output).await
    }

    // ========================================================================
    // Managers
    // ========================================================================

    /// Register a manager directly
    pub async fn register_manager(&self, manager_id: AgentId, expertise: Vec<Expertise>) {
        self.registry.write().await.register_manager(manager_id, expertise);
    }

    /// Pick the manager for an expertise area
    pub async fn assign_manager_for_expertise(&self, expertise: Expertise) -> AgentId {
        self.decomposer.assign_manager_for_expertise(expertise).await
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    /// Accept a job: decompose it, then delegate every subtask to its manager
    pub async fn submit_task(&self, mut task: AnalysisTask) -> Result<Vec<SubTask>> {
        info!("Submitting task {} ({})", task.id, task.goal_type);

        task.assigned_to = Some(self.id.clone());
        task.transition_to(TaskStatus::Assigned)?;
        task.transition_to(TaskStatus::InProgress)?;
        self.board.insert_task(task.clone()).await;
        self.persist_task(&task).await;

        let subtasks = self.decompose_task(&task).await;
        let mut delegated = Vec::with_capacity(subtasks.len());

        for subtask in subtasks {
            let assigned = self
                .board
                .update_subtask(&subtask.id, |s| s.transition_to(TaskStatus::Assigned).map(|_| s.clone()))
                .await
                .ok_or_else(|| OrchestrationError::TaskNotFound {
                    task_id: subtask.id.clone(),
                })??;

            let delegate = AgentMessage::to(
                MessageKind::Delegate,
                self.id.clone(),
                assigned.managed_by.clone(),
                json!({ "subtask": assigned, "input": task.input }),
            )
            .with_metadata("task_type", assigned.goal_type.as_str());
            self.bus.send(delegate).await?;

            self.persist_subtask(&assigned).await;
            delegated.push(assigned);
        }

        info!("Task {} delegated as {} subtasks", task.id, delegated.len());
        Ok(delegated)
    }

    /// Decompose a task into registered subtasks; never empty
    pub async fn decompose_task(&self, task: &AnalysisTask) -> Vec<SubTask> {
        self.decomposer.decompose_task(task).await
    }

    /// Process a specialist task without delegation
    pub async fn process_directly(&self, task: &AnalysisTask) -> Result<AgentOutput> {
        self.direct.process_directly(task).await
    }

    /// Snapshot of a job or derived task
    pub async fn task(&self, task_id: &str) -> Option<AnalysisTask> {
        self.board.task(task_id).await
    }

    /// Subtasks of a job, most urgent first
    pub async fn subtasks_for(&self, task_id: &str) -> Vec<SubTask> {
        self.board.subtasks_for(task_id).await
    }

    /// Snapshot of a subtask
    pub async fn subtask(&self, subtask_id: &str) -> Option<SubTask> {
        self.board.subtask(subtask_id).await
    }

    // ========================================================================
    // Subtask Lifecycle
    // ========================================================================

    /// A manager started working on a subtask
    pub async fn start_subtask(&self, subtask_id: &str) -> Result<()> {
        let subtask = self
            .board
            .update_subtask(subtask_id, |s| -> crate::tasks::Result<SubTask> {
                if matches!(s.status, TaskStatus::Pending | TaskStatus::Reassigned) {
                    s.transition_to(TaskStatus::Assigned)?;
                }
                if s.status == TaskStatus::Assigned {
                    s.transition_to(TaskStatus::InProgress)?;
                }
                Ok(s.clone())
            })
            .await
            .ok_or_else(|| OrchestrationError::TaskNotFound {
                task_id: subtask_id.to_string(),
            })??;

        debug!("Subtask {} in progress under {}", subtask.id, subtask.managed_by);
        self.persist_subtask(&subtask).await;
        Ok(())
    }

    /// Record a subtask's output and mark it completed
    pub async fn complete_subtask(&self, subtask_id: &str, output: AgentOutput) -> Result<()> {
        let subtask = self
            .board
            .update_subtask(subtask_id, |s| s.complete(output.clone()).map(|_| s.clone()))
            .await
            .ok_or_else(|| OrchestrationError::TaskNotFound {
                task_id: subtask_id.to_string(),
            })??;

        info!("Subtask {} completed ({})", subtask.id, output.confidence());
        self.after_completion(&subtask, &output).await;
        Ok(())
    }

    /// Mark a subtask failed
    pub async fn fail_subtask(&self, subtask_id: &str, reason: &str) -> Result<()> {
        let subtask = self
            .board
            .update_subtask(subtask_id, |s| s.fail().map(|_| s.clone()))
            .await
            .ok_or_else(|| OrchestrationError::TaskNotFound {
                task_id: subtask_id.to_string(),
            })??;

        warn!("Subtask {} failed: {}", subtask.id, reason);
        self.after_failure(&subtask).await;
        Ok(())
    }

    async fn after_completion(&self, subtask: &SubTask, output: &AgentOutput) {
        let quality = output_quality(output);
        let reporter = output
            .metadata()
            .get("reported_by")
            .map(|id| AgentId::from(id.as_str()))
            .unwrap_or_else(|| subtask.managed_by.clone());
        self.synthesizer
            .register_reported_result(
                subtask.parent_task_id(),
                &subtask.id,
                subtask.goal_type.as_str(),
                output.content().clone(),
                Some(quality),
                reporter,
            )
            .await;

        self.record_performance(&subtask.managed_by, quality).await;
        self.persist_subtask(subtask).await;
        self.settle_task(subtask.parent_task_id()).await;
    }

    async fn after_failure(&self, subtask: &SubTask) {
        self.record_performance(&subtask.managed_by, 0.0).await;
        self.persist_subtask(subtask).await;
        self.settle_task(subtask.parent_task_id()).await;
    }

    async fn record_performance(&self, manager_id: &AgentId, observation: f64) {
        let mut registry = self.registry.write().await;
        if registry.contains(manager_id) {
            registry.record_performance(manager_id, observation);
        }
    }

    /// Synthesize progressively, and close the task once no subtask is active.
    ///
    /// Boxed because closing a derived task completes its origin subtask,
    /// which settles the origin's parent in turn.
    fn settle_task<'a>(&'a self, task_id: &'a str) -> BoxFuture<'a, ()> {
        async move { self.settle_task_inner(task_id).await }.boxed()
    }

    async fn settle_task_inner(&self, task_id: &str) {
        let subtasks = self.board.subtasks_for(task_id).await;
        if subtasks.iter().any(|s| s.status.is_active()) {
            if let Err(e) = self.synthesize_job(task_id).await {
                debug!("Progressive synthesis of {} skipped: {}", task_id, e);
            }
            return;
        }

        let completed: Vec<String> = subtasks
            .iter()
            .filter(|s| s.status == TaskStatus::Completed)
            .map(|s| s.id.clone())
            .collect();

        let closing = if completed.is_empty() {
            None
        } else {
            self.synthesizer
                .progressive_synthesis(task_id, &completed, Some(1))
                .await
        };

        let output = closing.map(|result| {
            let content = serde_json::to_value(&result).unwrap_or_else(|_| json!({ "summary": result.summary }));
            AgentOutput::new(task_id, SYNTHESIS_COMPONENT, content, result.confidence)
        });

        let closed = self
            .board
            .update_task(task_id, |task| {
                let transition = match &output {
                    Some(output) => task.complete(output.clone()),
                    None => task.fail(),
                };
                transition.map(|_| task.clone())
            })
            .await;

        let task = match closed {
            Some(Ok(task)) => task,
            Some(Err(e)) => {
                debug!("Task {} already closed: {}", task_id, e);
                return;
            }
            None => {
                warn!("Settled subtasks of unknown task {}", task_id);
                return;
            }
        };

        info!("Task {} closed as {}", task.id, task.status);
        self.persist_task(&task).await;

        // A task derived by further decomposition closes the subtask it came from
        let origin = self
            .board
            .subtasks()
            .await
            .into_iter()
            .find(|s| {
                s.status.is_active()
                    && s.context.extra.get(DERIVED_TASK).and_then(|v| v.as_str()) == Some(task_id)
            });

        if let Some(origin) = origin {
            let result = match output {
                Some(output) => self.complete_subtask(&origin.id, output).await,
                None => self.fail_subtask(&origin.id, "derived subtasks failed").await,
            };
            if let Err(e) = result {
                debug!("Origin subtask {} not updated: {}", origin.id, e);
            }
        }
    }

    // ========================================================================
    // Escalation and Routing
    // ========================================================================

    /// Handle an `ESCALATE` message
    pub async fn handle_escalation(&self, message: &AgentMessage) -> EscalationOutcome {
        let outcome = self.escalation.handle_escalation(message).await;

        let subtask = match EscalationRequest::from_message(message) {
            Some(request) => self.board.subtask(&request.subtask_id).await,
            None => None,
        };

        if let Some(subtask) = subtask {
            match &outcome {
                EscalationOutcome::Resolved { output } => self.after_completion(&subtask, output).await,
                EscalationOutcome::Abandoned | EscalationOutcome::ResolutionFailed => {
                    self.after_failure(&subtask).await
                }
                _ => self.persist_subtask(&subtask).await,
            }
        }

        outcome
    }

    /// Pick the next team given explicit history and tasks
    pub async fn decide_next_agent(&self, history: &[AgentMessage], tasks: &[AnalysisTask]) -> RouteDecision {
        self.routing.decide_next_agent(history, tasks).await
    }

    /// Pick the next team for a job from the supervisor's inbox and the job's subtasks
    pub async fn route_job(&self, job_id: &str) -> RouteDecision {
        let history = self.bus.messages_for(&self.id).await;
        let tasks: Vec<AnalysisTask> = self
            .board
            .subtasks_for(job_id)
            .await
            .iter()
            .map(subtask_view)
            .collect();

        self.decide_next_agent(&history, &tasks).await
    }

    // ========================================================================
    // Synthesis
    // ========================================================================

    /// Register a partial result for a job
    pub async fn register_task_result(
        &self,
        job_id: &str,
        task_id: &str,
        component: &str,
        result: serde_json::Value,
        quality: Option<f64>,
    ) {
        self.synthesizer
            .register_task_result(job_id, task_id, component, result, quality)
            .await;
    }

    /// Synthesize once enough of `task_ids` have results
    pub async fn progressive_synthesis(
        &self,
        job_id: &str,
        task_ids: &[String],
        min_components: Option<usize>,
    ) -> Option<FinalResult> {
        self.synthesizer
            .progressive_synthesis(job_id, task_ids, min_components)
            .await
    }

    /// Merge a collection into a job's final result
    pub async fn synthesize_results(&self, collection: &AgentResultCollection, job_id: &str) -> FinalResult {
        self.synthesizer.synthesize_results(collection, job_id).await
    }

    /// Progressive synthesis over the job's completed subtasks
    pub async fn synthesize_job(&self, job_id: &str) -> Result<Option<FinalResult>> {
        if self.board.task(job_id).await.is_none() {
            return Err(OrchestrationError::TaskNotFound {
                task_id: job_id.to_string(),
            });
        }

        let completed: Vec<String> = self
            .board
            .subtasks_for(job_id)
            .await
            .into_iter()
            .filter(|s| s.status == TaskStatus::Completed)
            .map(|s| s.id)
            .collect();

        Ok(self.synthesizer.progressive_synthesis(job_id, &completed, None).await)
    }

    /// Current synthesis of a job
    pub async fn final_result(&self, job_id: &str) -> Option<FinalResult> {
        self.synthesizer.final_result(job_id).await
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    async fn persist_task(&self, task: &AnalysisTask) {
        self.persist(format!("job:{}", task.id), serde_json::to_value(task)).await;
    }

    async fn persist_subtask(&self, subtask: &SubTask) {
        self.persist(format!("subtask:{}", subtask.id), serde_json::to_value(subtask))
            .await;
    }

    async fn persist(&self, key: String, value: serde_json::Result<serde_json::Value>) {
        let Some(store) = &self.store else {
            return;
        };

        let value = match value {
            Ok(value) => value,
            Err(e) => {
                warn!("Could not serialize snapshot {}: {}", key, e);
                return;
            }
        };

        if let Err(e) = store.save(&key, value, None).await {
            warn!("Could not persist snapshot {}: {}", key, e);
        }
    }
}
