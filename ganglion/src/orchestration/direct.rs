//! Direct Processing
//!
//! The supervisor's own specialist path: prompt the oracle for one goal type,
//! parse the JSON answer and fall back to the goal's empty structure when the
//! answer is unusable. This path never delegates and never escalates.

use tracing::{debug, info, warn};

use crate::oracle::{CallSite, OracleGateway, OracleRequest};
use crate::tasks::{AgentOutput, AnalysisTask, ConfidenceLevel};
use super::{OrchestrationError, Result, prompts};

/// Metadata key recording how an output was produced
pub const META_SOURCE: &str = "source";

/// Processes specialist tasks without delegation
#[derive(Clone)]
pub struct DirectProcessor {
    gateway: OracleGateway,
}

impl DirectProcessor {
    /// Create a new direct processor
    pub fn new(gateway: OracleGateway) -> Self {
        Self { gateway }
    }

    /// Run `task` through a single specialist oracle call.
    ///
    /// # Errors
    ///
    /// [`OrchestrationError::UnsupportedTaskType`] for composite goals, and
    /// [`OrchestrationError::Oracle`] when the call fails or times out. An
    /// unparsable answer is not an error: it yields the goal's default
    /// structure with [`ConfidenceLevel::Uncertain`].
    pub async fn process_directly(&self, task: &AnalysisTask) -> Result<AgentOutput> {
        if !task.goal_type.is_directly_processable() {
            return Err(OrchestrationError::UnsupportedTaskType {
                goal_type: task.goal_type,
            });
        }

        info!("Processing task {} ({}) directly", task.id, task.goal_type);

        let request = OracleRequest::text(
            CallSite::DirectProcessing,
            prompts::specialist(task.goal_type, &task.input),
        );
        let response = self.gateway.call(request).await?;

        let output = match response.into_json() {
            Some(content) => {
                let confidence = content
                    .get("confidence")
                    .and_then(|c| c.as_str())
                    .and_then(ConfidenceLevel::parse_label)
                    .unwrap_or(ConfidenceLevel::Medium);
                debug!("Direct processing of {} parsed ({})", task.id, confidence);
                AgentOutput::new(task.id.clone(), task.goal_type.as_str(), content, confidence)
            }
            None => {
                warn!("Direct processing of {} returned no JSON; using default output", task.id);
                AgentOutput::new(
                    task.id.clone(),
                    task.goal_type.as_str(),
                    task.goal_type.default_output(),
                    ConfidenceLevel::Uncertain,
                )
                .with_reasoning("specialist response could not be parsed")
            }
        };

        Ok(output.with_metadata(META_SOURCE, "direct"))
    }
}
