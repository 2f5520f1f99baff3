//! Shared fixtures for ganglion integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use ganglion::agents::{AgentId, Expertise};
use ganglion::config::GanglionConfig;
use ganglion::coordination::{AgentMessage, Delivery, MessageBus, MessageBusConfig, MessageKind};
use ganglion::oracle::{CallSite, ScriptedOracle, ScriptedReply};
use ganglion::orchestration::Supervisor;

/// Supervisor wired to a scripted oracle, with managers listening on the bus
pub struct Harness {
    pub supervisor: Arc<Supervisor>,
    pub oracle: Arc<ScriptedOracle>,
    pub bus: Arc<MessageBus>,
    inboxes: HashMap<AgentId, mpsc::UnboundedReceiver<Delivery>>,
}

impl Harness {
    /// Build a harness and register `managers` with their expertise
    pub async fn new(oracle: ScriptedOracle, managers: &[(&str, &[Expertise])]) -> Self {
        Self::with_config(oracle, managers, test_config()).await
    }

    pub async fn with_config(
        oracle: ScriptedOracle,
        managers: &[(&str, &[Expertise])],
        config: GanglionConfig,
    ) -> Self {
        let oracle = Arc::new(oracle);
        let bus = Arc::new(MessageBus::new(MessageBusConfig::default()));
        let supervisor = Arc::new(Supervisor::new(oracle.clone(), bus.clone(), config));

        let mut inboxes = HashMap::new();
        for (name, expertise) in managers {
            let id = AgentId::from(*name);
            inboxes.insert(id.clone(), bus.register(id.clone()).await);
            supervisor.register_manager(id, expertise.to_vec()).await;
        }

        Self {
            supervisor,
            oracle,
            bus,
            inboxes,
        }
    }

    /// Messages queued for a manager since the last drain
    pub fn drain(&mut self, manager: &str) -> Vec<AgentMessage> {
        let Some(inbox) = self.inboxes.get_mut(&AgentId::from(manager)) else {
            return Vec::new();
        };
        let mut messages = Vec::new();
        while let Ok(delivery) = inbox.try_recv() {
            messages.push((*delivery.message).clone());
        }
        messages
    }

    /// Feed a message from `manager` straight to the supervisor
    pub async fn report(&self, message: AgentMessage) {
        self.supervisor
            .handle_message(&message)
            .await
            .expect("supervisor handles report");
    }

    /// Escalate a subtask on behalf of `manager`
    pub fn escalation(&self, manager: &str, subtask_id: &str, reason: &str) -> AgentMessage {
        AgentMessage::to(
            MessageKind::Escalate,
            AgentId::from(manager),
            self.supervisor.id().clone(),
            json!({ "subtask_id": subtask_id, "reason": reason }),
        )
    }
}

/// Defaults with a short oracle timeout
pub fn test_config() -> GanglionConfig {
    let mut config = GanglionConfig::default();
    config.oracle.timeout_secs = 1;
    config
}

/// Decomposition reply proposing `(description, expertise, priority)` subtasks
pub fn decomposition(entries: &[(&str, &str, u8)]) -> ScriptedReply {
    let subtasks: Vec<_> = entries
        .iter()
        .map(|(description, expertise, priority)| {
            json!({
                "description": description,
                "expertise": expertise,
                "priority": priority,
            })
        })
        .collect();
    ScriptedReply::Decision(json!({ "subtasks": subtasks }))
}

/// Well-formed synthesis reply
pub fn synthesis(summary: &str) -> ScriptedReply {
    ScriptedReply::Decision(json!({
        "summary": summary,
        "sections": { "topics": ["launch plan"] },
        "insights": ["The team agreed on a date"],
        "confidence": "HIGH",
    }))
}

/// Escalation decision reply
pub fn decision(action: i64, guidance: Option<&str>) -> ScriptedReply {
    match guidance {
        Some(guidance) => ScriptedReply::Decision(json!({ "action": action, "guidance": guidance })),
        None => ScriptedReply::Decision(json!({ "action": action })),
    }
}

/// Oracle whose first decomposition proposes a single topic subtask
pub fn single_topic_oracle() -> ScriptedOracle {
    ScriptedOracle::new().on(
        CallSite::Decomposition,
        decomposition(&[("Identify main topics", "topic_analysis", 2)]),
    )
}

pub fn transcript() -> serde_json::Value {
    json!({ "transcript": "Alice: we ship on Friday. Bob: I am worried about QA." })
}
