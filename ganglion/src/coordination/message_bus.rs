//! Message Bus - Actor-to-Actor Messaging
//!
//! Delivers [`AgentMessage`]s to one or more named recipients or to every
//! registered agent (broadcast).
//!
//! # Guarantees
//!
//! - **Per-pair ordering**: every (sender, recipient) pair carries a
//!   monotonically increasing sequence number, stamped under one lock with
//!   the channel push, so send order is preserved per pair
//! - **Append-only history**: every sent message is recorded in send order
//! - **Dead letters**: messages to unregistered recipients are kept in a
//!   bounded dead-letter queue instead of being dropped silently

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::agents::AgentId;
use super::{CoordinationError, Result};

// ============================================================================
// Core Types
// ============================================================================

/// Kind of inter-actor message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// Ask another actor for something
    Request,

    /// Answer to a request or an escalation
    Response,

    /// Registration and status announcements
    Notification,

    /// Hand off a task
    Delegate,

    /// A manager reporting it is stuck
    Escalate,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Request => "REQUEST",
            Self::Response => "RESPONSE",
            Self::Notification => "NOTIFICATION",
            Self::Delegate => "DELEGATE",
            Self::Escalate => "ESCALATE",
        };
        f.write_str(name)
    }
}

/// Addressing for a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipients {
    /// Explicit recipient list
    Agents(Vec<AgentId>),

    /// Every registered agent except the sender
    Broadcast,
}

impl Recipients {
    /// Whether `agent` is addressed by this recipient set
    pub fn includes(&self, agent: &AgentId) -> bool {
        match self {
            Self::Agents(agents) => agents.contains(agent),
            Self::Broadcast => true,
        }
    }
}

/// Envelope for inter-actor communication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Unique message ID
    pub id: String,

    /// Message kind
    pub kind: MessageKind,

    /// Source agent
    pub sender: AgentId,

    /// Target agents
    pub recipients: Recipients,

    /// Opaque payload
    pub content: serde_json::Value,

    /// Message this one answers
    pub reply_to: Option<String>,

    /// Free-form string metadata (e.g. `task_type`)
    pub metadata: HashMap<String, String>,

    /// Creation timestamp
    pub timestamp: DateTime<Utc>,
}

impl AgentMessage {
    /// Create a message with a fresh ID
    pub fn new(
        kind: MessageKind,
        sender: AgentId,
        recipients: Recipients,
        content: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            sender,
            recipients,
            content,
            reply_to: None,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create a message for a single recipient
    pub fn to(kind: MessageKind, sender: AgentId, recipient: AgentId, content: serde_json::Value) -> Self {
        Self::new(kind, sender, Recipients::Agents(vec![recipient]), content)
    }

    /// Create a broadcast message
    pub fn broadcast(kind: MessageKind, sender: AgentId, content: serde_json::Value) -> Self {
        Self::new(kind, sender, Recipients::Broadcast, content)
    }

    /// Mark this message as an answer to `message_id`
    pub fn in_reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to = Some(message_id.into());
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// String field of an object payload
    pub fn content_str(&self, field: &str) -> Option<&str> {
        self.content.get(field).and_then(|v| v.as_str())
    }
}

/// A message as received by one recipient
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Position in the (sender, recipient) stream, starting at 1
    pub sequence: u64,

    /// The delivered message
    pub message: Arc<AgentMessage>,
}

/// Outcome of a send
#[derive(Debug, Clone, Default)]
pub struct DeliveryReport {
    pub message_id: String,
    pub delivered: Vec<AgentId>,
    pub dead_lettered: Vec<AgentId>,
}

/// A message that could not be delivered to one recipient
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub message: Arc<AgentMessage>,
    pub recipient: AgentId,
    pub reason: String,
}

/// Message bus configuration
#[derive(Debug, Clone)]
pub struct MessageBusConfig {
    /// Maximum messages kept in history
    pub max_history_size: usize,

    /// Maximum messages in dead letter queue
    pub max_dead_letters: usize,
}

impl Default for MessageBusConfig {
    fn default() -> Self {
        Self {
            max_history_size: 10_000,
            max_dead_letters: 1_000,
        }
    }
}

/// Message bus statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageBusStats {
    pub total_sent: u64,
    pub total_delivered: u64,
    pub total_dead_letters: u64,
}

#[derive(Default)]
struct BusState {
    history: VecDeque<Arc<AgentMessage>>,
    sequences: HashMap<(AgentId, AgentId), u64>,
    dead_letters: VecDeque<DeadLetter>,
    stats: MessageBusStats,
}

// ============================================================================
// Message Bus
// ============================================================================

/// In-process message bus with one channel per registered agent
pub struct MessageBus {
    channels: RwLock<HashMap<AgentId, mpsc::UnboundedSender<Delivery>>>,
    state: Mutex<BusState>,
    config: MessageBusConfig,
}

impl MessageBus {
    /// Create a new message bus
    pub fn new(config: MessageBusConfig) -> Self {
        info!("Initializing message bus");
        Self {
            channels: RwLock::new(HashMap::new()),
            state: Mutex::new(BusState::default()),
            config,
        }
    }

    // ========================================================================
    // Agent Registration
    // ========================================================================

    /// Register an agent, returning its inbox.
    ///
    /// Registering an already-registered agent replaces its inbox.
    pub async fn register(&self, agent_id: AgentId) -> mpsc::UnboundedReceiver<Delivery> {
        debug!("Registering agent {} on message bus", agent_id);
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.write().await.insert(agent_id, tx);
        rx
    }

    /// Unregister an agent
    pub async fn unregister(&self, agent_id: &AgentId) -> Result<()> {
        self.channels
            .write()
            .await
            .remove(agent_id)
            .map(|_| ())
            .ok_or_else(|| CoordinationError::AgentNotFound(agent_id.to_string()))
    }

    /// Whether an agent has an inbox
    pub async fn is_registered(&self, agent_id: &AgentId) -> bool {
        self.channels.read().await.contains_key(agent_id)
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Send a message to its recipients
    pub async fn send(&self, message: AgentMessage) -> Result<DeliveryReport> {
        let message = Arc::new(message);
        let channels = self.channels.read().await;

        let targets: Vec<AgentId> = match &message.recipients {
            Recipients::Agents(agents) => {
                let mut unique = Vec::with_capacity(agents.len());
                for agent in agents {
                    if !unique.contains(agent) {
                        unique.push(agent.clone());
                    }
                }
                unique
            }
            Recipients::Broadcast => {
                let mut all: Vec<AgentId> = channels
                    .keys()
                    .filter(|id| **id != message.sender)
                    .cloned()
                    .collect();
                all.sort();
                all
            }
        };

        if targets.is_empty() && matches!(message.recipients, Recipients::Agents(_)) {
            return Err(CoordinationError::NoRecipients {
                message_id: message.id.clone(),
            });
        }

        let mut state = self.state.lock().await;
        let mut report = DeliveryReport {
            message_id: message.id.clone(),
            ..Default::default()
        };

        for target in targets {
            let sequence = {
                let counter = state
                    .sequences
                    .entry((message.sender.clone(), target.clone()))
                    .or_insert(0);
                *counter += 1;
                *counter
            };

            let delivery = Delivery {
                sequence,
                message: message.clone(),
            };

            let outcome = match channels.get(&target) {
                Some(tx) => tx.send(delivery).map_err(|_| "inbox closed"),
                None => Err("recipient not registered"),
            };

            match outcome {
                Ok(()) => {
                    debug!(
                        "{} {} delivered to {} (seq {})",
                        message.kind, message.id, target, sequence
                    );
                    state.stats.total_delivered += 1;
                    report.delivered.push(target);
                }
                Err(reason) => {
                    warn!(
                        "{} {} to {} dead-lettered: {}",
                        message.kind, message.id, target, reason
                    );
                    Self::push_dead_letter(
                        &mut state,
                        self.config.max_dead_letters,
                        DeadLetter {
                            message: message.clone(),
                            recipient: target.clone(),
                            reason: reason.to_string(),
                        },
                    );
                    report.dead_lettered.push(target);
                }
            }
        }

        state.history.push_back(message);
        if state.history.len() > self.config.max_history_size {
            state.history.pop_front();
        }
        state.stats.total_sent += 1;

        Ok(report)
    }

    fn push_dead_letter(state: &mut BusState, max: usize, letter: DeadLetter) {
        state.dead_letters.push_back(letter);
        if state.dead_letters.len() > max {
            state.dead_letters.pop_front();
        }
        state.stats.total_dead_letters += 1;
    }

    // ========================================================================
    // History & Monitoring
    // ========================================================================

    /// Every recorded message, in send order
    pub async fn history(&self) -> Vec<AgentMessage> {
        self.state
            .lock()
            .await
            .history
            .iter()
            .map(|m| (**m).clone())
            .collect()
    }

    /// Recorded messages addressed to `agent`, in send order
    pub async fn messages_for(&self, agent: &AgentId) -> Vec<AgentMessage> {
        self.state
            .lock()
            .await
            .history
            .iter()
            .filter(|m| m.recipients.includes(agent) && m.sender != *agent)
            .map(|m| (**m).clone())
            .collect()
    }

    /// Dead letter queue
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.iter().cloned().collect()
    }

    /// Get message bus statistics
    pub async fn stats(&self) -> MessageBusStats {
        self.state.lock().await.stats.clone()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(MessageBusConfig::default())
    }
}
