//! Scripted Oracle
//!
//! Queue-driven [`Oracle`] for tests and offline runs. Replies are consumed in
//! order, first from the queue registered for the request's [`CallSite`], then
//! from the shared queue. Every request is recorded.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

use super::{CallSite, Oracle, OracleError, OracleRequest, OracleResponse};

/// One scripted reply
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Decision(serde_json::Value),
    Error(String),

    /// Never answers; exercises caller timeouts
    Hang,
}

#[derive(Default)]
struct Script {
    shared: VecDeque<ScriptedReply>,
    per_site: HashMap<CallSite, VecDeque<ScriptedReply>>,
    requests: Vec<OracleRequest>,
}

/// Oracle answering from a prepared script
#[derive(Default)]
pub struct ScriptedOracle {
    script: Mutex<Script>,
}

impl ScriptedOracle {
    /// Empty script; every call fails until replies are queued
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply on the shared queue
    pub fn with_reply(mut self, reply: ScriptedReply) -> Self {
        self.script.get_mut().shared.push_back(reply);
        self
    }

    /// Queue a text reply on the shared queue
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_reply(ScriptedReply::Text(text.into()))
    }

    /// Queue a decision reply on the shared queue
    pub fn with_decision(self, decision: serde_json::Value) -> Self {
        self.with_reply(ScriptedReply::Decision(decision))
    }

    /// Queue a failure on the shared queue
    pub fn with_error(self, message: impl Into<String>) -> Self {
        self.with_reply(ScriptedReply::Error(message.into()))
    }

    /// Queue a reply that never arrives
    pub fn with_hang(self) -> Self {
        self.with_reply(ScriptedReply::Hang)
    }

    /// Queue a reply for one call site
    pub fn on(mut self, call_site: CallSite, reply: ScriptedReply) -> Self {
        self.script
            .get_mut()
            .per_site
            .entry(call_site)
            .or_default()
            .push_back(reply);
        self
    }

    /// Queue a reply at runtime
    pub async fn push(&self, call_site: Option<CallSite>, reply: ScriptedReply) {
        let mut script = self.script.lock().await;
        match call_site {
            Some(site) => script.per_site.entry(site).or_default().push_back(reply),
            None => script.shared.push_back(reply),
        }
    }

    /// Requests received so far
    pub async fn requests(&self) -> Vec<OracleRequest> {
        self.script.lock().await.requests.clone()
    }

    /// Number of requests received for a call site
    pub async fn call_count(&self, call_site: CallSite) -> usize {
        self.script
            .lock()
            .await
            .requests
            .iter()
            .filter(|r| r.call_site == call_site)
            .count()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn complete(&self, request: OracleRequest) -> Result<OracleResponse, OracleError> {
        let reply = {
            let mut script = self.script.lock().await;
            let site = request.call_site;
            script.requests.push(request);
            let site_reply = script.per_site.get_mut(&site).and_then(VecDeque::pop_front);
            match site_reply {
                Some(reply) => Some(reply),
                None => script.shared.pop_front(),
            }
        };

        match reply {
            Some(ScriptedReply::Text(text)) => Ok(OracleResponse::Text(text)),
            Some(ScriptedReply::Decision(value)) => Ok(OracleResponse::Decision(value)),
            Some(ScriptedReply::Error(message)) => Err(OracleError::CallFailed(message)),
            Some(ScriptedReply::Hang) => {
                futures::future::pending::<()>().await;
                Err(OracleError::CallFailed("unreachable".to_string()))
            }
            None => Err(OracleError::CallFailed("script exhausted".to_string())),
        }
    }
}
