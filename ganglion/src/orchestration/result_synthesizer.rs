//! Result Synthesizer - Progressive Aggregation of Task Results
//!
//! Accumulates partial results per job and folds them into a single
//! [`FinalResult`] as soon as a quorum of components is available.
//!
//! # Synthesis Process
//!
//! 1. Register intermediate results keyed by `<job>:<task>`
//! 2. Gate on a minimum number of distinct contributing results
//! 3. Map quality scores onto confidence levels
//! 4. Group outputs by component and render them for the oracle
//! 5. Decode summary, sections, insights and confidence from the reply
//! 6. Fall back to a deterministic merge when the oracle cannot help

use std::collections::{BTreeMap, HashMap, HashSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::agents::AgentId;
use crate::oracle::{CallSite, OracleGateway, OracleRequest, OracleResponse};
use crate::tasks::{
    AgentOutput, AgentResultCollection, ConfidenceLevel, FinalResult, SynthesisMetadata,
};
use super::prompts;

/// Summary used by the deterministic fallback
pub const FALLBACK_SUMMARY: &str =
    "Automated synthesis failed; sections contain the raw component results.";

/// Single insight used by the deterministic fallback
pub const FALLBACK_INSIGHT: &str = "Review the individual component results for detailed findings.";

/// Insights kept from an oracle synthesis
const MAX_INSIGHTS: usize = 5;

// ============================================================================
// Intermediate Results
// ============================================================================

/// One registered partial result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntermediateResult {
    pub job_id: String,
    pub task_id: String,

    /// Component or category label
    pub component: String,

    /// Raw result content
    pub result: serde_json::Value,

    /// Quality score (0.0 - 1.0)
    pub quality: f64,

    /// Agent that reported the result, if known
    #[serde(default)]
    pub reported_by: Option<AgentId>,

    pub registered_at: DateTime<Utc>,
}

impl IntermediateResult {
    fn to_output(&self) -> AgentOutput {
        AgentOutput::new(
            self.task_id.clone(),
            self.component.clone(),
            self.result.clone(),
            ConfidenceLevel::from_quality(self.quality),
        )
        .with_metadata("quality", format!("{:.2}", self.quality))
        .with_timestamp(self.registered_at)
    }
}

fn result_key(job_id: &str, task_id: &str) -> String {
    format!("{job_id}:{task_id}")
}

// ============================================================================
// Result Synthesizer
// ============================================================================

/// Synthesizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesizerConfig {
    /// Distinct results required before progressive synthesis runs
    pub min_components: usize,

    /// Quality assumed when a caller gives none
    pub default_quality: f64,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            min_components: 2,
            default_quality: 0.8,
        }
    }
}

/// Decoded or fallback synthesis body
struct SynthesisBody {
    summary: String,
    sections: BTreeMap<String, serde_json::Value>,
    insights: Vec<String>,
    confidence: ConfidenceLevel,
    fallback: bool,
}

/// Progressive synthesis service
pub struct ResultSynthesizer {
    gateway: OracleGateway,
    intermediate: RwLock<HashMap<String, IntermediateResult>>,
    finals: RwLock<HashMap<String, FinalResult>>,
    config: SynthesizerConfig,
}

impl ResultSynthesizer {
    /// Create a new result synthesizer
    pub fn new(gateway: OracleGateway, config: SynthesizerConfig) -> Self {
        info!("Initializing Result Synthesizer (min {} components)", config.min_components);

        Self {
            gateway,
            intermediate: RwLock::new(HashMap::new()),
            finals: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Synthesizer configuration
    pub fn config(&self) -> &SynthesizerConfig {
        &self.config
    }

    /// Register or replace the result of `task_id` within `job_id`.
    ///
    /// `quality` defaults to the configured value and is clamped to [0, 1].
    pub async fn register_task_result(
        &self,
        job_id: &str,
        task_id: &str,
        component: &str,
        result: serde_json::Value,
        quality: Option<f64>,
    ) {
        self.insert_result(job_id, task_id, component, result, quality, None).await;
    }

    /// Register a result together with the agent that reported it
    pub async fn register_reported_result(
        &self,
        job_id: &str,
        task_id: &str,
        component: &str,
        result: serde_json::Value,
        quality: Option<f64>,
        reported_by: AgentId,
    ) {
        self.insert_result(job_id, task_id, component, result, quality, Some(reported_by))
            .await;
    }

    async fn insert_result(
        &self,
        job_id: &str,
        task_id: &str,
        component: &str,
        result: serde_json::Value,
        quality: Option<f64>,
        reported_by: Option<AgentId>,
    ) {
        let quality = quality
            .filter(|q| !q.is_nan())
            .unwrap_or(self.config.default_quality)
            .clamp(0.0, 1.0);

        debug!("Registering result {}:{} ({}, quality {:.2})", job_id, task_id, component, quality);

        self.intermediate.write().await.insert(
            result_key(job_id, task_id),
            IntermediateResult {
                job_id: job_id.to_string(),
                task_id: task_id.to_string(),
                component: component.to_string(),
                result,
                quality,
                reported_by,
                registered_at: Utc::now(),
            },
        );
    }

    /// Synthesize once at least `min_components` of `task_ids` have results.
    ///
    /// Returns `None` while the quorum is not met. Safe to poll concurrently.
    pub async fn progressive_synthesis(
        &self,
        job_id: &str,
        task_ids: &[String],
        min_components: Option<usize>,
    ) -> Option<FinalResult> {
        let min_components = min_components.unwrap_or(self.config.min_components);

        let snapshot: Vec<IntermediateResult> = {
            let intermediate = self.intermediate.read().await;
            let mut seen = HashSet::new();
            task_ids
                .iter()
                .filter(|id| seen.insert(id.as_str()))
                .filter_map(|id| intermediate.get(&result_key(job_id, id)).cloned())
                .collect()
        };

        if snapshot.len() < min_components {
            debug!(
                "Job {} has {}/{} components; synthesis not ready",
                job_id,
                snapshot.len(),
                min_components
            );
            return None;
        }

        let mut worker_ids: Vec<AgentId> = snapshot.iter().filter_map(|r| r.reported_by.clone()).collect();
        worker_ids.sort();
        worker_ids.dedup();

        let outputs = snapshot.iter().map(IntermediateResult::to_output).collect();
        let collection = AgentResultCollection::new(job_id, outputs, worker_ids);

        Some(self.synthesize_results(&collection, job_id).await)
    }

    /// Merge a collection into the job's final result. Never fails.
    pub async fn synthesize_results(&self, collection: &AgentResultCollection, job_id: &str) -> FinalResult {
        info!("Synthesizing {} outputs for job {}", collection.outputs.len(), job_id);

        let groups = collection.group_by_component();
        let request = OracleRequest::text(CallSite::Synthesis, prompts::synthesis(job_id, &render_groups(&groups)));

        let raw_sections: BTreeMap<String, serde_json::Value> = groups
            .iter()
            .map(|(component, outputs)| {
                let contents = outputs.iter().map(|o| o.content().clone()).collect();
                (component.clone(), serde_json::Value::Array(contents))
            })
            .collect();

        let body = self
            .gateway
            .call_with_fallback(request, decode_synthesis, |_| SynthesisBody {
                summary: FALLBACK_SUMMARY.to_string(),
                sections: raw_sections,
                insights: vec![FALLBACK_INSIGHT.to_string()],
                confidence: ConfidenceLevel::Low,
                fallback: true,
            })
            .await;

        let now = Utc::now();
        let result = FinalResult {
            summary: body.summary,
            sections: body.sections,
            insights: body.insights,
            confidence: body.confidence,
            metadata: SynthesisMetadata {
                job_id: job_id.to_string(),
                component_count: collection.outputs.len(),
                component_types: groups.keys().cloned().collect(),
                contributors: collection.metadata.worker_ids.clone(),
                synthesized_at: now,
                fallback: body.fallback,
            },
            timestamp: now,
        };

        self.finals
            .write()
            .await
            .insert(job_id.to_string(), result.clone());

        result
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Current synthesis of a job
    pub async fn final_result(&self, job_id: &str) -> Option<FinalResult> {
        self.finals.read().await.get(job_id).cloned()
    }

    /// Number of intermediate results registered for a job
    pub async fn intermediate_count(&self, job_id: &str) -> usize {
        self.intermediate
            .read()
            .await
            .values()
            .filter(|r| r.job_id == job_id)
            .count()
    }

    /// Drop every intermediate and final result of a job
    pub async fn clear_job(&self, job_id: &str) {
        self.intermediate.write().await.retain(|_, r| r.job_id != job_id);
        self.finals.write().await.remove(job_id);
        debug!("Cleared synthesis state for job {}", job_id);
    }
}

/// Render component groups as annotated text blocks
fn render_groups(groups: &BTreeMap<String, Vec<&AgentOutput>>) -> String {
    groups
        .iter()
        .map(|(component, outputs)| {
            let entries = outputs
                .iter()
                .map(|o| {
                    format!(
                        "- [confidence {}, {}] {}",
                        o.confidence(),
                        o.timestamp().to_rfc3339(),
                        o.content()
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
            format!("## {component}\n{entries}")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn decode_synthesis(response: OracleResponse) -> std::result::Result<SynthesisBody, String> {
    let json = response
        .into_json()
        .ok_or_else(|| "no JSON object in reply".to_string())?;

    let summary = json
        .get("summary")
        .and_then(|s| s.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "missing summary".to_string())?
        .to_string();

    let sections = json
        .get("sections")
        .and_then(|s| s.as_object())
        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    let insights = json
        .get("insights")
        .and_then(|i| i.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str())
                .map(str::to_string)
                .take(MAX_INSIGHTS)
                .collect()
        })
        .unwrap_or_default();

    let confidence = match json.get("confidence").and_then(|c| c.as_str()) {
        Some(label) => ConfidenceLevel::parse_label(label).unwrap_or_else(|| {
            warn!("Unknown synthesis confidence '{}'; using MEDIUM", label);
            ConfidenceLevel::Medium
        }),
        None => ConfidenceLevel::Medium,
    };

    Ok(SynthesisBody {
        summary,
        sections,
        insights,
        confidence,
        fallback: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::ScriptedOracle;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn synthesizer(oracle: ScriptedOracle) -> ResultSynthesizer {
        ResultSynthesizer::new(
            OracleGateway::new(Arc::new(oracle), Duration::from_millis(100)),
            SynthesizerConfig::default(),
        )
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_progressive_gating() {
        let reply = json!({
            "summary": "Pricing dominated a positive call.",
            "sections": { "topics": ["pricing"] },
            "insights": ["a", "b", "c"],
            "confidence": "High"
        });
        let synth = synthesizer(ScriptedOracle::new().with_decision(reply));

        synth.register_task_result("job", "t1", "topics", json!(["pricing"]), None).await;
        assert!(synth.progressive_synthesis("job", &ids(&["t1", "t2"]), Some(2)).await.is_none());

        synth.register_task_result("job", "t2", "sentiment", json!({ "overall": "positive" }), Some(0.65)).await;
        let result = synth.progressive_synthesis("job", &ids(&["t1", "t2"]), Some(2)).await.unwrap();

        assert_eq!(result.confidence, ConfidenceLevel::High);
        assert_eq!(result.insights.len(), 3);
        assert_eq!(result.metadata.component_count, 2);
        assert!(!result.metadata.fallback);
        assert_eq!(synth.final_result("job").await.unwrap().summary, result.summary);
    }

    #[tokio::test]
    async fn test_progressive_synthesis_lists_reporters() {
        let synth = synthesizer(ScriptedOracle::new());
        let manager = AgentId::from("manager-topics");

        synth
            .register_reported_result("job", "t1", "topics", json!(["pricing"]), Some(0.9), manager.clone())
            .await;
        synth
            .register_reported_result("job", "t2", "entities", json!(["Acme"]), Some(0.7), manager.clone())
            .await;
        synth.register_task_result("job", "t3", "sentiment", json!("neutral"), None).await;

        let result = synth
            .progressive_synthesis("job", &ids(&["t1", "t2", "t3"]), Some(3))
            .await
            .unwrap();
        assert_eq!(result.metadata.component_count, 3);
        assert_eq!(result.metadata.contributors, vec![manager]);
    }

    #[tokio::test]
    async fn test_reregistration_does_not_double_count() {
        let synth = synthesizer(ScriptedOracle::new());
        synth.register_task_result("job", "t1", "topics", json!(1), None).await;
        synth.register_task_result("job", "t1", "topics", json!(2), None).await;

        assert_eq!(synth.intermediate_count("job").await, 1);
        assert!(synth.progressive_synthesis("job", &ids(&["t1", "t1"]), Some(2)).await.is_none());
    }

    #[tokio::test]
    async fn test_fallback_mirrors_groups() {
        let synth = synthesizer(ScriptedOracle::new().with_error("unavailable"));
        let outputs = vec![
            AgentOutput::new("t1", "topics", json!(["pricing"]), ConfidenceLevel::High),
            AgentOutput::new("t2", "topics", json!(["hiring"]), ConfidenceLevel::Medium),
            AgentOutput::new("t3", "sentiment", json!({ "overall": "neutral" }), ConfidenceLevel::Low),
        ];
        let collection = AgentResultCollection::new("job", outputs, Vec::new());

        let result = synth.synthesize_results(&collection, "job").await;

        assert_eq!(result.summary, FALLBACK_SUMMARY);
        assert_eq!(result.confidence, ConfidenceLevel::Low);
        assert_eq!(result.insights, vec![FALLBACK_INSIGHT.to_string()]);
        assert_eq!(result.sections.len(), 2);
        assert_eq!(result.sections["topics"], json!([["pricing"], ["hiring"]]));
        assert_eq!(result.metadata.component_types, vec!["sentiment", "topics"]);
        assert!(result.metadata.fallback);
    }

    #[tokio::test]
    async fn test_missing_component_defaults_to_general() {
        let synth = synthesizer(ScriptedOracle::new().with_text("not json"));
        let output = AgentOutput::new("t1", "", json!("x"), ConfidenceLevel::High);
        let collection = AgentResultCollection::new("job", vec![output], Vec::new());

        let result = synth.synthesize_results(&collection, "job").await;
        assert!(result.sections.contains_key("general"));
    }

    #[tokio::test]
    async fn test_unknown_confidence_label_is_medium() {
        let reply = "```json\n{\"summary\": \"ok\", \"confidence\": \"stellar\"}\n```";
        let synth = synthesizer(ScriptedOracle::new().with_text(reply));
        let collection = AgentResultCollection::new(
            "job",
            vec![AgentOutput::new("t1", "topics", json!(1), ConfidenceLevel::High)],
            Vec::new(),
        );

        let result = synth.synthesize_results(&collection, "job").await;
        assert_eq!(result.confidence, ConfidenceLevel::Medium);
        assert_eq!(result.summary, "ok");
    }

    #[tokio::test]
    async fn test_new_synthesis_overwrites_and_clear_job() {
        let synth = synthesizer(
            ScriptedOracle::new()
                .with_decision(json!({ "summary": "first" }))
                .with_decision(json!({ "summary": "second" })),
        );
        for task in ["t1", "t2"] {
            synth.register_task_result("job", task, "topics", json!(task), Some(0.9)).await;
        }

        synth.progressive_synthesis("job", &ids(&["t1", "t2"]), None).await;
        synth.progressive_synthesis("job", &ids(&["t1", "t2"]), None).await;
        assert_eq!(synth.final_result("job").await.unwrap().summary, "second");

        synth.clear_job("job").await;
        assert!(synth.final_result("job").await.is_none());
        assert_eq!(synth.intermediate_count("job").await, 0);
    }

    #[tokio::test]
    async fn test_quality_is_clamped() {
        let synth = synthesizer(ScriptedOracle::new());
        synth.register_task_result("job", "t1", "topics", json!(1), Some(3.0)).await;

        let stored = synth.intermediate.read().await["job:t1"].quality;
        assert_eq!(stored, 1.0);
    }
}
