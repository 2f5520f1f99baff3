//! Oracle prompt templates
//!
//! Plain `format!` templates for every oracle call site. Each template asks for
//! a single JSON object so replies go through the same extraction path.

use crate::agents::Expertise;
use crate::tasks::{AnalysisTask, GoalType, SubTask};

/// Upper bound on transcript characters embedded in a prompt
const MAX_INPUT_CHARS: usize = 12_000;

/// Render a task input for inclusion in a prompt
pub fn render_input(input: &serde_json::Value) -> String {
    let text = match input {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Object(map) => match map.get("transcript") {
            Some(serde_json::Value::String(text)) => text.clone(),
            _ => serde_json::to_string_pretty(input).unwrap_or_default(),
        },
        other => other.to_string(),
    };

    if text.chars().count() > MAX_INPUT_CHARS {
        let truncated: String = text.chars().take(MAX_INPUT_CHARS).collect();
        format!("{truncated}\n[... truncated]")
    } else {
        text
    }
}

fn expertise_catalog() -> String {
    Expertise::all()
        .iter()
        .map(|e| format!("- {}: {}", e.as_str(), e.description()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Ask for 3-5 subtask descriptors
pub fn decomposition(task: &AnalysisTask, min: usize, max: usize) -> String {
    format!(
        "You are the supervisor of a team of transcript analysis specialists.\n\
         Break the following {goal} job into {min} to {max} subtasks.\n\n\
         Available expertise areas:\n{catalog}\n\n\
         Transcript:\n{input}\n\n\
         Respond with a JSON object of the form:\n\
         {{\"subtasks\": [{{\"description\": \"...\", \"expertise\": \"<expertise area>\", \
         \"priority\": <1-5, 1 is most urgent>, \"dependencies\": [\"<description of another subtask>\"]}}]}}",
        goal = task.goal_type,
        catalog = expertise_catalog(),
        input = render_input(&task.input),
    )
}

/// Ask which of the five escalation actions to take
pub fn escalation(subtask: &SubTask, reason: &str, context: &serde_json::Value) -> String {
    format!(
        "A manager could not make progress on a subtask and escalated it.\n\n\
         Subtask: {id}\n\
         Type: {goal}\n\
         Description: {description}\n\
         Current manager: {manager}\n\
         Priority: {priority}\n\
         Previous reassignments: {attempts}\n\n\
         Reason: {reason}\n\
         Context: {context}\n\n\
         Choose one action:\n\
         1. Reassign to another manager\n\
         2. Provide guidance to the current manager\n\
         3. Decompose into smaller subtasks\n\
         4. Abandon the subtask\n\
         5. Resolve it directly\n\n\
         Respond with a JSON object: {{\"action\": <1-5>, \"guidance\": \"...\", \"rationale\": \"...\"}}",
        id = subtask.id,
        goal = subtask.goal_type,
        description = subtask.context.description,
        manager = subtask.managed_by,
        priority = subtask.priority,
        attempts = subtask.attempts,
        context = context,
    )
}

/// Specialist instructions for direct processing
pub fn specialist(goal_type: GoalType, input: &serde_json::Value) -> String {
    let instructions = match goal_type {
        GoalType::TopicExtraction => {
            "Identify the main topics discussed and how they progress. \
             Respond with JSON: {\"topics\": [{\"name\": \"...\", \"summary\": \"...\", \"relevance\": 0.0}]}"
        }
        GoalType::SentimentAnalysis => {
            "Assess the overall sentiment and tone, then per notable segment. \
             Respond with JSON: {\"overall\": \"positive|neutral|negative\", \"score\": 0.0, \
             \"segments\": [{\"excerpt\": \"...\", \"sentiment\": \"...\"}]}"
        }
        GoalType::EntityRecognition => {
            "Extract people, organizations, places and other named entities. \
             Respond with JSON: {\"entities\": [{\"name\": \"...\", \"type\": \"...\", \"mentions\": 0}]}"
        }
        GoalType::KeyPoints => {
            "List the key points and notable statements. \
             Respond with JSON: {\"key_points\": [{\"point\": \"...\", \"importance\": \"high|medium|low\"}]}"
        }
        GoalType::Summary => {
            "Write a concise summary of the transcript. \
             Respond with JSON: {\"summary\": \"...\"}"
        }
        GoalType::ActionItems => {
            "Extract action items, owners and decisions. \
             Respond with JSON: {\"action_items\": [{\"item\": \"...\", \"owner\": \"...\", \"due\": null}]}"
        }
        GoalType::FullAnalysis => "Analyze the transcript. Respond with a JSON object.",
    };

    format!(
        "You are a transcript analysis specialist.\n{instructions}\n\nTranscript:\n{input}",
        input = render_input(input),
    )
}

/// Ask for an executive synthesis of rendered component blocks
pub fn synthesis(job_id: &str, blocks: &str) -> String {
    format!(
        "Synthesize the following analysis results for job {job_id} into one deliverable.\n\n\
         {blocks}\n\n\
         Respond with a JSON object:\n\
         {{\"summary\": \"<executive summary>\", \
         \"sections\": {{\"<section name>\": <content>}}, \
         \"insights\": [\"<3 to 5 cross-cutting insights>\"], \
         \"confidence\": \"high|medium|low|uncertain\"}}"
    )
}
