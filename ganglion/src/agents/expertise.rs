//! Expertise Areas
//!
//! The closed set of specialist domains managers can cover. Unknown tags never
//! panic: parsing yields `None` and callers fall back to [`Expertise::default`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::tasks::GoalType;

/// Specialist domain used to route tasks to managers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expertise {
    /// Topic and theme extraction
    TopicAnalysis,
    /// Sentiment and tone analysis
    SentimentAnalysis,
    /// People, organizations and other named entities
    EntityExtraction,
    /// Key points and notable statements
    KeyPointExtraction,
    /// Condensed summaries
    Summarization,
    /// Commitments and follow-ups
    ActionItemExtraction,
}

impl Expertise {
    /// All expertise areas
    pub const fn all() -> [Self; 6] {
        [
            Self::TopicAnalysis,
            Self::SentimentAnalysis,
            Self::EntityExtraction,
            Self::KeyPointExtraction,
            Self::Summarization,
            Self::ActionItemExtraction,
        ]
    }

    /// Stable tag used in prompts and on the wire
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TopicAnalysis => "topic_analysis",
            Self::SentimentAnalysis => "sentiment_analysis",
            Self::EntityExtraction => "entity_extraction",
            Self::KeyPointExtraction => "key_point_extraction",
            Self::Summarization => "summarization",
            Self::ActionItemExtraction => "action_item_extraction",
        }
    }

    /// Parse a tag, tolerating case and separator differences
    pub fn parse(tag: &str) -> Option<Self> {
        let normalized = tag.trim().to_lowercase().replace(['-', ' '], "_");
        Self::all().into_iter().find(|e| e.as_str() == normalized)
    }

    /// Parse a tag, substituting the default expertise when unknown
    pub fn parse_or_default(tag: &str) -> Self {
        Self::parse(tag).unwrap_or_default()
    }

    /// Goal type a manager with this expertise produces
    pub const fn goal_type(self) -> GoalType {
        match self {
            Self::TopicAnalysis => GoalType::TopicExtraction,
            Self::SentimentAnalysis => GoalType::SentimentAnalysis,
            Self::EntityExtraction => GoalType::EntityRecognition,
            Self::KeyPointExtraction => GoalType::KeyPoints,
            Self::Summarization => GoalType::Summary,
            Self::ActionItemExtraction => GoalType::ActionItems,
        }
    }

    /// Human-readable description
    pub const fn description(self) -> &'static str {
        match self {
            Self::TopicAnalysis => "Identify main topics and how they evolve",
            Self::SentimentAnalysis => "Assess sentiment and emotional tone",
            Self::EntityExtraction => "Extract people, organizations and places",
            Self::KeyPointExtraction => "Pull out key points and notable statements",
            Self::Summarization => "Produce condensed summaries",
            Self::ActionItemExtraction => "Find commitments, decisions and follow-ups",
        }
    }
}

impl Default for Expertise {
    fn default() -> Self {
        Self::TopicAnalysis
    }
}

impl fmt::Display for Expertise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Expertise {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Unknown expertise: {}", s))
    }
}
