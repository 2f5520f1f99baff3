//! Versioned State Store
//!
//! Key-value store interface used to persist job and task snapshots across
//! process restarts. Every stored value is wrapped with a version (incremented
//! on each write), timestamps and an append-only change history.
//!
//! [`MemoryStateStore`] is the in-process reference implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod memory;

pub use memory::*;

/// Result type for state store operations
pub type Result<T> = std::result::Result<T, StateError>;

/// State store errors
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// One entry in a value's change history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Version produced by this change
    pub version: u64,

    pub timestamp: DateTime<Utc>,

    /// Optional human-readable description
    pub description: Option<String>,
}

/// Stored value with versioning metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionedValue {
    pub value: serde_json::Value,
    pub version: u64,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub history: Vec<ChangeRecord>,
}

impl VersionedValue {
    /// Whether the value has outlived its TTL
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Key selection for [`StateStore::list`]
#[derive(Debug, Clone, Default)]
pub struct KeyFilter {
    /// Keys must start with this prefix
    pub prefix: Option<String>,

    /// Keys must contain this substring
    pub contains: Option<String>,
}

impl KeyFilter {
    /// Match keys starting with `prefix`
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            contains: None,
        }
    }

    /// Whether `key` passes the filter
    pub fn matches(&self, key: &str) -> bool {
        self.prefix.as_deref().is_none_or(|p| key.starts_with(p))
            && self.contains.as_deref().is_none_or(|c| key.contains(c))
    }
}

/// Versioned key-value store
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value
    async fn save(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) -> Result<()>;

    /// Load the current value
    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Load the value with its versioning metadata
    async fn load_versioned(&self, key: &str) -> Result<Option<VersionedValue>>;

    /// Merge `partial` into the existing object, creating it if absent
    async fn update(
        &self,
        key: &str,
        partial: serde_json::Value,
        description: Option<String>,
    ) -> Result<()>;

    /// Whether a live value exists
    async fn has(&self, key: &str) -> Result<bool>;

    /// Remove a value
    async fn delete(&self, key: &str) -> Result<()>;

    /// Keys matching `filter`, sorted
    async fn list(&self, filter: &KeyFilter) -> Result<Vec<String>>;
}
