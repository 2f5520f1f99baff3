//! Configuration
//!
//! Configuration is loaded from these sources:
//! 1. Default values
//! 2. A TOML file
//! 3. Environment variables (`GANGLION_*`)
//!
//! Priority: ENV vars > file > defaults

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::orchestration::{ManagerRegistryConfig, SupervisorConfig, SynthesizerConfig};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "GANGLION_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GanglionConfig {
    /// Decomposition and escalation limits
    pub supervisor: SupervisorConfig,

    /// Manager selection tuning
    pub registry: ManagerRegistryConfig,

    /// Progressive synthesis tuning
    pub synthesis: SynthesizerConfig,

    /// Oracle call limits
    pub oracle: OracleConfig,

    /// Logging setup
    pub logging: LoggingConfig,
}

/// Oracle call configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Per-call timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

impl OracleConfig {
    /// Per-call timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl GanglionConfig {
    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config")
    }

    /// Load a TOML file and apply environment overrides
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;

        let mut config = Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(secs) = var("ORACLE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.oracle.timeout_secs = secs;
        }
        if let Some(capacity) = var("SOFT_CAPACITY").and_then(|v| v.parse().ok()) {
            self.registry.soft_capacity = capacity;
        }
        if let Some(min) = var("MIN_COMPONENTS").and_then(|v| v.parse().ok()) {
            self.synthesis.min_components = min;
        }
        if let Some(max) = var("MAX_ESCALATIONS").and_then(|v| v.parse().ok()) {
            self.supervisor.max_escalations = max;
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = var("LOG_JSON").and_then(|v| v.parse().ok()) {
            self.logging.json = json;
        }
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let supervisor = &self.supervisor;
        if supervisor.min_subtasks == 0 || supervisor.min_subtasks > supervisor.max_subtasks {
            bail!(
                "supervisor.min_subtasks ({}) must be between 1 and max_subtasks ({})",
                supervisor.min_subtasks,
                supervisor.max_subtasks
            );
        }
        if self.registry.soft_capacity == 0 {
            bail!("registry.soft_capacity must be positive");
        }
        if !(0.0..=1.0).contains(&self.registry.performance_smoothing) {
            bail!("registry.performance_smoothing must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.synthesis.default_quality) {
            bail!("synthesis.default_quality must be within [0, 1]");
        }
        if self.oracle.timeout_secs == 0 {
            bail!("oracle.timeout_secs must be positive");
        }
        Ok(())
    }
}
