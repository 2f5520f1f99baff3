//! Manager Registry - Pool of Expertise Managers
//!
//! Tracks which managers exist, the expertise areas they cover, the agents
//! they currently manage and a smoothed performance score. Selection is a
//! pure query over the registry; every mutation goes through a `&mut self`
//! method so the registry can live behind a single `RwLock`.

use std::collections::{BTreeSet, HashMap};
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::agents::{AgentId, Expertise};

// ============================================================================
// Manager Record
// ============================================================================

/// Bookkeeping for one registered manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerRecord {
    /// Manager agent ID
    pub manager_id: AgentId,

    /// Expertise areas covered
    pub expertise: BTreeSet<Expertise>,

    /// Agents currently managed
    pub managed_agents: BTreeSet<AgentId>,

    /// Smoothed performance score (0.0 - 1.0)
    pub performance_score: f64,

    /// Whether the manager accepts new work
    pub available: bool,

    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ManagerRecord {
    /// Number of agents currently managed
    pub fn load(&self) -> usize {
        self.managed_agents.len()
    }

    /// Whether this manager covers `expertise`
    pub fn covers(&self, expertise: Expertise) -> bool {
        self.expertise.contains(&expertise)
    }
}

// ============================================================================
// Manager Registry
// ============================================================================

/// Manager registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerRegistryConfig {
    /// Managed-agent count below which a manager is preferred
    pub soft_capacity: usize,

    /// Weight of the newest observation in the performance average
    pub performance_smoothing: f64,

    /// Score assigned on registration
    pub initial_performance: f64,
}

impl Default for ManagerRegistryConfig {
    fn default() -> Self {
        Self {
            soft_capacity: 5,
            performance_smoothing: 0.3,
            initial_performance: 0.5,
        }
    }
}

/// Registry of managers
pub struct ManagerRegistry {
    managers: HashMap<AgentId, ManagerRecord>,
    config: ManagerRegistryConfig,
}

impl ManagerRegistry {
    /// Create a new manager registry
    pub fn new(config: ManagerRegistryConfig) -> Self {
        info!("Initializing Manager Registry (soft capacity {})", config.soft_capacity);

        Self {
            managers: HashMap::new(),
            config,
        }
    }

    /// Registry configuration
    pub fn config(&self) -> &ManagerRegistryConfig {
        &self.config
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a manager, or refresh the expertise of a known one.
    ///
    /// Re-registration keeps the managed agents and performance history and
    /// marks the manager available again.
    pub fn register_manager(
        &mut self,
        manager_id: AgentId,
        expertise: impl IntoIterator<Item = Expertise>,
    ) {
        let expertise: BTreeSet<Expertise> = expertise.into_iter().collect();
        let now = Utc::now();

        match self.managers.get_mut(&manager_id) {
            Some(record) => {
                debug!("Refreshing manager {} ({} expertise areas)", manager_id, expertise.len());
                record.expertise = expertise;
                record.available = true;
                record.updated_at = now;
            }
            None => {
                info!("Manager {} registered with {} expertise areas", manager_id, expertise.len());
                self.managers.insert(
                    manager_id.clone(),
                    ManagerRecord {
                        manager_id,
                        expertise,
                        managed_agents: BTreeSet::new(),
                        performance_score: self.config.initial_performance,
                        available: true,
                        registered_at: now,
                        updated_at: now,
                    },
                );
            }
        }
    }

    /// Stop routing new work to a manager
    pub fn mark_unavailable(&mut self, manager_id: &AgentId) -> bool {
        self.set_available(manager_id, false)
    }

    /// Resume routing work to a manager
    pub fn mark_available(&mut self, manager_id: &AgentId) -> bool {
        self.set_available(manager_id, true)
    }

    fn set_available(&mut self, manager_id: &AgentId, available: bool) -> bool {
        match self.managers.get_mut(manager_id) {
            Some(record) => {
                debug!("Manager {} available: {}", manager_id, available);
                record.available = available;
                record.updated_at = Utc::now();
                true
            }
            None => {
                warn!("Availability change for unknown manager {}", manager_id);
                false
            }
        }
    }

    // ========================================================================
    // Load and Performance
    // ========================================================================

    /// Record that `manager_id` now manages `agent_id`
    pub fn assign_agent(&mut self, manager_id: &AgentId, agent_id: AgentId) -> bool {
        match self.managers.get_mut(manager_id) {
            Some(record) => {
                record.managed_agents.insert(agent_id);
                record.updated_at = Utc::now();
                debug!("Manager {} load: {}", manager_id, record.load());
                true
            }
            None => {
                warn!("Load change for unknown manager {}", manager_id);
                false
            }
        }
    }

    /// Record that `manager_id` no longer manages `agent_id`
    pub fn release_agent(&mut self, manager_id: &AgentId, agent_id: &AgentId) -> bool {
        match self.managers.get_mut(manager_id) {
            Some(record) => {
                let removed = record.managed_agents.remove(agent_id);
                record.updated_at = Utc::now();
                removed
            }
            None => {
                warn!("Load change for unknown manager {}", manager_id);
                false
            }
        }
    }

    /// Fold an observation into the manager's performance score
    pub fn record_performance(&mut self, manager_id: &AgentId, observation: f64) -> bool {
        let alpha = self.config.performance_smoothing.clamp(0.0, 1.0);
        match self.managers.get_mut(manager_id) {
            Some(record) => {
                let observation = observation.clamp(0.0, 1.0);
                record.performance_score =
                    (alpha * observation + (1.0 - alpha) * record.performance_score).clamp(0.0, 1.0);
                record.updated_at = Utc::now();
                debug!("Manager {} performance: {:.3}", manager_id, record.performance_score);
                true
            }
            None => {
                warn!("Performance update for unknown manager {}", manager_id);
                false
            }
        }
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// Pick the manager for `expertise`.
    ///
    /// Precedence:
    /// 1. available, covers the expertise, below soft capacity (lowest id);
    /// 2. available, covers the expertise, highest performance score;
    /// 3. any available manager with the fewest managed agents;
    /// 4. a synthesized placeholder id.
    ///
    /// Ties inside a tier go to the lowest manager id.
    pub fn select_for_expertise(&self, expertise: Expertise) -> AgentId {
        let mut available: Vec<&ManagerRecord> =
            self.managers.values().filter(|m| m.available).collect();
        available.sort_by(|a, b| a.manager_id.cmp(&b.manager_id));

        let covering: Vec<&ManagerRecord> =
            available.iter().copied().filter(|m| m.covers(expertise)).collect();

        if let Some(record) = covering
            .iter()
            .find(|m| m.load() < self.config.soft_capacity)
        {
            debug!("Assigning {} to {} (under capacity)", expertise, record.manager_id);
            return record.manager_id.clone();
        }

        // `max_by` keeps the last maximum, so iterate in reverse id order
        if let Some(record) = covering.iter().rev().max_by(|a, b| {
            a.performance_score
                .partial_cmp(&b.performance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        }) {
            debug!("Assigning {} to {} (best performance)", expertise, record.manager_id);
            return record.manager_id.clone();
        }

        if let Some(record) = available.iter().min_by_key(|m| m.load()) {
            debug!("Assigning {} to generalist {}", expertise, record.manager_id);
            return record.manager_id.clone();
        }

        let placeholder = AgentId::placeholder_manager();
        warn!("No manager available for {}; using {}", expertise, placeholder);
        placeholder
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Look up a manager
    pub fn get(&self, manager_id: &AgentId) -> Option<&ManagerRecord> {
        self.managers.get(manager_id)
    }

    /// Whether `manager_id` is registered
    pub fn contains(&self, manager_id: &AgentId) -> bool {
        self.managers.contains_key(manager_id)
    }

    /// All managers, ordered by id
    pub fn managers(&self) -> Vec<&ManagerRecord> {
        let mut records: Vec<&ManagerRecord> = self.managers.values().collect();
        records.sort_by(|a, b| a.manager_id.cmp(&b.manager_id));
        records
    }

    /// Registry statistics
    pub fn statistics(&self) -> RegistryStatistics {
        let total = self.managers.len();
        let available = self.managers.values().filter(|m| m.available).count();
        let managed_agents = self.managers.values().map(ManagerRecord::load).sum();

        let average_performance = if total > 0 {
            self.managers.values().map(|m| m.performance_score).sum::<f64>() / total as f64
        } else {
            0.0
        };

        RegistryStatistics {
            total_managers: total,
            available_managers: available,
            managed_agents,
            average_performance,
        }
    }
}

impl Default for ManagerRegistry {
    fn default() -> Self {
        Self::new(ManagerRegistryConfig::default())
    }
}

/// Registry statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStatistics {
    pub total_managers: usize,
    pub available_managers: usize,
    pub managed_agents: usize,
    pub average_performance: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_manager(registry: &mut ManagerRegistry, id: &str, agents: usize) {
        for i in 0..agents {
            registry.assign_agent(&AgentId::from(id), AgentId::from(format!("{id}-worker-{i}")));
        }
    }

    #[test]
    fn test_manager_registration() {
        let mut registry = ManagerRegistry::default();
        registry.register_manager(AgentId::from("m1"), [Expertise::TopicAnalysis]);

        let record = registry.get(&AgentId::from("m1")).unwrap();
        assert!(record.available);
        assert!(record.covers(Expertise::TopicAnalysis));
        assert_eq!(registry.statistics().total_managers, 1);
    }

    #[test]
    fn test_under_capacity_beats_higher_performance() {
        let mut registry = ManagerRegistry::default();
        registry.register_manager(AgentId::from("busy"), [Expertise::SentimentAnalysis]);
        registry.register_manager(AgentId::from("spare"), [Expertise::SentimentAnalysis]);

        load_manager(&mut registry, "busy", 6);
        for _ in 0..10 {
            registry.record_performance(&AgentId::from("busy"), 1.0);
            registry.record_performance(&AgentId::from("spare"), 0.0);
        }

        assert_eq!(
            registry.select_for_expertise(Expertise::SentimentAnalysis),
            AgentId::from("spare")
        );
    }

    #[test]
    fn test_over_capacity_picks_best_performer() {
        let mut registry = ManagerRegistry::default();
        for id in ["a", "b"] {
            registry.register_manager(AgentId::from(id), [Expertise::Summarization]);
            load_manager(&mut registry, id, 5);
        }
        registry.record_performance(&AgentId::from("b"), 1.0);

        assert_eq!(registry.select_for_expertise(Expertise::Summarization), AgentId::from("b"));
    }

    #[test]
    fn test_performance_ties_break_by_id() {
        let mut registry = ManagerRegistry::default();
        for id in ["z", "y"] {
            registry.register_manager(AgentId::from(id), [Expertise::Summarization]);
            load_manager(&mut registry, id, 5);
        }

        assert_eq!(registry.select_for_expertise(Expertise::Summarization), AgentId::from("y"));
    }

    #[test]
    fn test_generalist_fallback_picks_least_loaded() {
        let mut registry = ManagerRegistry::default();
        registry.register_manager(AgentId::from("heavy"), [Expertise::TopicAnalysis]);
        registry.register_manager(AgentId::from("light"), [Expertise::TopicAnalysis]);
        load_manager(&mut registry, "heavy", 3);
        load_manager(&mut registry, "light", 1);

        assert_eq!(
            registry.select_for_expertise(Expertise::ActionItemExtraction),
            AgentId::from("light")
        );
    }

    #[test]
    fn test_unavailable_managers_are_skipped() {
        let mut registry = ManagerRegistry::default();
        registry.register_manager(AgentId::from("m1"), [Expertise::EntityExtraction]);
        registry.mark_unavailable(&AgentId::from("m1"));

        let chosen = registry.select_for_expertise(Expertise::EntityExtraction);
        assert!(chosen.is_placeholder());

        registry.mark_available(&AgentId::from("m1"));
        assert_eq!(registry.select_for_expertise(Expertise::EntityExtraction), AgentId::from("m1"));
    }

    #[test]
    fn test_empty_registry_yields_placeholder() {
        let registry = ManagerRegistry::default();
        assert!(registry.select_for_expertise(Expertise::TopicAnalysis).is_placeholder());
    }

    #[test]
    fn test_performance_moving_average() {
        let mut registry = ManagerRegistry::new(ManagerRegistryConfig {
            performance_smoothing: 0.5,
            initial_performance: 0.5,
            ..Default::default()
        });
        let id = AgentId::from("m1");
        registry.register_manager(id.clone(), [Expertise::KeyPointExtraction]);

        registry.record_performance(&id, 1.0);
        assert!((registry.get(&id).unwrap().performance_score - 0.75).abs() < 1e-9);

        registry.record_performance(&id, 7.0);
        assert!(registry.get(&id).unwrap().performance_score <= 1.0);
    }

    #[test]
    fn test_unknown_manager_mutations_are_ignored() {
        let mut registry = ManagerRegistry::default();
        let ghost = AgentId::from("ghost");
        assert!(!registry.assign_agent(&ghost, AgentId::from("w")));
        assert!(!registry.mark_unavailable(&ghost));
        assert!(!registry.record_performance(&ghost, 1.0));
    }

    #[test]
    fn test_reregistration_keeps_load() {
        let mut registry = ManagerRegistry::default();
        let id = AgentId::from("m1");
        registry.register_manager(id.clone(), [Expertise::TopicAnalysis]);
        load_manager(&mut registry, "m1", 2);
        registry.mark_unavailable(&id);

        registry.register_manager(id.clone(), [Expertise::TopicAnalysis, Expertise::Summarization]);
        let record = registry.get(&id).unwrap();
        assert_eq!(record.load(), 2);
        assert!(record.available);
        assert_eq!(record.expertise.len(), 2);
    }
}
