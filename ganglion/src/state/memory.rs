//! In-memory state store

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use super::{ChangeRecord, KeyFilter, Result, StateStore, VersionedValue};

/// Reference [`StateStore`] keeping everything in a map
#[derive(Default)]
pub struct MemoryStateStore {
    entries: RwLock<HashMap<String, VersionedValue>>,
}

impl MemoryStateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

fn expiry(ttl: Option<Duration>) -> Option<chrono::DateTime<Utc>> {
    ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok())
        .map(|ttl| Utc::now() + ttl)
}

/// Shallow object merge; non-object values are replaced wholesale
fn merge(target: &mut serde_json::Value, partial: serde_json::Value) {
    match (target, partial) {
        (serde_json::Value::Object(existing), serde_json::Value::Object(incoming)) => {
            for (key, value) in incoming {
                existing.insert(key, value);
            }
        }
        (target, partial) => *target = partial,
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn save(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) -> Result<()> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;

        let live = entries.get(key).filter(|e| !e.is_expired(now)).cloned();
        let entry = match live {
            Some(mut existing) => {
                existing.version += 1;
                existing.value = value;
                existing.updated = now;
                existing.expires_at = expiry(ttl);
                existing.history.push(ChangeRecord {
                    version: existing.version,
                    timestamp: now,
                    description: Some("saved".to_string()),
                });
                existing
            }
            None => VersionedValue {
                value,
                version: 1,
                created: now,
                updated: now,
                expires_at: expiry(ttl),
                history: vec![ChangeRecord {
                    version: 1,
                    timestamp: now,
                    description: Some("created".to_string()),
                }],
            },
        };

        debug!("State store save {} (v{})", key, entry.version);
        entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.load_versioned(key).await?.map(|v| v.value))
    }

    async fn load_versioned(&self, key: &str) -> Result<Option<VersionedValue>> {
        let now = Utc::now();
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .filter(|e| !e.is_expired(now))
            .cloned())
    }

    async fn update(
        &self,
        key: &str,
        partial: serde_json::Value,
        description: Option<String>,
    ) -> Result<()> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;

        match entries.get_mut(key).filter(|e| !e.is_expired(now)) {
            Some(existing) => {
                merge(&mut existing.value, partial);
                existing.version += 1;
                existing.updated = now;
                existing.history.push(ChangeRecord {
                    version: existing.version,
                    timestamp: now,
                    description,
                });
                debug!("State store update {} (v{})", key, existing.version);
            }
            None => {
                entries.insert(
                    key.to_string(),
                    VersionedValue {
                        value: partial,
                        version: 1,
                        created: now,
                        updated: now,
                        expires_at: None,
                        history: vec![ChangeRecord {
                            version: 1,
                            timestamp: now,
                            description,
                        }],
                    },
                );
                debug!("State store update created {}", key);
            }
        }
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.load_versioned(key).await?.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, filter: &KeyFilter) -> Result<Vec<String>> {
        let now = Utc::now();
        let mut keys: Vec<String> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && filter.matches(key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_update_merges_and_versions() {
        let store = MemoryStateStore::new();
        store.save("job:1", json!({ "status": "PENDING", "goal": "full" }), None).await.unwrap();
        store
            .update("job:1", json!({ "status": "COMPLETED" }), Some("finished".to_string()))
            .await
            .unwrap();

        let versioned = store.load_versioned("job:1").await.unwrap().unwrap();
        assert_eq!(versioned.version, 2);
        assert_eq!(versioned.value, json!({ "status": "COMPLETED", "goal": "full" }));
        assert_eq!(versioned.history.len(), 2);
        assert_eq!(versioned.history[1].description.as_deref(), Some("finished"));
    }

    #[tokio::test]
    async fn test_update_creates_missing_key() {
        let store = MemoryStateStore::new();
        store.update("subtask:9", json!({ "a": 1 }), None).await.unwrap();

        assert!(store.has("subtask:9").await.unwrap());
        assert_eq!(store.load_versioned("subtask:9").await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_expired_values_are_invisible() {
        let store = MemoryStateStore::new();
        store.save("tmp", json!(1), Some(Duration::from_millis(1))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!store.has("tmp").await.unwrap());
        assert!(store.list(&KeyFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let store = MemoryStateStore::new();
        store.save("job:b", json!(1), None).await.unwrap();
        store.save("job:a", json!(2), None).await.unwrap();
        store.save("subtask:x", json!(3), None).await.unwrap();

        assert_eq!(store.list(&KeyFilter::prefix("job:")).await.unwrap(), vec!["job:a", "job:b"]);

        store.delete("job:a").await.unwrap();
        assert_eq!(store.load("job:a").await.unwrap(), None);
    }
}
