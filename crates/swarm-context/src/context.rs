//! Versioned shared-context store

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use swarm_store::KeyValueStore;

use crate::error::Result;

/// Identifier returned by `watch`, used to unwatch
pub type WatchId = String;

/// A versioned entry in the shared context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Bare key (namespace applied physically on storage)
    pub key: String,

    /// Current value
    pub value: Value,

    /// Monotonic version; strictly increases per successful write
    pub version: u64,

    /// Agent that performed the last write
    pub updated_by: String,

    /// Last write timestamp
    pub timestamp: DateTime<Utc>,

    /// Expiry deadline (None = never expires)
    pub expires_at: Option<DateTime<Utc>>,
}

impl ContextEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Change notification delivered to watchers after a write
#[derive(Debug, Clone)]
pub struct ContextChange {
    /// Bare key that changed
    pub key: String,

    /// New value; None for deletion
    pub value: Option<Value>,

    /// Version of the write (last known version for deletions)
    pub version: u64,

    /// Writer id
    pub updated_by: String,
}

/// Observer of context changes
///
/// Watchers fire asynchronously after the fact; they never veto a write.
#[async_trait]
pub trait ContextWatcher: Send + Sync {
    async fn on_change(&self, change: ContextChange);
}

/// Namespaced, versioned key-value store shared between agents
///
/// Writes always succeed locally and assign version = previous + 1;
/// concurrent writers race on version assignment and the highest version
/// persists (last-write-wins). There is no cross-writer locking — distinct
/// agents typically write distinct keys, and convergence is monotonic by
/// version. Keys are physically prefixed with the namespace, so contexts
/// for different conversations or agents cannot collide.
#[derive(Clone)]
pub struct SharedContext {
    namespace: String,
    entries: Arc<DashMap<String, ContextEntry>>,
    /// Highest version ever assigned per key; survives deletion so
    /// versions are never observed to decrease
    version_floor: Arc<DashMap<String, u64>>,
    watchers: Arc<DashMap<String, Vec<(WatchId, Arc<dyn ContextWatcher>)>>>,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl SharedContext {
    pub fn new<S: Into<String>>(namespace: S) -> Self {
        Self {
            namespace: namespace.into(),
            entries: Arc::new(DashMap::new()),
            version_floor: Arc::new(DashMap::new()),
            watchers: Arc::new(DashMap::new()),
            store: None,
        }
    }

    /// Persist entries (plus companion version records) in the backing store
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// The namespace this context writes under
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn full_key(&self, key: &str) -> String {
        format!("ctx:{}:{}", self.namespace, key)
    }

    fn version_key(&self, key: &str) -> String {
        format!("{}#version", self.full_key(key))
    }

    fn key_prefix(&self) -> String {
        format!("ctx:{}:", self.namespace)
    }

    /// Write a value; always succeeds locally
    ///
    /// Returns the assigned version. The version base is the highest
    /// version seen locally or in the backing store, so re-created keys
    /// keep counting upward.
    pub async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        writer_id: &str,
    ) -> Result<u64> {
        let mut base = self
            .entries
            .get(key)
            .map(|e| e.version)
            .unwrap_or(0)
            .max(self.version_floor.get(key).map(|v| *v).unwrap_or(0));

        if let Some(store) = &self.store {
            if let Some(stored) = store.get(&self.version_key(key)).await? {
                if let Some(version) = stored.as_u64() {
                    base = base.max(version);
                }
            }
        }

        let version = base + 1;
        let now = Utc::now();
        let entry = ContextEntry {
            key: key.to_string(),
            value: value.clone(),
            version,
            updated_by: writer_id.to_string(),
            timestamp: now,
            expires_at: ttl
                .and_then(|d| ChronoDuration::from_std(d).ok())
                .map(|d| now + d),
        };

        self.entries.insert(key.to_string(), entry.clone());
        self.version_floor.insert(key.to_string(), version);

        if let Some(store) = &self.store {
            store
                .set(&self.full_key(key), serde_json::to_value(&entry)?, ttl)
                .await?;
            store
                .set(&self.version_key(key), Value::from(version), None)
                .await?;
        }

        tracing::trace!(
            "Context {} set {} to version {} by {}",
            self.namespace,
            key,
            version,
            writer_id
        );
        self.notify(ContextChange {
            key: key.to_string(),
            value: Some(value),
            version,
            updated_by: writer_id.to_string(),
        });
        Ok(version)
    }

    /// Read a value: cache first, backing store as fallback
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = Utc::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired(now) {
                drop(entry);
                self.entries.remove(key);
            } else {
                return Ok(Some(entry.value.clone()));
            }
        }

        if let Some(store) = &self.store {
            if let Some(raw) = store.get(&self.full_key(key)).await? {
                let entry: ContextEntry = serde_json::from_value(raw)?;
                if !entry.is_expired(now) {
                    let value = entry.value.clone();
                    // Adopt the stored entry unless the cache won the race
                    // with a higher version in the meantime
                    let local = self.entries.get(key).map(|e| e.version).unwrap_or(0);
                    if entry.version > local {
                        self.version_floor.insert(key.to_string(), entry.version);
                        self.entries.insert(key.to_string(), entry);
                    }
                    return Ok(Some(value));
                }
            }
        }
        Ok(None)
    }

    /// Read a value, falling back to `default` when absent
    pub async fn get_or(&self, key: &str, default: Value) -> Result<Value> {
        Ok(self.get(key).await?.unwrap_or(default))
    }

    /// Delete a key; returns true if it existed
    ///
    /// The version floor is retained, so a later re-create still assigns
    /// a strictly higher version.
    pub async fn delete(&self, key: &str, writer_id: &str) -> Result<bool> {
        let existed_locally = self.entries.remove(key).is_some();
        let mut existed = existed_locally;

        if let Some(store) = &self.store {
            let stored = store.delete(&self.full_key(key)).await?;
            store.delete(&self.version_key(key)).await?;
            existed = existed || stored;
        }

        if existed {
            let version = self.version_floor.get(key).map(|v| *v).unwrap_or(0);
            self.notify(ContextChange {
                key: key.to_string(),
                value: None,
                version,
                updated_by: writer_id.to_string(),
            });
        }
        Ok(existed)
    }

    /// Whether the key currently holds a live value
    pub async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Current version of a key, if known
    pub async fn get_version(&self, key: &str) -> Result<Option<u64>> {
        if let Some(entry) = self.entries.get(key) {
            return Ok(Some(entry.version));
        }
        if let Some(store) = &self.store {
            if let Some(stored) = store.get(&self.version_key(key)).await? {
                return Ok(stored.as_u64());
            }
        }
        Ok(None)
    }

    /// Every live key/value in this namespace, merging the backing store
    pub async fn get_all(&self) -> Result<HashMap<String, Value>> {
        let now = Utc::now();
        let mut all: HashMap<String, Value> = self
            .entries
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .map(|e| (e.key().clone(), e.value().value.clone()))
            .collect();

        if let Some(store) = &self.store {
            let prefix = self.key_prefix();
            for full_key in store.scan_prefix(&prefix).await? {
                if full_key.ends_with("#version") {
                    continue;
                }
                let key = full_key[prefix.len()..].to_string();
                if !all.contains_key(&key) {
                    if let Some(value) = self.get(&key).await? {
                        all.insert(key, value);
                    }
                }
            }
        }
        Ok(all)
    }

    /// List the live keys in this namespace
    pub async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.get_all().await?.into_keys().collect())
    }

    /// Register a watcher for a key
    pub fn watch(&self, key: &str, watcher: Arc<dyn ContextWatcher>) -> WatchId {
        let id = uuid::Uuid::new_v4().to_string();
        self.watchers
            .entry(key.to_string())
            .or_default()
            .push((id.clone(), watcher));
        id
    }

    /// Remove a watcher; returns true if it existed
    pub fn unwatch(&self, watch_id: &str) -> bool {
        for mut entry in self.watchers.iter_mut() {
            if let Some(index) = entry.value().iter().position(|(id, _)| id == watch_id) {
                entry.value_mut().remove(index);
                return true;
            }
        }
        false
    }

    /// Drop expired entries from the local cache
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    fn notify(&self, change: ContextChange) {
        if let Some(list) = self.watchers.get(&change.key) {
            for (_, watcher) in list.iter() {
                let watcher = Arc::clone(watcher);
                let change = change.clone();
                tokio::spawn(async move {
                    watcher.on_change(change).await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use swarm_store::MemoryStore;
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn test_set_get_and_versions() {
        let ctx = SharedContext::new("conv-1");

        assert_eq!(ctx.set("plan", json!("draft"), None, "a1").await.unwrap(), 1);
        assert_eq!(ctx.set("plan", json!("v2"), None, "a2").await.unwrap(), 2);
        assert_eq!(ctx.set("plan", json!("v3"), None, "a1").await.unwrap(), 3);

        assert_eq!(ctx.get("plan").await.unwrap(), Some(json!("v3")));
        assert_eq!(ctx.get_version("plan").await.unwrap(), Some(3));
        assert!(ctx.exists("plan").await.unwrap());
        assert!(!ctx.exists("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_or_default() {
        let ctx = SharedContext::new("conv-1");
        let value = ctx.get_or("missing", json!("fallback")).await.unwrap();
        assert_eq!(value, json!("fallback"));
    }

    #[tokio::test]
    async fn test_version_survives_delete() {
        let ctx = SharedContext::new("conv-1");
        ctx.set("k", json!(1), None, "a").await.unwrap();
        ctx.set("k", json!(2), None, "a").await.unwrap();

        assert!(ctx.delete("k", "a").await.unwrap());
        assert!(!ctx.exists("k").await.unwrap());

        // Re-created key keeps counting upward
        let version = ctx.set("k", json!(3), None, "a").await.unwrap();
        assert_eq!(version, 3);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let ctx = SharedContext::new("conv-1");
        ctx.set("gone", json!(1), Some(Duration::from_millis(0)), "a")
            .await
            .unwrap();
        assert_eq!(ctx.get("gone").await.unwrap(), None);

        ctx.set("kept", json!(2), Some(Duration::from_secs(60)), "a")
            .await
            .unwrap();
        assert_eq!(ctx.get("kept").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_store_fallback_cold_cache() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let warm = SharedContext::new("conv-1").with_store(store.clone());
        warm.set("result", json!({"ok": true}), None, "a").await.unwrap();
        warm.set("result", json!({"ok": false}), None, "a").await.unwrap();

        // Fresh instance over the same store and namespace
        let cold = SharedContext::new("conv-1").with_store(store.clone());
        assert_eq!(
            cold.get("result").await.unwrap(),
            Some(json!({"ok": false}))
        );
        assert_eq!(cold.get_version("result").await.unwrap(), Some(2));

        // Writes from the cold side continue the version sequence
        assert_eq!(cold.set("result", json!(3), None, "b").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_namespaces_do_not_collide() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let a = SharedContext::new("conv-a").with_store(store.clone());
        let b = SharedContext::new("conv-b").with_store(store.clone());

        a.set("k", json!("a"), None, "w").await.unwrap();
        b.set("k", json!("b"), None, "w").await.unwrap();

        assert_eq!(a.get("k").await.unwrap(), Some(json!("a")));
        assert_eq!(b.get("k").await.unwrap(), Some(json!("b")));
    }

    #[tokio::test]
    async fn test_get_all_merges_store() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let warm = SharedContext::new("conv-1").with_store(store.clone());
        warm.set("a", json!(1), None, "w").await.unwrap();

        let cold = SharedContext::new("conv-1").with_store(store.clone());
        cold.set("b", json!(2), None, "w").await.unwrap();

        let all = cold.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["a"], json!(1));
        assert_eq!(all["b"], json!(2));
    }

    struct Recording {
        changes: Arc<Mutex<Vec<ContextChange>>>,
    }

    #[async_trait]
    impl ContextWatcher for Recording {
        async fn on_change(&self, change: ContextChange) {
            self.changes.lock().await.push(change);
        }
    }

    #[tokio::test]
    async fn test_watchers_fire_after_write_and_delete() {
        let ctx = SharedContext::new("conv-1");
        let changes = Arc::new(Mutex::new(Vec::new()));
        let id = ctx.watch(
            "plan",
            Arc::new(Recording {
                changes: Arc::clone(&changes),
            }),
        );

        ctx.set("plan", json!("v1"), None, "a").await.unwrap();
        ctx.set("other", json!("x"), None, "a").await.unwrap();
        ctx.delete("plan", "a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let seen = changes.lock().await;
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().any(|c| c.value == Some(json!("v1"))));
        assert!(seen.iter().any(|c| c.value.is_none()));
        drop(seen);

        assert!(ctx.unwatch(&id));
        assert!(!ctx.unwatch(&id));
    }
}
