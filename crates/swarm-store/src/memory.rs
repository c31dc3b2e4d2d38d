//! In-memory backing store using DashMap

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    error::{Result, StoreError},
    store::KeyValueStore,
};

/// A stored value: either a scalar or an ordered list
#[derive(Debug, Clone)]
enum Slot {
    Scalar(Value),
    List(Vec<Value>),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// In-memory key-value store
///
/// Thread-safe, single-process. Expired entries are dropped lazily on
/// access. Data is lost on restart; deployments needing durability plug
/// in an external implementation of [`KeyValueStore`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.entries
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .count()
    }

    /// Whether the store holds no live keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expires_at(ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        ttl.and_then(|d| ChronoDuration::from_std(d).ok())
            .map(|d| Utc::now() + d)
    }

    /// Drop the entry if it has expired; returns true if the key is live
    fn prune(&self, key: &str) -> bool {
        let now = Utc::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired(now) {
                drop(entry);
                self.entries.remove(key);
                tracing::trace!("Expired key dropped: {}", key);
                return false;
            }
            return true;
        }
        false
    }
}

fn clamp_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };
    start = start.max(0);
    stop = stop.min(len - 1);
    if start > stop || len == 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        if !self.prune(key) {
            return Ok(None);
        }
        match self.entries.get(key).map(|e| e.slot.clone()) {
            Some(Slot::Scalar(value)) => Ok(Some(value)),
            Some(Slot::List(_)) => Err(StoreError::WrongKind(key.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Scalar(value),
                expires_at: Self::expires_at(ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let live = self.prune(key);
        Ok(self.entries.remove(key).is_some() && live)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Utc::now();
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix) && !e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn list_push(&self, key: &str, value: Value) -> Result<usize> {
        self.prune(key);
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::List(Vec::new()),
            expires_at: None,
        });
        match &mut entry.slot {
            Slot::List(items) => {
                items.push(value);
                Ok(items.len())
            }
            Slot::Scalar(_) => Err(StoreError::WrongKind(key.to_string())),
        }
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Value>> {
        if !self.prune(key) {
            return Ok(Vec::new());
        }
        match self.entries.get(key).map(|e| e.slot.clone()) {
            Some(Slot::List(items)) => Ok(clamp_range(items.len(), start, stop)
                .map(|(lo, hi)| items[lo..=hi].to_vec())
                .unwrap_or_default()),
            Some(Slot::Scalar(_)) => Err(StoreError::WrongKind(key.to_string())),
            None => Ok(Vec::new()),
        }
    }

    async fn list_trim(&self, key: &str, max_len: usize) -> Result<()> {
        if !self.prune(key) {
            return Ok(());
        }
        if let Some(mut entry) = self.entries.get_mut(key) {
            match &mut entry.slot {
                Slot::List(items) => {
                    if items.len() > max_len {
                        let excess = items.len() - max_len;
                        items.drain(0..excess);
                    }
                }
                Slot::Scalar(_) => return Err(StoreError::WrongKind(key.to_string())),
            }
        }
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        if !self.prune(key) {
            return Ok(false);
        }
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Self::expires_at(Some(ttl));
            return Ok(true);
        }
        Ok(false)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
