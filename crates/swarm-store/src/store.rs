//! Backing-store trait definition

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::Result;

/// Trait for backing-store backends
///
/// The coordination core persists three shapes of data through this seam:
/// - one ordered list per agent mailbox
/// - one versioned entry (plus companion version record) per context key
/// - one bounded, TTL'd list per event type
///
/// Implementations provide different storage strategies: in-memory for
/// single-process deployments and tests, or an external key-value service
/// for cross-process persistence.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get the value stored under `key`, if any
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store `value` under `key`, optionally expiring after `ttl`
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    /// Remove `key`; returns true if it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// List all live keys starting with `prefix`
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Append `value` to the list at `key`, creating it if absent;
    /// returns the new list length
    async fn list_push(&self, key: &str, value: Value) -> Result<usize>;

    /// Read a slice of the list at `key`; negative indices count from the
    /// end, so `(0, -1)` reads the whole list
    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Value>>;

    /// Drop the oldest entries of the list at `key` until at most
    /// `max_len` remain
    async fn list_trim(&self, key: &str, max_len: usize) -> Result<()>;

    /// Set or refresh the TTL on `key`; returns false if the key is absent
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Name of this store (for debugging/logging)
    fn name(&self) -> &str;
}
