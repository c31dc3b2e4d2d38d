//! Event record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use swarm_core::Priority;

/// An event published on the bus
///
/// Immutable once published; retained in a bounded ring buffer for
/// replay and debugging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event ID
    pub id: String,

    /// Event type, e.g. "collaboration.completed"
    pub event_type: String,

    /// Opaque event data
    pub data: Value,

    /// Publishing agent
    pub sender: String,

    /// Dispatch priority
    pub priority: Priority,

    /// Publication timestamp
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create a new event
    pub fn new<S: Into<String>>(event_type: S, data: Value, sender: S, priority: Priority) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            data,
            sender: sender.into(),
            priority,
            timestamp: Utc::now(),
        }
    }
}
