//! Agent directory: identity, capabilities, liveness

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{BusError, Result};

/// Liveness status of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Registered and heartbeating
    Active,

    /// Registered but missed heartbeats
    Inactive,

    /// Explicitly unregistered (record retained)
    Unregistered,
}

/// Directory record for a registered agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Agent identifier
    pub id: String,

    /// Capabilities the agent advertises
    pub capabilities: HashSet<String>,

    /// Liveness status
    pub status: AgentStatus,

    /// Last heartbeat received
    pub last_heartbeat: DateTime<Utc>,

    /// When the agent registered
    pub registered_at: DateTime<Utc>,
}

impl AgentRecord {
    fn new(id: String, capabilities: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            capabilities: capabilities.into_iter().collect(),
            status: AgentStatus::Active,
            last_heartbeat: now,
            registered_at: now,
        }
    }

    /// Whether the agent can currently receive messages
    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }
}

/// Registry of agent identity, capabilities and liveness
///
/// Records are soft-deactivated and never deleted: unregistering keeps the
/// record with status `Unregistered`, and the id may be registered again.
#[derive(Clone, Default)]
pub struct AgentDirectory {
    agents: Arc<DashMap<String, AgentRecord>>,
}

impl AgentDirectory {
    pub fn new() -> Self {
        Self {
            agents: Arc::new(DashMap::new()),
        }
    }

    /// Register an agent
    ///
    /// Fails with `AlreadyRegistered` if the id is held by a record that
    /// has not been unregistered.
    pub fn register(&self, id: &str, capabilities: Vec<String>) -> Result<()> {
        if let Some(existing) = self.agents.get(id) {
            if existing.status != AgentStatus::Unregistered {
                return Err(BusError::AlreadyRegistered(id.to_string()));
            }
        }
        self.agents
            .insert(id.to_string(), AgentRecord::new(id.to_string(), capabilities));
        tracing::debug!("Registered agent: {}", id);
        Ok(())
    }

    /// Soft-unregister an agent; the record is retained
    pub fn unregister(&self, id: &str) -> Result<()> {
        let mut record = self
            .agents
            .get_mut(id)
            .ok_or_else(|| BusError::NotRegistered(id.to_string()))?;
        record.status = AgentStatus::Unregistered;
        tracing::debug!("Unregistered agent: {}", id);
        Ok(())
    }

    /// Record a heartbeat, reactivating an inactive agent
    pub fn heartbeat(&self, id: &str) -> Result<()> {
        let mut record = self
            .agents
            .get_mut(id)
            .ok_or_else(|| BusError::NotRegistered(id.to_string()))?;
        if record.status == AgentStatus::Unregistered {
            return Err(BusError::NotRegistered(id.to_string()));
        }
        record.last_heartbeat = Utc::now();
        record.status = AgentStatus::Active;
        Ok(())
    }

    /// Mark an active agent inactive; returns true if the status changed
    pub fn mark_inactive(&self, id: &str) -> bool {
        if let Some(mut record) = self.agents.get_mut(id) {
            if record.status == AgentStatus::Active {
                record.status = AgentStatus::Inactive;
                return true;
            }
        }
        false
    }

    /// Look up an agent record
    pub fn get(&self, id: &str) -> Option<AgentRecord> {
        self.agents.get(id).map(|r| r.clone())
    }

    /// Whether the agent is registered and active
    pub fn is_active(&self, id: &str) -> bool {
        self.agents.get(id).map(|r| r.is_active()).unwrap_or(false)
    }

    /// All active agents
    pub fn active_agents(&self) -> Vec<AgentRecord> {
        self.agents
            .iter()
            .filter(|e| e.value().is_active())
            .map(|e| e.value().clone())
            .collect()
    }

    /// Active agents advertising a capability
    pub fn find_by_capability(&self, capability: &str) -> Vec<AgentRecord> {
        self.agents
            .iter()
            .filter(|e| e.value().is_active() && e.value().capabilities.contains(capability))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Ids of every known agent, regardless of status
    pub fn list_all(&self) -> Vec<String> {
        self.agents.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of known agents
    pub fn count(&self) -> usize {
        self.agents.len()
    }
}
