//! Liveness sweeper for the agent directory

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use swarm_core::config::HeartbeatConfig;
use tokio::task::JoinHandle;

use crate::directory::AgentDirectory;

/// Marks agents inactive after missed heartbeats
///
/// Agents report liveness through [`AgentDirectory::heartbeat`]; the
/// monitor only ever deactivates, a later heartbeat reactivates.
pub struct HeartbeatMonitor {
    directory: Arc<AgentDirectory>,
    interval: Duration,
    timeout: Duration,
}

impl HeartbeatMonitor {
    pub fn new(directory: Arc<AgentDirectory>, config: &HeartbeatConfig) -> Self {
        Self {
            directory,
            interval: Duration::from_secs(config.interval_secs),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Run a single sweep; returns the ids of newly deactivated agents
    pub fn check_once(&self) -> Vec<String> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(self.timeout).unwrap_or(ChronoDuration::seconds(60));
        let mut deactivated = Vec::new();
        for record in self.directory.active_agents() {
            if record.last_heartbeat < cutoff {
                if self.directory.mark_inactive(&record.id) {
                    tracing::warn!(
                        "Agent {} marked inactive: no heartbeat since {}",
                        record.id,
                        record.last_heartbeat
                    );
                    deactivated.push(record.id);
                }
            }
        }
        deactivated
    }

    /// Run the sweep on an interval as a background task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.check_once();
            }
        })
    }
}
