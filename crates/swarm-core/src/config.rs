//! Configuration for the coordination runtime
//!
//! Configuration is loaded from a file (TOML, JSON or YAML by extension)
//! with `SWARM__`-prefixed environment variables layered on top.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for the swarmlink runtime
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Message bus settings
    #[serde(default)]
    pub bus: BusConfig,

    /// Heartbeat monitor settings
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Event bus settings
    #[serde(default)]
    pub events: EventConfig,

    /// Request/response protocol settings
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Collaboration engine settings
    #[serde(default)]
    pub collaboration: CollabConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format
    #[serde(default)]
    pub json: bool,
}

/// Message bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Default message TTL in seconds (None = messages never expire)
    #[serde(default)]
    pub default_ttl_secs: Option<u64>,

    /// Default delivery attempt budget per message
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,

    /// Interval between proactive expiry sweeps, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// How long terminal messages stay queryable after settling, in
    /// seconds; the expiry sweep prunes older ones
    #[serde(default = "default_tracked_retention")]
    pub tracked_retention_secs: u64,

    /// Maximum length of each per-agent delivery journal in the
    /// backing store
    #[serde(default = "default_journal_max_len")]
    pub journal_max_len: usize,

    /// TTL for per-agent delivery journals, in seconds
    #[serde(default = "default_journal_ttl")]
    pub journal_ttl_secs: u64,
}

/// Heartbeat monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between liveness sweeps, in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,

    /// An active agent is marked inactive after this long without a heartbeat
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_secs: u64,
}

/// Event bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// Capacity of the in-process ring-buffer history
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Maximum length of each durable per-type history list
    #[serde(default = "default_durable_max_len")]
    pub durable_max_len: usize,

    /// TTL for durable history lists, in seconds
    #[serde(default = "default_durable_ttl")]
    pub durable_ttl_secs: u64,
}

/// Request/response protocol settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Default request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Mailbox poll interval while waiting for a response, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Collaboration engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollabConfig {
    /// Wall-clock deadline for a whole collaboration, in seconds
    #[serde(default = "default_collab_timeout")]
    pub default_timeout_secs: u64,

    /// Default number of rounds for the peer-to-peer pattern
    #[serde(default = "default_peer_rounds")]
    pub default_peer_rounds: usize,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_tracked_retention() -> u64 {
    300
}

fn default_journal_max_len() -> usize {
    500
}

fn default_journal_ttl() -> u64 {
    3600
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_heartbeat_timeout() -> u64 {
    60
}

fn default_history_capacity() -> usize {
    1000
}

fn default_durable_max_len() -> usize {
    500
}

fn default_durable_ttl() -> u64 {
    3600
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    5
}

fn default_collab_timeout() -> u64 {
    300
}

fn default_peer_rounds() -> usize {
    3
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: None,
            default_max_attempts: default_max_attempts(),
            sweep_interval_secs: default_sweep_interval(),
            tracked_retention_secs: default_tracked_retention(),
            journal_max_len: default_journal_max_len(),
            journal_ttl_secs: default_journal_ttl(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval(),
            timeout_secs: default_heartbeat_timeout(),
        }
    }
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            durable_max_len: default_durable_max_len(),
            durable_ttl_secs: default_durable_ttl(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_request_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_collab_timeout(),
            default_peer_rounds: default_peer_rounds(),
        }
    }
}

/// Load configuration from a file
///
/// Supports TOML, JSON, and YAML formats based on file extension.
/// Environment variables with the `SWARM` prefix override file values,
/// e.g. `SWARM__BUS__DEFAULT_MAX_ATTEMPTS=5`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SwarmConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(CoreError::config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    let settings = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(config::Environment::with_prefix("SWARM").separator("__"))
        .build()?;

    let config: SwarmConfig = settings.try_deserialize()?;
    Ok(config)
}
