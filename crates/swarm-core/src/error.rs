//! Base error type shared by setup and configuration code
//!
//! Subsystem crates (bus, events, context, store) each carry their own
//! error enum; this one covers only what swarm-core itself does: loading
//! configuration and wiring up the process.

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while configuring the runtime
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A configuration value or file is unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem access failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The config crate rejected a source or a field
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] config::ConfigError),

    /// Anything without a more specific variant
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }
}
