//! Error types for the shared context

/// Result type for context operations
pub type Result<T> = std::result::Result<T, ContextError>;

/// Errors in shared-context access
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backing store error
    #[error(transparent)]
    Store(#[from] swarm_store::StoreError),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContextError {
    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }
}
