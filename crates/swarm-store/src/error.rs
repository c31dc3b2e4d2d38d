//! Error types for the backing store

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by backing-store implementations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Key not found
    #[error("Key not found: {0}")]
    NotFound(String),

    /// The key holds a different kind of value (scalar vs. list)
    #[error("Wrong value kind for key: {0}")]
    WrongKind(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific error
    #[error("Store error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Create a backend error
    pub fn backend<S: Into<String>>(msg: S) -> Self {
        Self::Backend(msg.into())
    }
}
