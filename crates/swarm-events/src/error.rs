//! Error types for the event bus

/// Result type for event operations
pub type Result<T> = std::result::Result<T, EventError>;

/// Errors in event publishing and handling
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// A subscriber failed while handling an event; isolated per handler
    #[error("Handler failure: {0}")]
    HandlerFailure(String),

    /// The dispatcher is no longer running
    #[error("Dispatcher unavailable: {0}")]
    Dispatch(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backing store error
    #[error(transparent)]
    Store(#[from] swarm_store::StoreError),
}

impl EventError {
    /// Create a handler failure
    pub fn handler<S: Into<String>>(msg: S) -> Self {
        Self::HandlerFailure(msg.into())
    }
}
