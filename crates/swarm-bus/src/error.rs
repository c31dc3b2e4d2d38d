//! Error types for the message bus
//!
//! Delivery-time outcomes (expiry, exhausted retry budget, request
//! timeout) are deliberately not errors: they surface as terminal
//! [`MessageStatus`](crate::MessageStatus) values or an empty response,
//! never as exceptions thrown back at the sender.

/// Result type for bus operations
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors in agent messaging
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Agent id already registered and active
    #[error("Agent already registered: {0}")]
    AlreadyRegistered(String),

    /// Agent not registered
    #[error("Agent not registered: {0}")]
    NotRegistered(String),

    /// Recipient is registered but not active
    #[error("Recipient inactive: {0}")]
    InactiveRecipient(String),

    /// The message cannot be routed as addressed
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

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

impl BusError {
    /// Create an invalid-recipient error
    pub fn invalid_recipient<S: Into<String>>(msg: S) -> Self {
        Self::InvalidRecipient(msg.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }
}
