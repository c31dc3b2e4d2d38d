//! Error types for the collaboration engine

use crate::conversation::ConversationState;

/// Result type for collaboration operations
pub type Result<T> = std::result::Result<T, CollabError>;

/// Errors in multi-agent collaboration
#[derive(Debug, thiserror::Error)]
pub enum CollabError {
    /// A collaboration needs at least one participant
    #[error("Collaboration has no participants")]
    EmptyParticipants,

    /// The pattern needs more participants than were given
    #[error("Pattern requires more participants: {0}")]
    NotEnoughParticipants(String),

    /// No executor registered for an agent
    #[error("No executor registered for agent: {0}")]
    ExecutorMissing(String),

    /// Unknown conversation id
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    /// Conversations reach a terminal state exactly once
    #[error("Invalid conversation transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: ConversationState,
        to: ConversationState,
    },

    /// Shared-context error
    #[error(transparent)]
    Context(#[from] swarm_context::ContextError),

    /// Event bus error
    #[error(transparent)]
    Event(#[from] swarm_events::EventError),

    /// Message bus error
    #[error(transparent)]
    Bus(#[from] swarm_bus::BusError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl CollabError {
    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }
}
