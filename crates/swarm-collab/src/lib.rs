//! Swarm collaboration engine
//!
//! Drives multiple agents through a shared workflow: sequential,
//! parallel, hierarchical or peer-to-peer. Agents plug in through the
//! [`AgentExecutor`] contract; the engine routes intermediate results
//! through the event bus and a per-conversation shared context, and
//! tracks each conversation through its state machine.

pub mod conversation;
pub mod error;
pub mod executor;
pub mod manager;

pub use conversation::{CollaborationPattern, Conversation, ConversationState};
pub use error::{CollabError, Result};
pub use executor::{AgentExecutor, AgentResult, ExecutionResult};
pub use manager::{CollaborationManager, CollaborationOutcome};
