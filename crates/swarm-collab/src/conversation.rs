//! Conversation state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CollabError, Result};
use crate::executor::AgentResult;

/// Execution pattern for a collaboration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "lowercase")]
pub enum CollaborationPattern {
    /// Agents run strictly one after another; each output feeds the next
    Sequential,

    /// All agents run concurrently on the same input
    Parallel,

    /// The first participant coordinates: decomposes, delegates to the
    /// remaining participants, aggregates
    Hierarchical,

    /// Equal peers run a fixed number of rounds with growing shared
    /// knowledge
    PeerToPeer {
        /// Number of rounds to execute
        rounds: usize,
    },
}

/// Lifecycle state of a conversation
///
/// `Initiated -> InProgress -> {Completed | Failed | Timeout}`; terminal
/// states are final and reached exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationState {
    Initiated,
    InProgress,
    Completed,
    Failed,
    Timeout,
}

impl ConversationState {
    /// Whether this state is final
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConversationState::Completed | ConversationState::Failed | ConversationState::Timeout
        )
    }
}

/// A stateful multi-agent collaboration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation ID
    pub id: String,

    /// What the collaboration is about
    pub topic: String,

    /// Agent that started the conversation
    pub initiator: String,

    /// Participating agents, in pattern order
    pub participants: Vec<String>,

    /// Execution pattern
    pub pattern: CollaborationPattern,

    /// Lifecycle state
    pub state: ConversationState,

    /// Number of recorded steps so far
    pub current_step: usize,

    /// Results recorded per step
    pub step_results: Vec<AgentResult>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last recorded activity
    pub last_activity: DateTime<Utc>,

    /// Wall-clock deadline
    pub expires_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn new(
        topic: &str,
        initiator: &str,
        participants: Vec<String>,
        pattern: CollaborationPattern,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            initiator: initiator.to_string(),
            participants,
            pattern,
            state: ConversationState::Initiated,
            current_step: 0,
            step_results: Vec::new(),
            created_at: now,
            last_activity: now,
            expires_at,
        }
    }

    /// Advance the lifecycle state
    ///
    /// Terminal states reject any further transition.
    pub fn transition(&mut self, next: ConversationState) -> Result<()> {
        use ConversationState::*;
        let valid = matches!(
            (self.state, next),
            (Initiated, InProgress)
                | (Initiated, Failed)
                | (Initiated, Timeout)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Timeout)
        );
        if !valid {
            return Err(CollabError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!("Conversation {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
        self.touch();
        Ok(())
    }

    /// Record a step result
    pub fn record_step(&mut self, result: AgentResult) {
        self.step_results.push(result);
        self.current_step += 1;
        self.touch();
    }

    /// Update the activity timestamp
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}
