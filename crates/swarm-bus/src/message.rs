//! Messages between agents

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use swarm_core::Priority;

/// Default delivery attempt budget
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Transport role of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// One-way message (no response expected)
    Direct,

    /// Request (response expected)
    Request,

    /// Response to a request
    Response,

    /// Fan-out to multiple agents
    Broadcast,
}

/// Lifecycle state of a message
///
/// Status only ever advances along `Pending < Sent < Delivered <
/// {Acknowledged, Failed, Expired}`; it never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Created but not yet enqueued
    Pending,

    /// Enqueued in the recipient's mailbox
    Sent,

    /// Handed to the recipient by `receive`
    Delivered,

    /// Recipient confirmed processing
    Acknowledged,

    /// Delivery attempt budget exhausted
    Failed,

    /// TTL elapsed before delivery
    Expired,
}

impl MessageStatus {
    fn rank(self) -> u8 {
        match self {
            MessageStatus::Pending => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Acknowledged | MessageStatus::Failed | MessageStatus::Expired => 3,
        }
    }

    /// Whether this status is a terminal state
    pub fn is_terminal(self) -> bool {
        self.rank() == 3
    }
}

/// Message between agents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message ID
    pub id: String,

    /// Transport role
    pub kind: MessageKind,

    /// Sender agent ID
    pub from: String,

    /// Recipient agent ID (None until a broadcast is fanned out)
    pub to: Option<String>,

    /// Application-level topic label
    pub topic: Option<String>,

    /// Delivery priority
    pub priority: Priority,

    /// Opaque payload; the bus never inspects it
    pub payload: Value,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Expiry deadline (None = never expires)
    pub expires_at: Option<DateTime<Utc>>,

    /// Lifecycle state
    pub status: MessageStatus,

    /// Delivery attempts made so far
    pub delivery_attempts: u32,

    /// Delivery attempt budget
    pub max_attempts: u32,

    /// Correlation ID linking a request to its response
    pub correlation_id: Option<String>,

    /// Agent to address the response to (defaults to `from`)
    pub reply_to: Option<String>,

    /// Whether the sender is waiting for a response
    pub response_expected: bool,
}

impl Message {
    fn base(kind: MessageKind, from: String, to: Option<String>, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            from,
            to,
            topic: None,
            priority: Priority::Normal,
            payload,
            created_at: Utc::now(),
            expires_at: None,
            status: MessageStatus::Pending,
            delivery_attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            correlation_id: None,
            reply_to: None,
            response_expected: false,
        }
    }

    /// Create a one-way message
    pub fn direct<S: Into<String>>(from: S, to: S, payload: Value) -> Self {
        Self::base(MessageKind::Direct, from.into(), Some(to.into()), payload)
    }

    /// Create a request message
    ///
    /// The correlation id defaults to the message id and `reply_to` to the
    /// sender, so a bare request is already answerable.
    pub fn request<S: Into<String>>(from: S, to: S, payload: Value) -> Self {
        let from = from.into();
        let mut message = Self::base(MessageKind::Request, from.clone(), Some(to.into()), payload);
        message.correlation_id = Some(message.id.clone());
        message.reply_to = Some(from);
        message.response_expected = true;
        message
    }

    /// Create a response carrying the request's correlation id
    pub fn response<S: Into<String>>(
        from: S,
        to: S,
        payload: Value,
        correlation_id: S,
    ) -> Self {
        let mut message = Self::base(MessageKind::Response, from.into(), Some(to.into()), payload);
        message.correlation_id = Some(correlation_id.into());
        message
    }

    /// Create a broadcast template; the bus assigns recipients on fan-out
    pub fn broadcast<S: Into<String>>(from: S, topic: S, payload: Value) -> Self {
        let mut message = Self::base(MessageKind::Broadcast, from.into(), None, payload);
        message.topic = Some(topic.into());
        message
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Expire the message `ttl` from creation
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = ChronoDuration::from_std(ttl)
            .ok()
            .map(|d| self.created_at + d);
        self
    }

    /// Set the delivery attempt budget
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set an explicit correlation id
    pub fn with_correlation<S: Into<String>>(mut self, correlation_id: S) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set an application-level topic label
    pub fn with_topic<S: Into<String>>(mut self, topic: S) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Whether the TTL has elapsed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    /// Advance the lifecycle status
    ///
    /// Returns false (leaving the status untouched) if the transition
    /// would move backwards or leave a terminal state.
    pub fn advance(&mut self, next: MessageStatus) -> bool {
        if next.rank() > self.status.rank() {
            self.status = next;
            true
        } else {
            false
        }
    }
}
