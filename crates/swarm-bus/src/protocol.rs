//! Request/response correlation atop the message bus
//!
//! Each agent owns one protocol instance; the pending-request table is
//! local to the instance and never shared across processes. `request()`
//! is the single intentional blocking point in the subsystem: the caller
//! suspends until a matching response arrives or the deadline elapses.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use swarm_core::config::ProtocolConfig;
use swarm_core::Priority;
use tokio::sync::oneshot;

use crate::bus::MessageBus;
use crate::error::Result;
use crate::message::{Message, MessageKind};

/// Outcome a responder reports with its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// The request was handled
    Success,

    /// The responder could not handle the request
    Error,
}

/// Payload wrapper for response messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Responder-reported outcome
    pub status: ResponseStatus,

    /// Opaque response body
    pub body: Value,
}

impl ResponseEnvelope {
    /// Unwrap the envelope from a response message's payload
    pub fn from_message(message: &Message) -> Result<Self> {
        Ok(serde_json::from_value(message.payload.clone())?)
    }
}

/// Per-agent request/response protocol
///
/// While a request is in flight the caller's mailbox is drained for
/// Response-kind messages only, so ordinary traffic queued behind the
/// response is left untouched.
pub struct CommunicationProtocol {
    agent_id: String,
    bus: Arc<MessageBus>,
    pending: Arc<DashMap<String, oneshot::Sender<Message>>>,
    poll_interval: Duration,
}

impl CommunicationProtocol {
    pub fn new<S: Into<String>>(bus: Arc<MessageBus>, agent_id: S) -> Self {
        Self::with_config(bus, agent_id, &ProtocolConfig::default())
    }

    pub fn with_config<S: Into<String>>(
        bus: Arc<MessageBus>,
        agent_id: S,
        config: &ProtocolConfig,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            bus,
            pending: Arc::new(DashMap::new()),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        }
    }

    /// The agent this protocol instance belongs to
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Send a request and suspend until the response or the deadline
    ///
    /// Timeout is a defined outcome, not an error: the pending entry is
    /// purged and `None` is returned. The matched response is
    /// acknowledged on the bus before being handed back.
    pub async fn request(
        &self,
        to: &str,
        payload: Value,
        timeout: Duration,
        priority: Priority,
    ) -> Result<Option<Message>> {
        let message =
            Message::request(self.agent_id.as_str(), to, payload).with_priority(priority);
        let correlation_id = message
            .correlation_id
            .clone()
            .unwrap_or_else(|| message.id.clone());

        let (tx, mut rx) = oneshot::channel();
        self.pending.insert(correlation_id.clone(), tx);

        if let Err(err) = self.bus.send(message).await {
            self.pending.remove(&correlation_id);
            return Err(err);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            for response in self
                .bus
                .receive(&self.agent_id, 16, Some(MessageKind::Response))
                .await?
            {
                self.dispatch_response(response);
            }

            match rx.try_recv() {
                Ok(response) => {
                    self.bus.acknowledge(&self.agent_id, &response.id).await?;
                    return Ok(Some(response));
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.pending.remove(&correlation_id);
                    return Ok(None);
                }
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                self.pending.remove(&correlation_id);
                tracing::debug!(
                    "Request {} from {} to {} timed out after {:?}",
                    correlation_id,
                    self.agent_id,
                    to,
                    timeout
                );
                return Ok(None);
            }
            let remaining = deadline - now;
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        }
    }

    /// Route a response to its pending request
    ///
    /// Returns false for late or unmatched responses, which are logged
    /// and discarded.
    pub fn dispatch_response(&self, message: Message) -> bool {
        let Some(correlation_id) = message.correlation_id.clone() else {
            tracing::warn!(
                "Discarding response {} without correlation id",
                message.id
            );
            return false;
        };
        match self.pending.remove(&correlation_id) {
            Some((_, tx)) => tx.send(message).is_ok(),
            None => {
                tracing::warn!(
                    "Discarding late or unmatched response {} (correlation {})",
                    message.id,
                    correlation_id
                );
                false
            }
        }
    }

    /// Answer a request, echoing its correlation id back to the caller
    pub async fn respond(
        &self,
        original: &Message,
        body: Value,
        status: ResponseStatus,
    ) -> Result<String> {
        let target = original
            .reply_to
            .clone()
            .unwrap_or_else(|| original.from.clone());
        let correlation_id = original
            .correlation_id
            .clone()
            .unwrap_or_else(|| original.id.clone());
        let envelope = serde_json::to_value(ResponseEnvelope { status, body })?;

        let response = Message::response(
            self.agent_id.clone(),
            target,
            envelope,
            correlation_id,
        )
        .with_priority(original.priority);
        self.bus.send(response).await
    }

    /// Acknowledge a message delivered to this agent
    pub async fn acknowledge(&self, message: &Message) -> Result<bool> {
        self.bus.acknowledge(&self.agent_id, &message.id).await
    }
}
