//! Priority message bus with per-agent mailboxes

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::VecDeque;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use swarm_core::config::BusConfig;
use swarm_core::Priority;
use swarm_store::KeyValueStore;
use tokio::task::JoinHandle;

use crate::directory::{AgentDirectory, AgentRecord, AgentStatus};
use crate::error::{BusError, Result};
use crate::message::{Message, MessageKind, MessageStatus};

/// Delivery counters and rolling acknowledgment latency
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BusMetrics {
    /// Messages accepted for delivery
    pub sent: u64,
    /// Messages handed to recipients
    pub delivered: u64,
    /// Messages acknowledged by recipients
    pub acknowledged: u64,
    /// Messages that exhausted their attempt budget
    pub failed: u64,
    /// Messages dropped by TTL expiry
    pub expired: u64,
    /// Rolling average creation-to-acknowledgment latency, in milliseconds
    pub avg_ack_latency_ms: f64,
}

impl BusMetrics {
    fn record_ack(&mut self, latency_ms: f64) {
        self.acknowledged += 1;
        let n = self.acknowledged as f64;
        self.avg_ack_latency_ms += (latency_ms - self.avg_ack_latency_ms) / n;
    }
}

/// Priority-ordered message bus
///
/// Each agent owns one mailbox: an ordered queue where a new message is
/// inserted ahead of the first entry with strictly lower priority, so
/// equal priorities keep arrival order. All public operations are
/// non-blocking; `receive` returns an empty batch when the mailbox is
/// empty.
pub struct MessageBus {
    directory: Arc<AgentDirectory>,
    mailboxes: Arc<DashMap<String, VecDeque<Message>>>,
    /// Messages removed from a mailbox (delivered, failed or expired),
    /// kept so status and acknowledgment stay observable. Terminal
    /// entries are pruned by the expiry sweep once past the configured
    /// retention window.
    tracked: Arc<DashMap<String, TrackedMessage>>,
    metrics: Arc<Mutex<BusMetrics>>,
    config: BusConfig,
    store: Option<Arc<dyn KeyValueStore>>,
}

/// A message removed from its mailbox, with the time it last changed
/// state; `since` drives retention of terminal entries
struct TrackedMessage {
    message: Message,
    since: DateTime<Utc>,
}

impl TrackedMessage {
    fn new(message: Message) -> Self {
        Self {
            message,
            since: Utc::now(),
        }
    }
}

impl MessageBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            directory: Arc::new(AgentDirectory::new()),
            mailboxes: Arc::new(DashMap::new()),
            tracked: Arc::new(DashMap::new()),
            metrics: Arc::new(Mutex::new(BusMetrics::default())),
            config,
            store: None,
        }
    }

    /// Keep a bounded, TTL'd delivery journal per agent in the backing
    /// store (one ordered list per mailbox, newest entries retained)
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Directory lookup treating soft-unregistered records as absent
    fn registered(&self, id: &str) -> Option<AgentRecord> {
        self.directory
            .get(id)
            .filter(|record| record.status != AgentStatus::Unregistered)
    }

    /// The directory backing this bus
    pub fn directory(&self) -> &AgentDirectory {
        &self.directory
    }

    /// Shared handle to the directory, for wiring a heartbeat monitor
    pub fn directory_handle(&self) -> Arc<AgentDirectory> {
        self.directory.clone()
    }

    /// Register an agent and create its mailbox
    pub fn register_agent(&self, id: &str, capabilities: Vec<String>) -> Result<()> {
        self.directory.register(id, capabilities)?;
        self.mailboxes.entry(id.to_string()).or_default();
        Ok(())
    }

    /// Soft-unregister an agent; pending mail is retained for re-registration
    pub fn unregister_agent(&self, id: &str) -> Result<()> {
        self.directory.unregister(id)
    }

    /// Send a message to its recipient's mailbox
    ///
    /// Fails if either party is unknown or the recipient is inactive.
    /// Transient delivery failures are retried against the message's
    /// attempt budget; exhausting it surfaces as terminal `Failed` status,
    /// never as an error to the sender.
    pub async fn send(&self, mut message: Message) -> Result<String> {
        let to = message
            .to
            .clone()
            .ok_or_else(|| BusError::invalid_recipient("message has no recipient; use broadcast()"))?;

        if self.registered(&message.from).is_none() {
            return Err(BusError::NotRegistered(message.from.clone()));
        }
        let recipient = self
            .registered(&to)
            .ok_or_else(|| BusError::NotRegistered(to.clone()))?;
        if !recipient.is_active() {
            return Err(BusError::InactiveRecipient(to.clone()));
        }

        if message.expires_at.is_none() {
            if let Some(ttl) = self.config.default_ttl_secs {
                message = message.with_ttl(Duration::from_secs(ttl));
            }
        }
        if message.max_attempts == 0 {
            message.max_attempts = self.config.default_max_attempts;
        }

        self.deliver(message, &to).await
    }

    /// Convenience wrapper building a one-way message
    pub async fn send_direct(
        &self,
        from: &str,
        to: &str,
        payload: Value,
        priority: Priority,
    ) -> Result<String> {
        self.send(Message::direct(from, to, payload).with_priority(priority))
            .await
    }

    async fn deliver(&self, mut message: Message, to: &str) -> Result<String> {
        let id = message.id.clone();
        loop {
            message.delivery_attempts += 1;
            match self.try_enqueue(&mut message, to) {
                Ok(()) => {
                    self.metrics.lock().sent += 1;
                    if let Some(store) = &self.store {
                        let key = format!("mailbox:{}", to);
                        store
                            .list_push(&key, serde_json::to_value(&message)?)
                            .await?;
                        store.list_trim(&key, self.config.journal_max_len).await?;
                        store
                            .expire(&key, Duration::from_secs(self.config.journal_ttl_secs))
                            .await?;
                    }
                    return Ok(id);
                }
                Err(reason) => {
                    if message.delivery_attempts >= message.max_attempts {
                        message.advance(MessageStatus::Failed);
                        self.metrics.lock().failed += 1;
                        tracing::warn!(
                            "Message {} to {} failed after {} attempts: {}",
                            id,
                            to,
                            message.delivery_attempts,
                            reason
                        );
                        self.tracked.insert(id.clone(), TrackedMessage::new(message));
                        return Ok(id);
                    }
                    tracing::debug!(
                        "Delivery attempt {} for message {} failed: {}",
                        message.delivery_attempts,
                        id,
                        reason
                    );
                }
            }
        }
    }

    /// Insert into the recipient's mailbox ahead of the first entry with
    /// strictly lower priority
    fn try_enqueue(&self, message: &mut Message, to: &str) -> std::result::Result<(), String> {
        let mut mailbox = self
            .mailboxes
            .get_mut(to)
            .ok_or_else(|| format!("no mailbox for {}", to))?;

        message.advance(MessageStatus::Sent);
        let position = mailbox
            .iter()
            .position(|queued| queued.priority < message.priority)
            .unwrap_or(mailbox.len());
        mailbox.insert(position, message.clone());
        Ok(())
    }

    /// Drain up to `limit` messages for an agent, highest priority first
    ///
    /// Never blocks; returns an empty batch when nothing is queued.
    /// Expired messages encountered during the scan are dropped.
    pub async fn receive(
        &self,
        agent_id: &str,
        limit: usize,
        kind_filter: Option<MessageKind>,
    ) -> Result<Vec<Message>> {
        if self.registered(agent_id).is_none() {
            return Err(BusError::NotRegistered(agent_id.to_string()));
        }

        let now = Utc::now();
        let mut batch = Vec::new();
        if let Some(mut mailbox) = self.mailboxes.get_mut(agent_id) {
            let mut i = 0;
            while i < mailbox.len() && batch.len() < limit {
                if mailbox[i].is_expired(now) {
                    let Some(mut expired) = mailbox.remove(i) else { break };
                    expired.advance(MessageStatus::Expired);
                    self.metrics.lock().expired += 1;
                    tracing::debug!("Message {} expired before delivery", expired.id);
                    self.tracked
                        .insert(expired.id.clone(), TrackedMessage::new(expired));
                    continue;
                }
                if kind_filter.map(|kind| mailbox[i].kind == kind).unwrap_or(true) {
                    let Some(mut message) = mailbox.remove(i) else { break };
                    message.advance(MessageStatus::Delivered);
                    self.metrics.lock().delivered += 1;
                    self.tracked
                        .insert(message.id.clone(), TrackedMessage::new(message.clone()));
                    batch.push(message);
                    continue;
                }
                i += 1;
            }
        }
        Ok(batch)
    }

    /// Acknowledge a delivered message
    ///
    /// Updates the rolling average acknowledgment latency. Acknowledging
    /// an already-acknowledged message is a no-op returning true, with no
    /// duplicate accounting. Returns false for unknown ids, messages
    /// addressed to someone else, or messages in a failed/expired state.
    pub async fn acknowledge(&self, agent_id: &str, message_id: &str) -> Result<bool> {
        let Some(mut tracked) = self.tracked.get_mut(message_id) else {
            return Ok(false);
        };
        if tracked.message.to.as_deref() != Some(agent_id) {
            return Ok(false);
        }
        match tracked.message.status {
            MessageStatus::Acknowledged => Ok(true),
            MessageStatus::Delivered => {
                tracked.message.advance(MessageStatus::Acknowledged);
                tracked.since = Utc::now();
                let latency_ms = (Utc::now() - tracked.message.created_at)
                    .num_milliseconds()
                    .max(0) as f64;
                self.metrics.lock().record_ack(latency_ms);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Fan a payload out to every active agent except the sender
    ///
    /// An optional predicate narrows the recipient set further. Returns
    /// the per-recipient message ids.
    pub async fn broadcast(
        &self,
        from: &str,
        topic: &str,
        payload: Value,
        priority: Priority,
        filter: Option<&(dyn Fn(&AgentRecord) -> bool + Sync)>,
    ) -> Result<Vec<String>> {
        if self.registered(from).is_none() {
            return Err(BusError::NotRegistered(from.to_string()));
        }

        let template = Message::broadcast(from, topic, payload).with_priority(priority);
        let mut ids = Vec::new();
        for record in self.directory.active_agents() {
            if record.id == from {
                continue;
            }
            if let Some(predicate) = filter {
                if !predicate(&record) {
                    continue;
                }
            }
            let mut copy = template.clone();
            copy.id = uuid::Uuid::new_v4().to_string();
            copy.to = Some(record.id.clone());
            let id = self.deliver(copy, &record.id).await?;
            ids.push(id);
        }
        tracing::debug!(
            "Broadcast from {} on topic {} reached {} agents",
            from,
            topic,
            ids.len()
        );
        Ok(ids)
    }

    /// Current lifecycle status of a message, if the bus still knows it
    pub fn message_status(&self, message_id: &str) -> Option<MessageStatus> {
        if let Some(tracked) = self.tracked.get(message_id) {
            return Some(tracked.message.status);
        }
        self.mailboxes.iter().find_map(|mailbox| {
            mailbox
                .value()
                .iter()
                .find(|m| m.id == message_id)
                .map(|m| m.status)
        })
    }

    /// Proactively drop expired messages from every mailbox, and prune
    /// terminal messages that have been settled longer than the
    /// configured retention window
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut swept = 0;
        for mut mailbox in self.mailboxes.iter_mut() {
            let mut i = 0;
            while i < mailbox.len() {
                if mailbox[i].is_expired(now) {
                    let Some(mut expired) = mailbox.remove(i) else { break };
                    expired.advance(MessageStatus::Expired);
                    tracing::debug!("Sweep expired message {}", expired.id);
                    self.tracked
                        .insert(expired.id.clone(), TrackedMessage::new(expired));
                    swept += 1;
                } else {
                    i += 1;
                }
            }
        }
        if swept > 0 {
            self.metrics.lock().expired += swept as u64;
            tracing::debug!("Expiry sweep dropped {} messages", swept);
        }

        let retention = ChronoDuration::from_std(Duration::from_secs(
            self.config.tracked_retention_secs,
        ))
        .unwrap_or_else(|_| ChronoDuration::seconds(300));
        let cutoff = Utc::now() - retention;
        let before = self.tracked.len();
        self.tracked
            .retain(|_, tracked| !(tracked.message.status.is_terminal() && tracked.since <= cutoff));
        let pruned = before - self.tracked.len();
        if pruned > 0 {
            tracing::debug!("Pruned {} settled messages from tracking", pruned);
        }

        swept
    }

    /// Run the expiry sweep on an interval as a background task
    pub fn spawn_expiry_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                bus.sweep_expired();
            }
        })
    }

    /// Snapshot of delivery counters
    pub fn metrics(&self) -> BusMetrics {
        self.metrics.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bus_with_agents(ids: &[&str]) -> MessageBus {
        let bus = MessageBus::new(BusConfig::default());
        for id in ids {
            bus.register_agent(id, vec![]).unwrap();
        }
        bus
    }

    #[tokio::test]
    async fn test_send_to_unknown_agent_fails() {
        let bus = bus_with_agents(&["a"]);
        let err = bus
            .send(Message::direct("a", "ghost", json!(null)))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NotRegistered(_)));

        let err = bus
            .send(Message::direct("ghost", "a", json!(null)))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NotRegistered(_)));
    }

    #[tokio::test]
    async fn test_send_to_inactive_agent_fails() {
        let bus = bus_with_agents(&["a", "b"]);
        bus.directory().mark_inactive("b");

        let err = bus
            .send(Message::direct("a", "b", json!(null)))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::InactiveRecipient(_)));
    }

    #[tokio::test]
    async fn test_priority_ordering_fifo_within_level() {
        let bus = bus_with_agents(&["a", "b"]);

        for (label, priority) in [
            ("low", Priority::Low),
            ("urgent", Priority::Urgent),
            ("normal-1", Priority::Normal),
            ("high", Priority::High),
            ("normal-2", Priority::Normal),
        ] {
            bus.send_direct("a", "b", json!({ "label": label }), priority)
                .await
                .unwrap();
        }

        let batch = bus.receive("b", 10, None).await.unwrap();
        let labels: Vec<&str> = batch
            .iter()
            .map(|m| m.payload["label"].as_str().unwrap())
            .collect();
        assert_eq!(labels, vec!["urgent", "high", "normal-1", "normal-2", "low"]);
    }

    #[tokio::test]
    async fn test_receive_respects_limit_and_filter() {
        let bus = bus_with_agents(&["a", "b"]);
        bus.send(Message::direct("a", "b", json!(1))).await.unwrap();
        bus.send(Message::request("a", "b", json!(2))).await.unwrap();
        bus.send(Message::direct("a", "b", json!(3))).await.unwrap();

        let requests = bus
            .receive("b", 10, Some(MessageKind::Request))
            .await
            .unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].payload, json!(2));

        let first = bus.receive("b", 1, None).await.unwrap();
        assert_eq!(first.len(), 1);
        let rest = bus.receive("b", 10, None).await.unwrap();
        assert_eq!(rest.len(), 1);

        // Empty mailbox never blocks
        assert!(bus.receive("b", 10, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_messages_dropped_on_read() {
        let bus = bus_with_agents(&["a", "b"]);
        bus.send(Message::direct("a", "b", json!("stale")).with_ttl(Duration::from_millis(0)))
            .await
            .unwrap();
        bus.send(Message::direct("a", "b", json!("fresh")))
            .await
            .unwrap();

        let batch = bus.receive("b", 10, None).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, json!("fresh"));
        assert_eq!(bus.metrics().expired, 1);
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let bus = bus_with_agents(&["a", "b"]);
        let id = bus
            .send(Message::direct("a", "b", json!(null)).with_ttl(Duration::from_millis(0)))
            .await
            .unwrap();

        assert_eq!(bus.sweep_expired(), 1);
        assert_eq!(bus.message_status(&id), Some(MessageStatus::Expired));
        assert!(bus.receive("b", 10, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_acknowledge_is_idempotent() {
        let bus = bus_with_agents(&["a", "b"]);
        let id = bus.send_direct("a", "b", json!(null), Priority::Normal).await.unwrap();

        let batch = bus.receive("b", 1, None).await.unwrap();
        assert_eq!(batch[0].status, MessageStatus::Delivered);

        assert!(bus.acknowledge("b", &id).await.unwrap());
        let after_first = bus.metrics();

        // Second ack: no error, no duplicate accounting
        assert!(bus.acknowledge("b", &id).await.unwrap());
        let after_second = bus.metrics();
        assert_eq!(after_first.acknowledged, after_second.acknowledged);
        assert_eq!(
            after_first.avg_ack_latency_ms,
            after_second.avg_ack_latency_ms
        );

        assert_eq!(bus.message_status(&id), Some(MessageStatus::Acknowledged));
    }

    #[tokio::test]
    async fn test_acknowledge_wrong_agent_or_unknown() {
        let bus = bus_with_agents(&["a", "b", "c"]);
        let id = bus.send_direct("a", "b", json!(null), Priority::Normal).await.unwrap();
        bus.receive("b", 1, None).await.unwrap();

        assert!(!bus.acknowledge("c", &id).await.unwrap());
        assert!(!bus.acknowledge("b", "no-such-message").await.unwrap());
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender_and_inactive() {
        let bus = bus_with_agents(&["sender", "w1", "w2", "w3", "w4", "w5"]);
        bus.directory().mark_inactive("w3");

        let ids = bus
            .broadcast("sender", "jobs", json!({"job": 1}), Priority::Normal, None)
            .await
            .unwrap();
        assert_eq!(ids.len(), 4);

        for worker in ["w1", "w2", "w4", "w5"] {
            let batch = bus.receive(worker, 10, None).await.unwrap();
            assert_eq!(batch.len(), 1);
            assert_eq!(batch[0].kind, MessageKind::Broadcast);
            assert_eq!(batch[0].to.as_deref(), Some(worker));
        }
        assert!(bus.receive("sender", 10, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_with_predicate() {
        let bus = MessageBus::new(BusConfig::default());
        bus.register_agent("sender", vec![]).unwrap();
        bus.register_agent("coder", vec!["code".to_string()]).unwrap();
        bus.register_agent("reviewer", vec!["review".to_string()]).unwrap();

        let ids = bus
            .broadcast(
                "sender",
                "code-tasks",
                json!(null),
                Priority::Normal,
                Some(&|record: &AgentRecord| record.capabilities.contains("code")),
            )
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(bus.receive("coder", 10, None).await.unwrap().len(), 1);
        assert!(bus.receive("reviewer", 10, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_journals_deliveries() {
        use swarm_store::{KeyValueStore, MemoryStore};

        let store = Arc::new(MemoryStore::new());
        let bus = MessageBus::new(BusConfig::default()).with_store(store.clone());
        bus.register_agent("a", vec![]).unwrap();
        bus.register_agent("b", vec![]).unwrap();

        bus.send_direct("a", "b", json!(1), Priority::Normal).await.unwrap();
        bus.send_direct("a", "b", json!(2), Priority::Normal).await.unwrap();

        let journal = store.list_range("mailbox:b", 0, -1).await.unwrap();
        assert_eq!(journal.len(), 2);
    }

    #[tokio::test]
    async fn test_store_journal_is_bounded() {
        use swarm_store::{KeyValueStore, MemoryStore};

        let store = Arc::new(MemoryStore::new());
        let config = BusConfig {
            journal_max_len: 5,
            ..BusConfig::default()
        };
        let bus = MessageBus::new(config).with_store(store.clone());
        bus.register_agent("a", vec![]).unwrap();
        bus.register_agent("b", vec![]).unwrap();

        for n in 0..12 {
            bus.send_direct("a", "b", json!(n), Priority::Normal).await.unwrap();
        }

        // Only the newest entries survive the trim
        let journal = store.list_range("mailbox:b", 0, -1).await.unwrap();
        assert_eq!(journal.len(), 5);
        assert_eq!(journal[0]["payload"], json!(7));
        assert_eq!(journal[4]["payload"], json!(11));
    }

    #[tokio::test]
    async fn test_sweep_prunes_settled_messages() {
        let config = BusConfig {
            tracked_retention_secs: 0,
            ..BusConfig::default()
        };
        let bus = MessageBus::new(config);
        bus.register_agent("a", vec![]).unwrap();
        bus.register_agent("b", vec![]).unwrap();

        let mut acked = Vec::new();
        for n in 0..20 {
            let id = bus.send_direct("a", "b", json!(n), Priority::Normal).await.unwrap();
            acked.push(id);
        }
        bus.receive("b", 32, None).await.unwrap();
        for id in &acked {
            assert!(bus.acknowledge("b", id).await.unwrap());
        }

        let expired_id = bus
            .send(Message::direct("a", "b", json!(null)).with_ttl(Duration::from_millis(0)))
            .await
            .unwrap();

        // Delivered but not yet acknowledged: must stay observable
        let pending_id = bus.send_direct("a", "b", json!("open"), Priority::Normal).await.unwrap();
        bus.receive("b", 32, None).await.unwrap();

        bus.sweep_expired();

        for id in &acked {
            assert_eq!(bus.message_status(id), None);
        }
        assert_eq!(bus.message_status(&expired_id), None);
        assert_eq!(bus.message_status(&pending_id), Some(MessageStatus::Delivered));
    }

    #[tokio::test]
    async fn test_unregistered_agent_cannot_send_or_receive() {
        let bus = bus_with_agents(&["a", "b"]);
        bus.unregister_agent("a").unwrap();

        let err = bus
            .send(Message::direct("a", "b", json!(null)))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NotRegistered(_)));

        let err = bus.receive("a", 10, None).await.unwrap_err();
        assert!(matches!(err, BusError::NotRegistered(_)));

        // A soft-unregistered recipient is not-registered, not inactive
        let err = bus
            .send(Message::direct("b", "a", json!(null)))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NotRegistered(_)));

        let err = bus
            .broadcast("a", "topic", json!(null), Priority::Normal, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NotRegistered(_)));
    }
}
