//! Event bus: prioritized dispatch and fan-out

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use swarm_core::config::EventConfig;
use swarm_core::Priority;
use swarm_store::KeyValueStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{EventError, Result};
use crate::event::Event;

/// Subscription type matching every event
pub const WILDCARD: &str = "*";

/// Identifier returned by `subscribe`, used to unsubscribe
pub type SubscriptionId = String;

/// Handler interface for subscribers
///
/// Handlers run concurrently; a failure is logged against the handler
/// and never affects siblings or the dispatcher.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event
    async fn handle(&self, event: Event) -> Result<()>;

    /// Name for logging
    fn name(&self) -> &str {
        "handler"
    }
}

struct Subscription {
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
}

/// Queue entry ordered by priority, then arrival
struct Queued {
    event: Event,
    seq: u64,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, earlier arrival breaks ties
        self.event
            .priority
            .cmp(&other.event.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Publish/subscribe event bus
///
/// `publish` is fire-and-forget: events land in one global priority
/// queue drained by a single dispatcher task, which fans each event out
/// concurrently to every matching handler (specific and wildcard).
pub struct EventBus {
    subscribers: Arc<DashMap<String, Vec<Subscription>>>,
    queue_tx: mpsc::UnboundedSender<Event>,
    history: Arc<Mutex<VecDeque<Event>>>,
    history_capacity: usize,
    store: Option<Arc<dyn KeyValueStore>>,
    durable_max_len: usize,
    durable_ttl: Duration,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    pub fn new(config: &EventConfig) -> Self {
        Self::build(config, None)
    }

    /// Keep a capped, TTL'd per-type history list in the backing store
    pub fn with_store(config: &EventConfig, store: Arc<dyn KeyValueStore>) -> Self {
        Self::build(config, Some(store))
    }

    fn build(config: &EventConfig, store: Option<Arc<dyn KeyValueStore>>) -> Self {
        let subscribers: Arc<DashMap<String, Vec<Subscription>>> = Arc::new(DashMap::new());
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(run_dispatcher(queue_rx, Arc::clone(&subscribers)));

        Self {
            subscribers,
            queue_tx,
            history: Arc::new(Mutex::new(VecDeque::with_capacity(
                config.history_capacity.min(1024),
            ))),
            history_capacity: config.history_capacity.max(1),
            store,
            durable_max_len: config.durable_max_len.max(1),
            durable_ttl: Duration::from_secs(config.durable_ttl_secs),
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Subscribe a handler to an event type, or to every event with
    /// [`WILDCARD`]
    pub fn subscribe<S: Into<String>>(
        &self,
        event_type: S,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        let event_type = event_type.into();
        let id = uuid::Uuid::new_v4().to_string();
        self.subscribers
            .entry(event_type.clone())
            .or_default()
            .push(Subscription {
                id: id.clone(),
                handler,
            });
        tracing::debug!("Subscribed {} to {}", id, event_type);
        id
    }

    /// Remove a subscription; returns true if it existed
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        for mut entry in self.subscribers.iter_mut() {
            if let Some(index) = entry.value().iter().position(|s| s.id == subscription_id) {
                entry.value_mut().remove(index);
                return true;
            }
        }
        false
    }

    /// Publish an event; fire-and-forget
    ///
    /// The event is recorded in the in-process ring history (and the
    /// durable per-type list when a store is attached) and queued for
    /// dispatch. Returns the event id.
    pub async fn publish<S: Into<String>>(
        &self,
        event_type: S,
        data: Value,
        sender: S,
        priority: Priority,
    ) -> Result<String> {
        let event = Event::new(event_type, data, sender, priority);
        let id = event.id.clone();

        {
            let mut history = self.history.lock();
            history.push_back(event.clone());
            while history.len() > self.history_capacity {
                history.pop_front();
            }
        }

        if let Some(store) = &self.store {
            let key = format!("events:{}", event.event_type);
            store.list_push(&key, serde_json::to_value(&event)?).await?;
            store.list_trim(&key, self.durable_max_len).await?;
            store.expire(&key, self.durable_ttl).await?;
        }

        self.queue_tx
            .send(event)
            .map_err(|_| EventError::Dispatch("dispatcher has shut down".to_string()))?;
        Ok(id)
    }

    /// Most recent events, newest first
    pub fn recent(&self, limit: usize) -> Vec<Event> {
        self.history.lock().iter().rev().take(limit).cloned().collect()
    }

    /// Most recent events of one type, newest first
    pub fn recent_of_type(&self, event_type: &str, limit: usize) -> Vec<Event> {
        self.history
            .lock()
            .iter()
            .rev()
            .filter(|e| e.event_type == event_type)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Replay the durable history list for an event type
    pub async fn durable_history(&self, event_type: &str) -> Result<Vec<Event>> {
        let Some(store) = &self.store else {
            return Ok(Vec::new());
        };
        let key = format!("events:{}", event_type);
        let raw = store.list_range(&key, 0, -1).await?;
        let mut events = Vec::with_capacity(raw.len());
        for value in raw {
            events.push(serde_json::from_value(value)?);
        }
        Ok(events)
    }

    /// Stop the dispatcher task
    pub fn shutdown(&self) {
        if let Some(handle) = self.dispatcher.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Single dispatcher: drains the global priority queue and fans out
async fn run_dispatcher(
    mut queue_rx: mpsc::UnboundedReceiver<Event>,
    subscribers: Arc<DashMap<String, Vec<Subscription>>>,
) {
    let mut heap: BinaryHeap<Queued> = BinaryHeap::new();
    let mut seq: u64 = 0;

    while let Some(event) = queue_rx.recv().await {
        heap.push(Queued { event, seq });
        seq += 1;
        // Take everything already queued so priorities compete
        while let Ok(event) = queue_rx.try_recv() {
            heap.push(Queued { event, seq });
            seq += 1;
        }

        while let Some(next) = heap.pop() {
            dispatch(&next.event, &subscribers).await;
            while let Ok(event) = queue_rx.try_recv() {
                heap.push(Queued { event, seq });
                seq += 1;
            }
        }
    }
    tracing::debug!("Event dispatcher stopped: publish side closed");
}

/// Fan one event out concurrently to specific and wildcard handlers
async fn dispatch(event: &Event, subscribers: &DashMap<String, Vec<Subscription>>) {
    let mut targets: Vec<(SubscriptionId, Arc<dyn EventHandler>)> = Vec::new();
    for key in [event.event_type.as_str(), WILDCARD] {
        if let Some(subs) = subscribers.get(key) {
            targets.extend(
                subs.iter()
                    .map(|s| (s.id.clone(), Arc::clone(&s.handler))),
            );
        }
    }
    if targets.is_empty() {
        return;
    }

    let mut joins = Vec::with_capacity(targets.len());
    for (subscription_id, handler) in targets {
        let event = event.clone();
        joins.push((
            subscription_id,
            tokio::spawn(async move { handler.handle(event).await }),
        ));
    }

    for (subscription_id, join) in joins {
        match join.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(
                    "Handler {} failed on event {}: {}",
                    subscription_id,
                    event.id,
                    err
                );
            }
            Err(join_err) => {
                tracing::error!(
                    "Handler {} panicked on event {}: {}",
                    subscription_id,
                    event.id,
                    join_err
                );
            }
        }
    }
}
