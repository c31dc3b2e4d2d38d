//! Collaboration manager
//!
//! Orchestrates a set of agents through one of four patterns, recording
//! every step in the conversation and in a per-conversation shared
//! context namespace. Lifecycle milestones go out on the event bus so
//! observers can follow a collaboration without polling.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use swarm_bus::{BusError, MessageBus};
use swarm_context::SharedContext;
use swarm_core::config::CollabConfig;
use swarm_core::Priority;
use swarm_events::EventBus;
use swarm_store::KeyValueStore;

use crate::conversation::{CollaborationPattern, Conversation, ConversationState};
use crate::error::{CollabError, Result};
use crate::executor::{AgentExecutor, AgentResult};

/// Bus identity the manager sends outcome notifications from
pub const MANAGER_ID: &str = "collaboration-manager";

/// Final result of a collaboration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationOutcome {
    /// The conversation this outcome belongs to
    pub conversation_id: String,

    /// Whether the collaboration as a whole succeeded
    pub success: bool,

    /// Every recorded step, in execution order
    pub results: Vec<AgentResult>,

    /// Successful outputs keyed by agent id
    pub outputs: Map<String, Value>,

    /// Number of successful steps
    pub success_count: usize,

    /// Why the collaboration did not complete, when it did not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,

    /// Pattern-level final output, when the pattern produces one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_output: Option<Value>,
}

/// What a pattern run produced, before outcome assembly
struct PatternRun {
    success: bool,
    final_output: Option<Value>,
    failure: Option<String>,
}

/// Drives multi-agent collaborations
pub struct CollaborationManager {
    executors: Arc<DashMap<String, Arc<dyn AgentExecutor>>>,
    conversations: Arc<DashMap<String, Conversation>>,
    events: Arc<EventBus>,
    bus: Option<Arc<MessageBus>>,
    store: Option<Arc<dyn KeyValueStore>>,
    config: CollabConfig,
}

impl CollaborationManager {
    pub fn new(events: Arc<EventBus>, config: CollabConfig) -> Self {
        Self {
            executors: Arc::new(DashMap::new()),
            conversations: Arc::new(DashMap::new()),
            events,
            bus: None,
            store: None,
            config,
        }
    }

    /// Attach a message bus; the manager registers its own endpoint and
    /// notifies initiators of finished collaborations over it
    pub fn with_message_bus(mut self, bus: Arc<MessageBus>) -> Result<Self> {
        match bus.register_agent(MANAGER_ID, vec!["coordination".to_string()]) {
            Ok(()) | Err(BusError::AlreadyRegistered(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.bus = Some(bus);
        Ok(self)
    }

    /// Attach a store; per-conversation context is persisted through it
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register the executor that acts for an agent id
    pub fn register_executor<S: Into<String>>(&self, agent_id: S, executor: Arc<dyn AgentExecutor>) {
        let agent_id = agent_id.into();
        tracing::debug!("Registered executor for {}", agent_id);
        self.executors.insert(agent_id, executor);
    }

    /// Snapshot of a conversation by id
    pub fn get_conversation(&self, conversation_id: &str) -> Option<Conversation> {
        self.conversations
            .get(conversation_id)
            .map(|c| c.value().clone())
    }

    /// Conversations that have not reached a terminal state
    pub fn active_conversations(&self) -> Vec<Conversation> {
        self.conversations
            .iter()
            .filter(|entry| !entry.value().state.is_terminal())
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Run a collaboration with the configured default deadline
    pub async fn collaborate(
        &self,
        topic: &str,
        initiator: &str,
        participants: Vec<String>,
        pattern: CollaborationPattern,
        input: Value,
    ) -> Result<CollaborationOutcome> {
        let timeout = Duration::from_secs(self.config.default_timeout_secs);
        self.collaborate_with_timeout(topic, initiator, participants, pattern, input, timeout)
            .await
    }

    /// Run a collaboration with an explicit wall-clock deadline
    ///
    /// Agent failures never surface as an `Err`; they are recorded in
    /// the outcome. `Err` means the collaboration could not be set up
    /// or the engine's own plumbing failed.
    pub async fn collaborate_with_timeout(
        &self,
        topic: &str,
        initiator: &str,
        participants: Vec<String>,
        pattern: CollaborationPattern,
        input: Value,
        timeout: Duration,
    ) -> Result<CollaborationOutcome> {
        if participants.is_empty() {
            return Err(CollabError::EmptyParticipants);
        }
        for agent in &participants {
            if !self.executors.contains_key(agent) {
                return Err(CollabError::ExecutorMissing(agent.clone()));
            }
        }
        if pattern == CollaborationPattern::Hierarchical && participants.len() < 2 {
            return Err(CollabError::NotEnoughParticipants(
                "hierarchical needs a coordinator and at least one worker".to_string(),
            ));
        }

        let expires_at = chrono::Duration::from_std(timeout)
            .ok()
            .map(|d| chrono::Utc::now() + d);
        let conversation = Conversation::new(
            topic,
            initiator,
            participants.clone(),
            pattern.clone(),
            expires_at,
        );
        let conversation_id = conversation.id.clone();
        self.conversations
            .insert(conversation_id.clone(), conversation);

        tracing::info!(
            "Starting collaboration {} ({:?}) on '{}' with {} agents",
            conversation_id,
            pattern,
            topic,
            participants.len()
        );
        self.events
            .publish(
                "collaboration.started",
                json!({
                    "conversation_id": conversation_id,
                    "topic": topic,
                    "initiator": initiator,
                    "participants": participants,
                }),
                MANAGER_ID,
                Priority::Normal,
            )
            .await?;

        self.transition(&conversation_id, ConversationState::InProgress)?;

        let mut ctx = SharedContext::new(format!("conversation:{}", conversation_id));
        if let Some(store) = &self.store {
            ctx = ctx.with_store(store.clone());
        }

        let run = tokio::time::timeout(
            timeout,
            self.run_pattern(&conversation_id, topic, &participants, &pattern, input, &ctx),
        )
        .await;

        let (run, timed_out) = match run {
            Ok(Ok(run)) => (run, false),
            Ok(Err(e)) => {
                self.transition(&conversation_id, ConversationState::Failed)?;
                self.events
                    .publish(
                        "collaboration.failed",
                        json!({"conversation_id": conversation_id, "error": e.to_string()}),
                        MANAGER_ID,
                        Priority::High,
                    )
                    .await?;
                return Err(e);
            }
            Err(_) => {
                tracing::warn!(
                    "Collaboration {} timed out after {:?}",
                    conversation_id,
                    timeout
                );
                (
                    PatternRun {
                        success: false,
                        final_output: None,
                        failure: Some(format!(
                            "workflow timed out after {}s",
                            timeout.as_secs_f64()
                        )),
                    },
                    true,
                )
            }
        };

        let terminal = if timed_out {
            ConversationState::Timeout
        } else if run.success {
            ConversationState::Completed
        } else {
            ConversationState::Failed
        };
        self.transition(&conversation_id, terminal)?;

        // Partial step results survive a timeout
        let results = self
            .get_conversation(&conversation_id)
            .map(|c| c.step_results)
            .unwrap_or_default();
        let mut outputs = Map::new();
        for result in results.iter().filter(|r| r.success) {
            if let Some(output) = &result.output {
                outputs.insert(result.agent_id.clone(), output.clone());
            }
        }
        let success_count = results.iter().filter(|r| r.success).count();

        let outcome = CollaborationOutcome {
            conversation_id: conversation_id.clone(),
            success: run.success,
            results,
            outputs,
            success_count,
            failure: run.failure,
            final_output: run.final_output,
        };

        let event_type = if outcome.success {
            "collaboration.completed"
        } else {
            "collaboration.failed"
        };
        self.events
            .publish(
                event_type,
                json!({
                    "conversation_id": conversation_id,
                    "topic": topic,
                    "success_count": outcome.success_count,
                    "steps": outcome.results.len(),
                    "failure": outcome.failure,
                }),
                MANAGER_ID,
                if outcome.success {
                    Priority::Normal
                } else {
                    Priority::High
                },
            )
            .await?;

        self.cleanup_context(&ctx).await;
        self.notify_initiator(initiator, &outcome).await;

        Ok(outcome)
    }

    fn transition(&self, conversation_id: &str, next: ConversationState) -> Result<()> {
        let mut entry = self
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| CollabError::ConversationNotFound(conversation_id.to_string()))?;
        entry.value_mut().transition(next)
    }

    /// Remove everything the collaboration wrote into its context
    /// namespace; best effort
    async fn cleanup_context(&self, ctx: &SharedContext) {
        let keys = match ctx.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("Context cleanup listing failed: {}", e);
                return;
            }
        };
        for key in keys {
            if let Err(e) = ctx.delete(&key, MANAGER_ID).await {
                tracing::warn!("Context cleanup of {} failed: {}", key, e);
            }
        }
    }

    /// Send the outcome to the initiator's mailbox when a bus is
    /// attached and the initiator can receive; best effort
    async fn notify_initiator(&self, initiator: &str, outcome: &CollaborationOutcome) {
        let Some(bus) = &self.bus else { return };
        if !bus.directory().is_active(initiator) {
            return;
        }
        let payload = match serde_json::to_value(outcome) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Outcome serialization failed: {}", e);
                return;
            }
        };
        if let Err(e) = bus
            .send_direct(MANAGER_ID, initiator, payload, Priority::Normal)
            .await
        {
            tracing::warn!("Outcome notification to {} failed: {}", initiator, e);
        }
    }

    async fn run_pattern(
        &self,
        conversation_id: &str,
        topic: &str,
        participants: &[String],
        pattern: &CollaborationPattern,
        input: Value,
        ctx: &SharedContext,
    ) -> Result<PatternRun> {
        match pattern {
            CollaborationPattern::Sequential => {
                self.run_sequential(conversation_id, topic, participants, input, ctx)
                    .await
            }
            CollaborationPattern::Parallel => {
                self.run_parallel(conversation_id, topic, participants, input, ctx)
                    .await
            }
            CollaborationPattern::Hierarchical => {
                self.run_hierarchical(conversation_id, topic, participants, input, ctx)
                    .await
            }
            CollaborationPattern::PeerToPeer { rounds } => {
                self.run_peer_to_peer(conversation_id, topic, participants, *rounds, input, ctx)
                    .await
            }
        }
    }

    /// Each agent's output becomes the next agent's input; the first
    /// failure aborts the chain
    async fn run_sequential(
        &self,
        conversation_id: &str,
        topic: &str,
        participants: &[String],
        input: Value,
        ctx: &SharedContext,
    ) -> Result<PatternRun> {
        let mut current = input;
        let mut last_output = None;

        for agent in participants {
            let result = self.invoke(conversation_id, agent, topic, current.clone()).await;
            let succeeded = result.success;
            let output = result.output.clone();
            let error = result.error.clone();
            self.record_step(conversation_id, ctx, result).await?;

            if !succeeded {
                return Ok(PatternRun {
                    success: false,
                    final_output: last_output,
                    failure: Some(format!(
                        "{} failed: {}",
                        agent,
                        error.unwrap_or_else(|| "unknown error".to_string())
                    )),
                });
            }
            if let Some(output) = output {
                current = output.clone();
                last_output = Some(output);
            }
        }

        Ok(PatternRun {
            success: true,
            final_output: last_output,
            failure: None,
        })
    }

    /// All agents run concurrently on the same input; the run succeeds
    /// if any agent does
    async fn run_parallel(
        &self,
        conversation_id: &str,
        topic: &str,
        participants: &[String],
        input: Value,
        ctx: &SharedContext,
    ) -> Result<PatternRun> {
        let invocations = participants
            .iter()
            .map(|agent| self.invoke(conversation_id, agent, topic, input.clone()));
        let results = join_all(invocations).await;

        let mut outputs = Map::new();
        let mut any_success = false;
        for result in results {
            if result.success {
                any_success = true;
                if let Some(output) = &result.output {
                    outputs.insert(result.agent_id.clone(), output.clone());
                }
            }
            self.record_step(conversation_id, ctx, result).await?;
        }

        Ok(PatternRun {
            success: any_success,
            final_output: Some(Value::Object(outputs)),
            failure: if any_success {
                None
            } else {
                Some("all agents failed".to_string())
            },
        })
    }

    /// The first participant coordinates: it decomposes the input into
    /// subtasks, the remaining participants work them round-robin, and
    /// the coordinator aggregates the worker outputs
    async fn run_hierarchical(
        &self,
        conversation_id: &str,
        topic: &str,
        participants: &[String],
        input: Value,
        ctx: &SharedContext,
    ) -> Result<PatternRun> {
        let coordinator = &participants[0];
        let workers = &participants[1..];

        let decomposition = self
            .invoke(
                conversation_id,
                coordinator,
                topic,
                json!({"phase": "decompose", "input": input}),
            )
            .await;
        let decomposed = decomposition.output.clone();
        let failed = !decomposition.success;
        let error = decomposition.error.clone();
        self.record_step(conversation_id, ctx, decomposition).await?;

        if failed {
            return Ok(PatternRun {
                success: false,
                final_output: None,
                failure: Some(format!(
                    "coordinator {} failed to decompose: {}",
                    coordinator,
                    error.unwrap_or_else(|| "unknown error".to_string())
                )),
            });
        }

        // A non-array decomposition falls back to one subtask per worker
        let subtasks = match decomposed {
            Some(Value::Array(items)) if !items.is_empty() => items,
            _ => workers.iter().map(|_| input.clone()).collect(),
        };

        let invocations = subtasks.iter().enumerate().map(|(i, subtask)| {
            let worker = &workers[i % workers.len()];
            self.invoke(
                conversation_id,
                worker,
                topic,
                json!({"phase": "work", "subtask": subtask}),
            )
        });
        let worker_results = join_all(invocations).await;

        let mut worker_outputs = Map::new();
        let mut any_worker_success = false;
        for result in worker_results {
            if result.success {
                any_worker_success = true;
                if let Some(output) = &result.output {
                    worker_outputs.insert(result.agent_id.clone(), output.clone());
                }
            }
            self.record_step(conversation_id, ctx, result).await?;
        }

        let aggregation = self
            .invoke(
                conversation_id,
                coordinator,
                topic,
                json!({"phase": "aggregate", "results": Value::Object(worker_outputs.clone())}),
            )
            .await;
        let aggregated = aggregation.output.clone();
        let aggregation_ok = aggregation.success;
        self.record_step(conversation_id, ctx, aggregation).await?;

        // When aggregation fails the raw worker outputs still stand
        if aggregation_ok {
            Ok(PatternRun {
                success: true,
                final_output: aggregated,
                failure: None,
            })
        } else {
            Ok(PatternRun {
                success: any_worker_success,
                final_output: Some(Value::Object(worker_outputs)),
                failure: if any_worker_success {
                    None
                } else {
                    Some("all workers failed".to_string())
                },
            })
        }
    }

    /// Equal peers run a fixed number of rounds; each round every peer
    /// sees the knowledge accumulated by all peers so far
    async fn run_peer_to_peer(
        &self,
        conversation_id: &str,
        topic: &str,
        participants: &[String],
        rounds: usize,
        input: Value,
        ctx: &SharedContext,
    ) -> Result<PatternRun> {
        let rounds = if rounds == 0 {
            self.config.default_peer_rounds
        } else {
            rounds
        };

        let mut knowledge = Map::new();
        let mut any_success = false;

        for round in 0..rounds {
            let invocations = participants.iter().map(|agent| {
                self.invoke(
                    conversation_id,
                    agent,
                    topic,
                    json!({
                        "round": round,
                        "input": input,
                        "knowledge": Value::Object(knowledge.clone()),
                    }),
                )
            });
            let results = join_all(invocations).await;

            for result in results {
                if result.success {
                    any_success = true;
                    if let Some(output) = &result.output {
                        knowledge.insert(result.agent_id.clone(), output.clone());
                    }
                }
                self.record_step(conversation_id, ctx, result).await?;
            }
        }

        Ok(PatternRun {
            success: any_success,
            final_output: Some(json!({
                "rounds": rounds,
                "knowledge": Value::Object(knowledge),
            })),
            failure: if any_success {
                None
            } else {
                Some("no peer produced a result".to_string())
            },
        })
    }

    /// Run one agent's executor, isolating panics
    async fn invoke(
        &self,
        conversation_id: &str,
        agent_id: &str,
        target: &str,
        parameters: Value,
    ) -> AgentResult {
        let Some(executor) = self.executors.get(agent_id).map(|e| e.value().clone()) else {
            return AgentResult::failure(agent_id, "no executor registered");
        };

        let task_id = conversation_id.to_string();
        let target = target.to_string();
        let agent = agent_id.to_string();
        let handle = tokio::spawn(async move {
            executor.execute(&task_id, &target, &parameters).await
        });

        match handle.await {
            Ok(execution) => AgentResult::from_execution(agent_id, execution),
            Err(e) => {
                tracing::error!("Agent {} task panicked: {}", agent, e);
                AgentResult::failure(agent_id, "agent task panicked")
            }
        }
    }

    /// Record one step: conversation bookkeeping, a context entry, and
    /// a step event
    async fn record_step(
        &self,
        conversation_id: &str,
        ctx: &SharedContext,
        result: AgentResult,
    ) -> Result<()> {
        let step = {
            let mut entry = self
                .conversations
                .get_mut(conversation_id)
                .ok_or_else(|| CollabError::ConversationNotFound(conversation_id.to_string()))?;
            let conv = entry.value_mut();
            let step = conv.current_step;
            conv.record_step(result.clone());
            step
        };

        ctx.set(
            &format!("step:{}:{}", step, result.agent_id),
            serde_json::to_value(&result)?,
            None,
            MANAGER_ID,
        )
        .await?;

        self.events
            .publish(
                "collaboration.step",
                json!({
                    "conversation_id": conversation_id,
                    "step": step,
                    "agent_id": result.agent_id,
                    "success": result.success,
                }),
                MANAGER_ID,
                Priority::Low,
            )
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use swarm_core::config::EventConfig;

    use crate::executor::ExecutionResult;

    struct StaticAgent(Value);

    #[async_trait]
    impl AgentExecutor for StaticAgent {
        async fn execute(&self, _task_id: &str, _target: &str, _parameters: &Value) -> ExecutionResult {
            ExecutionResult::ok(self.0.clone())
        }
    }

    struct FailingAgent;

    #[async_trait]
    impl AgentExecutor for FailingAgent {
        async fn execute(&self, _task_id: &str, _target: &str, _parameters: &Value) -> ExecutionResult {
            ExecutionResult::fail("simulated failure")
        }
    }

    struct PanickingAgent;

    #[async_trait]
    impl AgentExecutor for PanickingAgent {
        async fn execute(&self, _task_id: &str, _target: &str, _parameters: &Value) -> ExecutionResult {
            panic!("agent bug");
        }
    }

    /// Records every parameters value it is called with
    struct RecordingAgent {
        name: String,
        calls: Mutex<Vec<Value>>,
    }

    impl RecordingAgent {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AgentExecutor for RecordingAgent {
        async fn execute(&self, _task_id: &str, _target: &str, parameters: &Value) -> ExecutionResult {
            self.calls.lock().unwrap().push(parameters.clone());
            ExecutionResult::ok(json!({"by": self.name}))
        }
    }

    struct CountingAgent(Arc<AtomicUsize>);

    #[async_trait]
    impl AgentExecutor for CountingAgent {
        async fn execute(&self, _task_id: &str, _target: &str, _parameters: &Value) -> ExecutionResult {
            self.0.fetch_add(1, Ordering::SeqCst);
            ExecutionResult::ok(json!("counted"))
        }
    }

    /// Coordinator that decomposes into three subtasks and aggregates
    struct CoordinatorAgent;

    #[async_trait]
    impl AgentExecutor for CoordinatorAgent {
        async fn execute(&self, _task_id: &str, _target: &str, parameters: &Value) -> ExecutionResult {
            match parameters["phase"].as_str() {
                Some("decompose") => ExecutionResult::ok(json!(["t1", "t2", "t3"])),
                Some("aggregate") => {
                    ExecutionResult::ok(json!({"aggregated": parameters["results"]}))
                }
                other => ExecutionResult::fail(format!("unexpected phase: {:?}", other)),
            }
        }
    }

    struct EchoWorker(String);

    #[async_trait]
    impl AgentExecutor for EchoWorker {
        async fn execute(&self, _task_id: &str, _target: &str, parameters: &Value) -> ExecutionResult {
            ExecutionResult::ok(json!({"worker": self.0, "did": parameters["subtask"]}))
        }
    }

    struct SlowAgent;

    #[async_trait]
    impl AgentExecutor for SlowAgent {
        async fn execute(&self, _task_id: &str, _target: &str, _parameters: &Value) -> ExecutionResult {
            tokio::time::sleep(Duration::from_millis(200)).await;
            ExecutionResult::ok(json!("slow"))
        }
    }

    fn manager() -> CollaborationManager {
        let events = Arc::new(EventBus::new(&EventConfig::default()));
        CollaborationManager::new(events, CollabConfig::default())
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let mgr = manager();

        let err = mgr
            .collaborate("t", "init", vec![], CollaborationPattern::Sequential, json!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CollabError::EmptyParticipants));

        let err = mgr
            .collaborate(
                "t",
                "init",
                vec!["ghost".to_string()],
                CollaborationPattern::Sequential,
                json!(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CollabError::ExecutorMissing(ref a) if a == "ghost"));

        mgr.register_executor("solo", Arc::new(StaticAgent(json!(1))));
        let err = mgr
            .collaborate(
                "t",
                "init",
                vec!["solo".to_string()],
                CollaborationPattern::Hierarchical,
                json!(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CollabError::NotEnoughParticipants(_)));
    }

    #[tokio::test]
    async fn test_sequential_chains_outputs() {
        let mgr = manager();
        let second = Arc::new(RecordingAgent::new("b"));
        mgr.register_executor("a", Arc::new(StaticAgent(json!({"from": "a"}))));
        mgr.register_executor("b", second.clone());

        let outcome = mgr
            .collaborate(
                "chain",
                "init",
                vec!["a".to_string(), "b".to_string()],
                CollaborationPattern::Sequential,
                json!({"seed": true}),
            )
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.success_count, 2);
        assert_eq!(outcome.final_output, Some(json!({"by": "b"})));

        // The second agent saw the first agent's output, not the seed
        let calls = second.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], json!({"from": "a"}));
    }

    #[tokio::test]
    async fn test_sequential_stops_on_first_failure() {
        let mgr = manager();
        let tail_calls = Arc::new(AtomicUsize::new(0));
        mgr.register_executor("a", Arc::new(StaticAgent(json!("a-out"))));
        mgr.register_executor("b", Arc::new(FailingAgent));
        mgr.register_executor("c", Arc::new(CountingAgent(tail_calls.clone())));

        let outcome = mgr
            .collaborate(
                "chain",
                "init",
                vec!["a".to_string(), "b".to_string(), "c".to_string()],
                CollaborationPattern::Sequential,
                json!(null),
            )
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.final_output, Some(json!("a-out")));
        assert!(outcome.failure.as_deref().unwrap().contains("b failed"));
        assert_eq!(tail_calls.load(Ordering::SeqCst), 0);

        let conv = mgr.get_conversation(&outcome.conversation_id).unwrap();
        assert_eq!(conv.state, ConversationState::Failed);
    }

    #[tokio::test]
    async fn test_parallel_partial_failure_still_succeeds() {
        let mgr = manager();
        mgr.register_executor("a", Arc::new(StaticAgent(json!("a-out"))));
        mgr.register_executor("b", Arc::new(FailingAgent));
        mgr.register_executor("c", Arc::new(StaticAgent(json!("c-out"))));

        let outcome = mgr
            .collaborate(
                "fanout",
                "init",
                vec!["a".to_string(), "b".to_string(), "c".to_string()],
                CollaborationPattern::Parallel,
                json!(null),
            )
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.success_count, 2);
        assert_eq!(outcome.outputs.len(), 2);
        assert_eq!(outcome.outputs["a"], json!("a-out"));
        assert_eq!(outcome.outputs["c"], json!("c-out"));
    }

    #[tokio::test]
    async fn test_parallel_all_failed() {
        let mgr = manager();
        mgr.register_executor("a", Arc::new(FailingAgent));
        mgr.register_executor("b", Arc::new(FailingAgent));

        let outcome = mgr
            .collaborate(
                "fanout",
                "init",
                vec!["a".to_string(), "b".to_string()],
                CollaborationPattern::Parallel,
                json!(null),
            )
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.success_count, 0);
        assert!(outcome.failure.is_some());
    }

    #[tokio::test]
    async fn test_panicking_agent_is_isolated() {
        let mgr = manager();
        mgr.register_executor("a", Arc::new(StaticAgent(json!("ok"))));
        mgr.register_executor("boom", Arc::new(PanickingAgent));

        let outcome = mgr
            .collaborate(
                "fanout",
                "init",
                vec!["a".to_string(), "boom".to_string()],
                CollaborationPattern::Parallel,
                json!(null),
            )
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.success_count, 1);
        let failed = outcome.results.iter().find(|r| r.agent_id == "boom").unwrap();
        assert!(failed.error.as_deref().unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn test_hierarchical_round_robin() {
        let mgr = manager();
        mgr.register_executor("coord", Arc::new(CoordinatorAgent));
        mgr.register_executor("w1", Arc::new(EchoWorker("w1".to_string())));
        mgr.register_executor("w2", Arc::new(EchoWorker("w2".to_string())));

        let outcome = mgr
            .collaborate(
                "bigjob",
                "init",
                vec!["coord".to_string(), "w1".to_string(), "w2".to_string()],
                CollaborationPattern::Hierarchical,
                json!({"job": "x"}),
            )
            .await
            .unwrap();

        // decompose + three subtasks + aggregate
        assert!(outcome.success);
        assert_eq!(outcome.results.len(), 5);

        // Three subtasks over two workers: w1 gets t1 and t3, w2 gets t2
        let w1_steps: Vec<_> = outcome
            .results
            .iter()
            .filter(|r| r.agent_id == "w1")
            .collect();
        assert_eq!(w1_steps.len(), 2);
        assert_eq!(
            outcome
                .results
                .iter()
                .filter(|r| r.agent_id == "w2")
                .count(),
            1
        );

        let final_output = outcome.final_output.unwrap();
        assert!(final_output["aggregated"].is_object());
    }

    #[tokio::test]
    async fn test_hierarchical_coordinator_failure_skips_workers() {
        let mgr = manager();
        let worker_calls = Arc::new(AtomicUsize::new(0));
        mgr.register_executor("coord", Arc::new(FailingAgent));
        mgr.register_executor("w1", Arc::new(CountingAgent(worker_calls.clone())));

        let outcome = mgr
            .collaborate(
                "bigjob",
                "init",
                vec!["coord".to_string(), "w1".to_string()],
                CollaborationPattern::Hierarchical,
                json!(null),
            )
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(worker_calls.load(Ordering::SeqCst), 0);
        assert!(outcome
            .failure
            .as_deref()
            .unwrap()
            .contains("failed to decompose"));
    }

    #[tokio::test]
    async fn test_peer_to_peer_rounds_accumulate_knowledge() {
        let mgr = manager();
        let p1 = Arc::new(RecordingAgent::new("p1"));
        let p2 = Arc::new(RecordingAgent::new("p2"));
        mgr.register_executor("p1", p1.clone());
        mgr.register_executor("p2", p2.clone());

        let outcome = mgr
            .collaborate(
                "debate",
                "init",
                vec!["p1".to_string(), "p2".to_string()],
                CollaborationPattern::PeerToPeer { rounds: 2 },
                json!("question"),
            )
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.results.len(), 4);

        let final_output = outcome.final_output.unwrap();
        assert_eq!(final_output["rounds"], 2);
        assert!(final_output["knowledge"]["p1"].is_object());
        assert!(final_output["knowledge"]["p2"].is_object());

        // Round two carried round one's knowledge
        let calls = p1.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0]["knowledge"], json!({}));
        assert_eq!(calls[1]["knowledge"]["p2"], json!({"by": "p2"}));
    }

    #[tokio::test]
    async fn test_timeout_preserves_partial_results() {
        let mgr = manager();
        mgr.register_executor("fast", Arc::new(StaticAgent(json!("done"))));
        mgr.register_executor("slow", Arc::new(SlowAgent));

        let outcome = mgr
            .collaborate_with_timeout(
                "slowjob",
                "init",
                vec!["fast".to_string(), "slow".to_string()],
                CollaborationPattern::Sequential,
                json!(null),
                Duration::from_millis(50),
            )
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.failure.as_deref().unwrap().contains("timed out"));

        let conv = mgr.get_conversation(&outcome.conversation_id).unwrap();
        assert_eq!(conv.state, ConversationState::Timeout);
    }

    #[tokio::test]
    async fn test_lifecycle_events_published() {
        let mgr = manager();
        mgr.register_executor("a", Arc::new(StaticAgent(json!(1))));

        mgr.collaborate(
            "evented",
            "init",
            vec!["a".to_string()],
            CollaborationPattern::Sequential,
            json!(null),
        )
        .await
        .unwrap();

        let types: Vec<String> = mgr
            .events
            .recent(16)
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert!(types.contains(&"collaboration.started".to_string()));
        assert!(types.contains(&"collaboration.step".to_string()));
        assert!(types.contains(&"collaboration.completed".to_string()));
    }

    #[tokio::test]
    async fn test_conversation_tracking() {
        let mgr = manager();
        mgr.register_executor("a", Arc::new(StaticAgent(json!(1))));

        assert!(mgr.active_conversations().is_empty());

        let outcome = mgr
            .collaborate(
                "tracked",
                "init",
                vec!["a".to_string()],
                CollaborationPattern::Sequential,
                json!(null),
            )
            .await
            .unwrap();

        // Finished conversations stay queryable but are not active
        assert!(mgr.active_conversations().is_empty());
        let conv = mgr.get_conversation(&outcome.conversation_id).unwrap();
        assert_eq!(conv.state, ConversationState::Completed);
        assert_eq!(conv.topic, "tracked");
    }
}
