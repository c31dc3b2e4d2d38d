//! Agent execution contract
//!
//! The engine never interprets what an agent computes; concrete agents
//! (LLM-backed, analysis stubs, anything else) satisfy this shape and
//! report a structured outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of one `execute` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the agent handled the task
    pub success: bool,

    /// Structured output on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    /// Error description on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    /// A successful execution
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
        }
    }

    /// A failed execution
    pub fn fail<S: Into<String>>(error: S) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// Contract every concrete agent implementation satisfies
///
/// `target` names what to do (typically the conversation topic or a
/// subtask description); `parameters` is opaque input the engine never
/// inspects. Implementations report failure through the result, but the
/// engine also isolates panics, so a buggy agent cannot take a pattern
/// down with it.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, task_id: &str, target: &str, parameters: &Value) -> ExecutionResult;
}

/// One agent's recorded contribution to a collaboration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    /// The agent that ran
    pub agent_id: String,

    /// Whether the invocation succeeded
    pub success: bool,

    /// Structured output on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    /// Failure description; invocation failures are captured here,
    /// never raised out of the pattern
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the invocation finished
    pub completed_at: DateTime<Utc>,
}

impl AgentResult {
    /// Record a successful invocation
    pub fn success<S: Into<String>>(agent_id: S, output: Value) -> Self {
        Self {
            agent_id: agent_id.into(),
            success: true,
            output: Some(output),
            error: None,
            completed_at: Utc::now(),
        }
    }

    /// Record a failed invocation
    pub fn failure<S: Into<String>, E: Into<String>>(agent_id: S, error: E) -> Self {
        Self {
            agent_id: agent_id.into(),
            success: false,
            output: None,
            error: Some(error.into()),
            completed_at: Utc::now(),
        }
    }

    /// Wrap an executor's outcome
    pub fn from_execution<S: Into<String>>(agent_id: S, result: ExecutionResult) -> Self {
        Self {
            agent_id: agent_id.into(),
            success: result.success,
            output: result.output,
            error: result.error,
            completed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_constructors() {
        let ok = AgentResult::success("a1", json!({"n": 1}));
        assert!(ok.success);
        assert_eq!(ok.output.unwrap()["n"], 1);
        assert!(ok.error.is_none());

        let failed = AgentResult::failure("a1", "out of budget");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("out of budget"));
    }

    #[test]
    fn test_from_execution() {
        let result = AgentResult::from_execution("a2", ExecutionResult::fail("boom"));
        assert_eq!(result.agent_id, "a2");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("boom"));
    }
}
