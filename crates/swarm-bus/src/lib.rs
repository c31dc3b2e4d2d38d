//! Agent message bus
//!
//! Priority-ordered per-agent mailboxes with message lifecycle tracking,
//! an agent directory with liveness sweeping, and a request/response
//! protocol correlated over the bus.
//!
//! # Example
//!
//! ```no_run
//! use swarm_bus::{Message, MessageBus};
//! use swarm_core::Priority;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = Arc::new(MessageBus::new(Default::default()));
//!     bus.register_agent("agent-1", vec![])?;
//!     bus.register_agent("agent-2", vec![])?;
//!
//!     let message = Message::direct("agent-1", "agent-2", serde_json::json!({"text": "hello"}))
//!         .with_priority(Priority::High);
//!     bus.send(message).await?;
//!
//!     let inbox = bus.receive("agent-2", 10, None).await?;
//!     assert_eq!(inbox.len(), 1);
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod directory;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod protocol;

// Re-exports
pub use bus::{BusMetrics, MessageBus};
pub use directory::{AgentDirectory, AgentRecord, AgentStatus};
pub use error::{BusError, Result};
pub use heartbeat::HeartbeatMonitor;
pub use message::{Message, MessageKind, MessageStatus};
pub use protocol::{CommunicationProtocol, ResponseEnvelope, ResponseStatus};
