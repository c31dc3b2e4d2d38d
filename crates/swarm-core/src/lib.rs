//! Swarm Core
//!
//! Shared foundation for the swarmlink coordination runtime: the priority
//! ordering used by both the message bus and the event bus, configuration
//! loading, logging setup and the base error type.

pub mod config;
pub mod error;
pub mod logging;
pub mod priority;

// Re-export commonly used types
pub use config::{load_config, SwarmConfig};
pub use error::{CoreError, Result};
pub use logging::{init_logging, LogConfig};
pub use priority::Priority;
