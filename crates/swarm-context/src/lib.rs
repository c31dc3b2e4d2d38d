//! Swarm shared context
//!
//! Namespaced, versioned key-value state shared between agents. Conflict
//! resolution is last-write-wins by version; watchers observe changes
//! asynchronously after the fact.

pub mod context;
pub mod error;

pub use context::{ContextChange, ContextEntry, ContextWatcher, SharedContext, WatchId};
pub use error::{ContextError, Result};
