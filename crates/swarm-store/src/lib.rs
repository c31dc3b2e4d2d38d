//! Swarm backing store
//!
//! Storage seam for cross-process persistence of mailboxes, shared context
//! and event history. Any store exposing these primitives suffices; the
//! in-memory implementation is the default and is what tests run against.

pub mod error;
pub mod memory;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use store::KeyValueStore;
