//! Swarm event bus
//!
//! Publish/subscribe fan-out between agents. A single dispatcher task
//! drains one global priority queue and fans each event out concurrently
//! to every matching handler; a failing or panicking handler never blocks
//! its siblings or stops the dispatcher.

pub mod bus;
pub mod error;
pub mod event;

pub use bus::{EventBus, EventHandler, SubscriptionId, WILDCARD};
pub use error::{EventError, Result};
pub use event::Event;
