//! Priority levels shared by messages and events
//!
//! Both the message bus and the event bus order work by the same four
//! levels. Ordering is derived from variant order: `Low < Normal < High
//! < Urgent`.

use serde::{Deserialize, Serialize};

/// Delivery priority for messages and events
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work, drained last
    Low,

    /// Default level
    #[default]
    Normal,

    /// Ahead of normal traffic
    High,

    /// Drained before everything else
    Urgent,
}

impl Priority {
    /// All levels from highest to lowest
    pub const fn descending() -> [Priority; 4] {
        [
            Priority::Urgent,
            Priority::High,
            Priority::Normal,
            Priority::Low,
        ]
    }
}
