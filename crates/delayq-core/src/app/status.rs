//! Status - キューの状態集計

use serde::{Deserialize, Serialize};

/// Member counts per collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Waiting in the ready set (due or not).
    pub ready: usize,
    /// Claimed and not yet acknowledged.
    pub in_flight: usize,
    /// Dead-lettered.
    pub dead: usize,
}
