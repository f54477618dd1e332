use serde::{Deserialize, Serialize};

/// Engine tunables. Defaults are sized for a small deployment; everything
/// here is safe to change at start-up and fixed afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bounded depth of each per-market command queue.
    pub command_queue_depth: usize,
    /// Aggregated price levels included in published orderbook snapshots.
    pub snapshot_depth: usize,
    /// How many times a failed persistence write is retried before the
    /// market worker halts.
    pub persist_retries: u32,
    /// Capacity of each market's broadcast event channel; lagged
    /// subscribers lose the oldest events.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_queue_depth: 64,
            snapshot_depth: 10,
            persist_retries: 2,
            event_capacity: 256,
        }
    }
}
