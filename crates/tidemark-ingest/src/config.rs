//! Pipeline configuration.

use std::time::Duration;

use crate::checkpoint::{
    DEFAULT_DUMP_AFTER_UPDATES, DEFAULT_DUMP_MAX_INTERVAL, DEFAULT_HISTORY_SIZE,
};

/// Knobs for one ingestion pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Capacity of the shared producer queue. A full queue blocks
    /// producers, bounding memory at the cost of stalling the slower
    /// feed when the consumer lags.
    pub queue_capacity: usize,

    /// Consumer dequeue timeout; a silent feed triggers maintenance at
    /// this cadence.
    pub maintenance_interval: Duration,

    /// Cap on the retained event-id history; maintenance prunes to the
    /// most recent this-many ids.
    pub history_size: usize,

    /// Recorded updates between checkpoint flushes.
    pub dump_after_updates: u64,

    /// Maximum time between checkpoint flushes.
    pub dump_max_interval: Duration,

    /// Bounded wait for the `bound` acknowledgment during setup;
    /// exceeding it aborts startup.
    pub setup_timeout: Duration,

    /// Bounded wait of the backfill drain on the bound signal before it
    /// queries the buffered snapshot anyway.
    pub subscribe_wait: Duration,

    /// Bounded best-effort wait for the queue to drain before the
    /// backfill logs its final statistics.
    pub drain_wait: Duration,

    /// Poll interval of the drain-settle wait.
    pub drain_poll: Duration,

    /// Buffered-snapshot fetch retries before the backfill gives up.
    pub backfill_max_retries: u32,

    /// Fixed delay between backfill fetch retries.
    pub backfill_retry_backoff: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            maintenance_interval: Duration::from_secs(30),
            history_size: DEFAULT_HISTORY_SIZE,
            dump_after_updates: DEFAULT_DUMP_AFTER_UPDATES,
            dump_max_interval: DEFAULT_DUMP_MAX_INTERVAL,
            setup_timeout: Duration::from_secs(15),
            subscribe_wait: Duration::from_secs(100),
            drain_wait: Duration::from_secs(600),
            drain_poll: Duration::from_secs(1),
            backfill_max_retries: 3,
            backfill_retry_backoff: Duration::from_secs(5),
        }
    }
}
