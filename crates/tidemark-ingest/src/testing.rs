//! In-memory doubles for pipeline tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::checkpoint::{CheckpointError, CheckpointState, CheckpointStore};
use crate::sink::{EventSink, SinkError, SinkRecord};

/// Sink that records every delivered event.
#[derive(Debug, Default)]
pub struct CollectingSink {
    records: Mutex<Vec<SinkRecord>>,
}

impl CollectingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Everything delivered so far, in delivery order.
    #[must_use]
    pub fn delivered(&self) -> Vec<SinkRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for CollectingSink {
    async fn deliver(&self, record: SinkRecord) -> Result<(), SinkError> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

/// Sink that rejects every delivery.
#[derive(Debug, Default)]
pub struct FailingSink;

#[async_trait]
impl EventSink for FailingSink {
    async fn deliver(&self, record: SinkRecord) -> Result<(), SinkError> {
        Err(SinkError::new(format!(
            "refusing event {} (sequence {})",
            record
                .payload
                .get("id")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("?"),
            record.sequence
        )))
    }
}

/// Shared save counter for [`MemoryCheckpointStore`].
#[derive(Debug, Clone, Default)]
pub struct SaveCount(Arc<AtomicU64>);

impl SaveCount {
    /// Number of saves performed so far.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Checkpoint store kept in memory; clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    state: Arc<Mutex<Option<CheckpointState>>>,
    saves: SaveCount,
}

impl MemoryCheckpointStore {
    /// Creates a store pre-seeded with prior state.
    #[must_use]
    pub fn with_state(state: CheckpointState) -> Self {
        Self {
            state: Arc::new(Mutex::new(Some(state))),
            saves: SaveCount::default(),
        }
    }

    /// Handle observing how many times `save` ran.
    #[must_use]
    pub fn save_count_handle(&self) -> SaveCount {
        self.saves.clone()
    }

    /// The currently stored state, if any.
    #[must_use]
    pub fn stored(&self) -> Option<CheckpointState> {
        self.state.lock().unwrap().clone()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self) -> Result<Option<CheckpointState>, CheckpointError> {
        Ok(self.state.lock().unwrap().clone())
    }

    fn save(&self, state: &CheckpointState) -> Result<(), CheckpointError> {
        *self.state.lock().unwrap() = Some(state.clone());
        self.saves.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
