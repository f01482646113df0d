//! The downstream event sink boundary.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::message::Source;

/// One delivered event: provenance tag, per-process sequence number,
/// and the raw payload document.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkRecord {
    /// Which feed the event arrived on.
    pub source: Source,
    /// Monotonically increasing delivery sequence (starts at 1).
    pub sequence: u64,
    /// The event document, unmodified.
    pub payload: Value,
}

/// Failure to hand an event to the sink. Fatal on the consumer path:
/// the pipeline stops and relies on supervised restart plus checkpoint
/// replay.
#[derive(Debug, Error)]
#[error("sink delivery failed: {message}")]
pub struct SinkError {
    message: String,
}

impl SinkError {
    /// Creates a sink error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Downstream consumer of delivered events.
///
/// Duplicate suppression happens before this boundary; a sink may still
/// observe a redelivery for ids that have already left the bounded
/// checkpoint history.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Accepts one tagged record.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] when the record could not be handed off;
    /// the pipeline treats this as fatal.
    async fn deliver(&self, record: SinkRecord) -> Result<(), SinkError>;
}
