//! # Tidemark Ingestion Pipeline
//!
//! Merges two producers — the live socket subscription and the
//! buffered-event backfill drain — onto one bounded queue, consumed by
//! a single loop that deduplicates against checkpoint history, forwards
//! to the event sink, and persists progress so a restart never
//! redelivers an event whose id is still in history.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod backfill;
pub mod checkpoint;
pub mod config;
pub mod counters;
pub mod message;
pub mod pipeline;
pub mod sink;
pub mod testing;

pub use checkpoint::{Checkpoint, CheckpointError, CheckpointState, CheckpointStore, FileCheckpointStore};
pub use config::PipelineConfig;
pub use counters::{Counters, CountersSnapshot};
pub use message::{QueueMessage, Source};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineError, PipelineSummary, ShutdownReason};
pub use sink::{EventSink, SinkError, SinkRecord};
