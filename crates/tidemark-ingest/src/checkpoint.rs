//! Durable ingestion progress.
//!
//! [`CheckpointState`] is the persisted document: a bounded FIFO of
//! already-delivered event ids plus an optional cursor anchor.
//! [`Checkpoint`] is the in-memory working copy, owned exclusively by
//! the consumer loop — no other component mutates it, which removes
//! any need for locking. [`CheckpointStore`] abstracts persistence;
//! [`FileCheckpointStore`] writes JSON via a temp file and atomic
//! rename so a crash never leaves a torn checkpoint.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

/// Default cap on the retained event-id history.
pub const DEFAULT_HISTORY_SIZE: usize = 10_000;
/// Default number of recorded updates between flushes.
pub const DEFAULT_DUMP_AFTER_UPDATES: u64 = 50;
/// Default maximum time between flushes.
pub const DEFAULT_DUMP_MAX_INTERVAL: Duration = Duration::from_secs(45);

/// The persisted checkpoint document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Already-delivered event ids, oldest first.
    pub known_event_ids: Vec<String>,
    /// Opaque resume anchor, when the remote service provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Errors from checkpoint persistence.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Filesystem failure while loading or saving.
    #[error("checkpoint io failed: {0}")]
    Io(#[from] io::Error),

    /// The stored document could not be encoded or decoded.
    #[error("checkpoint serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persistence contract for checkpoint state.
pub trait CheckpointStore: Send {
    /// Loads the last persisted state; `None` on first run.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] when existing state cannot be read.
    fn load(&self) -> Result<Option<CheckpointState>, CheckpointError>;

    /// Persists the given state, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] when the state cannot be written.
    fn save(&self, state: &CheckpointState) -> Result<(), CheckpointError>;
}

/// Checkpoint store backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    /// Creates a store writing to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file the checkpoint is stored in.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> Result<Option<CheckpointState>, CheckpointError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save(&self, state: &CheckpointState) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(state)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-memory checkpoint owned by the consumer loop.
///
/// Membership checks go through a hash set mirroring the FIFO history,
/// so dedup stays O(1) at any history size.
pub struct Checkpoint {
    store: Box<dyn CheckpointStore>,
    history: VecDeque<String>,
    seen: HashSet<String>,
    cursor: Option<String>,
    history_size: usize,
    dump_after_updates: u64,
    dump_max_interval: Duration,
    updates_since_flush: u64,
    last_flush: Instant,
    had_prior_state: bool,
}

impl Checkpoint {
    /// Loads prior state (if any) from `store`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] when existing state cannot be read.
    pub fn load(
        store: Box<dyn CheckpointStore>,
        history_size: usize,
        dump_after_updates: u64,
        dump_max_interval: Duration,
    ) -> Result<Self, CheckpointError> {
        let state = store.load()?;
        let had_prior_state = state.is_some();
        let state = state.unwrap_or_default();
        info!(
            known_ids = state.known_event_ids.len(),
            first_run = !had_prior_state,
            "checkpoint loaded"
        );
        let seen: HashSet<String> = state.known_event_ids.iter().cloned().collect();
        Ok(Self {
            store,
            history: state.known_event_ids.into(),
            seen,
            cursor: state.cursor,
            history_size: history_size.max(1),
            dump_after_updates,
            dump_max_interval,
            updates_since_flush: 0,
            last_flush: Instant::now(),
            had_prior_state,
        })
    }

    /// Whether any persisted state existed before this run.
    #[must_use]
    pub fn had_prior_state(&self) -> bool {
        self.had_prior_state
    }

    /// Whether `event_id` is in the retained history.
    #[must_use]
    pub fn contains(&self, event_id: &str) -> bool {
        self.seen.contains(event_id)
    }

    /// Appends a delivered event id to the history.
    pub fn record(&mut self, event_id: String) {
        self.seen.insert(event_id.clone());
        self.history.push_back(event_id);
        self.updates_since_flush += 1;
    }

    /// Number of ids currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Whether the history is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// The persisted cursor anchor, when one exists.
    #[must_use]
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Replaces the cursor anchor.
    pub fn set_cursor(&mut self, cursor: Option<String>) {
        if self.cursor != cursor {
            self.cursor = cursor;
            self.updates_since_flush += 1;
        }
    }

    /// Prunes the history to the most recent `history_size` ids.
    /// Returns the number of ids dropped.
    pub fn prune(&mut self) -> usize {
        let mut dropped = 0;
        while self.history.len() > self.history_size {
            if let Some(old) = self.history.pop_front() {
                self.seen.remove(&old);
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(dropped, retained = self.history.len(), "pruned event-id history");
            self.updates_since_flush += 1;
        }
        dropped
    }

    /// Persists the state when the update-count or elapsed-interval
    /// threshold has been crossed. Returns whether a flush happened.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] when persistence fails.
    pub fn flush_if_due(&mut self) -> Result<bool, CheckpointError> {
        if self.updates_since_flush == 0 {
            return Ok(false);
        }
        let due = self.updates_since_flush >= self.dump_after_updates
            || self.last_flush.elapsed() >= self.dump_max_interval;
        if due {
            self.flush()?;
        }
        Ok(due)
    }

    /// Persists the state unconditionally.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] when persistence fails.
    pub fn flush(&mut self) -> Result<(), CheckpointError> {
        let state = self.state();
        self.store.save(&state)?;
        self.updates_since_flush = 0;
        self.last_flush = Instant::now();
        debug!(known_ids = state.known_event_ids.len(), "checkpoint flushed");
        Ok(())
    }

    fn state(&self) -> CheckpointState {
        CheckpointState {
            known_event_ids: self.history.iter().cloned().collect(),
            cursor: self.cursor.clone(),
        }
    }
}

impl std::fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkpoint")
            .field("history", &self.history.len())
            .field("history_size", &self.history_size)
            .field("updates_since_flush", &self.updates_since_flush)
            .finish_non_exhaustive()
    }
}
