//! The ingestion pipeline orchestrator.
//!
//! Wires the stream client and the backfill drain onto one bounded
//! queue and runs the single consumer loop: deduplicate against
//! checkpoint history, forward to the sink, record progress, and run
//! periodic maintenance. The consumer is the only component that
//! touches checkpoint state.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use tidemark_catalog::{CatalogClient, CatalogError, Credentials, ServerProfile};
use tidemark_stream::{Signal, StreamAuth, StreamClient, StreamConfig, StreamError, StreamEvent};

use crate::backfill::run_backfill;
use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
use crate::config::PipelineConfig;
use crate::counters::{Counters, CountersSnapshot};
use crate::message::{QueueMessage, Source};
use crate::sink::{EventSink, SinkError, SinkRecord};

/// Fatal pipeline failures.
///
/// Producer-side trouble (a failed backfill, a stream transport error)
/// is isolated and logged; what reaches this type stops the pipeline:
/// setup failures before any event is ingested, and consumer-path
/// failures that rely on supervised restart plus checkpoint replay.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Subscription setup failed (connect, handshake, setup timeout).
    #[error("subscription setup failed: {0}")]
    Stream(#[from] StreamError),

    /// The catalog client could not be constructed.
    #[error("catalog client setup failed: {0}")]
    Catalog(#[from] CatalogError),

    /// Checkpoint state could not be loaded or persisted.
    #[error("checkpoint failure: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// The sink refused a delivery.
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Why the pipeline stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The subscription socket closed (the normal shutdown trigger).
    SocketClosed,
    /// The caller's shutdown signal was set.
    Cancelled,
    /// Every producer finished and the queue drained completely.
    FeedsExhausted,
}

/// Final report of one pipeline run.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSummary {
    /// Why the run ended.
    pub reason: ShutdownReason,
    /// Final counter values.
    pub counters: CountersSnapshot,
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    profile: ServerProfile,
    timeline_id: String,
    facets: Vec<String>,
    backfill: bool,
    sink: Arc<dyn EventSink>,
    store: Box<dyn CheckpointStore>,
    catalog: Option<CatalogClient>,
    shutdown: Signal,
    config: PipelineConfig,
}

impl PipelineBuilder {
    /// Starts a builder from the required collaborators.
    #[must_use]
    pub fn new(
        profile: ServerProfile,
        timeline_id: impl Into<String>,
        sink: Arc<dyn EventSink>,
        store: Box<dyn CheckpointStore>,
    ) -> Self {
        Self {
            profile,
            timeline_id: timeline_id.into(),
            facets: vec!["display".to_string()],
            backfill: false,
            sink,
            store,
            catalog: None,
            shutdown: Signal::new(),
            config: PipelineConfig::default(),
        }
    }

    /// Replaces the requested facet set (default: `display`).
    #[must_use]
    pub fn facets<I, S>(mut self, facets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.facets = facets.into_iter().map(Into::into).collect();
        self
    }

    /// Enables the buffer drain on the very first run. Later runs
    /// always drain, so events missed while offline are recovered.
    #[must_use]
    pub fn backfill(mut self, backfill: bool) -> Self {
        self.backfill = backfill;
        self
    }

    /// Overrides the pipeline configuration.
    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Supplies a pre-built catalog client (test seam; production
    /// builds one from the profile).
    #[must_use]
    pub fn catalog_client(mut self, catalog: CatalogClient) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Supplies an external cancellation signal (e.g. wired to process
    /// interrupt handling by the host).
    #[must_use]
    pub fn shutdown_signal(mut self, shutdown: Signal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Finalizes the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline { inner: self }
    }
}

/// A fully wired ingestion pipeline, ready to run.
pub struct Pipeline {
    inner: PipelineBuilder,
}

impl Pipeline {
    /// Runs the pipeline until the socket closes, the shutdown signal
    /// is set, or a fatal consumer error occurs.
    ///
    /// Every exit path performs a final unconditional checkpoint flush.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] for setup failures (before any event
    /// is ingested) and for fatal consumer-path failures; the hosting
    /// environment is expected to restart the process and resume from
    /// the last persisted checkpoint.
    pub async fn run(self) -> Result<PipelineSummary, PipelineError> {
        let PipelineBuilder {
            profile,
            timeline_id,
            facets,
            backfill,
            sink,
            store,
            catalog,
            shutdown,
            config,
        } = self.inner;

        let counters = Arc::new(Counters::default());
        let mut checkpoint = Checkpoint::load(
            store,
            config.history_size,
            config.dump_after_updates,
            config.dump_max_interval,
        )?;

        let stream_config = StreamConfig {
            url: profile.url.clone(),
            timeline_id: timeline_id.clone(),
            facets: facets.clone(),
            auth: Some(stream_auth(&profile)),
            verify: profile.verify,
            setup_timeout: config.setup_timeout,
            channel_capacity: config.queue_capacity,
        };
        let mut client = StreamClient::connect(stream_config).await?;
        let bound = client.bound_signal();
        let done = client.done_signal();

        let (queue_tx, mut queue_rx) = mpsc::channel(config.queue_capacity.max(1));

        // First-run gating: with prior checkpoint state the buffer is
        // always drained; on a fresh start the backfill flag decides.
        if checkpoint.had_prior_state() || backfill {
            let catalog = match catalog {
                Some(catalog) => catalog,
                None => CatalogClient::new(&profile)?,
            };
            tokio::spawn(run_backfill(
                catalog,
                timeline_id.clone(),
                facets.clone(),
                queue_tx.clone(),
                bound.clone(),
                Arc::clone(&counters),
                config.clone(),
            ));
        } else {
            info!("first run without backfill enabled, skipping the buffer drain");
        }

        let forwarder_counters = Arc::clone(&counters);
        let forwarder_queue = queue_tx.clone();
        tokio::spawn(async move {
            forward_stream_events(&mut client, &forwarder_queue, &forwarder_counters).await;
        });
        // The consumer holds no sender; the queue closes once both
        // producers are gone.
        drop(queue_tx);

        info!(timeline = %timeline_id, "ingestion pipeline started");
        let outcome = consume(
            &mut queue_rx,
            &mut checkpoint,
            &counters,
            sink.as_ref(),
            &done,
            &shutdown,
            &config,
        )
        .await;

        // Final unconditional flush, on success and failure alike.
        let flush = checkpoint.flush();

        let snapshot = counters.snapshot();
        match outcome {
            Ok(reason) => {
                flush?;
                info!(
                    reason = ?reason,
                    stats = %snapshot,
                    "ingestion pipeline stopped"
                );
                Ok(PipelineSummary {
                    reason,
                    counters: snapshot,
                })
            }
            Err(e) => {
                if let Err(flush_err) = flush {
                    warn!(error = %flush_err, "final checkpoint flush failed");
                }
                error!(error = %e, stats = %snapshot, "ingestion pipeline failed");
                Err(e)
            }
        }
    }
}

/// Maps profile credentials onto the socket auth scheme.
fn stream_auth(profile: &ServerProfile) -> StreamAuth {
    match profile.credentials() {
        Credentials::Token(token) => StreamAuth::Token(token),
        Credentials::Basic { username, password } => StreamAuth::Basic { username, password },
    }
}

/// Forwards tagged stream events onto the shared queue until the
/// subscription ends.
async fn forward_stream_events(
    client: &mut StreamClient,
    queue: &mpsc::Sender<QueueMessage>,
    counters: &Counters,
) {
    while let Some(event) = client.next_event().await {
        match event {
            StreamEvent::Event { body } => {
                let Some(event_id) = body.get("id").and_then(Value::as_str) else {
                    warn!("dropping pushed event without an 'id'");
                    continue;
                };
                let message = QueueMessage {
                    source: Source::Stream,
                    event_id: event_id.to_string(),
                    payload: body.clone(),
                };
                if queue.send(message).await.is_err() {
                    break;
                }
                counters.record_queued(Source::Stream);
            }
            StreamEvent::Bound { cid } => {
                debug!(cid = cid.as_deref().unwrap_or(""), "stream feed flowing");
            }
            StreamEvent::Error { message } => {
                warn!(error = %message, "stream transport error");
            }
            StreamEvent::Closed => break,
        }
    }
}

/// The single consumer loop.
async fn consume(
    queue: &mut mpsc::Receiver<QueueMessage>,
    checkpoint: &mut Checkpoint,
    counters: &Counters,
    sink: &dyn EventSink,
    done: &Signal,
    shutdown: &Signal,
    config: &PipelineConfig,
) -> Result<ShutdownReason, PipelineError> {
    let mut sequence: u64 = 0;
    let mut next_maintenance = Instant::now() + config.maintenance_interval;

    loop {
        if done.is_set() {
            return Ok(ShutdownReason::SocketClosed);
        }
        if shutdown.is_set() {
            return Ok(ShutdownReason::Cancelled);
        }

        let mut run_maintenance = false;
        match timeout(config.maintenance_interval, queue.recv()).await {
            Ok(Some(message)) => {
                if checkpoint.contains(&message.event_id) {
                    counters.record_skipped(message.source);
                } else {
                    sequence += 1;
                    sink.deliver(SinkRecord {
                        source: message.source,
                        sequence,
                        payload: message.payload,
                    })
                    .await?;
                    checkpoint.record(message.event_id);
                    counters.record_ingested(message.source);
                }
                if Instant::now() >= next_maintenance {
                    run_maintenance = true;
                }
            }
            Ok(None) => {
                info!("all producer feeds finished and the queue drained");
                return Ok(ShutdownReason::FeedsExhausted);
            }
            Err(_elapsed) => {
                debug!("no events before the maintenance interval");
                run_maintenance = true;
            }
        }

        if run_maintenance {
            info!(stats = %counters.snapshot(), history = checkpoint.len(), "ingestion stats");
            checkpoint.prune();
            checkpoint.flush_if_due()?;
            next_maintenance = Instant::now() + config.maintenance_interval;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(username: &str) -> ServerProfile {
        ServerProfile {
            url: "https://quo.example.com".to_string(),
            username: username.to_string(),
            secret: "s".to_string(),
            verify: true,
            max_batch_size: 100,
            max_execution_time: 30,
        }
    }

    #[test]
    fn test_stream_auth_token_mapping() {
        let auth = stream_auth(&profile(tidemark_catalog::profile::TOKEN_USERNAME));
        assert_eq!(auth, StreamAuth::Token("s".to_string()));
    }

    #[test]
    fn test_stream_auth_basic_mapping() {
        let auth = stream_auth(&profile("analyst"));
        assert_eq!(
            auth,
            StreamAuth::Basic {
                username: "analyst".to_string(),
                password: "s".to_string(),
            }
        );
    }
}
