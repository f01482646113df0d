//! Buffered-event backfill drain.
//!
//! Runs once per pipeline start: waits (bounded) for the subscription
//! to bind so the live feed is already flowing, fetches the remote
//! buffered-event snapshot, and enqueues every record tagged
//! [`Source::Backfill`]. Failures here never stop the stream feed —
//! after a few fixed-backoff retries the drain gives up with a warning
//! and the pipeline continues on the live subscription alone.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use tidemark_catalog::CatalogClient;
use tidemark_stream::Signal;

use crate::config::PipelineConfig;
use crate::counters::Counters;
use crate::message::{QueueMessage, Source};

/// Drains the buffered-event snapshot for `timeline_id` into `queue`.
///
/// Sequencing is best effort: the drain waits up to
/// [`PipelineConfig::subscribe_wait`] for the bound signal, then
/// queries regardless. The gap between subscription start and snapshot
/// fetch is an accepted structural race; duplicate suppression
/// downstream absorbs the overlap.
pub async fn run_backfill(
    catalog: CatalogClient,
    timeline_id: String,
    facets: Vec<String>,
    queue: mpsc::Sender<QueueMessage>,
    bound: Signal,
    counters: Arc<Counters>,
    config: PipelineConfig,
) {
    info!("backfill task started, waiting for the subscription to bind");
    let acknowledged = bound.wait_timeout(config.subscribe_wait).await;
    if !acknowledged {
        warn!(
            waited_s = config.subscribe_wait.as_secs(),
            "bound signal not observed in time, draining the buffer anyway"
        );
    }

    let mut attempt: u32 = 0;
    let records = loop {
        match catalog.buffered_events(&timeline_id, &facets).await {
            Ok(records) => break records,
            Err(e) => {
                if attempt >= config.backfill_max_retries {
                    warn!(
                        attempt,
                        error = %e,
                        "too many backfill fetch attempts, giving up; \
                         the stream feed continues without backfill"
                    );
                    return;
                }
                attempt += 1;
                warn!(attempt, error = %e, "backfill fetch failed, will retry");
                sleep(config.backfill_retry_backoff).await;
            }
        }
    };

    info!(records = records.len(), attempt, "draining buffered events into the queue");
    for record in records {
        let Some(event_id) = record.get("id").and_then(serde_json::Value::as_str) else {
            warn!("dropping buffered record without an 'id'");
            continue;
        };
        let message = QueueMessage {
            source: Source::Backfill,
            event_id: event_id.to_string(),
            payload: record.clone(),
        };
        if queue.send(message).await.is_err() {
            warn!("queue closed while draining the buffer, stopping backfill");
            return;
        }
        counters.record_queued(Source::Backfill);
    }

    // Best-effort wait for the queue to visibly drain, so the final
    // statistics mostly reflect processed events. A message the
    // consumer holds in flight can still be unaccounted for.
    let started = Instant::now();
    while started.elapsed() < config.drain_wait {
        sleep(config.drain_poll).await;
        if queue.capacity() == queue.max_capacity() {
            sleep(config.drain_poll).await;
            break;
        }
    }

    let snapshot = counters.snapshot();
    info!(
        queued = snapshot.backfill_queued,
        ingested = snapshot.backfill_ingested,
        skipped = snapshot.backfill_skipped,
        quiesce_s = started.elapsed().as_secs(),
        attempt,
        "backfill drain finished"
    );
}
