//! End-to-end pipeline runs against a loopback feed server: duplicate
//! suppression across both feeds, restart resume, maintenance on a
//! silent feed, and failure semantics.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tungstenite::Message;

use tidemark_catalog::{
    CatalogClient, QueryRequest, QueryTransport, ServerProfile, TransportError, TransportReply,
};
use tidemark_ingest::testing::{CollectingSink, FailingSink, MemoryCheckpointStore};
use tidemark_ingest::{
    CheckpointState, Pipeline, PipelineBuilder, PipelineConfig, PipelineError, ShutdownReason,
    Source,
};
use tidemark_stream::{Signal, StreamError};

// ---------------------------------------------------------------------------
// Doubles
// ---------------------------------------------------------------------------

/// Catalog transport serving one scripted buffered-event snapshot.
struct SnapshotTransport {
    records: Mutex<Vec<Value>>,
    calls: AtomicU32,
}

impl SnapshotTransport {
    fn with_ids(ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(ids.iter().map(|id| json!({"id": id})).collect()),
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryTransport for SnapshotTransport {
    async fn query(&self, _request: &QueryRequest) -> Result<TransportReply, TransportError> {
        Err(TransportError::new("not used in this test"))
    }

    async fn buffered_events(
        &self,
        _timeline_id: &str,
        _facets: &[String],
    ) -> Result<TransportReply, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let records = self.records.lock().unwrap().clone();
        Ok(TransportReply {
            status: 200,
            body: json!({"status": "OK", "records": records}),
        })
    }
}

// ---------------------------------------------------------------------------
// Loopback feed server
// ---------------------------------------------------------------------------

/// Accepts one subscriber, acknowledges the bind, pushes `event_ids`,
/// holds the socket open for `hold_open`, then closes.
async fn spawn_feed_server(
    event_ids: Vec<&'static str>,
    hold_open: Duration,
) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let _bind = ws.next().await.unwrap().unwrap();
        ws.send(Message::text(json!({"name": "bound"}).to_string()))
            .await
            .unwrap();
        for id in event_ids {
            ws.send(Message::text(
                json!({"name": "event", "body": {"id": id}}).to_string(),
            ))
            .await
            .unwrap();
        }
        tokio::time::sleep(hold_open).await;
        let _ = ws.close(None).await;
    });

    (url, handle)
}

fn profile(url: &str) -> ServerProfile {
    ServerProfile {
        url: url.to_string(),
        username: "<TOKEN>".to_string(),
        secret: "tok".to_string(),
        verify: true,
        max_batch_size: 100,
        max_execution_time: 30,
    }
}

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        maintenance_interval: Duration::from_millis(100),
        subscribe_wait: Duration::from_secs(5),
        drain_wait: Duration::from_millis(300),
        drain_poll: Duration::from_millis(10),
        setup_timeout: Duration::from_secs(5),
        backfill_retry_backoff: Duration::from_millis(10),
        ..PipelineConfig::default()
    }
}

fn catalog(transport: Arc<SnapshotTransport>) -> CatalogClient {
    CatalogClient::with_transport(transport, 100, Duration::from_secs(30))
}

fn builder(
    url: &str,
    sink: Arc<CollectingSink>,
    store: MemoryCheckpointStore,
) -> PipelineBuilder {
    PipelineBuilder::new(profile(url), "feed-1", sink, Box::new(store)).config(fast_config())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicates_across_feeds_and_restarts_are_suppressed() {
    // Prior state knows e-0; the snapshot replays e-0 plus e-1/e-2; the
    // live feed pushes e-2 again plus e-3. Exactly e-1, e-2, e-3 may
    // reach the sink, each once.
    let (url, server) = spawn_feed_server(vec!["e-2", "e-3"], Duration::from_millis(700)).await;
    let transport = SnapshotTransport::with_ids(&["e-0", "e-1", "e-2"]);
    let sink = CollectingSink::new();
    let store = MemoryCheckpointStore::with_state(CheckpointState {
        known_event_ids: vec!["e-0".to_string()],
        cursor: None,
    });
    let stored = store.clone();

    let summary = builder(&url, Arc::clone(&sink), store)
        .catalog_client(catalog(Arc::clone(&transport)))
        .build()
        .run()
        .await
        .unwrap();
    server.await.unwrap();

    let delivered = sink.delivered();
    let mut ids: Vec<String> = delivered
        .iter()
        .map(|r| r.payload["id"].as_str().unwrap().to_string())
        .collect();

    // Exactly one delivery per unique id, sequences strictly ordered.
    assert_eq!(delivered.len(), 3, "delivered: {ids:?}");
    let sequences: Vec<u64> = delivered.iter().map(|r| r.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    ids.sort();
    assert_eq!(ids, vec!["e-1", "e-2", "e-3"]);

    // e-0 was skipped from history, the duplicate e-2 from whichever
    // feed arrived second.
    assert_eq!(summary.counters.events_ingested, 3);
    assert_eq!(summary.counters.skipped(), 2);
    assert!(matches!(
        summary.reason,
        ShutdownReason::SocketClosed | ShutdownReason::FeedsExhausted
    ));
    assert_eq!(transport.calls(), 1);

    // The final flush persisted the full history.
    let mut persisted = stored.stored().unwrap().known_event_ids;
    persisted.sort();
    assert_eq!(persisted, vec!["e-0", "e-1", "e-2", "e-3"]);
}

#[tokio::test]
async fn restart_resumes_from_persisted_checkpoint() {
    let store = MemoryCheckpointStore::default();

    // First run: fresh start with backfill enabled, snapshot has e-1.
    let (url, server) = spawn_feed_server(vec!["e-2"], Duration::from_millis(500)).await;
    let sink = CollectingSink::new();
    builder(&url, Arc::clone(&sink), store.clone())
        .backfill(true)
        .catalog_client(catalog(SnapshotTransport::with_ids(&["e-1"])))
        .build()
        .run()
        .await
        .unwrap();
    server.await.unwrap();
    assert_eq!(sink.delivered().len(), 2);

    // Second run: the server replays e-1/e-2 (still buffered remotely)
    // and pushes e-3. Only e-3 is new.
    let (url, server) = spawn_feed_server(vec!["e-3"], Duration::from_millis(500)).await;
    let sink = CollectingSink::new();
    let summary = builder(&url, Arc::clone(&sink), store.clone())
        .catalog_client(catalog(SnapshotTransport::with_ids(&["e-1", "e-2"])))
        .build()
        .run()
        .await
        .unwrap();
    server.await.unwrap();

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].payload["id"], "e-3");
    assert_eq!(delivered[0].source, Source::Stream);
    assert_eq!(summary.counters.skipped(), 2);
}

#[tokio::test]
async fn first_run_without_backfill_skips_the_drain() {
    let (url, server) = spawn_feed_server(vec!["e-1"], Duration::from_millis(300)).await;
    let transport = SnapshotTransport::with_ids(&["stale-1", "stale-2"]);
    let sink = CollectingSink::new();

    builder(&url, Arc::clone(&sink), MemoryCheckpointStore::default())
        .backfill(false)
        .catalog_client(catalog(Arc::clone(&transport)))
        .build()
        .run()
        .await
        .unwrap();
    server.await.unwrap();

    assert_eq!(transport.calls(), 0, "the buffer must not be queried");
    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].payload["id"], "e-1");
}

#[tokio::test]
async fn silent_feed_runs_maintenance_via_dequeue_timeout() {
    // No events at all: pruning of oversized prior history proves the
    // maintenance path fired through the dequeue timeout.
    let (url, server) = spawn_feed_server(vec![], Duration::from_secs(30)).await;
    let sink = CollectingSink::new();
    let store = MemoryCheckpointStore::with_state(CheckpointState {
        known_event_ids: (0..6).map(|i| format!("old-{i}")).collect(),
        cursor: None,
    });
    let stored = store.clone();
    let shutdown = Signal::new();

    let mut config = fast_config();
    config.maintenance_interval = Duration::from_millis(50);
    config.history_size = 3;

    let transport = SnapshotTransport::with_ids(&[]);
    let pipeline: Pipeline = builder(&url, Arc::clone(&sink), store)
        .config(config)
        .catalog_client(catalog(transport))
        .shutdown_signal(shutdown.clone())
        .build();
    let run = tokio::spawn(pipeline.run());

    tokio::time::sleep(Duration::from_millis(400)).await;
    shutdown.set();
    let summary = run.await.unwrap().unwrap();

    assert_eq!(summary.reason, ShutdownReason::Cancelled);
    assert!(sink.delivered().is_empty());
    // Pruned to the most recent three ids and flushed on exit.
    assert_eq!(
        stored.stored().unwrap().known_event_ids,
        vec!["old-3", "old-4", "old-5"]
    );

    server.abort();
}

#[tokio::test]
async fn sink_failure_is_fatal_for_the_consumer() {
    let (url, server) = spawn_feed_server(vec!["e-1"], Duration::from_secs(30)).await;

    let err = PipelineBuilder::new(
        profile(&url),
        "feed-1",
        Arc::new(FailingSink),
        Box::new(MemoryCheckpointStore::default()),
    )
    .config(fast_config())
    .build()
    .run()
    .await
    .unwrap_err();

    assert!(matches!(err, PipelineError::Sink(_)));
    server.abort();
}

#[tokio::test]
async fn missing_bound_acknowledgment_aborts_startup() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        // Read the bind but never acknowledge it.
        let _ = ws.next().await;
        let _ = ws.next().await;
    });

    let mut config = fast_config();
    config.setup_timeout = Duration::from_millis(200);

    let err = PipelineBuilder::new(
        profile(&url),
        "feed-1",
        CollectingSink::new(),
        Box::new(MemoryCheckpointStore::default()),
    )
    .config(config)
    .build()
    .run()
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Stream(StreamError::SetupTimeout { .. })
    ));
    server.abort();
}
