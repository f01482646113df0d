//! Ingestion counters.
//!
//! Relaxed atomic tallies shared between producer tasks and the
//! consumer. Approximate under concurrency by contract — used for
//! stats logging only, never for dedup correctness.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::message::Source;

/// Named tallies for one pipeline run.
#[derive(Debug, Default)]
pub struct Counters {
    /// Events enqueued by the backfill drain.
    pub backfill_queued: AtomicU64,
    /// Backfill events delivered to the sink.
    pub backfill_ingested: AtomicU64,
    /// Backfill events discarded as duplicates.
    pub backfill_skipped: AtomicU64,
    /// Events enqueued from the live subscription.
    pub stream_queued: AtomicU64,
    /// Subscription events delivered to the sink.
    pub stream_ingested: AtomicU64,
    /// Subscription events discarded as duplicates.
    pub stream_skipped: AtomicU64,
    /// Total events delivered to the sink.
    pub events_ingested: AtomicU64,
}

impl Counters {
    /// Records a message enqueued by `source`.
    pub fn record_queued(&self, source: Source) {
        match source {
            Source::Backfill => &self.backfill_queued,
            Source::Stream => &self.stream_queued,
        }
        .fetch_add(1, Ordering::Relaxed);
    }

    /// Records a delivery from `source`.
    pub fn record_ingested(&self, source: Source) {
        match source {
            Source::Backfill => &self.backfill_ingested,
            Source::Stream => &self.stream_ingested,
        }
        .fetch_add(1, Ordering::Relaxed);
        self.events_ingested.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a duplicate discarded from `source`.
    pub fn record_skipped(&self, source: Source) {
        match source {
            Source::Backfill => &self.backfill_skipped,
            Source::Stream => &self.stream_skipped,
        }
        .fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time snapshot of all tallies.
    #[must_use]
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            backfill_queued: self.backfill_queued.load(Ordering::Relaxed),
            backfill_ingested: self.backfill_ingested.load(Ordering::Relaxed),
            backfill_skipped: self.backfill_skipped.load(Ordering::Relaxed),
            stream_queued: self.stream_queued.load(Ordering::Relaxed),
            stream_ingested: self.stream_ingested.load(Ordering::Relaxed),
            stream_skipped: self.stream_skipped.load(Ordering::Relaxed),
            events_ingested: self.events_ingested.load(Ordering::Relaxed),
        }
    }
}

/// Frozen counter values, rendered `key=value` in stats logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    /// Events enqueued by the backfill drain.
    pub backfill_queued: u64,
    /// Backfill events delivered to the sink.
    pub backfill_ingested: u64,
    /// Backfill events discarded as duplicates.
    pub backfill_skipped: u64,
    /// Events enqueued from the live subscription.
    pub stream_queued: u64,
    /// Subscription events delivered to the sink.
    pub stream_ingested: u64,
    /// Subscription events discarded as duplicates.
    pub stream_skipped: u64,
    /// Total events delivered to the sink.
    pub events_ingested: u64,
}

impl CountersSnapshot {
    /// Total duplicates discarded across both feeds.
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.backfill_skipped + self.stream_skipped
    }
}

impl std::fmt::Display for CountersSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "backfill_queued={} backfill_ingested={} backfill_skipped={} \
             stream_queued={} stream_ingested={} stream_skipped={} events_ingested={}",
            self.backfill_queued,
            self.backfill_ingested,
            self.backfill_skipped,
            self.stream_queued,
            self.stream_ingested,
            self.stream_skipped,
            self.events_ingested
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_paths() {
        let counters = Counters::default();
        counters.record_queued(Source::Backfill);
        counters.record_ingested(Source::Backfill);
        counters.record_queued(Source::Stream);
        counters.record_skipped(Source::Stream);

        let snap = counters.snapshot();
        assert_eq!(snap.backfill_queued, 1);
        assert_eq!(snap.backfill_ingested, 1);
        assert_eq!(snap.stream_queued, 1);
        assert_eq!(snap.stream_skipped, 1);
        assert_eq!(snap.events_ingested, 1);
        assert_eq!(snap.skipped(), 1);
    }

    #[test]
    fn test_kv_rendering() {
        let counters = Counters::default();
        counters.record_ingested(Source::Stream);
        let rendered = counters.snapshot().to_string();
        assert!(rendered.contains("stream_ingested=1"));
        assert!(rendered.contains("events_ingested=1"));
        assert!(rendered.contains("backfill_skipped=0"));
    }
}
