//! Paginated, time-budgeted catalog query execution.
//!
//! [`CatalogClient::query`] returns [`QueryRows`], a lazy, finite,
//! non-restartable row sequence. Each page request sets its batch size
//! to `min(remaining_limit, fetch_count)` and carries the server-side
//! timeout hint; the whole iteration stops at the row limit, when the
//! continuation cursor runs out, or when the wall-clock budget
//! (`10 × timeout`) is exhausted.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::CatalogError;
use crate::profile::ServerProfile;
use crate::query::{Query, QueryHints, QueryRequest};
use crate::transport::{HttpTransport, QueryTransport, TransportReply};

/// Total wall-clock budget as a multiple of the per-request timeout.
const BUDGET_FACTOR: u32 = 10;

/// Client for the remote catalog service.
#[derive(Clone)]
pub struct CatalogClient {
    transport: Arc<dyn QueryTransport>,
    fetch_count: u64,
    timeout: Duration,
}

impl CatalogClient {
    /// Builds a client for the given server profile, using HTTP
    /// transport with the profile's credentials, fetch count, and
    /// per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Connectivity`] if the HTTP client cannot
    /// be constructed.
    pub fn new(profile: &ServerProfile) -> Result<Self, CatalogError> {
        let transport = HttpTransport::new(profile)?;
        Ok(Self {
            transport: Arc::new(transport),
            fetch_count: profile.max_batch_size.max(1),
            timeout: Duration::from_secs(profile.max_execution_time.max(1)),
        })
    }

    /// Builds a client over an explicit transport (test seam).
    #[must_use]
    pub fn with_transport(
        transport: Arc<dyn QueryTransport>,
        fetch_count: u64,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            fetch_count: fetch_count.max(1),
            timeout,
        }
    }

    /// Starts a paginated query yielding at most `limit` records.
    ///
    /// The returned sequence is finite and cannot be restarted; build a
    /// fresh [`Query`] to run it again.
    #[must_use]
    pub fn query(&self, query: Query, limit: u64) -> QueryRows {
        let started = Instant::now();
        QueryRows {
            transport: Arc::clone(&self.transport),
            query,
            limit,
            fetch_count: self.fetch_count,
            timeout: self.timeout,
            deadline: started + self.timeout * BUDGET_FACTOR,
            started,
            cursor: None,
            buffered: VecDeque::new(),
            yielded: 0,
            http_calls: 0,
            exhausted: false,
        }
    }

    /// Fetches the full buffered-event snapshot for a timeline.
    ///
    /// No pagination cursor is expected on this endpoint; the server
    /// returns everything currently buffered in one response.
    ///
    /// # Errors
    ///
    /// [`CatalogError::Connectivity`] on transport failure and
    /// [`CatalogError::Protocol`] when the response is non-success or
    /// its `status` field is not `"OK"`.
    pub async fn buffered_events(
        &self,
        timeline_id: &str,
        facets: &[String],
    ) -> Result<Vec<Value>, CatalogError> {
        let reply = self.transport.buffered_events(timeline_id, facets).await?;
        if !reply.is_success() {
            return Err(CatalogError::Protocol(format!(
                "buffered-event fetch returned status {}",
                reply.status
            )));
        }
        match reply.body.get("status").and_then(Value::as_str) {
            Some("OK") => {}
            other => {
                return Err(CatalogError::Protocol(format!(
                    "buffered-event fetch returned body status {other:?}"
                )));
            }
        }
        let records = reply
            .body
            .get("records")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(records)
    }
}

impl std::fmt::Debug for CatalogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogClient")
            .field("fetch_count", &self.fetch_count)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Lazy row sequence produced by [`CatalogClient::query`].
///
/// Rows are emitted as they arrive; at most one page is buffered.
pub struct QueryRows {
    transport: Arc<dyn QueryTransport>,
    query: Query,
    limit: u64,
    fetch_count: u64,
    timeout: Duration,
    deadline: Instant,
    started: Instant,
    cursor: Option<String>,
    buffered: VecDeque<Value>,
    yielded: u64,
    http_calls: u64,
    exhausted: bool,
}

impl QueryRows {
    /// Returns the next record, fetching the next page when the current
    /// one is drained.
    ///
    /// # Errors
    ///
    /// [`CatalogError::Rejected`] for a 4xx business rejection,
    /// [`CatalogError::Protocol`] for any other unexpected response,
    /// and [`CatalogError::Connectivity`] when the connection fails.
    /// All three terminate the sequence.
    pub async fn try_next(&mut self) -> Result<Option<Value>, CatalogError> {
        loop {
            if let Some(record) = self.buffered.pop_front() {
                self.yielded += 1;
                if self.yielded >= self.limit {
                    self.finish();
                }
                return Ok(Some(record));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    /// Number of HTTP calls issued so far.
    #[must_use]
    pub fn http_calls(&self) -> u64 {
        self.http_calls
    }

    async fn fetch_page(&mut self) -> Result<(), CatalogError> {
        let remaining = self.limit.saturating_sub(self.yielded);
        if remaining == 0 {
            self.finish();
            return Ok(());
        }
        let request = QueryRequest {
            query: self.query.clone(),
            limit: remaining.min(self.fetch_count),
            hints: QueryHints {
                timeout: self.timeout.as_secs(),
            },
            resume: self.cursor.take(),
        };
        debug!(
            limit = request.limit,
            resume = request.resume.is_some(),
            "sending catalog query page"
        );

        let reply = match self.transport.query(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                self.exhausted = true;
                return Err(e.into());
            }
        };
        self.http_calls += 1;
        self.handle_reply(reply, remaining)
    }

    fn handle_reply(&mut self, reply: TransportReply, remaining: u64) -> Result<(), CatalogError> {
        // A 4xx body carrying status/message is a business-level
        // rejection, reported instead of retried.
        if (400..500).contains(&reply.status) {
            let status = reply.body.get("status");
            let message = reply.body.get("message");
            if status.is_some() || message.is_some() {
                self.exhausted = true;
                return Err(CatalogError::Rejected {
                    status: status
                        .map(render_scalar)
                        .unwrap_or_else(|| reply.status.to_string()),
                    message: message.map(render_scalar).unwrap_or_default(),
                });
            }
        }
        if !reply.is_success() {
            self.exhausted = true;
            return Err(CatalogError::Protocol(format!(
                "catalog query returned status {}",
                reply.status
            )));
        }

        let records = reply
            .body
            .get("records")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                self.exhausted = true;
                CatalogError::Protocol("catalog query response lacks 'records'".to_string())
            })?;
        #[allow(clippy::cast_possible_truncation)]
        self.buffered
            .extend(records.iter().take(remaining as usize).cloned());

        self.cursor = reply
            .body
            .get("ellipsis")
            .and_then(Value::as_str)
            .map(ToString::to_string);

        if Instant::now() > self.deadline {
            if self.cursor.is_some() {
                warn!(
                    elapsed_s = self.started.elapsed().as_secs(),
                    budget_s = (self.timeout * BUDGET_FACTOR).as_secs(),
                    "aborting catalog query: wall-clock budget exhausted"
                );
            }
            self.finish();
        } else if self.cursor.is_none() {
            self.finish();
        }
        Ok(())
    }

    fn finish(&mut self) {
        if !self.exhausted {
            self.exhausted = true;
            info!(
                http_calls = self.http_calls,
                limit = self.limit,
                per_request_limit = self.fetch_count,
                elapsed_ms = self.started.elapsed().as_millis() as u64,
                "catalog query finished"
            );
        }
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
