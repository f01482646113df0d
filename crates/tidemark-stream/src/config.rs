//! Stream client configuration.

use std::time::Duration;

/// Default bounded setup-acknowledgment wait.
const fn default_setup_timeout() -> Duration {
    Duration::from_secs(15)
}

/// Default capacity of the outbound event channel.
const fn default_channel_capacity() -> usize {
    1024
}

/// Authentication for the socket upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamAuth {
    /// Custom bearer scheme: `Authorization: Quoken <token>`.
    Token(String),
    /// HTTP basic authentication.
    Basic {
        /// Account name.
        username: String,
        /// Account password.
        password: String,
    },
}

/// Configuration for one socket subscription.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Service base URL; `http(s)` schemes are rewritten to `ws(s)` and
    /// the socket path is appended.
    pub url: String,
    /// The timeline to bind to.
    pub timeline_id: String,
    /// Facets requested in the bind handshake.
    pub facets: Vec<String>,
    /// Optional authentication for the upgrade request.
    pub auth: Option<StreamAuth>,
    /// Whether to verify TLS certificates.
    pub verify: bool,
    /// Bounded wait for the `bound` acknowledgment; exceeding it fails
    /// setup fatally.
    pub setup_timeout: Duration,
    /// Capacity of the outbound [`crate::StreamEvent`] channel. A full
    /// channel blocks the socket read loop (backpressure).
    pub channel_capacity: usize,
}

impl StreamConfig {
    /// Creates a configuration with default facets (`display`), setup
    /// timeout, and channel capacity.
    #[must_use]
    pub fn new(url: impl Into<String>, timeline_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeline_id: timeline_id.into(),
            facets: vec!["display".to_string()],
            auth: None,
            verify: true,
            setup_timeout: default_setup_timeout(),
            channel_capacity: default_channel_capacity(),
        }
    }

    /// Replaces the requested facet set.
    #[must_use]
    pub fn facets<I, S>(mut self, facets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.facets = facets.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the authentication used for the upgrade request.
    #[must_use]
    pub fn auth(mut self, auth: StreamAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Overrides the setup-acknowledgment timeout.
    #[must_use]
    pub fn setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }
}
