//! HTTP transport seam for the catalog client.
//!
//! [`QueryTransport`] abstracts the two remote endpoints the client
//! talks to, so pagination and error-handling logic can be exercised
//! against scripted transports in tests. [`HttpTransport`] is the
//! production implementation backed by `reqwest`.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::profile::{Credentials, ServerProfile};
use crate::query::QueryRequest;

/// User agent sent on every request.
const USER_AGENT: &str = concat!("tidemark/", env!("CARGO_PKG_VERSION"));

/// Status code + parsed JSON body of one response.
///
/// The transport does not interpret the status; the client owns the
/// business-rejection / protocol-error split.
#[derive(Debug, Clone)]
pub struct TransportReply {
    /// HTTP status code.
    pub status: u16,
    /// Parsed response body. `Value::Null` when the body was empty or
    /// not valid JSON.
    pub body: Value,
}

impl TransportReply {
    /// Whether the status code is in the 2xx range.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport-level failure: the request never produced an HTTP response.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    /// Creates a transport error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The two remote operations the catalog client performs.
#[async_trait]
pub trait QueryTransport: Send + Sync {
    /// Executes one page of `POST /v1/catalog/query`.
    async fn query(&self, request: &QueryRequest) -> Result<TransportReply, TransportError>;

    /// Fetches the buffered-event snapshot:
    /// `GET /v1/timeline/{id}/event?facets.<name>=1`.
    async fn buffered_events(
        &self,
        timeline_id: &str,
        facets: &[String],
    ) -> Result<TransportReply, TransportError>;
}

/// Production transport over `reqwest`.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl HttpTransport {
    /// Builds a transport from a server profile.
    ///
    /// `verify = false` disables TLS certificate validation for this
    /// client and logs that fact once.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the HTTP client cannot be built.
    pub fn new(profile: &ServerProfile) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if !profile.verify {
            info!(url = %profile.base_url(), "TLS certificate validation disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder
            .build()
            .map_err(|e| TransportError::new(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            base_url: profile.base_url().to_string(),
            credentials: profile.credentials(),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Credentials::Token(token) => {
                request.header(reqwest::header::AUTHORIZATION, format!("Quoken {token}"))
            }
            Credentials::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<TransportReply, TransportError> {
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::new(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok(TransportReply { status, body })
    }
}

#[async_trait]
impl QueryTransport for HttpTransport {
    async fn query(&self, request: &QueryRequest) -> Result<TransportReply, TransportError> {
        let url = format!("{}/v1/catalog/query", self.base_url);
        let builder = self.authorize(self.http.post(&url).json(request));
        self.send(builder).await
    }

    async fn buffered_events(
        &self,
        timeline_id: &str,
        facets: &[String],
    ) -> Result<TransportReply, TransportError> {
        let url = format!("{}/v1/timeline/{timeline_id}/event", self.base_url);
        let flags: Vec<(String, u8)> = facets
            .iter()
            .map(|facet| (format!("facets.{facet}"), 1))
            .collect();
        let builder = self.authorize(self.http.get(&url).query(&flags));
        self.send(builder).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::TOKEN_USERNAME;

    fn profile(username: &str, verify: bool) -> ServerProfile {
        ServerProfile {
            url: "https://quo.example.com".to_string(),
            username: username.to_string(),
            secret: "tok".to_string(),
            verify,
            max_batch_size: 100,
            max_execution_time: 30,
        }
    }

    #[test]
    fn test_build_with_verify_disabled() {
        assert!(HttpTransport::new(&profile("u", false)).is_ok());
    }

    #[test]
    fn test_build_token_profile() {
        let transport = HttpTransport::new(&profile(TOKEN_USERNAME, true)).unwrap();
        assert_eq!(transport.credentials, Credentials::Token("tok".to_string()));
    }

    #[test]
    fn test_reply_success_range() {
        let ok = TransportReply {
            status: 204,
            body: Value::Null,
        };
        let reject = TransportReply {
            status: 422,
            body: Value::Null,
        };
        assert!(ok.is_success());
        assert!(!reject.is_success());
    }
}
