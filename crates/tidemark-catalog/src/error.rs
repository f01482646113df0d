//! Error taxonomy for catalog access.

use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by the catalog client.
///
/// The split matters to callers: [`CatalogError::Rejected`] is a
/// business-level refusal carried in a 4xx body and must be reported to
/// the user rather than retried; [`CatalogError::Connectivity`] is a
/// transport failure the client does not retry internally;
/// [`CatalogError::Protocol`] is a malformed or unexpected response.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The connection itself failed (DNS, TCP, TLS, request I/O).
    #[error("catalog connection failed: {0}")]
    Connectivity(#[from] TransportError),

    /// A 4xx response carrying a business `status`/`message` body.
    #[error("catalog query rejected: {message} ({status})")]
    Rejected {
        /// Business status value (or the HTTP status when absent).
        status: String,
        /// Human-readable rejection message.
        message: String,
    },

    /// Any other non-success response, or a body that does not match
    /// the wire contract.
    #[error("unexpected catalog response: {0}")]
    Protocol(String),
}
