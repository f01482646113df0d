//! # Tidemark Catalog Client
//!
//! Client for the remote catalog/graph service: a typed query builder,
//! a paginated and time-budgeted query executor, and the buffered-event
//! snapshot fetch used for backfill.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod client;
pub mod error;
pub mod profile;
pub mod query;
pub mod transport;

pub use client::{CatalogClient, QueryRows};
pub use error::CatalogError;
pub use profile::{Credentials, ServerProfile};
pub use query::{OrderDirection, Query, QueryBuilder, QueryRequest};
pub use transport::{HttpTransport, QueryTransport, TransportError, TransportReply};
