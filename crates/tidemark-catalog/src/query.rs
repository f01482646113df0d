//! Typed catalog query documents.
//!
//! Provides [`Query`] and [`QueryBuilder`] for constructing the query
//! document sent to `POST /v1/catalog/query`, plus the [`QueryRequest`]
//! envelope the client mutates between pages (batch size, continuation
//! cursor, server timeout hint).

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

/// Sort direction for an order clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    /// Smallest value first.
    Ascending,
    /// Largest value first.
    Descending,
}

/// A single `[field, direction]` order pair, serialized as a two-element
/// array per the wire contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderPair(pub String, pub OrderDirection);

/// Nested order block for document-level fields.
///
/// Order expressions rooted at `document.` sort on projected document
/// fields and live under a separate `documents` key in the query body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentOrder {
    /// Document-level order pairs.
    pub order: Vec<OrderPair>,
}

/// The catalog query document.
///
/// Every field is optional; the server treats an absent field as
/// unconstrained. Build one with [`QueryBuilder`]; the query is
/// constructed once per request sequence and only the client mutates
/// the surrounding [`QueryRequest`] envelope afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Query {
    /// Record class (e.g. `fact`, `reference`, `sysfact`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,

    /// Record type within the class (e.g. `ip-address`, `case`).
    #[serde(skip_serializing_if = "Option::is_none", rename = "type")]
    pub r#type: Option<String>,

    /// Identifier / value filter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Vec<String>>,

    /// Top-level order pairs. Defaults to ordering by `id` so that
    /// pagination is stable.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<OrderPair>,

    /// Document-level order pairs (from `document.*` expressions).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<DocumentOrder>,

    /// Requested facet projections, as `name -> 1` flags.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facets: Option<BTreeMap<String, u8>>,
}

/// Server-side execution hints attached to every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueryHints {
    /// Per-request server-side processing budget, in seconds.
    pub timeout: u64,
}

/// The full request envelope for one page: query document, batch size,
/// hints, and the continuation cursor once one has been returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryRequest {
    /// The query document.
    pub query: Query,
    /// Batch size for this page (`min(remaining, fetch_count)`).
    pub limit: u64,
    /// Execution hints.
    pub hints: QueryHints,
    /// Continuation cursor from the previous page's `ellipsis`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume: Option<String>,
}

/// Error raised while parsing an order expression.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderParseError {
    /// The expression did not match `[+-]?field(.field)*`.
    #[error("invalid order expression '{0}'")]
    Invalid(String),

    /// Nested sort fields are only supported under `document`.
    #[error(
        "sorting fields under '{0}' is not supported; \
         top-level fields and fields under 'document' can be sorted"
    )]
    UnsupportedParent(String),
}

/// Builder for [`Query`].
///
/// ```
/// use tidemark_catalog::query::QueryBuilder;
///
/// let query = QueryBuilder::new()
///     .class("fact")
///     .r#type("ip-address")
///     .ids(["10.0.0.1"])
///     .facet("display")
///     .build();
/// assert_eq!(query.class.as_deref(), Some("fact"));
/// ```
#[derive(Debug, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the record class.
    #[must_use]
    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.query.class = Some(class.into());
        self
    }

    /// Sets the record type.
    #[must_use]
    pub fn r#type(mut self, r#type: impl Into<String>) -> Self {
        self.query.r#type = Some(r#type.into());
        self
    }

    /// Sets the identifier filter.
    #[must_use]
    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query.id = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a requested facet projection.
    #[must_use]
    pub fn facet(mut self, name: impl Into<String>) -> Self {
        self.query
            .facets
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), 1);
        self
    }

    /// Adds an order clause from a dot-notation expression.
    ///
    /// | Expression              | Placement                                  |
    /// |-------------------------|--------------------------------------------|
    /// | `id`                    | `order: [["id", "ascending"]]`             |
    /// | `+document.description` | `documents.order: [["description", ...]]`  |
    /// | `-document.match.type`  | `documents.order: [["match.type", ...]]`   |
    ///
    /// # Errors
    ///
    /// Returns [`OrderParseError`] for malformed expressions or nested
    /// fields whose parent is not `document`.
    pub fn order(mut self, expression: &str) -> Result<Self, OrderParseError> {
        let (direction, field) = split_order_expression(expression)?;
        let mut parts: Vec<&str> = field.split('.').collect();
        if parts.len() > 1 {
            let parent = parts.remove(0);
            if parent != "document" {
                return Err(OrderParseError::UnsupportedParent(parent.to_string()));
            }
            self.query
                .documents
                .get_or_insert_with(DocumentOrder::default)
                .order
                .push(OrderPair(parts.join("."), direction));
        } else {
            self.query.order.push(OrderPair(field.to_string(), direction));
        }
        Ok(self)
    }

    /// Finalizes the query. When no top-level or document order was
    /// given, orders by `id` so pagination stays stable across pages.
    #[must_use]
    pub fn build(mut self) -> Query {
        if self.query.order.is_empty() && self.query.documents.is_none() {
            self.query
                .order
                .push(OrderPair("id".to_string(), OrderDirection::Ascending));
        }
        self.query
    }
}

/// Splits a `[+-]?field(.field)*` expression into direction and field.
fn split_order_expression(expression: &str) -> Result<(OrderDirection, &str), OrderParseError> {
    let (direction, field) = match expression.as_bytes().first() {
        Some(b'-') => (OrderDirection::Descending, &expression[1..]),
        Some(b'+') => (OrderDirection::Ascending, &expression[1..]),
        _ => (OrderDirection::Ascending, expression),
    };
    let valid = !field.is_empty()
        && field.split('.').all(|part| {
            !part.is_empty()
                && part
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
        });
    if !valid {
        return Err(OrderParseError::Invalid(expression.to_string()));
    }
    Ok((direction, field))
}
