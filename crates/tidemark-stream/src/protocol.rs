//! Subscription wire protocol.
//!
//! The bind handshake attaches the subscriber to a named feed; inbound
//! push messages are dispatched by their `name` field. Components
//! downstream of the client never see raw socket frames — they receive
//! tagged [`StreamEvent`] variants over a channel.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Namespace of the activity feed.
const ATTACH_NS: &str = "activity-stream";

/// Attachment target of a bind request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindAttach {
    /// Feed namespace (always `activity-stream`).
    pub ns: &'static str,
    /// Feed element name (always `event`).
    pub name: &'static str,
    /// The timeline id to attach to.
    pub cid: String,
}

/// Requested record composition for pushed events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindComposition {
    /// Catalog projection settings.
    pub catalog: BindCatalog,
}

/// Catalog projection block of the bind body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindCatalog {
    /// Requested facets, as `name -> true` flags.
    pub facets: BTreeMap<String, bool>,
    /// Object projection mode.
    pub object: &'static str,
}

/// Body of a bind request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindBody {
    /// Requested composition.
    pub composition: BindComposition,
}

/// The bind handshake sent once after the socket opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindRequest {
    /// Attachment target.
    pub attach: BindAttach,
    /// Requested composition.
    pub body: BindBody,
    /// Correlation id: `activity-stream-event-<timeline>`.
    pub cid: String,
    /// Message name (always `bind`).
    pub name: &'static str,
    /// Message namespace (always `link/binding`).
    pub ns: &'static str,
}

impl BindRequest {
    /// Builds the handshake for a timeline and facet set.
    #[must_use]
    pub fn new(timeline_id: &str, facets: &[String]) -> Self {
        Self {
            attach: BindAttach {
                ns: ATTACH_NS,
                name: "event",
                cid: timeline_id.to_string(),
            },
            body: BindBody {
                composition: BindComposition {
                    catalog: BindCatalog {
                        facets: facets.iter().map(|f| (f.clone(), true)).collect(),
                        object: "object",
                    },
                },
            },
            cid: format!("{ATTACH_NS}-event-{timeline_id}"),
            name: "bind",
            ns: "link/binding",
        }
    }
}

/// An inbound push message, dispatched by `name`.
///
/// Names other than `event` and `bound` are logged and dropped by the
/// client, so this type keeps the name as data rather than failing to
/// parse unknown variants.
#[derive(Debug, Clone, Deserialize)]
pub struct PushMessage {
    /// Message name (`event`, `bound`, ...).
    pub name: String,
    /// Correlation id, present on `bound` acknowledgments.
    #[serde(default)]
    pub cid: Option<String>,
    /// Message body; for `event` this is the event document.
    #[serde(default)]
    pub body: Option<Value>,
}

/// Lifecycle and data events delivered to the subscription's consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A pushed activity event; `body` is the event document.
    Event {
        /// The event document (its `id` field is the event identifier).
        body: Value,
    },
    /// The bind handshake was acknowledged.
    Bound {
        /// Correlation id echoed by the server.
        cid: Option<String>,
    },
    /// A transport error occurred (non-fatal by itself).
    Error {
        /// Error description.
        message: String,
    },
    /// The socket closed; the subscription is over.
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bind_request_wire_shape() {
        let request = BindRequest::new("feed-91", &["display".to_string(), "tagged".to_string()]);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            json!({
                "attach": {"ns": "activity-stream", "name": "event", "cid": "feed-91"},
                "body": {"composition": {"catalog": {
                    "facets": {"display": true, "tagged": true},
                    "object": "object"
                }}},
                "cid": "activity-stream-event-feed-91",
                "name": "bind",
                "ns": "link/binding"
            })
        );
    }

    #[test]
    fn test_bind_request_empty_facets() {
        let request = BindRequest::new("t", &[]);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["body"]["composition"]["catalog"]["facets"], json!({}));
    }

    #[test]
    fn test_push_message_event() {
        let msg: PushMessage =
            serde_json::from_str(r#"{"name": "event", "body": {"id": "e-1", "type": "case"}}"#)
                .unwrap();
        assert_eq!(msg.name, "event");
        assert_eq!(msg.body.unwrap()["id"], "e-1");
    }

    #[test]
    fn test_push_message_bound() {
        let msg: PushMessage =
            serde_json::from_str(r#"{"name": "bound", "cid": "activity-stream-event-t1"}"#)
                .unwrap();
        assert_eq!(msg.name, "bound");
        assert_eq!(msg.cid.as_deref(), Some("activity-stream-event-t1"));
        assert!(msg.body.is_none());
    }

    #[test]
    fn test_push_message_unknown_name_still_parses() {
        let msg: PushMessage =
            serde_json::from_str(r#"{"name": "stats", "body": {"rate": 10}}"#).unwrap();
        assert_eq!(msg.name, "stats");
    }
}
