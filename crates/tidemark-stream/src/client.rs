//! Socket subscription client.
//!
//! [`StreamClient::connect`] establishes the socket, sends the bind
//! handshake, and spawns the read loop. Inbound frames are dispatched
//! by message name and delivered as [`StreamEvent`]s over a bounded
//! channel; a full channel blocks the read loop, so TCP backpressure
//! propagates to the sender. The socket is never reconnected — closure
//! sets the shared done signal and ends the subscription.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use tungstenite::handshake::client::Request;
use tungstenite::Message;
use url::Url;

use crate::config::{StreamAuth, StreamConfig};
use crate::protocol::{BindRequest, PushMessage, StreamEvent};
use crate::signal::Signal;
use crate::state::ClientState;
use crate::StreamError;

/// A live subscription to one timeline's activity feed.
pub struct StreamClient {
    events: mpsc::Receiver<StreamEvent>,
    bound: Signal,
    done: Signal,
    state: watch::Receiver<ClientState>,
    reader: JoinHandle<()>,
}

impl StreamClient {
    /// Connects, sends the bind handshake, and waits (bounded) for the
    /// server's `bound` acknowledgment.
    ///
    /// # Errors
    ///
    /// [`StreamError::InvalidUrl`] for an unusable profile URL,
    /// [`StreamError::Connect`] when the socket cannot be established
    /// or closes before binding, and [`StreamError::SetupTimeout`] when
    /// the acknowledgment does not arrive within
    /// [`StreamConfig::setup_timeout`]. All are fatal for startup.
    pub async fn connect(config: StreamConfig) -> Result<Self, StreamError> {
        let url = socket_url(&config.url)?;
        if !config.verify && url.scheme() == "wss" {
            // The socket stack keeps certificate validation on; only
            // the HTTP client honors a relaxed trust setting.
            warn!(url = %url, "verify=false is not applied to the subscription socket");
        }
        let request = build_request(&url, config.auth.as_ref())?;

        let (state_tx, state_rx) = watch::channel(ClientState::Connecting);
        info!(url = %url, timeline = %config.timeline_id, "connecting to activity stream socket");
        let (socket, _response) = connect_async(request).await.map_err(|e| {
            state_tx.send_replace(ClientState::Error);
            StreamError::Connect(e.to_string())
        })?;
        state_tx.send_replace(ClientState::Open);

        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity.max(1));
        let bound = Signal::new();
        let done = Signal::new();
        let setup_timeout = config.setup_timeout;

        let reader = tokio::spawn(read_loop(
            socket,
            config,
            events_tx,
            bound.clone(),
            done.clone(),
            state_tx,
        ));

        // Bounded setup wait: the subscription is not usable until the
        // server acknowledges the bind. An acknowledgment followed by a
        // quick close still counts as bound.
        tokio::select! {
            biased;

            () = bound.wait() => {}
            () = done.wait() => {
                return Err(StreamError::Connect(
                    "socket closed before the bind was acknowledged".to_string(),
                ));
            }
            () = tokio::time::sleep(setup_timeout) => {
                reader.abort();
                done.set();
                return Err(StreamError::SetupTimeout {
                    waited_ms: u64::try_from(setup_timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        }

        Ok(Self {
            events: events_rx,
            bound,
            done,
            state: state_rx,
            reader,
        })
    }

    /// Receives the next stream event. Returns `None` once the read
    /// loop has finished and all buffered events were consumed.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Signal set when the bind handshake is acknowledged (used to
    /// sequence the backfill drain).
    #[must_use]
    pub fn bound_signal(&self) -> Signal {
        self.bound.clone()
    }

    /// Signal set exactly once when the socket closes — the ingestion
    /// pipeline's shutdown trigger.
    #[must_use]
    pub fn done_signal(&self) -> Signal {
        self.done.clone()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Aborts the read loop without waiting for socket closure.
    ///
    /// The subscription is abandoned, not gracefully closed; checkpoint
    /// state makes the loss recoverable.
    pub fn abort(&self) {
        self.reader.abort();
        self.done.set();
    }
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("state", &self.state())
            .field("bound", &self.bound.is_set())
            .field("done", &self.done.is_set())
            .finish_non_exhaustive()
    }
}

/// Rewrites the service base URL into the socket endpoint URL.
fn socket_url(base: &str) -> Result<Url, StreamError> {
    let trimmed = base.trim_end_matches('/');
    let rewritten = if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
        trimmed.to_string()
    } else {
        return Err(StreamError::InvalidUrl(format!(
            "unsupported scheme in '{base}'"
        )));
    };
    let mut url =
        Url::parse(&rewritten).map_err(|e| StreamError::InvalidUrl(format!("{base}: {e}")))?;
    url.set_path("/v1/socket");
    Ok(url)
}

/// Builds the upgrade request, attaching the `Authorization` header.
fn build_request(url: &Url, auth: Option<&StreamAuth>) -> Result<Request, StreamError> {
    use tungstenite::client::IntoClientRequest;

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| StreamError::InvalidUrl(e.to_string()))?;
    if let Some(auth) = auth {
        let value = match auth {
            StreamAuth::Token(token) => format!("Quoken {token}"),
            StreamAuth::Basic { username, password } => {
                format!("Basic {}", BASE64.encode(format!("{username}:{password}")))
            }
        };
        let value = tungstenite::http::HeaderValue::from_str(&value)
            .map_err(|e| StreamError::Handshake(format!("invalid credentials: {e}")))?;
        request
            .headers_mut()
            .insert(tungstenite::http::header::AUTHORIZATION, value);
    }
    Ok(request)
}

/// Sends the bind handshake, then dispatches inbound frames until the
/// socket closes or fails.
async fn read_loop(
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    config: StreamConfig,
    events: mpsc::Sender<StreamEvent>,
    bound: Signal,
    done: Signal,
    state: watch::Sender<ClientState>,
) {
    let (mut write, mut read) = socket.split();
    let mut failed = false;

    let bind = BindRequest::new(&config.timeline_id, &config.facets);
    match serde_json::to_string(&bind) {
        Ok(payload) => {
            debug!(cid = %bind.cid, "sending bind handshake");
            if let Err(e) = write.send(Message::text(payload)).await {
                warn!(error = %e, "bind handshake send failed");
                failed = true;
            }
        }
        Err(e) => {
            warn!(error = %e, "bind handshake could not be serialized");
            failed = true;
        }
    }

    while !failed {
        let Some(frame) = read.next().await else {
            info!("subscription socket stream ended");
            break;
        };
        match frame {
            Ok(Message::Text(text)) => {
                if !dispatch_text(text.as_str(), &events, &bound, &state).await {
                    // Receiver dropped: nobody is consuming, stop reading.
                    debug!("event channel closed, stopping read loop");
                    break;
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = write.send(Message::Pong(payload)).await;
            }
            Ok(Message::Close(_)) => {
                info!("server closed the subscription socket");
                break;
            }
            Ok(other) => {
                debug!(frame = ?other, "ignoring non-text frame");
            }
            Err(e) => {
                warn!(error = %e, "socket transport error");
                let _ = events
                    .send(StreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                failed = true;
            }
        }
    }

    state.send_replace(if failed {
        ClientState::Error
    } else {
        ClientState::Closed
    });
    done.set();
    let _ = events.send(StreamEvent::Closed).await;
}

/// Dispatches one text frame by message name. Returns `false` when the
/// event channel is closed.
async fn dispatch_text(
    text: &str,
    events: &mpsc::Sender<StreamEvent>,
    bound: &Signal,
    state: &watch::Sender<ClientState>,
) -> bool {
    let message: PushMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "dropping unparseable push message");
            return true;
        }
    };
    match message.name.as_str() {
        "event" => {
            let Some(body) = message.body else {
                warn!("dropping event push without a body");
                return true;
            };
            events.send(StreamEvent::Event { body }).await.is_ok()
        }
        "bound" => {
            info!(cid = message.cid.as_deref().unwrap_or(""), "subscription bound");
            state.send_replace(ClientState::Bound);
            state.send_replace(ClientState::Streaming);
            bound.set();
            events
                .send(StreamEvent::Bound { cid: message.cid })
                .await
                .is_ok()
        }
        other => {
            info!(name = other, "dropping unhandled push message");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_url_rewrites_http_schemes() {
        let url = socket_url("https://node77.example.com").unwrap();
        assert_eq!(url.as_str(), "wss://node77.example.com/v1/socket");

        let url = socket_url("http://localhost:8080/").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8080/v1/socket");
    }

    #[test]
    fn test_socket_url_keeps_ws_schemes() {
        let url = socket_url("ws://localhost:9090").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:9090/v1/socket");
    }

    #[test]
    fn test_socket_url_rejects_other_schemes() {
        assert!(matches!(
            socket_url("ftp://example.com"),
            Err(StreamError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_request_carries_token_auth_header() {
        let url = socket_url("https://quo.example.com").unwrap();
        let request =
            build_request(&url, Some(&StreamAuth::Token("tok-123".to_string()))).unwrap();
        assert_eq!(
            request.headers().get("authorization").unwrap(),
            "Quoken tok-123"
        );
    }

    #[test]
    fn test_request_carries_basic_auth_header() {
        let url = socket_url("https://quo.example.com").unwrap();
        let auth = StreamAuth::Basic {
            username: "analyst".to_string(),
            password: "pw".to_string(),
        };
        let request = build_request(&url, Some(&auth)).unwrap();
        let value = request.headers().get("authorization").unwrap();
        assert_eq!(value, &format!("Basic {}", BASE64.encode("analyst:pw")));
    }

    #[test]
    fn test_request_without_auth_has_no_header() {
        let url = socket_url("http://localhost:1").unwrap();
        let request = build_request(&url, None).unwrap();
        assert!(request.headers().get("authorization").is_none());
    }
}
