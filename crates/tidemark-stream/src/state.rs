//! Subscription lifecycle state.

use std::fmt;

/// Lifecycle of one socket subscription.
///
/// `Closed` and `Error` are terminal; the client never reconnects — a
/// closed socket is the ingestion pipeline's shutdown trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Created, not yet connecting.
    Init,
    /// TCP/TLS/upgrade in progress.
    Connecting,
    /// Socket established, handshake being sent.
    Open,
    /// Bind handshake acknowledged by the server.
    Bound,
    /// Receiving pushed events.
    Streaming,
    /// Socket closed (terminal).
    Closed,
    /// Transport failure (terminal).
    Error,
}

impl ClientState {
    /// Whether the subscription has reached a terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, ClientState::Closed | ClientState::Error)
    }

    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_transition_to(self, next: ClientState) -> bool {
        use ClientState::{Bound, Closed, Connecting, Error, Init, Open, Streaming};
        matches!(
            (self, next),
            (Init, Connecting)
                | (Connecting, Open | Error)
                | (Open, Bound | Closed | Error)
                | (Bound, Streaming | Closed | Error)
                | (Streaming, Closed | Error)
        )
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientState::Init => "init",
            ClientState::Connecting => "connecting",
            ClientState::Open => "open",
            ClientState::Bound => "bound",
            ClientState::Streaming => "streaming",
            ClientState::Closed => "closed",
            ClientState::Error => "error",
        };
        f.write_str(name)
    }
}
