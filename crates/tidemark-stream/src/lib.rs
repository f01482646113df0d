//! # Tidemark Stream Client
//!
//! Long-lived push subscription to the activity feed socket: connect,
//! bind to a timeline, and deliver inbound push messages as tagged
//! [`StreamEvent`]s over a channel, with out-of-band bound/done
//! lifecycle signals.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod client;
pub mod config;
pub mod protocol;
pub mod signal;
pub mod state;

pub use client::StreamClient;
pub use config::{StreamAuth, StreamConfig};
pub use protocol::{BindRequest, PushMessage, StreamEvent};
pub use signal::Signal;
pub use state::ClientState;

use thiserror::Error;

/// Errors raised while establishing or running a subscription.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The profile URL could not be converted into a socket URL.
    #[error("invalid socket url: {0}")]
    InvalidUrl(String),

    /// The socket connection could not be established.
    #[error("socket connect failed: {0}")]
    Connect(String),

    /// The bind handshake could not be sent.
    #[error("bind handshake send failed: {0}")]
    Handshake(String),

    /// The handshake was not acknowledged within the setup window.
    /// Fatal: the caller must abort startup.
    #[error("subscription setup not acknowledged within {waited_ms} ms")]
    SetupTimeout {
        /// How long the client waited for the `bound` acknowledgment.
        waited_ms: u64,
    },
}
