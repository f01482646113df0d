//! One-shot lifecycle signals.
//!
//! [`Signal`] is a set-once boolean flag shared between components:
//! the stream client sets `bound` when the handshake is acknowledged
//! and `done` when the socket closes; the backfill reader and the
//! consumer loop wait on or poll them. Passed explicitly at
//! construction — never ambient global state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// A cloneable, set-once asynchronous flag.
#[derive(Debug, Clone)]
pub struct Signal {
    tx: Arc<watch::Sender<bool>>,
}

impl Signal {
    /// Creates an unset signal.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Sets the signal. Idempotent.
    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the signal has been set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Waits until the signal is set.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Waits until the signal is set, up to `timeout`. Returns whether
    /// the signal was set within the window.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}
