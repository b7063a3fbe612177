//! Shutdown signal for connection tasks.

use tokio::sync::broadcast;

/// Tracks whether the server asked a connection to stop.
///
/// The server never sends a value on the channel, it drops the sender instead, which wakes up
/// every subscribed receiver at once.
pub(crate) struct Shutdown {
    received: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub(crate) fn new(notify: broadcast::Receiver<()>) -> Self {
        Self {
            received: false,
            notify,
        }
    }

    /// Returns `true` once the signal has been seen.
    pub(crate) fn is_shutdown(&self) -> bool {
        self.received
    }

    /// Wait for the signal. Returns immediately if it was already seen.
    pub(crate) async fn recv(&mut self) {
        if self.received {
            return;
        }
        // Either a value or a closed channel means stop
        let _ = self.notify.recv().await;
        self.received = true;
    }
}
