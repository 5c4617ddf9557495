//! Refresh-signal bus.
//!
//! Signals are content-free by design: they name a collection channel and
//! mean "re-fetch, something changed". Carrying no operational payload keeps
//! the protocol trivial at the cost of a full re-read per signal, which the
//! controller's coalescing keeps bounded.

use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

/// Broadcasts collection channel names to every subscribed client.
///
/// Clones are cheap, the underlying `broadcast::Sender` is Arc-backed. A slow
/// subscriber lags and skips old signals, which is safe: one re-fetch makes
/// it current regardless of how many signals it missed.
#[derive(Clone)]
pub struct RefreshBus {
    tx: broadcast::Sender<String>,
}

impl Default for RefreshBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl RefreshBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a refresh signal for one collection channel.
    pub fn publish(&self, channel: &str) {
        // Ignore errors; no subscribers is fine.
        let _ = self.tx.send(channel.to_string());
    }

    /// Subscribe to every signal on the bus; subscribers filter by channel.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}
