//! Broadcast Channel Adapter
//!
//! In-process fan-out of ticks using a tokio broadcast channel.
//!
//! Sending never blocks and preserves delivery order. Slow receivers that
//! fall more than `capacity` ticks behind observe `RecvError::Lagged` and
//! skip ahead; they never slow down the feed.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::domain::streaming::Tick;

/// Default channel capacity.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Fan-out hub for ticks.
///
/// # Example
///
/// ```rust
/// use quote_feed::infrastructure::broadcast::TickBroadcaster;
///
/// let hub = TickBroadcaster::new(16);
/// let rx = hub.subscribe();
///
/// // In another task, send ticks
/// // hub.send(tick);
/// assert_eq!(hub.receiver_count(), 1);
/// # drop(rx);
/// ```
#[derive(Debug)]
pub struct TickBroadcaster {
    tx: broadcast::Sender<Tick>,
}

impl Default for TickBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl TickBroadcaster {
    /// Create a broadcaster with the given capacity (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity.max(1)).0,
        }
    }

    /// Send a tick to all receivers.
    ///
    /// Returns the number of receivers that got it (0 when nobody listens).
    pub fn send(&self, tick: Tick) -> usize {
        self.tx.send(tick).unwrap_or(0)
    }

    /// Get a new receiver.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Tick> {
        self.tx.subscribe()
    }

    /// Get the number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Shared broadcaster reference.
pub type SharedTickBroadcaster = Arc<TickBroadcaster>;

// =============================================================================
// Tests
// =============================================================================
