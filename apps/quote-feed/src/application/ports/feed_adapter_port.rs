//! Feed Adapter Port (Driven Port)
//!
//! Interface to one upstream market data provider. Adapters own the wire
//! protocol; the multiplexer owns lifecycle and recovery.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::streaming::{Symbol, Tick};

/// Feed adapter error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    /// Could not open the upstream connection.
    #[error("Feed connect failed: {message}")]
    ConnectFailed {
        /// Error details.
        message: String,
    },

    /// Could not close the upstream connection cleanly.
    #[error("Feed disconnect failed: {message}")]
    DisconnectFailed {
        /// Error details.
        message: String,
    },

    /// Upstream rejected the subscription request.
    #[error("Feed subscribe failed: {message}")]
    SubscribeFailed {
        /// Error details.
        message: String,
    },

    /// Operation requires an open connection.
    #[error("Feed is not connected")]
    NotConnected,

    /// The adapter panicked inside `operation`.
    #[error("Feed adapter panicked during {operation}: {message}")]
    Panicked {
        /// Adapter call that panicked.
        operation: &'static str,
        /// Panic payload, when it was a string.
        message: String,
    },
}

/// Receiver for ticks pushed by an adapter.
#[async_trait]
pub trait TickHandler: Send + Sync {
    /// Handle one tick.
    async fn handle_tick(&self, tick: Tick);
}

/// Cloneable handle an adapter uses to deliver ticks.
#[derive(Clone)]
pub struct TickSink {
    handler: Arc<dyn TickHandler>,
}

impl TickSink {
    /// Wrap a handler.
    #[must_use]
    pub fn new(handler: Arc<dyn TickHandler>) -> Self {
        Self { handler }
    }

    /// Deliver a tick to the handler.
    pub async fn deliver(&self, tick: Tick) {
        self.handler.handle_tick(tick).await;
    }
}

impl fmt::Debug for TickSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickSink").finish_non_exhaustive()
    }
}

/// Port for an upstream market data provider.
///
/// `subscribe` replaces the full upstream subscription with `symbols` and
/// installs `sink` as the destination for subsequent ticks.
#[async_trait]
pub trait FeedAdapter: Send + Sync {
    /// Provider name, recorded as the `source` of cached rows.
    fn name(&self) -> &str;

    /// Open the upstream connection.
    async fn connect(&self) -> Result<(), AdapterError>;

    /// Close the upstream connection.
    async fn disconnect(&self) -> Result<(), AdapterError>;

    /// Subscribe to exactly `symbols`, delivering ticks into `sink`.
    async fn subscribe(&self, symbols: &[Symbol], sink: TickSink) -> Result<(), AdapterError>;
}
