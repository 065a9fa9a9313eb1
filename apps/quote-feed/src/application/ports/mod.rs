//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `FeedAdapter`: Upstream market data provider connection
//! - `TickStore`: Persistent one-row-per-symbol quote storage
//! - `Clock`: Wall-clock source for staleness decisions
//!
//! ## Driver Ports (Inbound)
//!
//! - `TickHandler`: Callback the feed adapter pushes ticks into

mod clock_port;
mod feed_adapter_port;
mod tick_store_port;

pub use clock_port::{Clock, ManualClock, SystemClock};
pub use feed_adapter_port::{AdapterError, FeedAdapter, TickHandler, TickSink};
pub use tick_store_port::{StoreError, TickStore};

#[cfg(test)]
pub use tick_store_port::MockTickStore;
