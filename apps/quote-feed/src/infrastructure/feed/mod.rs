//! Feed Adapters and Supervision
//!
//! - `multiplexer`: single supervised upstream connection with fan-out
//! - `heartbeat`: tick-liveness watchdog
//! - `reconnect`: exponential backoff policy
//! - `simulated`: random-walk adapter for local runs and tests

pub mod heartbeat;
pub mod multiplexer;
pub mod reconnect;
pub mod simulated;

pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatMonitor, LivenessState};
pub use multiplexer::{FeedMultiplexer, FeedStatus};
pub use reconnect::{BackoffConfig, BackoffPolicy};
pub use simulated::{SimulatedFeedAdapter, SimulatedFeedConfig};
