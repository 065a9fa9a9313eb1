#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::panic
    )
)]

//! Quote Feed - Market Data Multiplexer and Quote Cache
//!
//! Maintains a single supervised connection to an upstream market data
//! provider, fans ticks out to in-process listeners, and writes each tick
//! through a staleness-aware quote cache.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `streaming`: Ticks and cached quotes
//!   - `subscription`: Desired subscription set and change deltas
//!   - `freshness`: Staleness evaluation
//!   - `connection`: Connection state machine states
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Feed adapter, tick store and clock interfaces
//!   - `services`: Quote cache
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: Multiplexer, heartbeat, backoff, simulated adapter
//!   - `persistence`: In-memory and SQLite tick stores
//!   - `broadcast`: In-process tick fan-out
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                  ┌──────────────────┐     ┌─────────────┐
//! Provider ──────► │ FeedMultiplexer  │───► │  Broadcast  │──► Listener 1..N
//!   adapter        │ heartbeat/backoff│     └─────────────┘
//!                  └────────┬─────────┘
//!                           ▼
//!                     ┌────────────┐     ┌─────────────┐
//!                     │ QuoteCache │───► │  TickStore  │
//!                     └────────────┘     └─────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::ConnectionState;
pub use domain::freshness::{Freshness, FreshnessGate};
pub use domain::streaming::{CachedQuote, Symbol, Tick};
pub use domain::subscription::{SubscriptionChanges, SubscriptionSet};

// Ports and services
pub use application::ports::{
    AdapterError, Clock, FeedAdapter, ManualClock, StoreError, SystemClock, TickHandler, TickSink,
    TickStore,
};
pub use application::services::{CacheHealth, NotAvailableReason, QuoteCache, QuoteLookup};

// Feed
pub use infrastructure::feed::{
    FeedMultiplexer, FeedStatus, SimulatedFeedAdapter, SimulatedFeedConfig,
};

// Stores
pub use infrastructure::persistence::{InMemoryTickStore, SqliteTickStore};

// Infrastructure config
pub use infrastructure::config::{ConfigError, FeedConfig, FeedSettings};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{
    TelemetryConfig, TelemetryError, TelemetryGuard, init as init_telemetry,
};
