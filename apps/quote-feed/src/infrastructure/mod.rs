//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Broadcast channel for in-process tick fan-out.
pub mod broadcast;

/// Configuration loaded from the environment.
pub mod config;

/// Feed adapters, multiplexer and connection supervision.
pub mod feed;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tick store implementations (in-memory, SQLite).
pub mod persistence;

/// OpenTelemetry tracing integration.
pub mod telemetry;
