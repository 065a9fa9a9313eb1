//! Domain Layer - Core quote feed types and business logic.
//!
//! This layer contains the core domain types for the quote feed with no
//! I/O. All types here are pure Rust with serialization support.

/// Upstream connection lifecycle states.
pub mod connection;

/// Read-time freshness policy.
pub mod freshness;

/// Market data types (ticks and cached quotes).
pub mod streaming;

/// Desired subscription set.
pub mod subscription;
