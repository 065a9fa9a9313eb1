//! Tick Store Adapters
//!
//! Implementations of the `TickStore` port.
//!
//! - `InMemoryTickStore`: process-local map, used by default and in tests
//! - `SqliteTickStore`: single-table SQLite database for durable caching

mod in_memory;
mod sqlite;

pub use in_memory::InMemoryTickStore;
pub use sqlite::SqliteTickStore;
