//! Tick Store Port (Driven Port)
//!
//! Persistent storage holding at most one row per symbol.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::streaming::CachedQuote;

/// Tick store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Backing store could not be reached.
    #[error("Tick store unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },

    /// Statement failed.
    #[error("Tick store query failed: {message}")]
    Query {
        /// Error details.
        message: String,
    },

    /// Stored row could not be decoded.
    #[error("Corrupt row for {symbol}: {message}")]
    Corrupt {
        /// Symbol of the bad row.
        symbol: String,
        /// Error details.
        message: String,
    },
}

/// Port for quote persistence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TickStore: Send + Sync {
    /// Insert or fully replace the row for `quote.symbol`.
    async fn upsert(&self, quote: CachedQuote) -> Result<(), StoreError>;

    /// Fetch the row for `symbol`.
    async fn get(&self, symbol: &str) -> Result<Option<CachedQuote>, StoreError>;

    /// Rows with `updated_at >= cutoff`, most recent first.
    async fn list_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<CachedQuote>, StoreError>;

    /// Delete rows with `updated_at < cutoff`, returning how many were removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Number of rows.
    async fn count(&self) -> Result<usize, StoreError>;
}
