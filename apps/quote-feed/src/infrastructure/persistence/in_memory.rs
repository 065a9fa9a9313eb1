//! In-memory tick store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::application::ports::{StoreError, TickStore};
use crate::domain::streaming::{CachedQuote, Symbol};

/// In-memory implementation of `TickStore`.
///
/// Suitable for tests and for running without a database file.
#[derive(Debug, Default)]
pub struct InMemoryTickStore {
    rows: RwLock<HashMap<Symbol, CachedQuote>>,
}

impl InMemoryTickStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl TickStore for InMemoryTickStore {
    async fn upsert(&self, quote: CachedQuote) -> Result<(), StoreError> {
        self.rows.write().insert(quote.symbol.clone(), quote);
        Ok(())
    }

    async fn get(&self, symbol: &str) -> Result<Option<CachedQuote>, StoreError> {
        Ok(self.rows.read().get(symbol).cloned())
    }

    async fn list_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<CachedQuote>, StoreError> {
        let mut rows: Vec<CachedQuote> = self
            .rows
            .read()
            .values()
            .filter(|q| q.updated_at >= cutoff)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rows)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|_, q| q.updated_at >= cutoff);
        Ok(before - rows.len())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.len())
    }
}
