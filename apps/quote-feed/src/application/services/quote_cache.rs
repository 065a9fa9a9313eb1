//! Quote Cache Service
//!
//! Write-through cache of the latest quote per symbol with read-time
//! staleness enforcement. Writes never fail from the caller's point of view;
//! storage problems are counted and surfaced through [`CacheHealth`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::application::ports::{Clock, StoreError, TickStore};
use crate::domain::freshness::{Freshness, FreshnessGate, cutoff_before};
use crate::domain::streaming::{CachedQuote, Tick, normalize_symbol};
use crate::infrastructure::metrics;

// =============================================================================
// Lookup Results
// =============================================================================

/// Why a fresh quote could not be returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NotAvailableReason {
    /// No row for the symbol.
    Missing,
    /// Row exists but is older than the requested bound.
    Stale {
        /// Row age in milliseconds.
        #[serde(rename = "age_ms", serialize_with = "serialize_millis")]
        age: Duration,
    },
    /// The store could not be read.
    StoreUnavailable,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_millis<S: serde::Serializer>(age: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u128(age.as_millis())
}

/// Result of a freshness-gated read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuoteLookup {
    /// Row within the freshness bound.
    Fresh(CachedQuote),
    /// No usable row.
    NotAvailable(NotAvailableReason),
}

impl QuoteLookup {
    /// Check if a fresh row was found.
    #[must_use]
    pub const fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }

    /// Take the fresh row, if any.
    #[must_use]
    pub fn into_fresh(self) -> Option<CachedQuote> {
        match self {
            Self::Fresh(quote) => Some(quote),
            Self::NotAvailable(_) => None,
        }
    }
}

// =============================================================================
// Health
// =============================================================================

/// Cache write health snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheHealth {
    /// Successful writes since startup.
    pub writes: u64,
    /// Failed writes since startup.
    pub write_failures: u64,
    /// Failures since the last successful write.
    pub consecutive_failures: u64,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// When the most recent failure happened.
    pub last_error_at: Option<DateTime<Utc>>,
}

impl CacheHealth {
    /// True while the most recent write failed.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.consecutive_failures > 0
    }
}

#[derive(Debug, Default)]
struct LastError {
    message: Option<String>,
    at: Option<DateTime<Utc>>,
}

// =============================================================================
// Quote Cache
// =============================================================================

/// Staleness-aware quote cache.
pub struct QuoteCache {
    store: Arc<dyn TickStore>,
    clock: Arc<dyn Clock>,
    gate: FreshnessGate,
    writes: AtomicU64,
    write_failures: AtomicU64,
    consecutive_failures: AtomicU64,
    last_error: RwLock<LastError>,
}

impl QuoteCache {
    /// Create a cache over `store`, aging rows by `clock`.
    ///
    /// `default_max_age` bounds [`Self::list_fresh`] and
    /// [`Self::get_fresh_default`].
    #[must_use]
    pub fn new(store: Arc<dyn TickStore>, clock: Arc<dyn Clock>, default_max_age: Duration) -> Self {
        Self {
            store,
            clock,
            gate: FreshnessGate::new(default_max_age),
            writes: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            last_error: RwLock::new(LastError::default()),
        }
    }

    /// The configured default freshness bound.
    #[must_use]
    pub const fn default_max_age(&self) -> Duration {
        self.gate.max_age()
    }

    /// Write `tick` as the latest row for its symbol.
    ///
    /// Returns `false` when the tick was ignored or the write failed. Never
    /// propagates storage errors.
    pub async fn upsert(&self, tick: &Tick) -> bool {
        if tick.symbol.trim().is_empty() {
            debug!("Ignoring tick with empty symbol");
            return false;
        }

        let quote = CachedQuote::from_tick(tick, whole_millis(self.clock.now()));
        let symbol = quote.symbol.clone();

        match self.store.upsert(quote).await {
            Ok(()) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
                self.consecutive_failures.store(0, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_write_failure();
                {
                    let mut last = self.last_error.write();
                    last.message = Some(e.to_string());
                    last.at = Some(self.clock.now());
                }
                warn!(symbol = %symbol, error = %e, "Quote cache write failed");
                false
            }
        }
    }

    /// Read `symbol` if its row is no older than `max_age`.
    pub async fn get_fresh(&self, symbol: &str, max_age: Duration) -> QuoteLookup {
        let Some(symbol) = normalize_symbol(symbol) else {
            return QuoteLookup::NotAvailable(NotAvailableReason::Missing);
        };

        let row = match self.store.get(&symbol).await {
            Ok(row) => row,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Quote cache read failed");
                return QuoteLookup::NotAvailable(NotAvailableReason::StoreUnavailable);
            }
        };

        let Some(quote) = row else {
            return QuoteLookup::NotAvailable(NotAvailableReason::Missing);
        };

        match FreshnessGate::new(max_age).evaluate(quote.updated_at, self.clock.now()) {
            Freshness::Fresh => QuoteLookup::Fresh(quote),
            Freshness::Stale { age } => {
                QuoteLookup::NotAvailable(NotAvailableReason::Stale { age })
            }
        }
    }

    /// Read `symbol` against the configured default bound.
    pub async fn get_fresh_default(&self, symbol: &str) -> QuoteLookup {
        self.get_fresh(symbol, self.gate.max_age()).await
    }

    /// All rows within the default bound, most recent first.
    pub async fn list_fresh(&self) -> Vec<CachedQuote> {
        let cutoff = self.gate.cutoff(self.clock.now());

        match self.store.list_since(cutoff).await {
            Ok(mut rows) => {
                rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
                rows
            }
            Err(e) => {
                warn!(error = %e, "Quote cache list failed");
                Vec::new()
            }
        }
    }

    /// Delete rows older than `max_age_hours`.
    ///
    /// # Errors
    ///
    /// Returns the store error so the housekeeping caller can log it.
    pub async fn sweep(&self, max_age_hours: u64) -> Result<usize, StoreError> {
        let horizon = Duration::from_secs(max_age_hours.saturating_mul(3600));
        let cutoff = cutoff_before(self.clock.now(), horizon);

        let removed = self.store.delete_older_than(cutoff).await?;
        metrics::record_rows_swept(removed);
        debug!(removed, max_age_hours, "Quote cache sweep complete");

        Ok(removed)
    }

    /// Write health snapshot.
    #[must_use]
    pub fn health(&self) -> CacheHealth {
        let last = self.last_error.read();
        CacheHealth {
            writes: self.writes.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            last_error: last.message.clone(),
            last_error_at: last.at,
        }
    }
}

impl std::fmt::Debug for QuoteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuoteCache")
            .field("gate", &self.gate)
            .field("health", &self.health())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

/// Stores keep millisecond timestamps; stamp writes at that precision so the
/// freshness boundary is identical on every backend.
fn whole_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}
