//! Market Data Streaming Types
//!
//! Core domain types for market data: the transient [`Tick`] pushed by the
//! upstream provider and the persistent [`CachedQuote`] row kept per symbol.
//! These types are provider-agnostic and represent the canonical internal
//! representation of a price update.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A symbol string (stock ticker, FX pair, crypto pair).
pub type Symbol = String;

/// Normalize a caller-supplied symbol.
///
/// Trims surrounding whitespace and upper-cases. Returns `None` for empty
/// input so callers can drop it silently.
#[must_use]
pub fn normalize_symbol(raw: &str) -> Option<Symbol> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_uppercase())
    }
}

// =============================================================================
// Tick
// =============================================================================

/// A single price/volume update for one instrument.
///
/// Produced by a feed adapter and handed to the multiplexer; it exists only
/// in flight and as the payload written to the quote cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Best bid price.
    pub bid: Option<Decimal>,
    /// Best ask price.
    pub ask: Option<Decimal>,
    /// Last traded price.
    pub last: Option<Decimal>,
    /// Traded volume.
    pub volume: Option<Decimal>,
    /// Name of the provider that produced the tick.
    pub source: String,
    /// When the provider observed the update.
    pub observed_at: DateTime<Utc>,
}

impl Tick {
    /// Create a tick with no price fields, observed now.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, source: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bid: None,
            ask: None,
            last: None,
            volume: None,
            source: source.into(),
            observed_at: Utc::now(),
        }
    }

    /// Set the bid price.
    #[must_use]
    pub fn with_bid(mut self, bid: Decimal) -> Self {
        self.bid = Some(bid);
        self
    }

    /// Set the ask price.
    #[must_use]
    pub fn with_ask(mut self, ask: Decimal) -> Self {
        self.ask = Some(ask);
        self
    }

    /// Set the last traded price.
    #[must_use]
    pub fn with_last(mut self, last: Decimal) -> Self {
        self.last = Some(last);
        self
    }

    /// Set the traded volume.
    #[must_use]
    pub fn with_volume(mut self, volume: Decimal) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Override the observation timestamp.
    #[must_use]
    pub fn observed_at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = observed_at;
        self
    }

    /// Mid price, when both sides of the book are present.
    #[must_use]
    pub fn mid(&self) -> Option<Decimal> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::from(2)),
            _ => None,
        }
    }
}

// =============================================================================
// Cached Quote
// =============================================================================

/// Latest known value for one symbol, as stored in the tick store.
///
/// Every write fully replaces the previous row for the symbol; fields absent
/// from the newer tick are cleared rather than merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedQuote {
    /// Instrument symbol (unique key).
    pub symbol: Symbol,
    /// Best bid price.
    pub bid: Option<Decimal>,
    /// Best ask price.
    pub ask: Option<Decimal>,
    /// Last traded price.
    pub last: Option<Decimal>,
    /// Traded volume.
    pub volume: Option<Decimal>,
    /// Provider that produced the underlying tick.
    pub source: String,
    /// When the row was written.
    pub updated_at: DateTime<Utc>,
}

impl CachedQuote {
    /// Build the row for `tick`, stamped with the write time.
    #[must_use]
    pub fn from_tick(tick: &Tick, updated_at: DateTime<Utc>) -> Self {
        Self {
            symbol: tick.symbol.trim().to_uppercase(),
            bid: tick.bid,
            ask: tick.ask,
            last: tick.last,
            volume: tick.volume,
            source: tick.source.clone(),
            updated_at,
        }
    }

    /// Age of the row at `now`. A row stamped in the future has zero age.
    #[must_use]
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.updated_at).to_std().unwrap_or(Duration::ZERO)
    }
}
