//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `QuoteCache`: Write-through latest-quote cache with freshness-gated reads

mod quote_cache;

pub use quote_cache::{CacheHealth, NotAvailableReason, QuoteCache, QuoteLookup};
