//! Subscription Management Types
//!
//! Tracks the set of symbols the feed should be subscribed to upstream.
//!
//! # Design
//!
//! The set is the single source of truth for desired subscriptions. It is
//! mutated by callers at any time, including while the upstream connection
//! is down, and replayed in full on every successful (re)connect. Symbols
//! are normalized on the way in, so membership is idempotent.

use std::collections::{BTreeSet, HashSet};

use parking_lot::RwLock;

use super::streaming::{Symbol, normalize_symbol};

// =============================================================================
// Subscription Changes
// =============================================================================

/// Changes to upstream subscriptions.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionChanges {
    /// Symbols that entered the set.
    pub subscribe: HashSet<Symbol>,
    /// Symbols that left the set.
    pub unsubscribe: HashSet<Symbol>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }

    /// Create changes with only subscribes.
    #[must_use]
    pub fn subscribe_only(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            subscribe: symbols.into_iter().collect(),
            unsubscribe: HashSet::new(),
        }
    }

    /// Create changes with only unsubscribes.
    #[must_use]
    pub fn unsubscribe_only(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            subscribe: HashSet::new(),
            unsubscribe: symbols.into_iter().collect(),
        }
    }
}

// =============================================================================
// Subscription Set
// =============================================================================

/// Thread-safe desired-subscription set.
///
/// # Example
///
/// ```rust
/// use quote_feed::domain::subscription::SubscriptionSet;
///
/// let set = SubscriptionSet::new();
///
/// let changes = set.replace(["aapl", "MSFT"]);
/// assert!(changes.subscribe.contains("AAPL"));
///
/// // Re-adding is a no-op
/// let changes = set.add(["AAPL"]);
/// assert!(changes.is_empty());
///
/// let changes = set.replace(["MSFT", "SPY"]);
/// assert!(changes.subscribe.contains("SPY"));
/// assert!(changes.unsubscribe.contains("AAPL"));
/// assert_eq!(set.snapshot(), vec!["MSFT".to_string(), "SPY".to_string()]);
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    symbols: RwLock<BTreeSet<Symbol>>,
}

impl SubscriptionSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set.
    ///
    /// Returns the difference against the previous contents.
    pub fn replace<I, S>(&self, symbols: I) -> SubscriptionChanges
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let next = normalize_all(symbols);
        let mut current = self.symbols.write();

        let changes = SubscriptionChanges {
            subscribe: next.difference(&current).cloned().collect(),
            unsubscribe: current.difference(&next).cloned().collect(),
        };
        *current = next;

        changes
    }

    /// Add symbols to the set.
    ///
    /// Returns only the symbols that were not already present.
    pub fn add<I, S>(&self, symbols: I) -> SubscriptionChanges
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let incoming = normalize_all(symbols);
        let mut current = self.symbols.write();

        let added: Vec<Symbol> = incoming
            .into_iter()
            .filter(|symbol| current.insert(symbol.clone()))
            .collect();

        SubscriptionChanges::subscribe_only(added)
    }

    /// Remove symbols from the set.
    ///
    /// Returns only the symbols that were actually present.
    pub fn remove<I, S>(&self, symbols: I) -> SubscriptionChanges
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let outgoing = normalize_all(symbols);
        let mut current = self.symbols.write();

        let removed: Vec<Symbol> = outgoing
            .into_iter()
            .filter(|symbol| current.remove(symbol))
            .collect();

        SubscriptionChanges::unsubscribe_only(removed)
    }

    /// Sorted copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Symbol> {
        self.symbols.read().iter().cloned().collect()
    }

    /// Check membership (after normalization).
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        normalize_symbol(symbol).is_some_and(|s| self.symbols.read().contains(&s))
    }

    /// Number of symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.read().len()
    }

    /// Check if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.read().is_empty()
    }
}

fn normalize_all<I, S>(symbols: I) -> BTreeSet<Symbol>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    symbols
        .into_iter()
        .filter_map(|s| normalize_symbol(s.as_ref()))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
