//! Freshness Gate
//!
//! Pure read-time policy deciding whether a cached row is still usable.
//! Freshness is expressed as `age <= max_age`, independent of whether the
//! feed currently believes it is connected.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Result of evaluating a row against the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Row age is within the bound.
    Fresh,
    /// Row is older than the bound.
    Stale {
        /// How old the row is.
        age: Duration,
    },
}

impl Freshness {
    /// Check if the row was fresh.
    #[must_use]
    pub const fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }
}

/// Max-age policy applied by readers of the quote cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessGate {
    max_age: Duration,
}

impl FreshnessGate {
    /// Create a gate with the given bound.
    #[must_use]
    pub const fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    /// The configured bound.
    #[must_use]
    pub const fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Evaluate a row stamped at `updated_at` as seen at `now`.
    #[must_use]
    pub fn evaluate(&self, updated_at: DateTime<Utc>, now: DateTime<Utc>) -> Freshness {
        let age = age_between(updated_at, now);
        if age <= self.max_age {
            Freshness::Fresh
        } else {
            Freshness::Stale { age }
        }
    }

    /// Oldest `updated_at` that still passes the gate at `now`.
    #[must_use]
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        cutoff_before(now, self.max_age)
    }
}

/// Elapsed time from `updated_at` to `now`, saturating at zero.
#[must_use]
pub fn age_between(updated_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - updated_at).to_std().unwrap_or(Duration::ZERO)
}

/// `now - horizon`, clamped to the earliest representable instant.
#[must_use]
pub fn cutoff_before(now: DateTime<Utc>, horizon: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(horizon)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000 + ms).unwrap()
    }

    #[test]
    fn boundary_is_inclusive() {
        let gate = FreshnessGate::new(Duration::from_millis(5000));

        assert!(gate.evaluate(at(0), at(5000)).is_fresh());
        assert_eq!(
            gate.evaluate(at(0), at(5001)),
            Freshness::Stale {
                age: Duration::from_millis(5001)
            }
        );
    }

    #[test]
    fn future_rows_are_fresh() {
        let gate = FreshnessGate::new(Duration::ZERO);
        assert!(gate.evaluate(at(10), at(0)).is_fresh());
    }

    #[test]
    fn cutoff_subtracts_max_age() {
        let gate = FreshnessGate::new(Duration::from_secs(2));
        assert_eq!(gate.cutoff(at(10_000)), at(8_000));
    }

    #[test]
    fn cutoff_saturates_for_huge_horizons() {
        let cutoff = cutoff_before(at(0), Duration::MAX);
        assert_eq!(cutoff, DateTime::<Utc>::MIN_UTC);
    }

    proptest! {
        #[test]
        fn shrinking_max_age_never_turns_stale_into_fresh(
            age_ms in 0i64..1_000_000,
            max_a in 0u64..1_000_000,
            max_b in 0u64..1_000_000,
        ) {
            let (larger, smaller) = if max_a >= max_b { (max_a, max_b) } else { (max_b, max_a) };
            let updated = at(0);
            let now = at(age_ms);

            let wide = FreshnessGate::new(Duration::from_millis(larger)).evaluate(updated, now);
            let narrow = FreshnessGate::new(Duration::from_millis(smaller)).evaluate(updated, now);

            if !wide.is_fresh() {
                prop_assert!(!narrow.is_fresh());
            }
            #[allow(clippy::cast_sign_loss)]
            let age = age_ms as u64;
            prop_assert_eq!(narrow.is_fresh(), age <= smaller);
        }
    }
}
