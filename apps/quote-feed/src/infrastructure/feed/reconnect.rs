//! Reconnection Backoff
//!
//! Exponential backoff for upstream reconnection. The current backoff grows
//! without bound on repeated failures and is clamped to the cap only when a
//! delay is taken, so the reported value keeps reflecting how long the feed
//! has been failing.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::FeedSettings;

/// Configuration for backoff behavior.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay used for the first retry and after every success.
    pub floor: Duration,
    /// Largest delay ever waited.
    pub cap: Duration,
    /// Growth factor applied on each failure.
    pub multiplier: f64,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            floor: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

impl BackoffConfig {
    /// Create configuration from `FeedSettings`.
    #[must_use]
    pub const fn from_feed_settings(settings: &FeedSettings) -> Self {
        Self {
            floor: settings.backoff_floor,
            cap: settings.backoff_cap,
            multiplier: 2.0,
            jitter_factor: settings.backoff_jitter,
        }
    }
}

/// Backoff state for one feed connection.
///
/// # Example
///
/// ```rust
/// use quote_feed::infrastructure::feed::reconnect::{BackoffConfig, BackoffPolicy};
/// use std::time::Duration;
///
/// let mut policy = BackoffPolicy::new(BackoffConfig::default());
/// assert_eq!(policy.delay(), Duration::from_secs(1));
///
/// policy.escalate();
/// assert_eq!(policy.delay(), Duration::from_secs(2));
///
/// // Simulate successful connection
/// policy.reset();
/// assert_eq!(policy.current_backoff(), Duration::from_secs(1));
/// ```
#[derive(Debug)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    current: Duration,
    failures: u32,
}

impl BackoffPolicy {
    /// Create a policy starting at the floor.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        let floor = config.floor;
        Self {
            config,
            current: floor,
            failures: 0,
        }
    }

    /// Delay to wait before the next attempt: `min(current, cap)` with jitter.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.apply_jitter(self.current.min(self.config.cap))
    }

    /// Grow the backoff after a failed attempt.
    pub fn escalate(&mut self) {
        self.failures = self.failures.saturating_add(1);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current.as_millis() as f64 * self.config.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let next_u64 = u64::try_from(next_millis).unwrap_or(u64::MAX);
        self.current = Duration::from_millis(next_u64).max(self.config.floor);
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.current = self.config.floor;
        self.failures = 0;
    }

    /// Current uncapped backoff.
    #[must_use]
    pub const fn current_backoff(&self) -> Duration {
        self.current
    }

    /// Failed attempts since the last reset.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Apply jitter to a duration.
    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}
