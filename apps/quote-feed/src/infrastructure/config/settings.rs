//! Quote Feed Configuration Settings
//!
//! Configuration types for the quote feed, loaded from environment variables.
//! Malformed numeric values fall back to their defaults; cross-field
//! constraints are checked by [`FeedConfig::validate`].

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::streaming::{Symbol, normalize_symbol};

const DEFAULT_SYMBOLS: &str = "AAPL,MSFT,SPY";

/// Upstream feed supervision settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Heartbeat watchdog period.
    pub heartbeat_interval: Duration,
    /// Silence longer than this triggers a reconnect.
    pub stall_threshold: Duration,
    /// Backoff after the first failure and after every success.
    pub backoff_floor: Duration,
    /// Largest delay ever waited between attempts.
    pub backoff_cap: Duration,
    /// Jitter fraction applied to each delay (0 = none).
    pub backoff_jitter: f64,
    /// Capacity of the in-process tick fan-out channel.
    pub tick_channel_capacity: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(2000),
            stall_threshold: Duration::from_millis(10_000),
            backoff_floor: Duration::from_millis(1000),
            backoff_cap: Duration::from_millis(30_000),
            backoff_jitter: 0.0,
            tick_channel_capacity: 10_000,
        }
    }
}

/// Quote cache settings.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Default freshness bound for reads.
    pub max_age: Duration,
    /// Rows older than this many hours are swept.
    pub retention_hours: u64,
    /// Period of the housekeeping sweep.
    pub sweep_interval: Duration,
    /// SQLite database file (`None` = in-memory store).
    pub db_path: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_age: Duration::from_millis(5000),
            retention_hours: 24,
            sweep_interval: Duration::from_secs(3600),
            db_path: None,
        }
    }
}

/// Simulated adapter settings.
#[derive(Debug, Clone)]
pub struct SimulatorSettings {
    /// Period between generated tick batches.
    pub tick_interval: Duration,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(250),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete quote feed configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Seed subscription list.
    pub symbols: Vec<Symbol>,
    /// Feed supervision settings.
    pub feed: FeedSettings,
    /// Cache settings.
    pub cache: CacheSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Simulated adapter settings.
    pub simulator: SimulatorSettings,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            symbols: parse_symbols(DEFAULT_SYMBOLS),
            feed: FeedSettings::default(),
            cache: CacheSettings::default(),
            server: ServerSettings::default(),
            simulator: SimulatorSettings::default(),
        }
    }
}

impl FeedConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting settings are inconsistent.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting settings are inconsistent.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Self::default();

        let symbols = env
            .get("QUOTE_FEED_SYMBOLS")
            .map_or(defaults.symbols, |raw| parse_symbols(&raw));

        let feed = FeedSettings {
            heartbeat_interval: env.duration_millis(
                "QUOTE_FEED_HEARTBEAT_INTERVAL_MS",
                defaults.feed.heartbeat_interval,
            ),
            stall_threshold: env.duration_millis(
                "QUOTE_FEED_STALL_THRESHOLD_MS",
                defaults.feed.stall_threshold,
            ),
            backoff_floor: env
                .duration_millis("QUOTE_FEED_BACKOFF_FLOOR_MS", defaults.feed.backoff_floor),
            backoff_cap: env.duration_millis("QUOTE_FEED_BACKOFF_CAP_MS", defaults.feed.backoff_cap),
            backoff_jitter: env.f64("QUOTE_FEED_BACKOFF_JITTER", defaults.feed.backoff_jitter),
            tick_channel_capacity: env.usize(
                "QUOTE_FEED_TICK_CHANNEL_CAPACITY",
                defaults.feed.tick_channel_capacity,
            ),
        };

        let cache = CacheSettings {
            max_age: env.duration_millis("QUOTE_FEED_CACHE_MAX_AGE_MS", defaults.cache.max_age),
            retention_hours: env.u64("QUOTE_FEED_RETENTION_HOURS", defaults.cache.retention_hours),
            sweep_interval: env.duration_secs(
                "QUOTE_FEED_SWEEP_INTERVAL_SECS",
                defaults.cache.sweep_interval,
            ),
            db_path: env
                .get("QUOTE_FEED_DB_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
        };

        let server = ServerSettings {
            health_port: env.u16("QUOTE_FEED_HEALTH_PORT", defaults.server.health_port),
        };

        let simulator = SimulatorSettings {
            tick_interval: env.duration_millis(
                "QUOTE_FEED_SIM_TICK_INTERVAL_MS",
                defaults.simulator.tick_interval,
            ),
        };

        let config = Self {
            symbols,
            feed,
            cache,
            server,
            simulator,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending variable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feed.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "QUOTE_FEED_HEARTBEAT_INTERVAL_MS".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.feed.backoff_floor.is_zero() {
            return Err(ConfigError::Invalid {
                key: "QUOTE_FEED_BACKOFF_FLOOR_MS".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.feed.backoff_cap < self.feed.backoff_floor {
            return Err(ConfigError::Invalid {
                key: "QUOTE_FEED_BACKOFF_CAP_MS".to_string(),
                reason: "must not be below the backoff floor".to_string(),
            });
        }
        if self.feed.stall_threshold <= self.feed.heartbeat_interval {
            return Err(ConfigError::Invalid {
                key: "QUOTE_FEED_STALL_THRESHOLD_MS".to_string(),
                reason: "must exceed the heartbeat interval".to_string(),
            });
        }
        if !(0.0..1.0).contains(&self.feed.backoff_jitter) {
            return Err(ConfigError::Invalid {
                key: "QUOTE_FEED_BACKOFF_JITTER".to_string(),
                reason: "must be in [0, 1)".to_string(),
            });
        }
        if self.cache.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "QUOTE_FEED_SWEEP_INTERVAL_SECS".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.simulator.tick_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "QUOTE_FEED_SIM_TICK_INTERVAL_MS".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A setting has an unusable value.
    #[error("invalid configuration for {key}: {reason}")]
    Invalid {
        /// Environment variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Split a comma-separated symbol list, normalizing and de-duplicating.
#[must_use]
pub fn parse_symbols(raw: &str) -> Vec<Symbol> {
    let mut symbols: Vec<Symbol> = raw.split(',').filter_map(normalize_symbol).collect();
    symbols.sort();
    symbols.dedup();
    symbols
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    fn u16(&self, key: &str, default: u16) -> u16 {
        self.parse(key).unwrap_or(default)
    }

    fn u64(&self, key: &str, default: u64) -> u64 {
        self.parse(key).unwrap_or(default)
    }

    fn usize(&self, key: &str, default: usize) -> usize {
        self.parse(key).unwrap_or(default)
    }

    fn f64(&self, key: &str, default: f64) -> f64 {
        self.parse::<f64>(key)
            .filter(|v| v.is_finite())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.parse::<u64>(key).map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.parse::<u64>(key).map_or(default, Duration::from_millis)
    }
}
