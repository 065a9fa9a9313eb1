//! Configuration Module
//!
//! Configuration loading for the quote feed service.

mod settings;

pub use settings::{
    CacheSettings, ConfigError, FeedConfig, FeedSettings, ServerSettings, SimulatorSettings,
    parse_symbols,
};
