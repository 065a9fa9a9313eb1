//! Quote Feed Binary
//!
//! Starts the feed multiplexer against the simulated adapter, writes ticks
//! through the quote cache, and serves health and metrics.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quote-feed
//! ```
//!
//! # Environment Variables
//!
//! - `QUOTE_FEED_SYMBOLS`: Comma-separated seed symbols (default: AAPL,MSFT,SPY)
//! - `QUOTE_FEED_DB_PATH`: SQLite file for the quote cache (default: in-memory)
//! - `QUOTE_FEED_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `QUOTE_FEED_SWEEP_INTERVAL_SECS`: Retention sweep period (default: 3600)
//! - `OTEL_ENABLED`: Export spans over OTLP unless "false" (default: true)
//! - `RUST_LOG`: Log filter (default: warn,quote_feed=info)
//!
//! See `FeedConfig` for the full list.

use std::sync::Arc;
use std::time::Duration;

use quote_feed::application::ports::{SystemClock, TickStore};
use quote_feed::infrastructure::telemetry::{self, TelemetryConfig};
use quote_feed::{
    FeedConfig, FeedMultiplexer, HealthServer, HealthServerState, InMemoryTickStore, QuoteCache,
    SimulatedFeedAdapter, SimulatedFeedConfig, SqliteTickStore, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = match telemetry::init() {
        Ok(guard) => guard,
        Err(e) => {
            let guard = telemetry::init_with_config(&TelemetryConfig::stdout_only())?;
            tracing::warn!(error = %e, "Telemetry setup failed, logging to stdout only");
            guard
        }
    };

    tracing::info!("Starting quote feed");

    let _metrics_handle = init_metrics();

    let config = FeedConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let store: Arc<dyn TickStore> = match &config.cache.db_path {
        Some(path) => Arc::new(SqliteTickStore::open(path)?),
        None => Arc::new(InMemoryTickStore::new()),
    };
    let cache = Arc::new(QuoteCache::new(
        store,
        Arc::new(SystemClock),
        config.cache.max_age,
    ));

    let adapter = Arc::new(SimulatedFeedAdapter::new(SimulatedFeedConfig {
        tick_interval: config.simulator.tick_interval,
        ..SimulatedFeedConfig::default()
    }));
    let feed = Arc::new(FeedMultiplexer::new(
        adapter,
        Arc::clone(&cache),
        config.feed.clone(),
    ));

    // Spawn retention sweep
    let sweep_cache = Arc::clone(&cache);
    let sweep_token = shutdown_token.clone();
    let retention_hours = config.cache.retention_hours;
    let sweep_interval = config.cache.sweep_interval;
    let sweeper = tokio::spawn(async move {
        run_sweeper(sweep_cache, retention_hours, sweep_interval, sweep_token).await;
    });

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&feed),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    feed.start(config.symbols.iter()).await;

    tracing::info!("Quote feed ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        feed.stop().await;
        let _ = sweeper.await;
        let _ = health.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Graceful shutdown timed out"
        );
    }

    tracing::info!("Quote feed stopped");
    Ok(())
}

/// Periodically delete cache rows older than the retention horizon.
async fn run_sweeper(
    cache: Arc<QuoteCache>,
    retention_hours: u64,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                match cache.sweep(retention_hours).await {
                    Ok(removed) => tracing::debug!(removed, retention_hours, "Retention sweep complete"),
                    Err(e) => tracing::warn!(error = %e, "Retention sweep failed"),
                }
            }
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &FeedConfig) {
    tracing::info!(
        symbols = %config.symbols.join(","),
        health_port = config.server.health_port,
        cache_max_age_ms = u64::try_from(config.cache.max_age.as_millis()).unwrap_or(u64::MAX),
        persistent = config.cache.db_path.is_some(),
        "Configuration loaded"
    );
    tracing::debug!(
        heartbeat_ms = u64::try_from(config.feed.heartbeat_interval.as_millis()).unwrap_or(u64::MAX),
        stall_threshold_ms = u64::try_from(config.feed.stall_threshold.as_millis()).unwrap_or(u64::MAX),
        backoff_floor_ms = u64::try_from(config.feed.backoff_floor.as_millis()).unwrap_or(u64::MAX),
        backoff_cap_ms = u64::try_from(config.feed.backoff_cap.as_millis()).unwrap_or(u64::MAX),
        "Feed supervision settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
