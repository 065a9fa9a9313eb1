//! Simulated Feed Adapter
//!
//! Provider-agnostic random-walk tick generator. Used by the binary when no
//! real provider is wired in, and by tests that need a live source with
//! controllable failure modes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::application::ports::{AdapterError, FeedAdapter, TickSink};
use crate::domain::streaming::{Symbol, Tick};

/// Configuration for the simulated feed.
#[derive(Debug, Clone)]
pub struct SimulatedFeedConfig {
    /// Period between tick batches (one tick per subscribed symbol).
    pub tick_interval: Duration,
    /// Name reported as the tick source.
    pub source: String,
    /// Starting price for every symbol.
    pub seed_price: Decimal,
    /// Largest per-step move in basis points.
    pub max_step_bps: i64,
}

impl Default for SimulatedFeedConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(250),
            source: "simulated".to_string(),
            seed_price: Decimal::from(100),
            max_step_bps: 5,
        }
    }
}

struct Generator {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Random-walk feed adapter.
pub struct SimulatedFeedAdapter {
    config: SimulatedFeedConfig,
    connected: AtomicBool,
    silent: Arc<AtomicBool>,
    fail_connects: AtomicU32,
    generator: Mutex<Option<Generator>>,
}

impl SimulatedFeedAdapter {
    /// Create a disconnected adapter.
    #[must_use]
    pub fn new(config: SimulatedFeedConfig) -> Self {
        Self {
            config,
            connected: AtomicBool::new(false),
            silent: Arc::new(AtomicBool::new(false)),
            fail_connects: AtomicU32::new(0),
            generator: Mutex::new(None),
        }
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Stop (or resume) emitting ticks without dropping the connection.
    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    /// Check if the adapter believes it is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn stop_generator(&self) {
        if let Some(generator) = self.generator.lock().take() {
            generator.cancel.cancel();
            generator.handle.abort();
        }
    }
}

impl Drop for SimulatedFeedAdapter {
    fn drop(&mut self) {
        self.stop_generator();
    }
}

#[async_trait]
impl FeedAdapter for SimulatedFeedAdapter {
    fn name(&self) -> &str {
        &self.config.source
    }

    async fn connect(&self) -> Result<(), AdapterError> {
        let remaining = self.fail_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(AdapterError::ConnectFailed {
                message: "simulated connect failure".to_string(),
            });
        }

        self.connected.store(true, Ordering::SeqCst);
        info!(source = %self.config.source, "Simulated feed connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        self.stop_generator();
        self.connected.store(false, Ordering::SeqCst);
        debug!(source = %self.config.source, "Simulated feed disconnected");
        Ok(())
    }

    async fn subscribe(&self, symbols: &[Symbol], sink: TickSink) -> Result<(), AdapterError> {
        if !self.is_connected() {
            return Err(AdapterError::NotConnected);
        }

        self.stop_generator();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(generate(
            self.config.clone(),
            symbols.to_vec(),
            sink,
            Arc::clone(&self.silent),
            cancel.clone(),
        ));
        *self.generator.lock() = Some(Generator { cancel, handle });

        debug!(count = symbols.len(), "Simulated feed subscription replaced");
        Ok(())
    }
}

async fn generate(
    config: SimulatedFeedConfig,
    symbols: Vec<Symbol>,
    sink: TickSink,
    silent: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let mut prices: HashMap<Symbol, Decimal> = symbols
        .iter()
        .map(|s| (s.clone(), config.seed_price))
        .collect();
    let mut interval = tokio::time::interval(config.tick_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                if silent.load(Ordering::SeqCst) {
                    continue;
                }
                for symbol in &symbols {
                    let Some(price) = prices.get_mut(symbol) else {
                        continue;
                    };
                    *price = step(*price, config.max_step_bps);
                    sink.deliver(quote_around(symbol, *price, &config.source)).await;
                }
            }
        }
    }
}

fn step(price: Decimal, max_step_bps: i64) -> Decimal {
    let bound = max_step_bps.max(0);
    let bps = rand::rng().random_range(-bound..=bound);
    let next = price + price * Decimal::new(bps, 4);
    if next > Decimal::ZERO {
        next.round_dp(4)
    } else {
        price
    }
}

fn quote_around(symbol: &str, last: Decimal, source: &str) -> Tick {
    let half_spread = (last * Decimal::new(1, 4)).round_dp(4);
    let volume = rand::rng().random_range(1..=10i64) * 100;

    Tick::new(symbol, source)
        .with_bid(last - half_spread)
        .with_ask(last + half_spread)
        .with_last(last)
        .with_volume(Decimal::from(volume))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::TickHandler;

    #[derive(Default)]
    struct Collector {
        ticks: Mutex<Vec<Tick>>,
    }

    #[async_trait]
    impl TickHandler for Collector {
        async fn handle_tick(&self, tick: Tick) {
            self.ticks.lock().push(tick);
        }
    }

    fn fast() -> SimulatedFeedConfig {
        SimulatedFeedConfig {
            tick_interval: Duration::from_millis(10),
            ..SimulatedFeedConfig::default()
        }
    }

    #[tokio::test]
    async fn subscribe_requires_connection() {
        let adapter = SimulatedFeedAdapter::new(fast());
        let sink = TickSink::new(Arc::new(Collector::default()));

        let err = adapter.subscribe(&["AAPL".to_string()], sink).await;

        assert!(matches!(err, Err(AdapterError::NotConnected)));
    }

    #[tokio::test]
    async fn scripted_connect_failures() {
        let adapter = SimulatedFeedAdapter::new(fast());
        adapter.fail_next_connects(2);

        assert!(adapter.connect().await.is_err());
        assert!(adapter.connect().await.is_err());
        assert!(adapter.connect().await.is_ok());
        assert!(adapter.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn emits_ticks_for_subscribed_symbols_only() {
        let adapter = SimulatedFeedAdapter::new(fast());
        let collector = Arc::new(Collector::default());
        adapter.connect().await.unwrap();

        adapter
            .subscribe(&["AAPL".to_string()], TickSink::new(collector.clone()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(35)).await;
        adapter
            .subscribe(&["MSFT".to_string()], TickSink::new(collector.clone()))
            .await
            .unwrap();
        collector.ticks.lock().clear();
        tokio::time::sleep(Duration::from_millis(35)).await;

        let ticks = collector.ticks.lock();
        assert!(!ticks.is_empty());
        assert!(ticks.iter().all(|t| t.symbol == "MSFT"));
        assert!(ticks.iter().all(|t| t.bid < t.ask));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_and_disconnected_emit_nothing() {
        let adapter = SimulatedFeedAdapter::new(fast());
        let collector = Arc::new(Collector::default());
        adapter.connect().await.unwrap();
        adapter
            .subscribe(&["SPY".to_string()], TickSink::new(collector.clone()))
            .await
            .unwrap();

        adapter.set_silent(true);
        tokio::time::sleep(Duration::from_millis(5)).await;
        collector.ticks.lock().clear();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(collector.ticks.lock().is_empty());

        adapter.set_silent(false);
        adapter.disconnect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(collector.ticks.lock().is_empty());
        assert!(!adapter.is_connected());
    }

    #[test]
    fn random_walk_stays_positive() {
        let mut price = Decimal::from(100);
        for _ in 0..1000 {
            price = step(price, 50);
            assert!(price > Decimal::ZERO);
        }
    }
}
