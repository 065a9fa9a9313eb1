//! Shared fixtures for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use quote_feed::domain::streaming::{CachedQuote, Symbol, Tick};
use quote_feed::{AdapterError, FeedAdapter, InMemoryTickStore, StoreError, TickSink, TickStore};

/// Adapter call, in the order the multiplexer issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect { ok: bool },
    Disconnect,
    Subscribe(Vec<Symbol>),
}

/// Feed adapter with scripted failures and a call log.
#[derive(Default)]
pub struct ScriptedAdapter {
    connect_failures: Mutex<u32>,
    connect_panics: Mutex<u32>,
    subscribe_failures: Mutex<u32>,
    connect_delay: Mutex<Option<Duration>>,
    connected: Mutex<bool>,
    sink: Mutex<Option<TickSink>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_connects(&self, n: u32) {
        *self.connect_failures.lock() = n;
    }

    /// Panic inside the next `n` connects, after logging them as failed.
    pub fn panic_connects(&self, n: u32) {
        *self.connect_panics.lock() = n;
    }

    pub fn fail_subscribes(&self, n: u32) {
        *self.subscribe_failures.lock() = n;
    }

    pub fn delay_connects(&self, delay: Duration) {
        *self.connect_delay.lock() = Some(delay);
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, Call::Connect { .. }))
            .count()
    }

    pub fn disconnect_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, Call::Disconnect))
            .count()
    }

    pub fn subscriptions(&self) -> Vec<Vec<Symbol>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Subscribe(symbols) => Some(symbols.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_subscription(&self) -> Option<Vec<Symbol>> {
        self.subscriptions().pop()
    }

    /// Push a tick through the most recently installed sink.
    pub async fn emit(&self, tick: Tick) {
        let sink = self.sink.lock().clone();
        if let Some(sink) = sink {
            sink.deliver(tick).await;
        }
    }
}

#[async_trait]
impl FeedAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn connect(&self) -> Result<(), AdapterError> {
        let delay = *self.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let panic = take_one(&self.connect_panics);
        if panic {
            self.calls.lock().push(Call::Connect { ok: false });
            panic!("scripted connect panic");
        }

        let fail = take_one(&self.connect_failures);
        self.calls.lock().push(Call::Connect { ok: !fail });

        if fail {
            return Err(AdapterError::ConnectFailed {
                message: "scripted failure".to_string(),
            });
        }
        *self.connected.lock() = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        self.calls.lock().push(Call::Disconnect);
        *self.connected.lock() = false;
        *self.sink.lock() = None;
        Ok(())
    }

    async fn subscribe(&self, symbols: &[Symbol], sink: TickSink) -> Result<(), AdapterError> {
        if !self.is_connected() {
            return Err(AdapterError::NotConnected);
        }

        if take_one(&self.subscribe_failures) {
            return Err(AdapterError::SubscribeFailed {
                message: "scripted failure".to_string(),
            });
        }

        self.calls.lock().push(Call::Subscribe(symbols.to_vec()));
        *self.sink.lock() = Some(sink);
        Ok(())
    }
}

fn take_one(remaining: &Mutex<u32>) -> bool {
    let mut remaining = remaining.lock();
    let hit = *remaining > 0;
    *remaining = remaining.saturating_sub(1);
    hit
}

/// Store whose every operation fails.
#[derive(Debug, Default)]
pub struct FailingStore;

fn down() -> StoreError {
    StoreError::Unavailable {
        message: "store offline".to_string(),
    }
}

#[async_trait]
impl TickStore for FailingStore {
    async fn upsert(&self, _quote: CachedQuote) -> Result<(), StoreError> {
        Err(down())
    }

    async fn get(&self, _symbol: &str) -> Result<Option<CachedQuote>, StoreError> {
        Err(down())
    }

    async fn list_since(&self, _cutoff: DateTime<Utc>) -> Result<Vec<CachedQuote>, StoreError> {
        Err(down())
    }

    async fn delete_older_than(&self, _cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        Err(down())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Err(down())
    }
}

/// In-memory store whose writes take `delay` to land.
#[derive(Debug, Default)]
pub struct SlowStore {
    delay: Duration,
    inner: InMemoryTickStore,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: InMemoryTickStore::new(),
        }
    }
}

#[async_trait]
impl TickStore for SlowStore {
    async fn upsert(&self, quote: CachedQuote) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.upsert(quote).await
    }

    async fn get(&self, symbol: &str) -> Result<Option<CachedQuote>, StoreError> {
        self.inner.get(symbol).await
    }

    async fn list_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<CachedQuote>, StoreError> {
        self.inner.list_since(cutoff).await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.inner.delete_older_than(cutoff).await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.inner.count().await
    }
}
