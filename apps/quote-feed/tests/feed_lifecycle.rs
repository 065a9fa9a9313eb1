//! Feed Lifecycle Integration Tests
//!
//! Drives the multiplexer through connect failures, stalls, subscription
//! changes and shutdown against a scripted adapter on paused tokio time.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use tokio::time::sleep;

use common::{Call, FailingStore, ScriptedAdapter, SlowStore};
use quote_feed::domain::streaming::Tick;
use quote_feed::{
    ConnectionState, FeedMultiplexer, FeedSettings, InMemoryTickStore, ManualClock,
    NotAvailableReason, QuoteCache, QuoteLookup, TickStore,
};

fn cache_with(store: Arc<dyn TickStore>, clock: Arc<ManualClock>) -> Arc<QuoteCache> {
    Arc::new(QuoteCache::new(store, clock, Duration::from_secs(5)))
}

fn setup() -> (Arc<ScriptedAdapter>, FeedMultiplexer) {
    let adapter = ScriptedAdapter::new();
    let cache = cache_with(
        Arc::new(InMemoryTickStore::new()),
        Arc::new(ManualClock::default()),
    );
    let feed = FeedMultiplexer::new(adapter.clone(), cache, FeedSettings::default());
    (adapter, feed)
}

#[tokio::test(start_paused = true)]
async fn reconnect_converges_after_scripted_failures() {
    let (adapter, feed) = setup();
    adapter.fail_connects(3);

    feed.start(["AAPL"]).await;
    assert_eq!(feed.status().state, ConnectionState::Disconnected);
    assert_eq!(adapter.connect_count(), 1);

    // Attempts at 1s and 3s fail; the fourth lands at 1 + 2 + 4 = 7s.
    sleep(Duration::from_millis(6_990)).await;
    assert_eq!(adapter.connect_count(), 3);
    assert!(!feed.status().connected);

    sleep(Duration::from_millis(20)).await;
    let status = feed.status();
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(adapter.connect_count(), 4);
    assert_eq!(status.reconnect_attempts, 3);
    assert_eq!(status.adapter_errors, 3);
    assert_eq!(status.backoff_ms, 1_000);
    assert!(!status.reconnecting);

    feed.stop().await;
}

#[tokio::test(start_paused = true)]
async fn backoff_is_capped() {
    let adapter = ScriptedAdapter::new();
    let cache = cache_with(
        Arc::new(InMemoryTickStore::new()),
        Arc::new(ManualClock::default()),
    );
    let settings = FeedSettings {
        backoff_cap: Duration::from_secs(4),
        ..FeedSettings::default()
    };
    let feed = FeedMultiplexer::new(adapter.clone(), cache, settings);
    adapter.fail_connects(100);

    feed.start(["AAPL"]).await;
    // Waits: 1, 2, 4, 4, 4 seconds.
    sleep(Duration::from_millis(15_010)).await;

    assert_eq!(adapter.connect_count(), 6);
    feed.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stall_triggers_exactly_one_disconnect_connect_pair() {
    let (adapter, feed) = setup();
    feed.start(["AAPL"]).await;
    assert_eq!(feed.status().state, ConnectionState::Connected);

    // Silence past the 10s threshold; the heartbeat at 12s notices.
    sleep(Duration::from_millis(12_500)).await;
    assert_eq!(feed.status().state, ConnectionState::Reconnecting);
    assert_eq!(adapter.disconnect_count(), 1);
    assert_eq!(adapter.connect_count(), 1);

    sleep(Duration::from_millis(1_000)).await;
    let status = feed.status();
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.stalls_detected, 1);
    assert_eq!(adapter.disconnect_count(), 1);
    assert_eq!(adapter.connect_count(), 2);

    feed.stop().await;
}

#[tokio::test(start_paused = true)]
async fn steady_ticks_keep_connection() {
    let (adapter, feed) = setup();
    feed.start(["AAPL"]).await;

    for _ in 0..30 {
        adapter
            .emit(Tick::new("AAPL", "scripted").with_last(Decimal::ONE))
            .await;
        sleep(Duration::from_secs(1)).await;
    }

    let status = feed.status();
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.stalls_detected, 0);
    assert_eq!(status.ticks_received, 30);
    assert_eq!(adapter.connect_count(), 1);

    feed.stop().await;
}

#[tokio::test(start_paused = true)]
async fn symbols_added_during_backoff_are_replayed() {
    let (adapter, feed) = setup();
    adapter.fail_connects(2);

    feed.start(["AAPL"]).await;
    let changes = feed.add_symbols(["msft"]).await;
    assert!(changes.subscribe.contains("MSFT"));
    assert!(adapter.subscriptions().is_empty());

    sleep(Duration::from_millis(3_100)).await;

    assert!(feed.status().connected);
    assert_eq!(
        adapter.last_subscription().unwrap(),
        vec!["AAPL".to_string(), "MSFT".to_string()]
    );
    feed.stop().await;
}

#[tokio::test(start_paused = true)]
async fn symbols_changed_while_reconnecting_are_replayed() {
    let (adapter, feed) = setup();
    feed.start(["AAPL", "SPY"]).await;

    sleep(Duration::from_millis(12_500)).await;
    assert_eq!(feed.status().state, ConnectionState::Reconnecting);

    feed.remove_symbols(["SPY"]).await;
    feed.add_symbols(["QQQ"]).await;
    let subscribes_before = adapter.subscriptions().len();

    sleep(Duration::from_millis(1_000)).await;

    assert_eq!(adapter.subscriptions().len(), subscribes_before + 1);
    assert_eq!(
        adapter.last_subscription().unwrap(),
        vec!["AAPL".to_string(), "QQQ".to_string()]
    );
    feed.stop().await;
}

#[tokio::test(start_paused = true)]
async fn set_subscriptions_while_connected_issues_full_set() {
    let (adapter, feed) = setup();
    feed.start(["AAPL"]).await;

    let changes = feed.set_subscriptions(["MSFT", "SPY", "MSFT"]).await;

    assert!(changes.unsubscribe.contains("AAPL"));
    assert_eq!(changes.subscribe.len(), 2);
    assert_eq!(
        adapter.last_subscription().unwrap(),
        vec!["MSFT".to_string(), "SPY".to_string()]
    );
    assert_eq!(
        feed.status().subscribed_symbols,
        vec!["MSFT".to_string(), "SPY".to_string()]
    );
    feed.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_subscribe_counts_as_failed_attempt() {
    let (adapter, feed) = setup();
    adapter.fail_subscribes(1);

    feed.start(["AAPL"]).await;
    assert_eq!(feed.status().state, ConnectionState::Disconnected);
    assert_eq!(adapter.disconnect_count(), 1);

    sleep(Duration::from_millis(1_010)).await;
    assert!(feed.status().connected);
    assert_eq!(adapter.connect_count(), 2);
    assert_eq!(feed.status().adapter_errors, 1);
    feed.stop().await;
}

#[tokio::test(start_paused = true)]
async fn written_tick_expires_after_clock_advance() {
    let adapter = ScriptedAdapter::new();
    let clock = Arc::new(ManualClock::new(
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
    ));
    let cache = cache_with(Arc::new(InMemoryTickStore::new()), clock.clone());
    let feed = FeedMultiplexer::new(adapter.clone(), cache.clone(), FeedSettings::default());

    feed.start(["AAPL"]).await;
    adapter
        .emit(Tick::new("AAPL", "x").with_last(Decimal::new(1500, 1)))
        .await;
    sleep(Duration::from_millis(1)).await;

    let QuoteLookup::Fresh(row) = cache.get_fresh("AAPL", Duration::from_millis(5_000)).await
    else {
        panic!("expected a fresh row");
    };
    assert_eq!(row.last, Some(Decimal::new(1500, 1)));
    assert_eq!(row.source, "x");

    clock.advance(Duration::from_millis(5_001));
    assert_eq!(
        cache.get_fresh("AAPL", Duration::from_millis(5_000)).await,
        QuoteLookup::NotAvailable(NotAvailableReason::Stale {
            age: Duration::from_millis(5_001)
        })
    );

    feed.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_during_backoff_cancels_retries() {
    let (adapter, feed) = setup();
    adapter.fail_connects(10);

    feed.start(["AAPL"]).await;
    sleep(Duration::from_millis(500)).await;
    feed.stop().await;

    assert_eq!(feed.status().state, ConnectionState::Disconnected);
    assert!(!feed.status().reconnecting);
    sleep(Duration::from_secs(60)).await;
    assert_eq!(adapter.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_disconnects_once_and_allows_restart() {
    let (adapter, feed) = setup();
    feed.start(["AAPL"]).await;

    feed.stop().await;
    feed.stop().await;
    assert_eq!(adapter.disconnect_count(), 1);
    assert!(!adapter.is_connected());

    feed.start(["MSFT"]).await;
    assert!(feed.status().connected);
    assert_eq!(adapter.last_subscription().unwrap(), vec!["MSFT".to_string()]);
    feed.stop().await;
}

#[tokio::test(start_paused = true)]
async fn connect_completing_after_stop_is_torn_down() {
    let (adapter, feed) = setup();
    adapter.delay_connects(Duration::from_millis(500));

    tokio::join!(feed.start(["AAPL"]), async {
        sleep(Duration::from_millis(100)).await;
        feed.stop().await;
    });

    assert_eq!(feed.status().state, ConnectionState::Disconnected);
    assert!(!adapter.is_connected());
    assert_eq!(
        adapter.calls(),
        vec![
            Call::Connect { ok: true },
            Call::Subscribe(vec!["AAPL".to_string()]),
            Call::Disconnect,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn store_failures_do_not_disturb_the_feed() {
    let adapter = ScriptedAdapter::new();
    let cache = cache_with(Arc::new(FailingStore), Arc::new(ManualClock::default()));
    let feed = FeedMultiplexer::new(adapter.clone(), cache.clone(), FeedSettings::default());
    let mut ticks = feed.ticks();

    feed.start(["AAPL"]).await;
    for i in 0..5 {
        adapter
            .emit(Tick::new("AAPL", "scripted").with_last(Decimal::from(i)))
            .await;
    }

    for i in 0..5 {
        assert_eq!(ticks.recv().await.unwrap().last, Some(Decimal::from(i)));
    }
    sleep(Duration::from_millis(1)).await;
    let status = feed.status();
    assert!(status.connected);
    assert_eq!(status.ticks_received, 5);
    assert_eq!(adapter.connect_count(), 1);

    let health = cache.health();
    assert!(health.is_degraded());
    assert_eq!(health.write_failures, 5);
    assert_eq!(
        cache.get_fresh_default("AAPL").await,
        QuoteLookup::NotAvailable(NotAvailableReason::StoreUnavailable)
    );

    feed.stop().await;
}

#[tokio::test(start_paused = true)]
async fn panicking_first_connect_schedules_reconnect() {
    let (adapter, feed) = setup();
    adapter.panic_connects(1);

    feed.start(["AAPL"]).await;
    let status = feed.status();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(status.reconnecting);
    assert_eq!(status.adapter_errors, 1);

    sleep(Duration::from_millis(1_010)).await;
    let status = feed.status();
    assert_eq!(status.state, ConnectionState::Connected);
    assert!(!status.reconnecting);
    assert_eq!(adapter.connect_count(), 2);
    assert_eq!(adapter.last_subscription().unwrap(), vec!["AAPL".to_string()]);
    feed.stop().await;
}

#[tokio::test(start_paused = true)]
async fn panicking_retry_keeps_the_backoff_loop_alive() {
    let (adapter, feed) = setup();
    feed.start(["AAPL"]).await;
    adapter.panic_connects(1);

    // Stall at 12s, first retry at 13s panics, second retry at 15s lands.
    sleep(Duration::from_millis(13_500)).await;
    let status = feed.status();
    assert_eq!(status.state, ConnectionState::Reconnecting);
    assert!(status.reconnecting);
    assert_eq!(status.adapter_errors, 1);
    assert_eq!(status.backoff_ms, 2_000);
    assert_eq!(adapter.connect_count(), 2);

    sleep(Duration::from_millis(1_600)).await;
    let status = feed.status();
    assert_eq!(status.state, ConnectionState::Connected);
    assert!(!status.reconnecting);
    assert_eq!(status.stalls_detected, 1);
    assert_eq!(adapter.connect_count(), 3);
    feed.stop().await;
}

#[tokio::test(start_paused = true)]
async fn slow_store_does_not_stall_the_feed() {
    let adapter = ScriptedAdapter::new();
    let cache = cache_with(
        Arc::new(SlowStore::new(Duration::from_secs(15))),
        Arc::new(ManualClock::default()),
    );
    let feed = FeedMultiplexer::new(adapter.clone(), cache.clone(), FeedSettings::default());
    feed.start(["AAPL"]).await;

    for i in 0..30 {
        adapter
            .emit(Tick::new("AAPL", "scripted").with_last(Decimal::from(i)))
            .await;
        sleep(Duration::from_secs(1)).await;
    }

    let status = feed.status();
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.stalls_detected, 0);
    assert_eq!(status.ticks_received, 30);
    assert_eq!(status.cache_writes_dropped, 0);
    assert_eq!(adapter.connect_count(), 1);
    assert!(cache.health().writes >= 1);

    feed.stop().await;
    assert_eq!(adapter.disconnect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn full_writer_queue_drops_cache_writes_only() {
    let adapter = ScriptedAdapter::new();
    let cache = cache_with(
        Arc::new(SlowStore::new(Duration::from_secs(1))),
        Arc::new(ManualClock::default()),
    );
    let settings = FeedSettings {
        tick_channel_capacity: 2,
        ..FeedSettings::default()
    };
    let feed = FeedMultiplexer::new(adapter.clone(), cache.clone(), settings);
    feed.start(["AAPL"]).await;

    for i in 0..10 {
        adapter
            .emit(Tick::new("AAPL", "scripted").with_last(Decimal::from(i)))
            .await;
    }

    let status = feed.status();
    assert_eq!(status.ticks_received, 10);
    assert!(status.cache_writes_dropped >= 7);
    assert!(status.connected);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(cache.health().writes + status.cache_writes_dropped, 10);
    feed.stop().await;
}
