//! Feed Multiplexer
//!
//! Owns the single upstream connection, the desired subscription set, the
//! heartbeat watchdog and the reconnect loop. Ticks pushed by the adapter are
//! fanned out to in-process listeners and written through the quote cache.
//!
//! # Concurrency
//!
//! - Adapter calls (`connect`, `disconnect`, `subscribe`) are serialized
//!   through an async lifecycle lock held only for the duration of the call,
//!   never across a backoff sleep.
//! - Every adapter call runs under `catch_unwind`; a panic becomes an
//!   `AdapterError::Panicked` and feeds the backoff loop like any failure.
//! - At most one reconnect task runs at a time (`reconnecting` guard, cleared
//!   on drop).
//! - `stop()` cancels the heartbeat and any pending retry through a
//!   `CancellationToken`; a connect that completes after `stop()` is torn
//!   down and never publishes `Connected`.
//! - Cache writes happen on a dedicated writer task fed by a bounded channel.
//!   The delivery path never awaits the store; ticks that find the channel
//!   full are dropped from the cache (not from listeners) and counted.
//!
//! ```text
//! adapter ──► TickSink ──► liveness ──► broadcast ──► listeners
//!                                   └─► writer ──► QuoteCache ──► TickStore
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatMonitor, LivenessState};
use super::reconnect::{BackoffConfig, BackoffPolicy};
use crate::application::ports::{AdapterError, FeedAdapter, TickHandler, TickSink};
use crate::application::services::QuoteCache;
use crate::domain::connection::ConnectionState;
use crate::domain::streaming::{Symbol, Tick};
use crate::domain::subscription::{SubscriptionChanges, SubscriptionSet};
use crate::infrastructure::broadcast::TickBroadcaster;
use crate::infrastructure::config::FeedSettings;
use crate::infrastructure::metrics;

/// How long `stop()` waits for queued cache writes before abandoning them.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Status
// =============================================================================

/// Point-in-time view of the multiplexer.
#[derive(Debug, Clone, Serialize)]
pub struct FeedStatus {
    /// Provider name.
    pub source: String,
    /// Connection state.
    pub state: ConnectionState,
    /// Shorthand for `state == Connected`.
    pub connected: bool,
    /// Whether a reconnect task is in flight.
    pub reconnecting: bool,
    /// Milliseconds since the last tick (or since the last successful connect).
    pub last_tick_age_ms: u64,
    /// Desired subscription set, sorted.
    pub subscribed_symbols: Vec<Symbol>,
    /// Current uncapped backoff.
    pub backoff_ms: u64,
    /// Ticks received since construction.
    pub ticks_received: u64,
    /// Reconnect attempts since construction.
    pub reconnect_attempts: u64,
    /// Stalls detected since construction.
    pub stalls_detected: u64,
    /// Failed or panicked adapter calls (connect, subscribe, disconnect).
    pub adapter_errors: u64,
    /// Ticks not written to the cache because the writer queue was full.
    pub cache_writes_dropped: u64,
    /// Active in-process tick listeners.
    pub listeners: usize,
}

// =============================================================================
// Internals
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReconnectCause {
    InitialConnectFailed,
    Stalled,
}

#[derive(Debug, Clone, Copy)]
enum AdapterOp {
    Connect,
    Subscribe,
    Disconnect,
}

impl AdapterOp {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Subscribe => "subscribe",
            Self::Disconnect => "disconnect",
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum EstablishError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error("multiplexer stopped")]
    Stopped,
}

struct RunningTasks {
    cancel: CancellationToken,
    heartbeat: JoinHandle<()>,
    supervisor: JoinHandle<()>,
    writer: JoinHandle<()>,
}

struct Shared {
    adapter: Arc<dyn FeedAdapter>,
    cache: Arc<QuoteCache>,
    settings: FeedSettings,
    state: RwLock<ConnectionState>,
    reconnecting: AtomicBool,
    stopped: AtomicBool,
    cancel: RwLock<CancellationToken>,
    liveness: Arc<LivenessState>,
    backoff: Mutex<BackoffPolicy>,
    subscriptions: SubscriptionSet,
    broadcaster: TickBroadcaster,
    writer: RwLock<Option<mpsc::Sender<Tick>>>,
    lifecycle: tokio::sync::Mutex<()>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    ticks_received: AtomicU64,
    reconnect_attempts: AtomicU64,
    stalls_detected: AtomicU64,
    adapter_errors: AtomicU64,
    cache_writes_dropped: AtomicU64,
}

/// Clears the `reconnecting` flag when the reconnect task ends, however it
/// ends.
struct ReconnectingGuard(Arc<Shared>);

impl Drop for ReconnectingGuard {
    fn drop(&mut self) {
        self.0.reconnecting.store(false, Ordering::SeqCst);
    }
}

/// Tick handler installed into the adapter. Holds a weak reference so the
/// adapter never keeps the multiplexer alive.
struct SinkHandle {
    shared: Weak<Shared>,
}

#[async_trait]
impl TickHandler for SinkHandle {
    async fn handle_tick(&self, tick: Tick) {
        if let Some(shared) = self.shared.upgrade() {
            shared.ingest(tick);
        }
    }
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        if previous != next {
            debug!(from = %previous, to = %next, "Feed state transition");
        }
        metrics::set_connection_state(next);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn sink(self: &Arc<Self>) -> TickSink {
        TickSink::new(Arc::new(SinkHandle {
            shared: Arc::downgrade(self),
        }))
    }

    /// Record liveness, fan out, and queue the cache write. Never awaits.
    fn ingest(&self, tick: Tick) {
        self.liveness.record_tick();
        self.ticks_received.fetch_add(1, Ordering::Relaxed);
        metrics::record_tick_received(&tick.source);

        self.broadcaster.send(tick.clone());

        let writer = self.writer.read().clone();
        let queued = match writer {
            Some(writer) => writer.try_send(tick).map_err(|e| match e {
                TrySendError::Full(_) => "queue full",
                TrySendError::Closed(_) => "writer closed",
            }),
            None => Err("writer not running"),
        };
        if let Err(reason) = queued {
            self.cache_writes_dropped.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache_write_dropped();
            debug!(reason, "Cache write dropped");
        }
    }

    /// Open the writer queue and return the task draining it into the cache.
    fn spawn_writer(&self) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::channel::<Tick>(self.settings.tick_channel_capacity.max(1));
        *self.writer.write() = Some(tx);

        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            while let Some(tick) = rx.recv().await {
                cache.upsert(&tick).await;
            }
            debug!("Cache writer drained");
        })
    }

    /// Run one adapter call, turning a panic into an error and counting
    /// failures.
    async fn call_adapter<F>(&self, op: AdapterOp, call: F) -> Result<(), AdapterError>
    where
        F: Future<Output = Result<(), AdapterError>>,
    {
        let result = match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(AdapterError::Panicked {
                operation: op.as_str(),
                message: panic_message(payload.as_ref()),
            }),
        };
        if result.is_err() {
            self.adapter_errors.fetch_add(1, Ordering::Relaxed);
            metrics::record_adapter_error(op.as_str());
        }
        result
    }

    /// Connect and replay the full subscription set.
    async fn establish(self: &Arc<Self>) -> Result<(), EstablishError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_stopped() {
            return Err(EstablishError::Stopped);
        }

        self.call_adapter(AdapterOp::Connect, self.adapter.connect())
            .await?;

        let symbols = self.subscriptions.snapshot();
        if let Err(e) = self
            .call_adapter(
                AdapterOp::Subscribe,
                self.adapter.subscribe(&symbols, self.sink()),
            )
            .await
        {
            if let Err(disconnect_err) = self
                .call_adapter(AdapterOp::Disconnect, self.adapter.disconnect())
                .await
            {
                debug!(error = %disconnect_err, "Disconnect after failed subscribe also failed");
            }
            return Err(e.into());
        }

        if self.is_stopped() {
            if let Err(e) = self
                .call_adapter(AdapterOp::Disconnect, self.adapter.disconnect())
                .await
            {
                warn!(error = %e, "Failed to tear down connection completed after stop");
            }
            return Err(EstablishError::Stopped);
        }

        self.backoff.lock().reset();
        self.liveness.reset();
        self.set_state(ConnectionState::Connected);
        info!(
            source = %self.adapter.name(),
            symbols = symbols.len(),
            "Feed connected and subscribed"
        );
        Ok(())
    }

    /// Push the current set upstream if connected; otherwise defer to the
    /// next successful connect.
    async fn push_subscriptions(self: &Arc<Self>) {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.state().is_connected() {
            debug!("Not connected, subscription change deferred until reconnect");
            return;
        }

        let symbols = self.subscriptions.snapshot();
        if let Err(e) = self
            .call_adapter(
                AdapterOp::Subscribe,
                self.adapter.subscribe(&symbols, self.sink()),
            )
            .await
        {
            warn!(error = %e, symbols = symbols.len(), "Failed to push subscription change");
        }
    }

    fn spawn_reconnect(self: &Arc<Self>, cause: ReconnectCause) {
        if self.is_stopped() {
            return;
        }
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            debug!("Reconnect already in flight");
            return;
        }

        let shared = Arc::clone(self);
        let cancel = self.cancel.read().clone();
        let handle = tokio::spawn(async move {
            let guard = ReconnectingGuard(shared);
            guard.0.reconnect_loop(cause, &cancel).await;
        });
        *self.reconnect_task.lock() = Some(handle);
    }

    async fn reconnect_loop(self: &Arc<Self>, cause: ReconnectCause, cancel: &CancellationToken) {
        if cause == ReconnectCause::Stalled {
            self.set_state(ConnectionState::Reconnecting);
            let _lifecycle = self.lifecycle.lock().await;
            if let Err(e) = self
                .call_adapter(AdapterOp::Disconnect, self.adapter.disconnect())
                .await
            {
                warn!(error = %e, "Disconnect of stalled feed failed");
            }
        }

        loop {
            if cancel.is_cancelled() || self.is_stopped() {
                return;
            }

            let delay = self.backoff.lock().delay();
            info!(
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Waiting before feed reconnect attempt"
            );
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            let attempt = self.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
            metrics::record_reconnect_attempt();
            if cause == ReconnectCause::InitialConnectFailed {
                self.set_state(ConnectionState::Connecting);
            }

            match self.establish().await {
                Ok(()) => {
                    info!(attempt, "Feed reconnected");
                    return;
                }
                Err(EstablishError::Stopped) => return,
                Err(EstablishError::Adapter(e)) => {
                    let next_backoff = {
                        let mut backoff = self.backoff.lock();
                        backoff.escalate();
                        backoff.current_backoff()
                    };
                    if cause == ReconnectCause::InitialConnectFailed {
                        self.set_state(ConnectionState::Disconnected);
                    }
                    warn!(
                        attempt,
                        error = %e,
                        next_backoff_ms = u64::try_from(next_backoff.as_millis()).unwrap_or(u64::MAX),
                        "Feed reconnect attempt failed"
                    );
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

async fn supervise(
    shared: Arc<Shared>,
    mut events: mpsc::Receiver<HeartbeatEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => {
                let Some(HeartbeatEvent::Stalled { since_last_tick }) = event else {
                    break;
                };
                if !shared.state().is_connected() || shared.reconnecting.load(Ordering::SeqCst) {
                    continue;
                }

                shared.stalls_detected.fetch_add(1, Ordering::Relaxed);
                metrics::record_stall_detected();
                warn!(
                    since_last_tick_ms = u64::try_from(since_last_tick.as_millis()).unwrap_or(u64::MAX),
                    "Feed stalled, reconnecting"
                );
                shared.spawn_reconnect(ReconnectCause::Stalled);
            }
        }
    }
}

// =============================================================================
// Feed Multiplexer
// =============================================================================

/// Supervised single upstream connection with fan-out and write-through.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use quote_feed::application::ports::SystemClock;
/// use quote_feed::application::services::QuoteCache;
/// use quote_feed::infrastructure::config::FeedSettings;
/// use quote_feed::infrastructure::feed::{
///     FeedMultiplexer, SimulatedFeedAdapter, SimulatedFeedConfig,
/// };
/// use quote_feed::infrastructure::persistence::InMemoryTickStore;
///
/// async fn example() {
///     let cache = Arc::new(QuoteCache::new(
///         Arc::new(InMemoryTickStore::new()),
///         Arc::new(SystemClock),
///         Duration::from_secs(5),
///     ));
///     let adapter = Arc::new(SimulatedFeedAdapter::new(SimulatedFeedConfig::default()));
///     let feed = FeedMultiplexer::new(adapter, cache.clone(), FeedSettings::default());
///
///     feed.start(["AAPL", "MSFT"]).await;
///     let mut ticks = feed.ticks();
///     let _first = ticks.recv().await;
///
///     feed.add_symbols(["SPY"]).await;
///     feed.stop().await;
/// }
/// ```
pub struct FeedMultiplexer {
    shared: Arc<Shared>,
    tasks: Mutex<Option<RunningTasks>>,
}

impl FeedMultiplexer {
    /// Create a stopped multiplexer.
    #[must_use]
    pub fn new(
        adapter: Arc<dyn FeedAdapter>,
        cache: Arc<QuoteCache>,
        settings: FeedSettings,
    ) -> Self {
        let backoff = BackoffPolicy::new(BackoffConfig::from_feed_settings(&settings));
        let broadcaster = TickBroadcaster::new(settings.tick_channel_capacity);

        Self {
            shared: Arc::new(Shared {
                adapter,
                cache,
                settings,
                state: RwLock::new(ConnectionState::Disconnected),
                reconnecting: AtomicBool::new(false),
                stopped: AtomicBool::new(true),
                cancel: RwLock::new(CancellationToken::new()),
                liveness: Arc::new(LivenessState::new()),
                backoff: Mutex::new(backoff),
                subscriptions: SubscriptionSet::new(),
                broadcaster,
                writer: RwLock::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                reconnect_task: Mutex::new(None),
                ticks_received: AtomicU64::new(0),
                reconnect_attempts: AtomicU64::new(0),
                stalls_detected: AtomicU64::new(0),
                adapter_errors: AtomicU64::new(0),
                cache_writes_dropped: AtomicU64::new(0),
            }),
            tasks: Mutex::new(None),
        }
    }

    /// Start the feed with `initial` as the subscription set.
    ///
    /// Starts the heartbeat watchdog and the cache writer unconditionally. A
    /// failed or panicking first connect leaves the feed `Disconnected` with a
    /// reconnect scheduled; it is never reported as an error. Calling `start`
    /// while running is a no-op.
    pub async fn start<I, S>(&self, initial: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let shared = &self.shared;
        {
            let mut tasks = self.tasks.lock();
            if tasks.is_some() {
                warn!("Feed multiplexer already running, ignoring start");
                return;
            }

            let cancel = CancellationToken::new();
            shared.stopped.store(false, Ordering::SeqCst);
            *shared.cancel.write() = cancel.clone();
            shared.liveness.reset();

            let (event_tx, event_rx) = mpsc::channel(4);
            let heartbeat = tokio::spawn(
                HeartbeatMonitor::new(
                    HeartbeatConfig::from_feed_settings(&shared.settings),
                    Arc::clone(&shared.liveness),
                    event_tx,
                    cancel.clone(),
                )
                .run(),
            );
            let supervisor = tokio::spawn(supervise(Arc::clone(shared), event_rx, cancel.clone()));
            let writer = shared.spawn_writer();

            *tasks = Some(RunningTasks {
                cancel,
                heartbeat,
                supervisor,
                writer,
            });
        }

        shared.subscriptions.replace(initial);
        metrics::set_subscriptions(shared.subscriptions.len());
        info!(
            source = %shared.adapter.name(),
            symbols = shared.subscriptions.len(),
            "Starting feed multiplexer"
        );

        shared.set_state(ConnectionState::Connecting);
        match shared.establish().await {
            Ok(()) | Err(EstablishError::Stopped) => {}
            Err(EstablishError::Adapter(e)) => {
                warn!(error = %e, "Initial feed connect failed, scheduling reconnect");
                shared.set_state(ConnectionState::Disconnected);
                shared.spawn_reconnect(ReconnectCause::InitialConnectFailed);
            }
        }
    }

    /// Stop the feed. Safe from any state, including mid-backoff.
    pub async fn stop(&self) {
        let Some(tasks) = self.tasks.lock().take() else {
            debug!("Feed multiplexer not running, ignoring stop");
            return;
        };
        let shared = &self.shared;

        shared.stopped.store(true, Ordering::SeqCst);
        tasks.cancel.cancel();
        let _ = tasks.heartbeat.await;
        let _ = tasks.supervisor.await;

        let pending = shared.reconnect_task.lock().take();
        if let Some(handle) = pending
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Reconnect task ended abnormally");
        }

        {
            let _lifecycle = shared.lifecycle.lock().await;
            if shared.state().is_connected()
                && let Err(e) = shared
                    .call_adapter(AdapterOp::Disconnect, shared.adapter.disconnect())
                    .await
            {
                warn!(error = %e, "Feed disconnect failed during stop");
            }
            shared.set_state(ConnectionState::Disconnected);
        }
        shared.reconnecting.store(false, Ordering::SeqCst);

        drop(shared.writer.write().take());
        let mut writer = tasks.writer;
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
            .await
            .is_err()
        {
            warn!(
                timeout_ms = u64::try_from(WRITER_DRAIN_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
                "Cache writer did not drain in time, abandoning queued writes"
            );
            writer.abort();
        }

        info!("Feed multiplexer stopped");
    }

    /// Replace the subscription set and push it upstream if connected.
    ///
    /// Upstream failures are logged; the set keeps the caller's intent either
    /// way and is replayed on the next connect.
    pub async fn set_subscriptions<I, S>(&self, symbols: I) -> SubscriptionChanges
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let changes = self.shared.subscriptions.replace(symbols);
        metrics::set_subscriptions(self.shared.subscriptions.len());
        self.shared.push_subscriptions().await;
        changes
    }

    /// Add symbols; pushes the full set if anything changed.
    pub async fn add_symbols<I, S>(&self, symbols: I) -> SubscriptionChanges
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let changes = self.shared.subscriptions.add(symbols);
        if !changes.is_empty() {
            metrics::set_subscriptions(self.shared.subscriptions.len());
            self.shared.push_subscriptions().await;
        }
        changes
    }

    /// Remove symbols; pushes the full set if anything changed.
    pub async fn remove_symbols<I, S>(&self, symbols: I) -> SubscriptionChanges
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let changes = self.shared.subscriptions.remove(symbols);
        if !changes.is_empty() {
            metrics::set_subscriptions(self.shared.subscriptions.len());
            self.shared.push_subscriptions().await;
        }
        changes
    }

    /// Current status. Never blocks on adapter I/O.
    #[must_use]
    pub fn status(&self) -> FeedStatus {
        let shared = &self.shared;
        let state = shared.state();
        let to_ms = |d: std::time::Duration| u64::try_from(d.as_millis()).unwrap_or(u64::MAX);

        FeedStatus {
            source: shared.adapter.name().to_string(),
            state,
            connected: state.is_connected(),
            reconnecting: shared.reconnecting.load(Ordering::SeqCst),
            last_tick_age_ms: to_ms(shared.liveness.since_last_tick()),
            subscribed_symbols: shared.subscriptions.snapshot(),
            backoff_ms: to_ms(shared.backoff.lock().current_backoff()),
            ticks_received: shared.ticks_received.load(Ordering::Relaxed),
            reconnect_attempts: shared.reconnect_attempts.load(Ordering::Relaxed),
            stalls_detected: shared.stalls_detected.load(Ordering::Relaxed),
            adapter_errors: shared.adapter_errors.load(Ordering::Relaxed),
            cache_writes_dropped: shared.cache_writes_dropped.load(Ordering::Relaxed),
            listeners: shared.broadcaster.receiver_count(),
        }
    }

    /// New in-process tick listener.
    #[must_use]
    pub fn ticks(&self) -> broadcast::Receiver<Tick> {
        self.shared.broadcaster.subscribe()
    }

    /// The quote cache ticks are written through.
    #[must_use]
    pub fn cache(&self) -> &Arc<QuoteCache> {
        &self.shared.cache
    }

    /// Check if `start` has been called without a matching `stop`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.tasks.lock().is_some()
    }
}

impl Drop for FeedMultiplexer {
    fn drop(&mut self) {
        if let Some(tasks) = self.tasks.get_mut().take() {
            self.shared.stopped.store(true, Ordering::SeqCst);
            tasks.cancel.cancel();
            drop(self.shared.writer.write().take());
        }
    }
}

impl std::fmt::Debug for FeedMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedMultiplexer")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
