//! Heartbeat Watchdog
//!
//! Detects a silent upstream connection. The feed records the arrival time
//! of every tick; the watchdog periodically checks how long it has been since
//! the last one and emits a stall event past the threshold.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::FeedSettings;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between liveness checks.
    pub interval: Duration,
    /// Silence longer than this is a stall.
    pub stall_threshold: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            stall_threshold: Duration::from_secs(10),
        }
    }
}

impl HeartbeatConfig {
    /// Create configuration from `FeedSettings`.
    #[must_use]
    pub const fn from_feed_settings(settings: &FeedSettings) -> Self {
        Self {
            interval: settings.heartbeat_interval,
            stall_threshold: settings.stall_threshold,
        }
    }
}

/// Events emitted by the heartbeat monitor.
#[derive(Debug, Clone)]
pub enum HeartbeatEvent {
    /// No tick has arrived for longer than the stall threshold.
    Stalled {
        /// Time since the last tick.
        since_last_tick: Duration,
    },
}

/// Last-tick timestamp shared between the tick path and the monitor.
#[derive(Debug)]
pub struct LivenessState {
    last_tick: RwLock<Instant>,
}

impl Default for LivenessState {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessState {
    /// Create new liveness state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_tick: RwLock::new(Instant::now()),
        }
    }

    /// Record that a tick arrived.
    pub fn record_tick(&self) {
        *self.last_tick.write() = Instant::now();
    }

    /// Get the time since the last tick.
    #[must_use]
    pub fn since_last_tick(&self) -> Duration {
        self.last_tick.read().elapsed()
    }

    /// Reset state for new connection.
    pub fn reset(&self) {
        self.record_tick();
    }
}

/// Heartbeat monitor that watches tick arrival.
///
/// Keeps running after a stall; the consumer decides whether a stall is
/// actionable.
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    state: Arc<LivenessState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatMonitor {
    /// Create a new heartbeat monitor.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<LivenessState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run the monitoring loop until cancelled or the event channel closes.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat monitor cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.check().is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Check liveness, emitting a stall event if needed.
    ///
    /// Returns `Err(())` if the event channel is closed.
    fn check(&self) -> Result<(), ()> {
        let since_last_tick = self.state.since_last_tick();
        if since_last_tick <= self.config.stall_threshold {
            return Ok(());
        }

        tracing::debug!(
            since_last_tick_ms = since_last_tick.as_millis(),
            threshold_ms = self.config.stall_threshold.as_millis(),
            "No ticks within stall threshold"
        );

        match self
            .event_tx
            .try_send(HeartbeatEvent::Stalled { since_last_tick })
        {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Event channel closed, stopping heartbeat");
                Err(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.interval, Duration::from_secs(2));
        assert_eq!(config.stall_threshold, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_tracks_elapsed_time() {
        let state = LivenessState::new();
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(state.since_last_tick(), Duration::from_millis(1500));

        state.record_tick();
        assert_eq!(state.since_last_tick(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_quiet_while_ticks_arrive() {
        let config = HeartbeatConfig {
            interval: Duration::from_millis(100),
            stall_threshold: Duration::from_millis(500),
        };
        let state = Arc::new(LivenessState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            HeartbeatMonitor::new(config, state.clone(), event_tx, cancel.clone()).run(),
        );

        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            state.record_tick();
        }

        assert!(event_rx.try_recv().is_err());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_detects_stall_and_keeps_running() {
        let config = HeartbeatConfig {
            interval: Duration::from_millis(100),
            stall_threshold: Duration::from_millis(300),
        };
        let state = Arc::new(LivenessState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            HeartbeatMonitor::new(config, state.clone(), event_tx, cancel.clone()).run(),
        );

        let event = event_rx.recv().await.unwrap();
        let HeartbeatEvent::Stalled { since_last_tick } = event;
        assert!(since_last_tick > Duration::from_millis(300));

        // Still silent, so another stall follows.
        assert!(event_rx.recv().await.is_some());
        assert!(!handle.is_finished());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn monitor_cancellation() {
        let state = Arc::new(LivenessState::new());
        let (event_tx, _event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let monitor = HeartbeatMonitor::new(
            HeartbeatConfig::default(),
            state,
            event_tx,
            cancel.clone(),
        );
        let handle = tokio::spawn(monitor.run());

        // Cancel immediately
        cancel.cancel();

        // Should complete quickly
        let result = tokio::time::timeout(Duration::from_millis(100), handle).await;
        assert!(result.is_ok(), "monitor should shut down on cancellation");
    }

    #[tokio::test]
    async fn monitor_exits_when_receiver_dropped() {
        let config = HeartbeatConfig {
            interval: Duration::from_millis(10),
            stall_threshold: Duration::ZERO,
        };
        let state = Arc::new(LivenessState::new());
        let (event_tx, event_rx) = mpsc::channel(10);
        drop(event_rx);

        let monitor = HeartbeatMonitor::new(config, state, event_tx, CancellationToken::new());
        let result = tokio::time::timeout(Duration::from_secs(1), monitor.run()).await;

        assert!(result.is_ok());
    }
}
