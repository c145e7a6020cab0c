//! Heartbeat Scheduler
//!
//! Checks liveness of an open channel by requesting a heartbeat message on a
//! fixed interval. When acknowledgments are required, a ping that is still
//! unanswered at the next tick is reported as a timeout.
//!
//! One scheduler exists per open channel. It is cancelled the moment the
//! channel leaves `Open`, and every event it emits carries the channel
//! generation so a tick that races the cancellation is discarded by the
//! manager.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between pings. Zero disables heartbeats.
    pub interval: Duration,
    /// Treat a ping unanswered by the next tick as a dead channel.
    pub requires_ack: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            requires_ack: true,
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(interval: Duration, requires_ack: bool) -> Self {
        Self {
            interval,
            requires_ack,
        }
    }

    /// Create configuration from `FeedSettings`.
    #[must_use]
    pub const fn from_feed_settings(settings: &crate::FeedSettings) -> Self {
        Self {
            interval: settings.heartbeat_interval,
            requires_ack: settings.heartbeat_requires_ack,
        }
    }

    /// Whether heartbeats are enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !self.interval.is_zero()
    }
}

/// Events emitted by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Time to send a ping.
    SendPing,
    /// The previous ping went unacknowledged for a full interval.
    Timeout,
}

/// A scheduler event tagged with the channel generation it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatTick {
    /// Generation of the channel that started the scheduler.
    pub generation: u64,
    /// What happened.
    pub event: HeartbeatEvent,
}

/// Per-channel heartbeat bookkeeping.
#[derive(Debug, Default)]
pub struct HeartbeatState {
    last_sent_at: RwLock<Option<Instant>>,
    last_ack_at: RwLock<Option<Instant>>,
    awaiting_ack: AtomicBool,
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a ping went out.
    pub fn mark_ping_sent(&self) {
        *self.last_sent_at.write() = Some(Instant::now());
        self.awaiting_ack.store(true, Ordering::SeqCst);
    }

    /// Record an acknowledgment.
    pub fn record_ack(&self) {
        *self.last_ack_at.write() = Some(Instant::now());
        self.awaiting_ack.store(false, Ordering::SeqCst);
    }

    /// Whether the last ping is still unanswered.
    #[must_use]
    pub fn is_awaiting_ack(&self) -> bool {
        self.awaiting_ack.load(Ordering::SeqCst)
    }

    /// When the last ping went out.
    #[must_use]
    pub fn last_sent_at(&self) -> Option<Instant> {
        *self.last_sent_at.read()
    }

    /// When the last acknowledgment arrived.
    #[must_use]
    pub fn last_ack_at(&self) -> Option<Instant> {
        *self.last_ack_at.read()
    }
}

/// Periodic liveness checker for one channel.
///
/// Events are delivered into the owner's queue as `E: From<HeartbeatTick>`.
#[derive(Debug)]
pub struct HeartbeatScheduler<E> {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    generation: u64,
    event_tx: mpsc::UnboundedSender<E>,
    cancel: CancellationToken,
}

impl<E> HeartbeatScheduler<E>
where
    E: From<HeartbeatTick> + Send + 'static,
{
    /// Create a new scheduler.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        generation: u64,
        event_tx: mpsc::UnboundedSender<E>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            generation,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the owner's queue closes, or a timeout is reported.
    ///
    /// The first ping is due one full interval after start.
    pub async fn run(self) {
        if !self.config.is_enabled() {
            return;
        }

        let period = self.config.interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::debug!(generation = self.generation, "Heartbeat scheduler cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.cancel.is_cancelled() || !self.tick() {
                        break;
                    }
                }
            }
        }
    }

    /// Handle one tick. Returns `false` when the loop should exit.
    fn tick(&self) -> bool {
        if self.config.requires_ack && self.state.is_awaiting_ack() {
            tracing::warn!(
                generation = self.generation,
                interval_ms = self.config.interval.as_millis(),
                "Heartbeat acknowledgment missed"
            );
            let _ = self.emit(HeartbeatEvent::Timeout);
            return false;
        }

        if self.emit(HeartbeatEvent::SendPing).is_err() {
            tracing::debug!("Event queue closed, stopping heartbeat");
            return false;
        }

        true
    }

    fn emit(&self, event: HeartbeatEvent) -> Result<(), mpsc::error::SendError<E>> {
        self.event_tx.send(E::from(HeartbeatTick {
            generation: self.generation,
            event,
        }))
    }
}
