//! Connection Manager
//!
//! Owns the channel lifecycle. A single actor task processes commands,
//! transport events, and timer firings from one queue, so every state
//! transition is serialized.
//!
//! # Generations
//!
//! Every connect attempt and every teardown bumps a shared generation
//! counter. Spawned tasks (connect attempt, retry timer, heartbeat) tag
//! their events with the generation they were started under; the actor drops any event whose generation is no longer current.
//! `disconnect()` and `manual_reconnect()` bump the counter synchronously
//! before enqueueing, so a timer that fires in between is already stale.
//!
//! # Inbound backpressure
//!
//! Frames do not travel on the command queue. Each open channel gets a
//! bounded queue of `INBOUND_CAPACITY` entries that the actor drains
//! between commands. Subscriber callbacks run on the actor, so a slow
//! subscriber fills that queue and the pump stops reading from the socket
//! until it drains. Channel loss is reported on the same queue, after every
//! frame read before it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::ports::{ChannelParts, Connector, InboundFrame, TransportError};
use crate::domain::connection::{
    ConnectionState, ConnectionStatus, Notification, RetryContext, Trigger,
};
use crate::domain::streaming::{MessageCategory, OutboundMessage};
use crate::infrastructure::metrics;

use super::codec::JsonCodec;
use super::heartbeat::{
    HeartbeatConfig, HeartbeatEvent, HeartbeatScheduler, HeartbeatState, HeartbeatTick,
};
use super::reconnect::{BackoffConfig, BackoffPolicy};
use super::router::MessageRouter;

/// Capacity of the notification broadcast channel.
const NOTIFICATION_CAPACITY: usize = 256;

/// Time allowed for a clean close of the write half.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Frames buffered between one channel's pump and the actor.
const INBOUND_CAPACITY: usize = 1024;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    /// Feed URL.
    pub url: String,
    /// Retry schedule.
    pub backoff: BackoffConfig,
    /// Liveness probing.
    pub heartbeat: HeartbeatConfig,
    /// Limit on opening one channel.
    pub connect_timeout: Duration,
}

impl ManagerConfig {
    /// Create a configuration with default backoff and heartbeat settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            backoff: BackoffConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Create configuration from `FeedSettings`.
    #[must_use]
    pub fn from_feed_settings(settings: &crate::FeedSettings) -> Self {
        Self {
            url: settings.url.clone(),
            backoff: BackoffConfig::from_feed_settings(settings),
            heartbeat: HeartbeatConfig::from_feed_settings(settings),
            connect_timeout: settings.connect_timeout,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors returned by [`ConnectionManager::send`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// No open channel.
    #[error("channel is not open (state: {0})")]
    NotOpen(ConnectionState),

    /// Message could not be serialized.
    #[error("failed to encode outbound message: {0}")]
    Encode(String),

    /// The manager task has stopped.
    #[error("connection manager has stopped")]
    Stopped,
}

// =============================================================================
// Events
// =============================================================================

enum Event {
    Connect,
    Disconnect,
    ManualReconnect,
    Send {
        message: OutboundMessage,
        reply: oneshot::Sender<Result<(), SendError>>,
    },
    Opened {
        generation: u64,
        parts: ChannelParts,
    },
    AttemptFailed {
        generation: u64,
        error: TransportError,
    },
    RetryDue {
        generation: u64,
    },
    Heartbeat(HeartbeatTick),
}

impl From<HeartbeatTick> for Event {
    fn from(tick: HeartbeatTick) -> Self {
        Self::Heartbeat(tick)
    }
}

/// What a pump hands the actor, in socket order.
#[derive(Debug)]
enum Inbound {
    Frame(InboundFrame),
    Lost(TransportError),
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Handle to the connection actor.
///
/// Dropping the handle stops the actor and tears down any open channel.
#[derive(Debug)]
pub struct ConnectionManager {
    events: mpsc::UnboundedSender<Event>,
    generation: Arc<AtomicU64>,
    state: watch::Receiver<ConnectionState>,
    status: Arc<RwLock<ConnectionStatus>>,
    notifications: broadcast::Sender<Notification>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connect => "Connect",
            Self::Disconnect => "Disconnect",
            Self::ManualReconnect => "ManualReconnect",
            Self::Send { .. } => "Send",
            Self::Opened { .. } => "Opened",
            Self::AttemptFailed { .. } => "AttemptFailed",
            Self::RetryDue { .. } => "RetryDue",
            Self::Heartbeat(_) => "Heartbeat",
        };
        f.write_str(name)
    }
}

impl ConnectionManager {
    /// Spawn the actor on the current runtime. The manager starts `Idle` and
    /// does not connect until [`connect`](Self::connect) is called.
    #[must_use]
    pub fn spawn(
        config: ManagerConfig,
        connector: Arc<dyn Connector>,
        router: Arc<MessageRouter>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let generation = Arc::new(AtomicU64::new(0));
        let status = Arc::new(RwLock::new(ConnectionStatus::default()));
        let shutdown = CancellationToken::new();

        let actor = Actor {
            policy: BackoffPolicy::new(config.backoff.clone()),
            config,
            connector,
            router,
            codec: JsonCodec::new(),
            events_tx: events_tx.clone(),
            generation: Arc::clone(&generation),
            shutdown: shutdown.clone(),
            state: ConnectionState::Idle,
            retry: RetryContext::default(),
            channel: None,
            attempt_cancel: None,
            retry_cancel: None,
            state_tx,
            status: Arc::clone(&status),
            notifications: notifications.clone(),
        };

        metrics::set_connection_state(ConnectionState::Idle);
        tokio::spawn(actor.run(events_rx));

        Self {
            events: events_tx,
            generation,
            state: state_rx,
            status,
            notifications,
            shutdown,
        }
    }

    /// Open the channel. No-op while `Connecting` or `Open`.
    pub fn connect(&self) {
        self.post(Event::Connect);
    }

    /// Close the channel, cancel any pending retry, and settle in `Idle`.
    pub fn disconnect(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.post(Event::Disconnect);
    }

    /// Tear down whatever is in flight and start a fresh attempt with a
    /// reset retry budget.
    pub fn manual_reconnect(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.post(Event::ManualReconnect);
    }

    /// Send a message over the open channel.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotOpen`] if the channel is not open.
    pub async fn send(&self, message: OutboundMessage) -> Result<(), SendError> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(Event::Send { message, reply })
            .map_err(|_| SendError::Stopped)?;
        response.await.map_err(|_| SendError::Stopped)?
    }

    /// Ask the feed to resend its current state.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotOpen`] if the channel is not open.
    pub async fn request_refresh(&self) -> Result<(), SendError> {
        self.send(OutboundMessage::RefreshRequest).await
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch channel for state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Point-in-time status snapshot.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status.read().clone()
    }

    /// Subscribe to state-entry notifications.
    #[must_use]
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Stop the actor and tear down any open channel.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn post(&self, event: Event) {
        if self.events.send(event).is_err() {
            tracing::debug!("Connection manager has stopped, command ignored");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// =============================================================================
// Channel Handle
// =============================================================================

/// An open channel. Dropping it stops the pump and the heartbeat.
#[derive(Debug)]
struct ChannelHandle {
    id: Uuid,
    generation: u64,
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::Receiver<Inbound>,
    heartbeat: Arc<HeartbeatState>,
    cancel: CancellationToken,
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Actor
// =============================================================================

struct Actor {
    config: ManagerConfig,
    policy: BackoffPolicy,
    connector: Arc<dyn Connector>,
    router: Arc<MessageRouter>,
    codec: JsonCodec,
    events_tx: mpsc::UnboundedSender<Event>,
    generation: Arc<AtomicU64>,
    shutdown: CancellationToken,
    state: ConnectionState,
    retry: RetryContext,
    channel: Option<ChannelHandle>,
    attempt_cancel: Option<CancellationToken>,
    retry_cancel: Option<CancellationToken>,
    state_tx: watch::Sender<ConnectionState>,
    status: Arc<RwLock<ConnectionStatus>>,
    notifications: broadcast::Sender<Notification>,
}

impl Actor {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        tracing::debug!(url = %self.config.url, "Connection manager started");

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                Some(inbound) = next_inbound(self.channel.as_mut()) => self.on_inbound(inbound),
            }
        }

        self.teardown();
        tracing::debug!("Connection manager stopped");
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Connect => self.on_connect(),
            Event::Disconnect => self.on_disconnect(),
            Event::ManualReconnect => self.on_manual_reconnect(),
            Event::Send { message, reply } => {
                let _ = reply.send(self.on_send(&message));
            }
            Event::Opened { generation, parts } => {
                if self.is_current(generation) && self.state == ConnectionState::Connecting {
                    self.on_opened(generation, parts);
                } else {
                    tracing::debug!(generation, "Discarding stale channel");
                }
            }
            Event::AttemptFailed { generation, error } => {
                if self.is_current(generation) && self.state == ConnectionState::Connecting {
                    self.on_lost(&error);
                }
            }
            Event::RetryDue { generation } => {
                if self.is_current(generation) && self.state == ConnectionState::Closed {
                    self.retry_cancel = None;
                    self.transition(Trigger::RetryDue, Notification::Connecting {
                        attempt: self.retry.attempt,
                    });
                    self.start_attempt();
                }
            }
            Event::Heartbeat(tick) => {
                if self.is_current(tick.generation) && self.state.is_open() {
                    self.on_heartbeat(tick.event);
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    fn on_connect(&mut self) {
        match self.state {
            ConnectionState::Idle => self.retry = RetryContext::default(),
            ConnectionState::Failed | ConnectionState::Closed => {
                tracing::debug!(state = %self.state, "Connect requested, starting a fresh run");
                self.cancel_retry_timer();
                self.retry = RetryContext::manual();
            }
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Closing => {
                tracing::debug!(state = %self.state, "Connect ignored");
                return;
            }
        }

        self.transition(Trigger::Connect, Notification::Connecting { attempt: 0 });
        self.start_attempt();
    }

    fn on_disconnect(&mut self) {
        if self.state == ConnectionState::Idle {
            tracing::debug!("Disconnect ignored, already idle");
            return;
        }

        tracing::info!(state = %self.state, "Disconnecting");
        self.transition(Trigger::Disconnect, Notification::Closing);
        self.teardown();
        self.retry = RetryContext::default();
        self.transition(Trigger::Settled, Notification::Idle);
    }

    fn on_manual_reconnect(&mut self) {
        tracing::info!(state = %self.state, "Manual reconnect requested");

        if matches!(self.state, ConnectionState::Connecting | ConnectionState::Open) {
            self.transition(Trigger::ManualReconnect, Notification::Closing);
        }
        self.teardown();

        self.retry = RetryContext::manual();
        self.transition(Trigger::ManualReconnect, Notification::Connecting { attempt: 0 });
        self.start_attempt();
    }

    fn on_send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        let Some(channel) = self.channel.as_ref().filter(|_| self.state.is_open()) else {
            return Err(SendError::NotOpen(self.state));
        };

        let text = self
            .codec
            .encode(message)
            .map_err(|e| SendError::Encode(e.to_string()))?;

        channel
            .outbound
            .send(text)
            .map_err(|_| SendError::NotOpen(self.state))
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    fn start_attempt(&mut self) {
        let generation = self.bump_generation();
        let cancel = self.shutdown.child_token();
        self.attempt_cancel = Some(cancel.clone());

        let connector = Arc::clone(&self.connector);
        let url = self.config.url.clone();
        let timeout = self.config.connect_timeout;
        let events = self.events_tx.clone();

        let trigger = self.retry.trigger();
        tracing::info!(url = %url, attempt = self.retry.attempt, trigger, generation, "Connecting to feed");
        metrics::record_connect_attempt(trigger);

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                result = tokio::time::timeout(timeout, connector.connect(&url)) => result,
            };

            let event = match result {
                Ok(Ok(parts)) => Event::Opened { generation, parts },
                Ok(Err(error)) => Event::AttemptFailed { generation, error },
                Err(_) => Event::AttemptFailed {
                    generation,
                    error: TransportError::Timeout(timeout),
                },
            };
            let _ = events.send(event);
        });
    }

    fn on_opened(&mut self, generation: u64, parts: ChannelParts) {
        self.attempt_cancel = None;
        self.retry = RetryContext::default();

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let cancel = self.shutdown.child_token();
        let heartbeat = Arc::new(HeartbeatState::new());

        let channel = ChannelHandle {
            id: Uuid::new_v4(),
            generation,
            outbound: outbound_tx,
            inbound: inbound_rx,
            heartbeat: Arc::clone(&heartbeat),
            cancel: cancel.clone(),
        };

        tokio::spawn(pump(parts, outbound_rx, inbound_tx, cancel.clone()));

        if self.config.heartbeat.is_enabled() {
            let scheduler = HeartbeatScheduler::new(
                self.config.heartbeat.clone(),
                heartbeat,
                generation,
                self.events_tx.clone(),
                cancel,
            );
            tokio::spawn(scheduler.run());
        }

        tracing::info!(channel_id = %channel.id, generation, "Feed channel open");
        self.channel = Some(channel);

        {
            let mut status = self.status.write();
            status.last_connected_at = Some(chrono::Utc::now());
            status.last_error = None;
        }

        self.transition(Trigger::Opened, Notification::Connected);
    }

    fn on_lost(&mut self, error: &TransportError) {
        let was_open = self.state.is_open();
        metrics::record_transport_error(error.kind());

        if was_open {
            tracing::warn!(error = %error, "Feed channel lost");
        } else {
            tracing::warn!(error = %error, attempt = self.retry.attempt, "Connect attempt failed");
        }

        self.teardown();
        self.status.write().last_error = Some(error.to_string());

        let failures = self.retry.record_failure();
        let reason = error.to_string();

        if self.retry.is_exhausted(self.policy.max_attempts()) {
            self.transition(Trigger::Lost, Notification::Closed {
                reason: reason.clone(),
                retry_in: None,
            });
            tracing::error!(
                attempts = failures,
                error = %error,
                "Reconnect attempts exhausted"
            );
            self.transition(Trigger::RetriesExhausted, Notification::Failed { reason });
            return;
        }

        let delay = self
            .policy
            .jittered(self.policy.next_delay(failures.saturating_sub(1)));
        self.retry.next_delay = delay;

        tracing::info!(
            attempt = failures,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Scheduling reconnect"
        );

        self.transition(Trigger::Lost, Notification::Closed {
            reason,
            retry_in: Some(delay),
        });
        self.schedule_retry(delay);
    }

    fn on_inbound(&mut self, inbound: Inbound) {
        if !self.state.is_open() {
            return;
        }
        match inbound {
            Inbound::Frame(frame) => self.on_frame(&frame),
            Inbound::Lost(error) => self.on_lost(&error),
        }
    }

    fn on_frame(&self, frame: &InboundFrame) {
        let outcome = self.router.handle(frame);
        self.status.write().messages_received += 1;

        if outcome.category != MessageCategory::Heartbeat {
            return;
        }
        if let Some(channel) = &self.channel {
            channel.heartbeat.record_ack();
        }
    }

    fn on_heartbeat(&mut self, event: HeartbeatEvent) {
        match event {
            HeartbeatEvent::SendPing => {
                let Some(channel) = &self.channel else {
                    return;
                };
                match self.codec.encode(&OutboundMessage::Heartbeat) {
                    Ok(text) => {
                        if channel.outbound.send(text).is_ok() {
                            channel.heartbeat.mark_ping_sent();
                            metrics::record_heartbeat_sent();
                            tracing::trace!(channel_id = %channel.id, "Heartbeat ping sent");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to encode heartbeat"),
                }
            }
            HeartbeatEvent::Timeout => {
                metrics::record_heartbeat_timeout();
                self.on_lost(&TransportError::HeartbeatTimeout);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Timers and teardown
    // -------------------------------------------------------------------------

    fn schedule_retry(&mut self, delay: Duration) {
        let generation = self.generation.load(Ordering::SeqCst);
        let cancel = self.shutdown.child_token();
        self.retry_cancel = Some(cancel.clone());
        let events = self.events_tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = events.send(Event::RetryDue { generation });
                }
            }
        });
    }

    fn cancel_retry_timer(&mut self) {
        if let Some(cancel) = self.retry_cancel.take() {
            cancel.cancel();
        }
    }

    /// Stop heartbeat, channel, pending attempt, and retry timer, then
    /// invalidate every event already in flight.
    fn teardown(&mut self) {
        if let Some(channel) = self.channel.take() {
            tracing::debug!(channel_id = %channel.id, generation = channel.generation, "Closing channel");
            drop(channel);
        }
        if let Some(cancel) = self.attempt_cancel.take() {
            cancel.cancel();
        }
        self.cancel_retry_timer();
        self.bump_generation();
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    fn transition(&mut self, trigger: Trigger, notification: Notification) {
        let next = self.state.on(trigger);
        if next == self.state {
            return;
        }
        debug_assert_eq!(next, notification.state());

        tracing::debug!(from = %self.state, to = %next, ?trigger, "Connection state change");
        self.state = next;

        {
            let mut status = self.status.write();
            status.state = next;
            status.attempt = self.retry.attempt;
        }
        self.state_tx.send_replace(next);
        metrics::set_connection_state(next);
        let _ = self.notifications.send(notification);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Next entry from the open channel's inbound queue. Never resolves while
/// no channel is open.
async fn next_inbound(channel: Option<&mut ChannelHandle>) -> Option<Inbound> {
    match channel {
        Some(channel) => channel.inbound.recv().await,
        None => std::future::pending().await,
    }
}

/// Move frames between one open channel and the actor. Stops reading from
/// the socket while the inbound queue is full.
async fn pump(
    parts: ChannelParts,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
) {
    let ChannelParts {
        mut sink,
        mut stream,
    } = parts;

    let error = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break None,
            Some(text) = outbound.recv() => {
                if let Err(e) = sink.send(text).await {
                    break Some(e);
                }
            }
            item = stream.next() => match item {
                Some(Ok(frame)) => {
                    // receiver is gone once the actor has torn the channel down
                    if inbound.send(Inbound::Frame(frame)).await.is_err() {
                        break None;
                    }
                }
                Some(Err(e)) => break Some(e),
                None => break Some(TransportError::Closed("stream ended".to_string())),
            },
        }
    };

    match error {
        Some(error) => {
            let _ = inbound.send(Inbound::Lost(error)).await;
        }
        None => {
            let _ = tokio::time::timeout(CLOSE_GRACE, sink.close()).await;
        }
    }
}
