//! Connection State Machine
//!
//! Pure types describing the lifecycle of the feed channel. The manager
//! actor in the infrastructure layer drives these transitions; nothing here
//! performs I/O or touches timers.
//!
//! # States
//!
//! ```text
//!            connect()            opened
//!   Idle ─────────────► Connecting ─────► Open
//!    ▲                    │   ▲            │
//!    │ settled            │   │ retry due  │ error / close / heartbeat timeout
//!    │                    ▼   │            ▼
//! Closing ◄── disconnect ─ Closed ◄────────┘
//!                           │
//!                           │ retries exhausted
//!                           ▼
//!                         Failed
//! ```
//!
//! Every state accepts `Disconnect` (→ `Closing`) and `ManualReconnect`.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of the feed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No channel and no pending work. Initial state.
    #[default]
    Idle,
    /// A channel open is in flight.
    Connecting,
    /// Channel is live; heartbeats are running.
    Open,
    /// Caller-initiated teardown in progress.
    Closing,
    /// Channel lost; a retry may be pending.
    Closed,
    /// Retries exhausted. Only `connect()` or `manual_reconnect()` leave this state.
    Failed,
}

impl ConnectionState {
    /// Apply a trigger and return the resulting state.
    ///
    /// Total over `(state, trigger)`: pairs that have no transition return
    /// `self` unchanged, which callers treat as a no-op.
    #[must_use]
    pub const fn on(self, trigger: Trigger) -> Self {
        use ConnectionState::{Closed, Closing, Connecting, Failed, Idle, Open};

        match (self, trigger) {
            (Idle | Closed | Failed, Trigger::Connect) => Connecting,
            (Connecting, Trigger::Opened) => Open,
            (Connecting | Open, Trigger::Lost) => Closed,
            (Closed, Trigger::RetryDue) => Connecting,
            (Closed, Trigger::RetriesExhausted) => Failed,
            (Connecting | Open | Closed | Failed, Trigger::Disconnect) => Closing,
            (Closing, Trigger::Settled) => Idle,
            // A live channel or attempt is torn down through Closing first.
            (Connecting | Open, Trigger::ManualReconnect) => Closing,
            (Idle | Closed | Failed | Closing, Trigger::ManualReconnect) => Connecting,
            (state, _) => state,
        }
    }

    /// Whether the channel is usable for sends.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Lowercase name used in logs, metrics and the health endpoint.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }

    /// Numeric encoding for the state gauge.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Idle => 0.0,
            Self::Connecting => 1.0,
            Self::Open => 2.0,
            Self::Closing => 3.0,
            Self::Closed => 4.0,
            Self::Failed => 5.0,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs that drive [`ConnectionState`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Caller asked to connect.
    Connect,
    /// Transport reported the channel open.
    Opened,
    /// Transport error, close, or heartbeat timeout.
    Lost,
    /// Backoff delay elapsed.
    RetryDue,
    /// Consecutive failures reached the configured limit.
    RetriesExhausted,
    /// Caller asked to disconnect.
    Disconnect,
    /// Teardown finished.
    Settled,
    /// Caller asked for a fresh connection with a reset retry budget.
    ManualReconnect,
}

// =============================================================================
// Retry Context
// =============================================================================

/// Retry bookkeeping for the current run of connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryContext {
    /// Consecutive failed attempts since the last successful open.
    pub attempt: u32,
    /// Delay scheduled before the next attempt.
    pub next_delay: Duration,
    /// Set while the current attempt was requested by the caller rather
    /// than scheduled by the retry timer. Cleared by the first failure.
    pub manual_override: bool,
}

impl RetryContext {
    /// Fresh context for a caller-initiated reconnect.
    #[must_use]
    pub const fn manual() -> Self {
        Self {
            attempt: 0,
            next_delay: Duration::ZERO,
            manual_override: true,
        }
    }

    /// Record a failed attempt and return the new failure count.
    pub const fn record_failure(&mut self) -> u32 {
        self.attempt = self.attempt.saturating_add(1);
        self.manual_override = false;
        self.attempt
    }

    /// What started the current attempt: `manual`, `initial` or `retry`.
    #[must_use]
    pub const fn trigger(&self) -> &'static str {
        if self.manual_override {
            "manual"
        } else if self.attempt == 0 {
            "initial"
        } else {
            "retry"
        }
    }

    /// Whether the failure count has reached `max_attempts` (0 = unlimited).
    #[must_use]
    pub const fn is_exhausted(&self, max_attempts: u32) -> bool {
        max_attempts > 0 && self.attempt >= max_attempts
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// One notification per state entry, published to UI and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// Entered `Idle`.
    Idle,
    /// Entered `Connecting`.
    Connecting {
        /// Consecutive failures preceding this attempt.
        attempt: u32,
    },
    /// Entered `Open`.
    Connected,
    /// Entered `Closing`.
    Closing,
    /// Entered `Closed`.
    Closed {
        /// Why the channel was lost.
        reason: String,
        /// Delay before the next attempt, when one is scheduled.
        retry_in: Option<Duration>,
    },
    /// Entered `Failed`.
    Failed {
        /// The last transport error.
        reason: String,
    },
}

impl Notification {
    /// The state this notification announces.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        match self {
            Self::Idle => ConnectionState::Idle,
            Self::Connecting { .. } => ConnectionState::Connecting,
            Self::Connected => ConnectionState::Open,
            Self::Closing => ConnectionState::Closing,
            Self::Closed { .. } => ConnectionState::Closed,
            Self::Failed { .. } => ConnectionState::Failed,
        }
    }
}

/// Point-in-time view of the connection, exposed to the application shell.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ConnectionStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Consecutive failed attempts.
    pub attempt: u32,
    /// Most recent transport error, cleared on successful open.
    pub last_error: Option<String>,
    /// When the channel last reached `Open`.
    pub last_connected_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Inbound frames handled since construction.
    pub messages_received: u64,
}

// =============================================================================
// Tests
// =============================================================================
