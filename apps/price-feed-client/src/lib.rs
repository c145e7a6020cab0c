#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Price Feed Client - Resilient Real-Time Connection
//!
//! Keeps a bidirectional WebSocket channel to a price/sentiment feed alive,
//! and gives consumers a stable publish/subscribe surface no matter how the
//! channel is doing.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types
//!   - `connection`: State machine, retry context, notifications
//!   - `streaming`: Wire envelope, message categories, price records
//!   - `subscription`: Category-keyed callback registry
//!
//! - **Application**: Ports and the shell
//!   - `ports`: `Connector` and `SnapshotFetcher`
//!   - `services`: `FeedSupervisor` (live/fallback swap)
//!
//! - **Infrastructure**: Adapters
//!   - `feed`: Connection manager actor, backoff, heartbeat, router, transport
//!   - `fallback`: Snapshot polling over HTTP or from memory
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! Feed WS ──► ConnectionManager ──► MessageRouter ──► SubscriberRegistry ──► consumers
//!                  │                                         ▲
//!                  └── Notification::Failed ──► FeedSupervisor ──► FallbackDataSource
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Connection, message, and subscription types.
pub mod domain;

/// Application layer - Ports and services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{
    ConnectionState, ConnectionStatus, Notification, RetryContext, Trigger,
};
pub use domain::streaming::{InboundMessage, MessageCategory, OutboundMessage, PriceRecord};
pub use domain::subscription::{
    Callback, PublishReport, SharedRegistry, SubscriberRegistry, callback,
};

// Ports
pub use application::ports::{
    ChannelParts, Connector, FallbackError, FrameSink, FrameStream, InboundFrame,
    SnapshotFetcher, TransportError,
};

// Services
pub use application::services::FeedSupervisor;

// Realtime channel
pub use infrastructure::feed::{
    BackoffConfig, BackoffPolicy, ConnectionManager, HeartbeatConfig, ManagerConfig,
    MessageRouter, SendError, TungsteniteConnector,
};

// Fallback
pub use infrastructure::fallback::{
    FallbackDataSource, FallbackHandle, HttpSnapshotFetcher, StaticSnapshot,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, FallbackSettings, FeedConfig, FeedSettings, ServerSettings,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
