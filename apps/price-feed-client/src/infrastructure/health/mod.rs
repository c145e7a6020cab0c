//! Health and Control Endpoint
//!
//! Small axum server reporting feed health and exposing Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON report: channel status, fallback, subscribers
//! - `GET /healthz` - Liveness check
//! - `GET /readyz` - Ready while data flows from the feed or the fallback
//! - `GET /metrics` - Prometheus text exposition
//! - `POST /reconnect` - Force a fresh connection attempt with a reset retry budget

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::connection::{ConnectionState, ConnectionStatus};
use crate::domain::subscription::SharedRegistry;
use crate::infrastructure::feed::ConnectionManager;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Derived from the channel state and the fallback flag.
    pub status: HealthStatus,
    /// Crate version.
    pub version: String,
    /// Seconds since the server state was created.
    pub uptime_secs: u64,
    /// Server clock at render time.
    pub current_time: DateTime<Utc>,
    /// Realtime channel status.
    pub connection: ConnectionStatus,
    /// Whether the fallback data source is serving data.
    pub fallback_active: bool,
    /// Registered subscriber callbacks.
    pub subscribers: usize,
}

/// Coarse feed health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Realtime channel open.
    Healthy,
    /// Recovering, or serving fallback data.
    Degraded,
    /// No data source available.
    Unhealthy,
}

impl HealthStatus {
    /// Derive health from the channel state and whether fallback data is flowing.
    #[must_use]
    pub const fn from_feed(state: ConnectionState, fallback_active: bool) -> Self {
        match state {
            ConnectionState::Open => Self::Healthy,
            ConnectionState::Failed | ConnectionState::Idle if !fallback_active => Self::Unhealthy,
            _ => Self::Degraded,
        }
    }

    const fn http_status(self) -> StatusCode {
        match self {
            Self::Healthy | Self::Degraded => StatusCode::OK,
            Self::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

// =============================================================================
// Health Server State
// =============================================================================

/// Everything the handlers read from.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    manager: Arc<ConnectionManager>,
    registry: SharedRegistry,
    fallback_active: Arc<AtomicBool>,
}

impl HealthServerState {
    /// Bundle the manager handle, registry and fallback flag for the handlers.
    #[must_use]
    pub fn new(
        version: String,
        manager: Arc<ConnectionManager>,
        registry: SharedRegistry,
        fallback_active: Arc<AtomicBool>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            manager,
            registry,
            fallback_active,
        }
    }

    fn fallback_active(&self) -> bool {
        self.fallback_active.load(Ordering::SeqCst)
    }

    fn report(&self) -> HealthResponse {
        let connection = self.manager.status();
        let fallback_active = self.fallback_active();

        HealthResponse {
            status: HealthStatus::from_feed(connection.state, fallback_active),
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
            connection,
            fallback_active,
            subscribers: self.registry.total_subscribers(),
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// HTTP server for health, readiness, metrics and manual reconnects.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Bind on `0.0.0.0:port` when run; stops when `cancel` fires.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if the port cannot be bound or serving fails.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(|| async { (StatusCode::OK, "OK") }))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/reconnect", post(reconnect_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let report = state.report();
    (report.status.http_status(), Json(report))
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if is_ready(state.manager.state(), state.fallback_active()) {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn reconnect_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    tracing::info!(state = %state.manager.state(), "Manual reconnect requested over HTTP");
    state.manager.manual_reconnect();
    StatusCode::ACCEPTED
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

const fn is_ready(state: ConnectionState, fallback_active: bool) -> bool {
    state.is_open() || fallback_active
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
