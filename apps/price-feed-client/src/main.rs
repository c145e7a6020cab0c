//! Price Feed Client Binary
//!
//! Connects to the feed, logs price and sentiment updates, and serves the
//! health endpoint until interrupted.
//!
//! # Usage
//!
//! ```bash
//! PRICE_FEED_URL=wss://feed.example.com/ws cargo run --bin price-feed-client
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `PRICE_FEED_URL`: Feed WebSocket URL (`ws://` or `wss://`)
//!
//! ## Optional
//! - `PRICE_FEED_RECONNECT_BASE_DELAY_MS`: First retry delay (default: 1000)
//! - `PRICE_FEED_RECONNECT_MAX_DELAY_MS`: Retry delay cap (default: 30000)
//! - `PRICE_FEED_RECONNECT_MULTIPLIER`: Backoff growth factor (default: 2.0)
//! - `PRICE_FEED_RECONNECT_JITTER`: Jitter fraction 0..1 (default: 0)
//! - `PRICE_FEED_MAX_RECONNECT_ATTEMPTS`: Failures before giving up, 0 = unlimited (default: 5)
//! - `PRICE_FEED_HEARTBEAT_INTERVAL_MS`: Ping interval, 0 = off (default: 30000)
//! - `PRICE_FEED_HEARTBEAT_REQUIRES_ACK`: Missing ack closes the channel (default: true)
//! - `PRICE_FEED_CONNECT_TIMEOUT_MS`: Channel open timeout (default: 10000)
//! - `PRICE_FEED_FALLBACK_URL`: Snapshot document URL used after retries are exhausted
//! - `PRICE_FEED_FALLBACK_POLL_MS`: Snapshot poll interval (default: fetch once)
//! - `PRICE_FEED_HEALTH_PORT`: Health check HTTP port, 0 = off (default: 8083)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: Log filter (default: price_feed_client=info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use price_feed_client::infrastructure::fallback::{FallbackDataSource, HttpSnapshotFetcher};
use price_feed_client::infrastructure::health::{HealthServer, HealthServerState};
use price_feed_client::infrastructure::telemetry;
use price_feed_client::{
    ConnectionManager, FeedConfig, FeedSupervisor, ManagerConfig, MessageCategory, MessageRouter,
    SubscriberRegistry, TungsteniteConnector, callback, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for one fallback snapshot request.
const FALLBACK_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Price Feed Client");

    let _metrics_handle = init_metrics().context("failed to install Prometheus recorder")?;

    let config = FeedConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let registry = Arc::new(SubscriberRegistry::new());
    subscribe_loggers(&registry);

    let router = Arc::new(MessageRouter::new(Arc::clone(&registry)));
    let manager = Arc::new(ConnectionManager::spawn(
        ManagerConfig::from_feed_settings(&config.feed),
        Arc::new(TungsteniteConnector::new()),
        router,
    ));

    let fallback = match &config.fallback.url {
        Some(url) => {
            let fetcher = HttpSnapshotFetcher::new(url.clone(), FALLBACK_REQUEST_TIMEOUT)
                .context("failed to build fallback HTTP client")?;
            Some(FallbackDataSource::new(
                Arc::new(fetcher),
                config.fallback.poll_interval,
            ))
        }
        None => None,
    };

    let supervisor = FeedSupervisor::new(Arc::clone(&registry), fallback);
    let fallback_flag = supervisor.fallback_flag();
    let supervisor_handle = supervisor.spawn(manager.notifications(), shutdown_token.clone());

    let health_handle = if config.server.health_port == 0 {
        None
    } else {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&manager),
            Arc::clone(&registry),
            fallback_flag,
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        Some(tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server failed");
            }
        }))
    };

    let notification_logger = tokio::spawn(log_notifications(
        manager.notifications(),
        shutdown_token.clone(),
    ));

    manager.connect();

    await_shutdown(shutdown_token.clone()).await;

    manager.disconnect();

    let drain = async {
        let _ = supervisor_handle.await;
        let _ = notification_logger.await;
        if let Some(handle) = health_handle {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
        tracing::warn!("Shutdown timed out, exiting anyway");
    }

    manager.shutdown();
    tracing::info!("Price Feed Client stopped");
    Ok(())
}

/// Log every price and sentiment update, plus diagnostics.
fn subscribe_loggers(registry: &SubscriberRegistry) {
    registry.subscribe(
        MessageCategory::Price,
        &callback(|msg| match msg.price_records() {
            Ok(records) => {
                for record in records {
                    tracing::info!(
                        symbol = %record.symbol,
                        price = ?record.price,
                        change_24h = ?record.change_24h,
                        source = %msg.kind,
                        "Price update"
                    );
                }
            }
            Err(e) => tracing::warn!(error = %e, "Price update with unexpected shape"),
        }),
    );

    registry.subscribe(
        MessageCategory::Sentiment,
        &callback(|msg| tracing::info!(data = %msg.data, "Sentiment update")),
    );

    registry.subscribe(
        MessageCategory::Error,
        &callback(|msg| {
            tracing::error!(
                error = msg.error_text().as_deref().unwrap_or("unspecified"),
                "Feed error"
            );
        }),
    );

    registry.subscribe(
        MessageCategory::ParseError,
        &callback(|msg| tracing::debug!(data = %msg.data, "Parse error diagnostic")),
    );
}

/// Log connection notifications until shutdown.
async fn log_notifications(
    mut notifications: tokio::sync::broadcast::Receiver<price_feed_client::Notification>,
    shutdown_token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = shutdown_token.cancelled() => break,
            received = notifications.recv() => match received {
                Ok(notification) => {
                    tracing::info!(state = %notification.state(), ?notification, "Connection notification");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &FeedConfig) {
    tracing::info!(
        url = %config.feed.url,
        max_reconnect_attempts = config.feed.max_reconnect_attempts,
        heartbeat_interval_ms = u64::try_from(config.feed.heartbeat_interval.as_millis()).unwrap_or(u64::MAX),
        heartbeat_requires_ack = config.feed.heartbeat_requires_ack,
        fallback = config.fallback.url.is_some(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
