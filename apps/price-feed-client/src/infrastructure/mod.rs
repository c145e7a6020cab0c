//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the runtime
//! plumbing (config, health, metrics, telemetry).

/// Realtime channel: connection manager, transport, heartbeat, backoff, routing.
pub mod feed;

/// Pull-based fallback data source.
pub mod fallback;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
