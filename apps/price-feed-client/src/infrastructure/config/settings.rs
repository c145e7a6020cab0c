//! Client Configuration Settings
//!
//! Configuration types for the feed client, loaded from environment variables.

use std::time::Duration;

use url::Url;

/// Realtime channel settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSettings {
    /// WebSocket URL of the feed.
    pub url: String,
    /// Delay before the first retry.
    pub reconnect_base_delay: Duration,
    /// Upper bound on any retry delay.
    pub reconnect_max_delay: Duration,
    /// Growth factor per failed attempt.
    pub reconnect_multiplier: f64,
    /// Jitter fraction applied to retry delays (0 = none).
    pub reconnect_jitter: f64,
    /// Consecutive failures before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Heartbeat ping interval (0 = disabled).
    pub heartbeat_interval: Duration,
    /// Whether an unanswered ping means the channel is dead.
    pub heartbeat_requires_ack: bool,
    /// Limit on opening one channel.
    pub connect_timeout: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_multiplier: 2.0,
            reconnect_jitter: 0.0,
            max_reconnect_attempts: 5,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_requires_ack: true,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Pull-based fallback settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FallbackSettings {
    /// Snapshot document URL. `None` disables the fallback.
    pub url: Option<String>,
    /// Poll interval. `None` fetches once per activation.
    pub poll_interval: Option<Duration>,
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeedConfig {
    /// Realtime channel settings.
    pub feed: FeedSettings,
    /// Fallback settings.
    pub fallback: FallbackSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl FeedConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `PRICE_FEED_URL` is missing or a value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `PRICE_FEED_URL` is missing or a value is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("PRICE_FEED_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("PRICE_FEED_URL".to_string()))?;

        if url.trim().is_empty() {
            return Err(ConfigError::EmptyValue("PRICE_FEED_URL".to_string()));
        }
        validate_url("PRICE_FEED_URL", &url, &["ws", "wss"])?;

        let defaults = FeedSettings::default();

        let feed = FeedSettings {
            url,
            reconnect_base_delay: parse_duration_millis(
                &lookup,
                "PRICE_FEED_RECONNECT_BASE_DELAY_MS",
                defaults.reconnect_base_delay,
            ),
            reconnect_max_delay: parse_duration_millis(
                &lookup,
                "PRICE_FEED_RECONNECT_MAX_DELAY_MS",
                defaults.reconnect_max_delay,
            ),
            reconnect_multiplier: parse_f64(
                &lookup,
                "PRICE_FEED_RECONNECT_MULTIPLIER",
                defaults.reconnect_multiplier,
            ),
            reconnect_jitter: parse_f64(
                &lookup,
                "PRICE_FEED_RECONNECT_JITTER",
                defaults.reconnect_jitter,
            ),
            max_reconnect_attempts: parse_u32(
                &lookup,
                "PRICE_FEED_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            heartbeat_interval: parse_duration_millis(
                &lookup,
                "PRICE_FEED_HEARTBEAT_INTERVAL_MS",
                defaults.heartbeat_interval,
            ),
            heartbeat_requires_ack: parse_bool(
                &lookup,
                "PRICE_FEED_HEARTBEAT_REQUIRES_ACK",
                defaults.heartbeat_requires_ack,
            ),
            connect_timeout: parse_duration_millis(
                &lookup,
                "PRICE_FEED_CONNECT_TIMEOUT_MS",
                defaults.connect_timeout,
            ),
        };

        if feed.reconnect_multiplier < 1.0 || !feed.reconnect_multiplier.is_finite() {
            return Err(ConfigError::InvalidValue {
                key: "PRICE_FEED_RECONNECT_MULTIPLIER".to_string(),
                reason: "must be a finite number >= 1.0".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&feed.reconnect_jitter) {
            return Err(ConfigError::InvalidValue {
                key: "PRICE_FEED_RECONNECT_JITTER".to_string(),
                reason: "must be between 0.0 and 1.0".to_string(),
            });
        }

        let fallback_url = lookup("PRICE_FEED_FALLBACK_URL").filter(|v| !v.trim().is_empty());
        if let Some(url) = &fallback_url {
            validate_url("PRICE_FEED_FALLBACK_URL", url, &["http", "https"])?;
        }

        let fallback = FallbackSettings {
            url: fallback_url,
            poll_interval: lookup("PRICE_FEED_FALLBACK_POLL_MS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
        };

        let server = ServerSettings {
            health_port: parse_u16(
                &lookup,
                "PRICE_FEED_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        Ok(Self {
            feed,
            fallback,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has an unusable value.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

fn validate_url(key: &str, raw: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue {
        key: key.to_string(),
        reason,
    };

    let url = Url::parse(raw.trim()).map_err(|e| invalid(format!("malformed URL: {e}")))?;

    if !schemes.contains(&url.scheme()) {
        return Err(invalid(format!(
            "expected a {} URL, got scheme {}",
            schemes.join("/"),
            url.scheme()
        )));
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("URL has no host".to_string()));
    }

    Ok(())
}

fn parse_u16<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u16) -> u16 {
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_u32<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u32) -> u32 {
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_f64<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: f64) -> f64 {
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_bool<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: bool) -> bool {
    lookup(key).map_or(default, |v| match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    })
}

fn parse_duration_millis<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
