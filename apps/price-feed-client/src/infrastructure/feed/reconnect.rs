//! Reconnection Backoff
//!
//! Exponential backoff for channel reconnection. The delay is a pure
//! function of the attempt number; optional jitter is applied separately so
//! the base schedule stays deterministic.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor per attempt (2.0 doubles the delay each attempt).
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%). 0 disables jitter.
    pub jitter_factor: f64,
    /// Consecutive failures before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 5,
        }
    }
}

impl BackoffConfig {
    /// Create configuration from `FeedSettings`.
    #[must_use]
    pub const fn from_feed_settings(settings: &crate::FeedSettings) -> Self {
        Self {
            base_delay: settings.reconnect_base_delay,
            max_delay: settings.reconnect_max_delay,
            multiplier: settings.reconnect_multiplier,
            jitter_factor: settings.reconnect_jitter,
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

/// Backoff schedule.
///
/// # Example
///
/// ```rust
/// use price_feed_client::infrastructure::feed::reconnect::{BackoffConfig, BackoffPolicy};
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::new(BackoffConfig {
///     base_delay: Duration::from_millis(1000),
///     max_delay: Duration::from_millis(30_000),
///     ..BackoffConfig::default()
/// });
///
/// assert_eq!(policy.next_delay(0), Duration::from_millis(1000));
/// assert_eq!(policy.next_delay(3), Duration::from_millis(8000));
/// assert_eq!(policy.next_delay(10), Duration::from_millis(30_000));
/// ```
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: BackoffConfig,
}

impl BackoffPolicy {
    /// Create a new policy.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Configured attempt limit (0 = unlimited).
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Delay before retry number `attempt` (0-based).
    ///
    /// `base * multiplier^attempt`, capped at `max_delay`. Non-decreasing in
    /// `attempt` for any multiplier ≥ 1.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let max_millis = self.config.max_delay.as_millis();
        let base_millis = self.config.base_delay.as_millis().min(max_millis);

        #[allow(clippy::cast_precision_loss)]
        let base = base_millis as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = (base * self.config.multiplier.max(1.0).powi(exponent)).round();

        #[allow(clippy::cast_precision_loss)]
        let capped = if scaled.is_finite() {
            scaled.min(max_millis as f64)
        } else {
            max_millis as f64
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = capped.max(0.0) as u64;
        Duration::from_millis(millis)
    }

    /// Apply the configured jitter to `delay`, never exceeding `max_delay`.
    #[must_use]
    pub fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = delay.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted = Duration::from_millis(adjusted_millis as u64);
        adjusted.min(self.config.max_delay)
    }
}
