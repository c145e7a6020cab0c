//! Configuration Module
//!
//! Configuration loading for the feed client.

mod settings;

pub use settings::{ConfigError, FallbackSettings, FeedConfig, FeedSettings, ServerSettings};
