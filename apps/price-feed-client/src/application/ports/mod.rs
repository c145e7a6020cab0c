//! Port Interfaces
//!
//! Contracts that infrastructure adapters implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Connector`: opens a bidirectional frame channel to the feed
//! - `SnapshotFetcher`: pulls a one-off price snapshot for the fallback path

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};

use crate::domain::streaming::PriceRecord;

// =============================================================================
// Transport
// =============================================================================

/// A data frame received from the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

/// Transport-level failures. All of them are recoverable through reconnection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The remote refused or the handshake failed.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// Opening the channel took longer than the configured timeout.
    #[error("connection timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The remote closed the channel.
    #[error("connection closed: {0}")]
    Closed(String),

    /// No heartbeat acknowledgment arrived in time.
    #[error("heartbeat acknowledgment missed")]
    HeartbeatTimeout,

    /// Protocol-level failure on an open channel.
    #[error("transport error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConnectFailed(_) => "connect_failed",
            Self::Timeout(_) => "timeout",
            Self::Closed(_) => "closed",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Protocol(_) => "protocol",
        }
    }
}

/// Write half of an open channel. Accepts serialized text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Read half of an open channel. Ends (or yields an error) when the channel closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<InboundFrame, TransportError>> + Send>>;

/// Both halves of a freshly opened channel.
pub struct ChannelParts {
    /// Outbound frames.
    pub sink: FrameSink,
    /// Inbound frames.
    pub stream: FrameStream,
}

impl std::fmt::Debug for ChannelParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelParts").finish_non_exhaustive()
    }
}

/// Opens channels to the feed.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a channel to `url`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the channel cannot be established.
    async fn connect(&self, url: &str) -> Result<ChannelParts, TransportError>;
}

// =============================================================================
// Fallback
// =============================================================================

/// Errors from the fallback snapshot path.
#[derive(Debug, thiserror::Error)]
pub enum FallbackError {
    /// Request failed or returned a non-success status.
    #[error("snapshot request failed: {0}")]
    Request(String),

    /// Snapshot body was not a valid record array.
    #[error("snapshot decode failed: {0}")]
    Decode(String),
}

/// Pulls a snapshot of price records from a non-real-time source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotFetcher: Send + Sync + 'static {
    /// Fetch the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`FallbackError`] if the snapshot cannot be fetched or decoded.
    async fn fetch(&self) -> Result<Vec<PriceRecord>, FallbackError>;
}
