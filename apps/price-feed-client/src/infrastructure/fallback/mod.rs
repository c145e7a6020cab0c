//! Fallback Data Source
//!
//! Pull-based alternative to the realtime channel. Fetches a snapshot of
//! price records once, or on a fixed poll interval, and hands each
//! successful snapshot to a callback. The last successful snapshot is kept.
//!
//! Fetchers:
//! - [`HttpSnapshotFetcher`]: JSON document over HTTP
//! - [`StaticSnapshot`]: fixed in-memory records

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{FallbackError, SnapshotFetcher};
use crate::domain::streaming::PriceRecord;
use crate::infrastructure::metrics;

/// Receives each successful snapshot.
pub type SnapshotCallback = Arc<dyn Fn(&[PriceRecord]) + Send + Sync>;

/// A fetched snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Records in document order.
    pub records: Vec<PriceRecord>,
    /// When the fetch completed.
    pub fetched_at: DateTime<Utc>,
}

// =============================================================================
// Data Source
// =============================================================================

/// Polls a [`SnapshotFetcher`] while started.
#[derive(Clone)]
pub struct FallbackDataSource {
    fetcher: Arc<dyn SnapshotFetcher>,
    poll_interval: Option<Duration>,
    last: Arc<RwLock<Option<Snapshot>>>,
}

impl std::fmt::Debug for FallbackDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackDataSource")
            .field("poll_interval", &self.poll_interval)
            .field("has_snapshot", &self.last.read().is_some())
            .finish_non_exhaustive()
    }
}

impl FallbackDataSource {
    /// Create a data source. `poll_interval = None` fetches once per start.
    #[must_use]
    pub fn new(fetcher: Arc<dyn SnapshotFetcher>, poll_interval: Option<Duration>) -> Self {
        Self {
            fetcher,
            poll_interval: poll_interval.filter(|d| !d.is_zero()),
            last: Arc::new(RwLock::new(None)),
        }
    }

    /// Start fetching. Fetching stops when the handle is stopped or dropped.
    #[must_use]
    pub fn start(&self, on_data: SnapshotCallback) -> FallbackHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            Poller {
                fetcher: Arc::clone(&self.fetcher),
                poll_interval: self.poll_interval,
                last: Arc::clone(&self.last),
                on_data,
                cancel: cancel.clone(),
            }
            .run(),
        );

        metrics::set_fallback_active(true);
        tracing::info!(
            poll_interval = ?self.poll_interval,
            "Fallback data source started"
        );

        FallbackHandle {
            cancel,
            task: Some(task),
        }
    }

    /// Last successful snapshot, if any.
    #[must_use]
    pub fn last_snapshot(&self) -> Option<Snapshot> {
        self.last.read().clone()
    }
}

/// Running fallback. Dropping it stops fetching.
#[derive(Debug)]
pub struct FallbackHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl FallbackHandle {
    /// Stop fetching. Idempotent.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            metrics::set_fallback_active(false);
            tracing::info!("Fallback data source stopped");
        }
    }

    /// Whether the handle has not been stopped.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop and wait for the fetch task to exit.
    pub async fn join(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for FallbackHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Poller {
    fetcher: Arc<dyn SnapshotFetcher>,
    poll_interval: Option<Duration>,
    last: Arc<RwLock<Option<Snapshot>>>,
    on_data: SnapshotCallback,
    cancel: CancellationToken,
}

impl Poller {
    async fn run(self) {
        let Some(period) = self.poll_interval else {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {}
                () = self.fetch_once() => {}
            }
            return;
        };

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => break,
                        () = self.fetch_once() => {}
                    }
                }
            }
        }
    }

    async fn fetch_once(&self) {
        match self.fetcher.fetch().await {
            Ok(records) => {
                metrics::record_fallback_fetch(true);
                tracing::debug!(records = records.len(), "Fallback snapshot fetched");

                if self.cancel.is_cancelled() {
                    return;
                }

                let snapshot = Snapshot {
                    records,
                    fetched_at: Utc::now(),
                };
                *self.last.write() = Some(snapshot.clone());

                if catch_unwind(AssertUnwindSafe(|| (self.on_data)(&snapshot.records))).is_err() {
                    tracing::error!("Fallback snapshot callback panicked");
                }
            }
            Err(e) => {
                metrics::record_fallback_fetch(false);
                tracing::warn!(error = %e, "Fallback snapshot fetch failed");
            }
        }
    }
}

// =============================================================================
// Fetchers
// =============================================================================

/// Accepted snapshot document shapes.
#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotDocument {
    Records(Vec<PriceRecord>),
    Envelope { data: Vec<PriceRecord> },
}

impl SnapshotDocument {
    fn into_records(self) -> Vec<PriceRecord> {
        match self {
            Self::Records(records) | Self::Envelope { data: records } => records,
        }
    }
}

/// Decode a snapshot document: either a bare array of records or an object
/// with a `data` array.
///
/// # Errors
///
/// Returns [`FallbackError::Decode`] if the body matches neither shape.
pub fn decode_snapshot(body: &[u8]) -> Result<Vec<PriceRecord>, FallbackError> {
    serde_json::from_slice::<SnapshotDocument>(body)
        .map(SnapshotDocument::into_records)
        .map_err(|e| FallbackError::Decode(e.to_string()))
}

/// Fetches a snapshot document over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSnapshotFetcher {
    http: reqwest::Client,
    url: String,
}

impl HttpSnapshotFetcher {
    /// Create a fetcher for `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FallbackError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FallbackError::Request(e.to_string()))?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl SnapshotFetcher for HttpSnapshotFetcher {
    async fn fetch(&self) -> Result<Vec<PriceRecord>, FallbackError> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FallbackError::Request(e.to_string()))?;
        let status = resp.status();

        if !status.is_success() {
            return Err(FallbackError::Request(format!(
                "{} returned {}",
                self.url,
                status.as_u16()
            )));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| FallbackError::Request(e.to_string()))?;
        decode_snapshot(&body)
    }
}

/// Serves a fixed set of records.
#[derive(Debug, Clone, Default)]
pub struct StaticSnapshot {
    records: Vec<PriceRecord>,
}

impl StaticSnapshot {
    /// Wrap `records`.
    #[must_use]
    pub const fn new(records: Vec<PriceRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl SnapshotFetcher for StaticSnapshot {
    async fn fetch(&self) -> Result<Vec<PriceRecord>, FallbackError> {
        Ok(self.records.clone())
    }
}
