//! Application Services
//!
//! - `FeedSupervisor`: swaps between the realtime channel and the fallback
//!   data source based on connection notifications.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::connection::Notification;
use crate::domain::streaming::{InboundMessage, MessageCategory, PriceRecord};
use crate::domain::subscription::SharedRegistry;
use crate::infrastructure::fallback::{FallbackDataSource, FallbackHandle, SnapshotCallback};

/// Wire type used when republishing fallback snapshots.
pub const FALLBACK_MESSAGE_TYPE: &str = "prices";

/// Activates the fallback when the channel fails and deactivates it when the
/// channel reconnects. Fallback snapshots are published to
/// [`MessageCategory::Price`] subscribers as `prices` messages, so consumers
/// see one stream regardless of the source.
pub struct FeedSupervisor {
    registry: SharedRegistry,
    fallback: Option<FallbackDataSource>,
    active: Option<FallbackHandle>,
    fallback_active: Arc<AtomicBool>,
}

impl std::fmt::Debug for FeedSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSupervisor")
            .field("fallback_configured", &self.fallback.is_some())
            .field("fallback_active", &self.is_fallback_active())
            .finish_non_exhaustive()
    }
}

impl FeedSupervisor {
    /// Create a supervisor. Without a fallback source, `Failed` is only logged.
    #[must_use]
    pub fn new(registry: SharedRegistry, fallback: Option<FallbackDataSource>) -> Self {
        Self {
            registry,
            fallback,
            active: None,
            fallback_active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag mirroring whether the fallback is serving data.
    #[must_use]
    pub fn fallback_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fallback_active)
    }

    /// Whether the fallback is serving data.
    #[must_use]
    pub fn is_fallback_active(&self) -> bool {
        self.fallback_active.load(Ordering::SeqCst)
    }

    /// React to one notification.
    pub fn on_notification(&mut self, notification: &Notification) {
        match notification {
            Notification::Failed { reason } => {
                tracing::warn!(reason = %reason, "Realtime feed failed");
                self.activate_fallback();
            }
            Notification::Connected => self.deactivate_fallback(),
            _ => {}
        }
    }

    /// Process notifications until `cancel` fires or the manager goes away.
    pub async fn run(
        mut self,
        mut notifications: broadcast::Receiver<Notification>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                received = notifications.recv() => match received {
                    Ok(notification) => self.on_notification(&notification),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Supervisor lagged behind connection notifications");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        self.deactivate_fallback();
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    #[must_use]
    pub fn spawn(
        self,
        notifications: broadcast::Receiver<Notification>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(notifications, cancel))
    }

    fn activate_fallback(&mut self) {
        if self.active.is_some() {
            return;
        }
        let Some(source) = &self.fallback else {
            tracing::warn!("No fallback source configured, no data until reconnect");
            return;
        };

        tracing::info!("Switching to fallback data source");
        self.active = Some(source.start(republish_into(Arc::clone(&self.registry))));
        self.fallback_active.store(true, Ordering::SeqCst);
    }

    fn deactivate_fallback(&mut self) {
        if let Some(handle) = self.active.take() {
            tracing::info!("Realtime feed restored, stopping fallback");
            handle.stop();
        }
        self.fallback_active.store(false, Ordering::SeqCst);
    }
}

/// Callback that republishes snapshot records as a `prices` message.
fn republish_into(registry: SharedRegistry) -> SnapshotCallback {
    Arc::new(move |records: &[PriceRecord]| match serde_json::to_value(records) {
        Ok(data) => {
            let message = InboundMessage::new(FALLBACK_MESSAGE_TYPE, data);
            registry.publish(MessageCategory::Price, &message);
        }
        Err(e) => tracing::error!(error = %e, "Failed to encode fallback snapshot"),
    })
}
