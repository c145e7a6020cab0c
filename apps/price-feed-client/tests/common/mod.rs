//! Shared fixtures: a scripted in-memory connector and notification helpers.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

use price_feed_client::{
    BackoffConfig, ChannelParts, Connector, HeartbeatConfig, InboundFrame, ManagerConfig,
    Notification, TransportError,
};

/// What the next `connect` call does.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Open a channel and hand the server side to the test.
    Accept,
    /// Fail immediately.
    Refuse(String),
    /// Never complete.
    Hang,
}

/// Server end of an accepted in-memory channel.
pub struct ServerSide {
    /// Push frames (or a transport error) to the client.
    pub to_client: mpsc::UnboundedSender<Result<InboundFrame, TransportError>>,
    /// Text frames the client sent.
    pub from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerSide {
    /// Send a text frame to the client.
    pub fn push_text(&self, text: &str) {
        self.to_client
            .send(Ok(InboundFrame::Text(text.to_string())))
            .unwrap();
    }

    /// Drain everything the client has sent so far.
    pub fn drain(&mut self) -> Vec<String> {
        let mut sent = Vec::new();
        while let Ok(text) = self.from_client.try_recv() {
            sent.push(text);
        }
        sent
    }
}

/// Connector that follows a script of outcomes.
pub struct FakeConnector {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    calls: AtomicUsize,
    accepted: mpsc::UnboundedSender<ServerSide>,
}

impl FakeConnector {
    /// Create a connector that uses `fallback` once the script runs out.
    /// Returns the receiver of accepted server sides.
    pub fn new(
        script: impl IntoIterator<Item = Outcome>,
        fallback: Outcome,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSide>) {
        let (accepted, servers) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            calls: AtomicUsize::new(0),
            accepted,
        });
        (connector, servers)
    }

    /// Connector that refuses every attempt.
    pub fn refusing() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSide>) {
        Self::new([], Outcome::Refuse("connection refused".to_string()))
    }

    /// Connector that accepts every attempt.
    pub fn accepting() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSide>) {
        Self::new([], Outcome::Accept)
    }

    /// Append outcomes to the script.
    pub fn push(&self, outcome: Outcome) {
        self.script.lock().push_back(outcome);
    }

    /// Number of `connect` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _url: &str) -> Result<ChannelParts, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match outcome {
            Outcome::Accept => {
                let (to_client, client_rx) = mpsc::unbounded_channel();
                let (client_tx, from_client) = mpsc::unbounded_channel::<String>();

                let sink = futures::sink::unfold(client_tx, |tx, text: String| async move {
                    tx.send(text)
                        .map_err(|_| TransportError::Closed("server gone".to_string()))?;
                    Ok::<_, TransportError>(tx)
                });

                let _ = self.accepted.send(ServerSide {
                    to_client,
                    from_client,
                });

                Ok(ChannelParts {
                    sink: Box::pin(sink),
                    stream: Box::pin(UnboundedReceiverStream::new(client_rx)),
                })
            }
            Outcome::Refuse(reason) => Err(TransportError::ConnectFailed(reason)),
            Outcome::Hang => std::future::pending().await,
        }
    }
}

/// Manager config with the given retry budget and base delay, heartbeats off.
pub fn config(max_attempts: u32, base_delay_ms: u64) -> ManagerConfig {
    ManagerConfig {
        url: "ws://feed.test/ws".to_string(),
        backoff: BackoffConfig {
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        },
        heartbeat: HeartbeatConfig::new(Duration::ZERO, false),
        connect_timeout: Duration::from_secs(10),
    }
}

/// Next notification, failing the test if none arrives within a minute of
/// (virtual) time.
pub async fn next(rx: &mut broadcast::Receiver<Notification>) -> Notification {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("notification channel closed")
}

/// Assert no notification is pending.
pub fn assert_quiet(rx: &mut broadcast::Receiver<Notification>) {
    match rx.try_recv() {
        Err(broadcast::error::TryRecvError::Empty) => {}
        other => panic!("expected no notification, got {other:?}"),
    }
}

/// Poll `condition` every millisecond of (virtual) time, up to one second.
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not met within 1s");
}
