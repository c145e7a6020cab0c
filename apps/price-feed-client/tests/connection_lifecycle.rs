//! Connection Lifecycle Integration Tests
//!
//! Drives the connection manager against a scripted in-memory connector on a
//! paused clock.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{FakeConnector, Outcome, assert_quiet, config, eventually, next};
use price_feed_client::{
    ConnectionManager, ConnectionState, HeartbeatConfig, MessageCategory, MessageRouter,
    Notification, OutboundMessage, SendError, SubscriberRegistry, callback,
};

fn router() -> (Arc<MessageRouter>, Arc<SubscriberRegistry>) {
    let registry = Arc::new(SubscriberRegistry::new());
    (Arc::new(MessageRouter::new(Arc::clone(&registry))), registry)
}

fn counter(registry: &SubscriberRegistry, category: MessageCategory) -> Arc<AtomicUsize> {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_cb = Arc::clone(&hits);
    registry.subscribe(
        category,
        &callback(move |_| {
            hits_cb.fetch_add(1, Ordering::SeqCst);
        }),
    );
    hits
}

#[tokio::test(start_paused = true)]
async fn manager_does_not_connect_on_construction() {
    let (connector, _servers) = FakeConnector::accepting();
    let (router, _) = router();
    let manager = ConnectionManager::spawn(config(3, 100), connector.clone(), router);

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(manager.state(), ConnectionState::Idle);
    assert_eq!(connector.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn connect_while_open_is_noop() {
    let (connector, mut servers) = FakeConnector::accepting();
    let (router, _) = router();
    let manager = ConnectionManager::spawn(config(3, 100), connector.clone(), router);
    let mut rx = manager.notifications();
    let mut state = manager.watch_state();

    manager.connect();
    state.wait_for(|s| s.is_open()).await.unwrap();
    assert_eq!(next(&mut rx).await, Notification::Connecting { attempt: 0 });
    assert_eq!(next(&mut rx).await, Notification::Connected);
    let _server = servers.recv().await.unwrap();

    manager.connect();
    manager.connect();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(connector.calls(), 1);
    assert_eq!(manager.state(), ConnectionState::Open);
    assert_quiet(&mut rx);
}

#[tokio::test(start_paused = true)]
async fn three_failures_exhaust_retries() {
    let (connector, _servers) = FakeConnector::refusing();
    let (router, _) = router();
    let manager = ConnectionManager::spawn(config(3, 100), connector.clone(), router);
    let mut rx = manager.notifications();

    let started = tokio::time::Instant::now();
    manager.connect();

    let mut states = Vec::new();
    let mut delays = Vec::new();
    loop {
        let notification = next(&mut rx).await;
        states.push(notification.state());
        if let Notification::Closed { retry_in, .. } = &notification {
            delays.push(*retry_in);
        }
        if notification.state() == ConnectionState::Failed {
            break;
        }
    }

    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Closed,
            ConnectionState::Connecting,
            ConnectionState::Closed,
            ConnectionState::Connecting,
            ConnectionState::Closed,
            ConnectionState::Failed,
        ]
    );
    assert_eq!(
        delays,
        vec![
            Some(Duration::from_millis(100)),
            Some(Duration::from_millis(200)),
            None
        ]
    );
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(connector.calls(), 3);

    // Terminal: no further attempts.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(connector.calls(), 3);
    assert_eq!(manager.state(), ConnectionState::Failed);
    assert_eq!(manager.status().attempt, 3);
    assert!(manager.status().last_error.is_some());

    // Manual reconnect starts over with a fresh budget.
    manager.manual_reconnect();
    assert_eq!(next(&mut rx).await, Notification::Connecting { attempt: 0 });
    assert_eq!(connector.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn connect_from_failed_resets_budget() {
    let (connector, _servers) = FakeConnector::refusing();
    let (router, _) = router();
    let manager = ConnectionManager::spawn(config(1, 100), connector.clone(), router);
    let mut rx = manager.notifications();

    manager.connect();
    while next(&mut rx).await.state() != ConnectionState::Failed {}

    connector.push(Outcome::Accept);
    manager.connect();
    assert_eq!(next(&mut rx).await, Notification::Connecting { attempt: 0 });
    assert_eq!(next(&mut rx).await, Notification::Connected);
    assert_eq!(manager.status().attempt, 0);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_retry() {
    let (connector, _servers) = FakeConnector::refusing();
    let (router, _) = router();
    let manager = ConnectionManager::spawn(config(5, 1000), connector.clone(), router);
    let mut rx = manager.notifications();

    manager.connect();
    assert_eq!(next(&mut rx).await, Notification::Connecting { attempt: 0 });
    assert!(matches!(
        next(&mut rx).await,
        Notification::Closed { retry_in: Some(d), .. } if d == Duration::from_secs(1)
    ));

    tokio::time::sleep(Duration::from_millis(500)).await;
    manager.disconnect();

    assert_eq!(next(&mut rx).await, Notification::Closing);
    assert_eq!(next(&mut rx).await, Notification::Idle);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_quiet(&mut rx);
    assert_eq!(manager.state(), ConnectionState::Idle);
    assert_eq!(connector.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_idle_is_noop() {
    let (connector, _servers) = FakeConnector::accepting();
    let (router, _) = router();
    let manager = ConnectionManager::spawn(config(3, 100), connector, router);
    let mut rx = manager.notifications();

    manager.disconnect();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_quiet(&mut rx);
    assert_eq!(manager.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_open_settles_idle() {
    let (connector, mut servers) = FakeConnector::accepting();
    let (router, _) = router();
    let manager = ConnectionManager::spawn(config(3, 100), connector.clone(), router);
    let mut rx = manager.notifications();

    manager.connect();
    next(&mut rx).await;
    assert_eq!(next(&mut rx).await, Notification::Connected);
    let mut server = servers.recv().await.unwrap();

    manager.disconnect();
    assert_eq!(next(&mut rx).await, Notification::Closing);
    assert_eq!(next(&mut rx).await, Notification::Idle);

    // The client end is released.
    eventually(|| server.from_client.is_closed()).await;
    assert!(server.drain().is_empty());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_quiet(&mut rx);
    assert_eq!(connector.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_payload_keeps_channel_open() {
    let (connector, mut servers) = FakeConnector::accepting();
    let (router, registry) = router();
    let parse_errors = counter(&registry, MessageCategory::ParseError);
    let prices = counter(&registry, MessageCategory::Price);

    let manager = ConnectionManager::spawn(config(3, 100), connector, router);
    let mut rx = manager.notifications();

    manager.connect();
    next(&mut rx).await;
    next(&mut rx).await;
    let server = servers.recv().await.unwrap();

    server.push_text("{not json");
    server.push_text(r#"{"type":"prices","data":[{"symbol":"BTC","price":"64000"}]}"#);

    eventually(|| prices.load(Ordering::SeqCst) == 1).await;

    assert_eq!(parse_errors.load(Ordering::SeqCst), 1);
    assert_eq!(manager.state(), ConnectionState::Open);
    assert_eq!(manager.status().messages_received, 2);
    assert_quiet(&mut rx);
}

#[tokio::test(start_paused = true)]
async fn remote_close_reconnects_with_reset_attempt() {
    let (connector, mut servers) = FakeConnector::accepting();
    let (router, _) = router();
    let manager = ConnectionManager::spawn(config(3, 100), connector.clone(), router);
    let mut rx = manager.notifications();

    manager.connect();
    next(&mut rx).await;
    assert_eq!(next(&mut rx).await, Notification::Connected);
    let server = servers.recv().await.unwrap();
    assert!(manager.status().last_connected_at.is_some());

    drop(server);

    assert!(matches!(
        next(&mut rx).await,
        Notification::Closed { retry_in: Some(d), .. } if d == Duration::from_millis(100)
    ));
    assert_eq!(next(&mut rx).await, Notification::Connecting { attempt: 1 });
    assert_eq!(next(&mut rx).await, Notification::Connected);

    assert_eq!(connector.calls(), 2);
    assert_eq!(manager.status().attempt, 0);
    assert!(manager.status().last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn transport_error_on_open_channel_is_a_loss() {
    let (connector, mut servers) = FakeConnector::new([Outcome::Accept], Outcome::Hang);
    let (router, _) = router();
    let manager = ConnectionManager::spawn(config(3, 100), connector, router);
    let mut rx = manager.notifications();

    manager.connect();
    next(&mut rx).await;
    next(&mut rx).await;
    let server = servers.recv().await.unwrap();

    server
        .to_client
        .send(Err(price_feed_client::TransportError::Protocol(
            "reset".to_string(),
        )))
        .unwrap();

    match next(&mut rx).await {
        Notification::Closed { reason, .. } => assert!(reason.contains("reset")),
        other => panic!("expected Closed, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_counts_as_failure() {
    let (connector, _servers) = FakeConnector::new([], Outcome::Hang);
    let (router, _) = router();
    let mut cfg = config(1, 100);
    cfg.connect_timeout = Duration::from_secs(2);
    let manager = ConnectionManager::spawn(cfg, connector, router);
    let mut rx = manager.notifications();

    manager.connect();
    next(&mut rx).await;

    match next(&mut rx).await {
        Notification::Closed { reason, retry_in } => {
            assert!(reason.contains("timed out"), "reason: {reason}");
            assert!(retry_in.is_none());
        }
        other => panic!("expected Closed, got {other:?}"),
    }
    assert!(matches!(next(&mut rx).await, Notification::Failed { .. }));
}

#[tokio::test(start_paused = true)]
async fn manual_reconnect_while_open_goes_through_closing() {
    let (connector, mut servers) = FakeConnector::accepting();
    let (router, _) = router();
    let manager = ConnectionManager::spawn(config(3, 100), connector.clone(), router);
    let mut rx = manager.notifications();

    manager.connect();
    next(&mut rx).await;
    next(&mut rx).await;
    let _first = servers.recv().await.unwrap();

    manager.manual_reconnect();
    assert_eq!(next(&mut rx).await, Notification::Closing);
    assert_eq!(next(&mut rx).await, Notification::Connecting { attempt: 0 });
    assert_eq!(next(&mut rx).await, Notification::Connected);
    assert_eq!(connector.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn send_requires_open_channel() {
    let (connector, mut servers) = FakeConnector::accepting();
    let (router, _) = router();
    let manager = ConnectionManager::spawn(config(3, 100), connector, router);
    let mut rx = manager.notifications();

    assert_eq!(
        manager.request_refresh().await,
        Err(SendError::NotOpen(ConnectionState::Idle))
    );

    manager.connect();
    next(&mut rx).await;
    next(&mut rx).await;
    let mut server = servers.recv().await.unwrap();

    manager.request_refresh().await.unwrap();
    manager.send(OutboundMessage::Heartbeat).await.unwrap();
    eventually(|| !server.from_client.is_empty()).await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert_eq!(
        server.drain(),
        vec![
            r#"{"type":"refresh_request"}"#.to_string(),
            r#"{"type":"heartbeat"}"#.to_string()
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn heartbeat_pings_once_per_interval_and_stops_after_open() {
    let (connector, mut servers) = FakeConnector::accepting();
    let (router, _) = router();
    let mut cfg = config(3, 100);
    cfg.heartbeat = HeartbeatConfig::new(Duration::from_millis(50), false);
    let manager = ConnectionManager::spawn(cfg, connector, router);
    let mut rx = manager.notifications();

    manager.connect();
    next(&mut rx).await;
    assert_eq!(next(&mut rx).await, Notification::Connected);
    let mut server = servers.recv().await.unwrap();

    tokio::time::sleep(Duration::from_millis(25)).await;
    assert!(server.drain().is_empty());

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.drain(), vec![r#"{"type":"heartbeat"}"#.to_string()]);
    }

    manager.disconnect();
    assert_eq!(next(&mut rx).await, Notification::Closing);
    assert_eq!(next(&mut rx).await, Notification::Idle);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_heartbeat_closes_channel() {
    let (connector, mut servers) = FakeConnector::accepting();
    let (router, _) = router();
    let mut cfg = config(3, 100);
    cfg.heartbeat = HeartbeatConfig::new(Duration::from_millis(50), true);
    let manager = ConnectionManager::spawn(cfg, connector.clone(), router);
    let mut rx = manager.notifications();

    manager.connect();
    next(&mut rx).await;
    next(&mut rx).await;
    let _silent = servers.recv().await.unwrap();

    match next(&mut rx).await {
        Notification::Closed { reason, retry_in } => {
            assert!(reason.contains("heartbeat"), "reason: {reason}");
            assert_eq!(retry_in, Some(Duration::from_millis(100)));
        }
        other => panic!("expected Closed, got {other:?}"),
    }
    assert_eq!(next(&mut rx).await, Notification::Connecting { attempt: 1 });
    assert_eq!(next(&mut rx).await, Notification::Connected);
    assert_eq!(connector.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn acknowledged_heartbeat_keeps_channel_open() {
    let (connector, mut servers) = FakeConnector::accepting();
    let (router, registry) = router();
    let acks = counter(&registry, MessageCategory::Heartbeat);
    let mut cfg = config(3, 100);
    cfg.heartbeat = HeartbeatConfig::new(Duration::from_millis(50), true);
    let manager = ConnectionManager::spawn(cfg, connector.clone(), router);
    let mut rx = manager.notifications();

    manager.connect();
    next(&mut rx).await;
    next(&mut rx).await;
    let mut server = servers.recv().await.unwrap();

    let responder = tokio::spawn(async move {
        while let Some(ping) = server.from_client.recv().await {
            if ping.contains("heartbeat") {
                server.push_text(r#"{"type":"heartbeat_ack"}"#);
            }
        }
    });

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(manager.state(), ConnectionState::Open);
    assert_eq!(connector.calls(), 1);
    assert!(acks.load(Ordering::SeqCst) >= 9);
    assert_quiet(&mut rx);

    manager.disconnect();
    responder.await.unwrap();
}
