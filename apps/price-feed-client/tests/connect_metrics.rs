//! Connect Attempt Metrics
//!
//! Runs in its own test binary so the global Prometheus recorder sees only
//! this scenario.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use common::{FakeConnector, config, next};
use price_feed_client::{
    ConnectionManager, MessageRouter, Notification, SubscriberRegistry, init_metrics,
};

#[tokio::test(start_paused = true)]
async fn connect_attempts_are_labelled_by_trigger() {
    let handle = init_metrics().unwrap();

    let (connector, _servers) = FakeConnector::refusing();
    let router = Arc::new(MessageRouter::new(Arc::new(SubscriberRegistry::new())));
    let manager = ConnectionManager::spawn(config(2, 100), connector.clone(), router);
    let mut rx = manager.notifications();

    // initial attempt, one scheduled retry, then Failed
    manager.connect();
    while !matches!(next(&mut rx).await, Notification::Failed { .. }) {}

    // caller leaves Failed; both attempts of the fresh run are counted
    manager.connect();
    while !matches!(next(&mut rx).await, Notification::Failed { .. }) {}
    assert_eq!(connector.calls(), 4);

    let rendered = handle.render();
    assert!(
        rendered.contains(r#"price_feed_connect_attempts_total{trigger="initial"} 1"#),
        "{rendered}"
    );
    assert!(
        rendered.contains(r#"price_feed_connect_attempts_total{trigger="manual"} 1"#),
        "{rendered}"
    );
    assert!(
        rendered.contains(r#"price_feed_connect_attempts_total{trigger="retry"} 2"#),
        "{rendered}"
    );
}
