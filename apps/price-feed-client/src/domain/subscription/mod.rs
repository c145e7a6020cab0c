//! Subscriber Registry
//!
//! Maps each [`MessageCategory`] to an ordered set of callbacks.
//!
//! # Design
//!
//! - Identity is the callback's `Arc` allocation, so registering the same
//!   handle twice is a no-op and `unsubscribe` undoes exactly one `subscribe`.
//! - `publish` snapshots the callback list under the read lock and invokes
//!   callbacks after releasing it, so a callback may subscribe or
//!   unsubscribe without deadlocking.
//! - Each invocation is isolated: a panicking callback is logged and the
//!   remaining callbacks still run.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;

use super::streaming::{InboundMessage, MessageCategory};

// =============================================================================
// Types
// =============================================================================

/// Subscriber callback. Compared by `Arc` identity.
pub type Callback = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// Wrap a closure as a [`Callback`] handle that can later be unsubscribed.
#[must_use]
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&InboundMessage) + Send + Sync + 'static,
{
    Arc::new(f)
}

fn same_callback(a: &Callback, b: &Callback) -> bool {
    // Compare data pointers only; vtable addresses are not stable identities.
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}

/// Outcome of a single publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishReport {
    /// Callbacks that returned normally.
    pub delivered: usize,
    /// Callbacks that panicked.
    pub failed: usize,
}

// =============================================================================
// Registry
// =============================================================================

/// Category → callbacks, in registration order.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<MessageCategory, Vec<Callback>>>,
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<MessageCategory, usize> = self
            .subscribers
            .read()
            .iter()
            .map(|(category, callbacks)| (*category, callbacks.len()))
            .collect();
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &counts)
            .finish()
    }
}

impl SubscriberRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `category`.
    ///
    /// Returns `false` if it was already registered.
    pub fn subscribe(&self, category: MessageCategory, callback: &Callback) -> bool {
        let mut subscribers = self.subscribers.write();
        let list = subscribers.entry(category).or_default();

        if list.iter().any(|existing| same_callback(existing, callback)) {
            return false;
        }

        list.push(Arc::clone(callback));
        tracing::trace!(
            category = category.as_str(),
            count = list.len(),
            "Subscriber added"
        );
        true
    }

    /// Remove `callback` from `category`.
    ///
    /// Returns `false` if it was not registered.
    pub fn unsubscribe(&self, category: MessageCategory, callback: &Callback) -> bool {
        let mut subscribers = self.subscribers.write();
        let Some(list) = subscribers.get_mut(&category) else {
            return false;
        };

        let before = list.len();
        list.retain(|existing| !same_callback(existing, callback));
        let removed = list.len() != before;

        if list.is_empty() {
            subscribers.remove(&category);
        }

        removed
    }

    /// Invoke every callback registered for `category`, in order.
    pub fn publish(&self, category: MessageCategory, payload: &InboundMessage) -> PublishReport {
        let snapshot: Vec<Callback> = self
            .subscribers
            .read()
            .get(&category)
            .cloned()
            .unwrap_or_default();

        let mut report = PublishReport::default();
        for callback in &snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                Ok(()) => report.delivered += 1,
                Err(_) => {
                    report.failed += 1;
                    tracing::error!(
                        category = category.as_str(),
                        kind = %payload.kind,
                        "Subscriber panicked during delivery"
                    );
                }
            }
        }

        report
    }

    /// Number of callbacks registered for `category`.
    #[must_use]
    pub fn subscriber_count(&self, category: MessageCategory) -> usize {
        self.subscribers.read().get(&category).map_or(0, Vec::len)
    }

    /// Total callbacks across all categories.
    #[must_use]
    pub fn total_subscribers(&self) -> usize {
        self.subscribers.read().values().map(Vec::len).sum()
    }
}

/// Shared registry reference.
pub type SharedRegistry = Arc<SubscriberRegistry>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    fn price() -> InboundMessage {
        InboundMessage::new("prices", serde_json::json!([]))
    }

    fn counter() -> (Arc<AtomicUsize>, Callback) {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_cb = Arc::clone(&hits);
        let cb = callback(move |_| {
            hits_cb.fetch_add(1, Ordering::SeqCst);
        });
        (hits, cb)
    }

    #[test]
    fn subscribe_is_idempotent() {
        let registry = SubscriberRegistry::new();
        let (hits, cb) = counter();

        assert!(registry.subscribe(MessageCategory::Price, &cb));
        assert!(!registry.subscribe(MessageCategory::Price, &cb));
        assert_eq!(registry.subscriber_count(MessageCategory::Price), 1);

        registry.publish(MessageCategory::Price, &price());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscribe_then_unsubscribe_is_invisible() {
        let registry = SubscriberRegistry::new();
        let (hits, cb) = counter();

        registry.subscribe(MessageCategory::Price, &cb);
        assert!(registry.unsubscribe(MessageCategory::Price, &cb));

        let report = registry.publish(MessageCategory::Price, &price());
        assert_eq!(report, PublishReport::default());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(registry.total_subscribers(), 0);
    }

    #[test]
    fn unsubscribe_unknown_returns_false() {
        let registry = SubscriberRegistry::new();
        let (_, cb) = counter();
        assert!(!registry.unsubscribe(MessageCategory::Error, &cb));
    }

    #[test]
    fn distinct_closures_are_distinct_subscribers() {
        let registry = SubscriberRegistry::new();
        let (_, a) = counter();
        let (_, b) = counter();

        registry.subscribe(MessageCategory::Price, &a);
        registry.subscribe(MessageCategory::Price, &b);
        assert_eq!(registry.subscriber_count(MessageCategory::Price), 2);

        registry.unsubscribe(MessageCategory::Price, &a);
        assert_eq!(registry.subscriber_count(MessageCategory::Price), 1);
    }

    #[test]
    fn publish_preserves_registration_order() {
        let registry = SubscriberRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for id in 0..3 {
            let order = Arc::clone(&order);
            let cb = callback(move |_| order.lock().push(id));
            registry.subscribe(MessageCategory::Price, &cb);
        }

        registry.publish(MessageCategory::Price, &price());
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn panicking_callback_does_not_block_others() {
        let registry = SubscriberRegistry::new();
        let (hits, good) = counter();
        let bad = callback(|_| panic!("subscriber bug"));

        registry.subscribe(MessageCategory::Price, &bad);
        registry.subscribe(MessageCategory::Price, &good);

        let report = registry.publish(MessageCategory::Price, &price());
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn categories_are_isolated() {
        let registry = SubscriberRegistry::new();
        let (hits, cb) = counter();
        registry.subscribe(MessageCategory::ParseError, &cb);

        registry.publish(MessageCategory::Price, &price());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn callback_may_unsubscribe_itself() {
        let registry = Arc::new(SubscriberRegistry::new());
        let slot: Arc<Mutex<Option<Callback>>> = Arc::new(Mutex::new(None));

        let registry_cb = Arc::clone(&registry);
        let slot_cb = Arc::clone(&slot);
        let cb = callback(move |_| {
            if let Some(me) = slot_cb.lock().take() {
                registry_cb.unsubscribe(MessageCategory::Price, &me);
            }
        });
        *slot.lock() = Some(Arc::clone(&cb));
        registry.subscribe(MessageCategory::Price, &cb);

        registry.publish(MessageCategory::Price, &price());
        assert_eq!(registry.subscriber_count(MessageCategory::Price), 0);
    }
}
