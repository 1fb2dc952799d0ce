//! Sync status fan-out.
//!
//! Subscribers are plain callbacks run synchronously in registration order.
//! A panicking callback is logged and skipped so later subscribers still see
//! the notification. [`StatusStream`] adapts a subscription into a `Stream`
//! for transports that drain events asynchronously.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{trace, warn};

/// Status delivered to subscribers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_syncing: bool,
    /// Time of the last successful sync, serialized as RFC 3339 or null.
    pub last_synced: Option<DateTime<Utc>>,
    /// Set only after a sync gave up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Status subscriber callback.
pub type StatusCallback = Arc<dyn Fn(&SyncStatus) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: Vec<(u64, StatusCallback)>,
}

/// Delivers [`SyncStatus`] updates to registered callbacks.
pub struct StatusBroadcaster {
    registry: Arc<Mutex<Registry>>,
    current: Mutex<SyncStatus>,
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            current: Mutex::new(SyncStatus::default()),
        }
    }

    /// The most recently notified status.
    pub fn current(&self) -> SyncStatus {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .len()
    }

    /// Register a callback and immediately deliver the current status to it.
    ///
    /// The callback stays registered until the returned handle is dropped or
    /// [`Subscription::unsubscribe`] is called.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        let callback: StatusCallback = Arc::new(callback);
        let id = {
            let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.subscribers.push((id, callback.clone()));
            id
        };
        trace!(subscription = id, "status subscriber added");

        deliver(id, &callback, &self.current());

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Subscribe through a stream of statuses, starting with the current one.
    pub fn stream(&self) -> StatusStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |status| {
            // The receiver going away is handled by the stream's own drop.
            let _ = tx.send(status.clone());
        });
        StatusStream {
            inner: UnboundedReceiverStream::new(rx),
            _subscription: subscription,
        }
    }

    /// Record `status` as current and deliver it to every subscriber.
    pub fn notify(&self, status: SyncStatus) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = status.clone();

        // Callbacks run without the lock so they may subscribe or unsubscribe.
        let subscribers: Vec<(u64, StatusCallback)> = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .clone();

        for (id, callback) in &subscribers {
            deliver(*id, callback, &status);
        }
    }
}

fn deliver(id: u64, callback: &StatusCallback, status: &SyncStatus) {
    if catch_unwind(AssertUnwindSafe(|| callback(status))).is_err() {
        warn!(subscription = id, "status subscriber panicked");
    }
}

/// Handle to a registered status callback.
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Remove the callback. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
        let before = registry.subscribers.len();
        registry.subscribers.retain(|(id, _)| *id != self.id);
        if registry.subscribers.len() != before {
            trace!(subscription = self.id, "status subscriber removed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Stream of status updates backed by a subscription.
///
/// Dropping the stream unsubscribes.
pub struct StatusStream {
    inner: UnboundedReceiverStream<SyncStatus>,
    _subscription: Subscription,
}

impl Stream for StatusStream {
    type Item = SyncStatus;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_stream::StreamExt;

    fn syncing() -> SyncStatus {
        SyncStatus {
            is_syncing: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_subscribe_delivers_current_status() {
        let broadcaster = StatusBroadcaster::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let _sub = broadcaster.subscribe(move |s| sink.lock().unwrap().push(s.clone()));

        assert_eq!(*seen.lock().unwrap(), vec![SyncStatus::default()]);
    }

    #[test]
    fn test_notify_in_registration_order() {
        let broadcaster = StatusBroadcaster::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = order.clone();
        let _a = broadcaster.subscribe(move |s| {
            if s.is_syncing {
                first.lock().unwrap().push("a");
            }
        });
        let second = order.clone();
        let _b = broadcaster.subscribe(move |s| {
            if s.is_syncing {
                second.lock().unwrap().push("b");
            }
        });

        broadcaster.notify(syncing());
        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let broadcaster = StatusBroadcaster::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        let _bad = broadcaster.subscribe(|s| {
            if s.is_syncing {
                panic!("subscriber failure");
            }
        });
        let counter = delivered.clone();
        let _good = broadcaster.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        broadcaster.notify(syncing());
        // Initial delivery plus the notification.
        assert_eq!(delivered.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let broadcaster = StatusBroadcaster::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let sub = broadcaster.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(broadcaster.subscriber_count(), 0);

        broadcaster.notify(syncing());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let broadcaster = StatusBroadcaster::new();
        {
            let _sub = broadcaster.subscribe(|_| {});
            assert_eq!(broadcaster.subscriber_count(), 1);
        }
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_wire_shape() {
        let status = SyncStatus::default();
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!({ "isSyncing": false, "lastSynced": null })
        );

        let failed = SyncStatus {
            error: Some("down".into()),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&failed).unwrap()["error"], "down");
    }

    #[tokio::test]
    async fn test_stream_yields_updates_and_unsubscribes_on_drop() {
        let broadcaster = StatusBroadcaster::new();
        let mut stream = broadcaster.stream();

        broadcaster.notify(syncing());
        assert_eq!(stream.next().await, Some(SyncStatus::default()));
        assert_eq!(stream.next().await, Some(syncing()));

        drop(stream);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }
}
