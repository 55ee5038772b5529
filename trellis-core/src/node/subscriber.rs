//! Slot-based subscriber registry for update notifications.
//!
//! Subscribers occupy append-only slots. Unsubscribing clears the slot to
//! empty rather than compacting the list, so slot indices stay valid and
//! iteration stays stable while a notification pass is in flight. This is
//! required behavior, not an optimization.

use std::future::Future;
use std::sync::{Arc, Weak};

use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use parking_lot::RwLock;
use smallvec::SmallVec;
use tracing::trace;

use crate::state::ChangedKeys;

/// An update callback. Receives the relayed changed-key set and returns a
/// future the notifier awaits before resolving the propagation pass.
pub type SubscriberFn = Arc<dyn Fn(ChangedKeys) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a [`SubscriberFn`].
pub fn subscriber<F, Fut>(f: F) -> SubscriberFn
where
    F: Fn(ChangedKeys) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |changed| f(changed).boxed())
}

/// The subscriber list of one container node.
pub struct SubscriberRegistry {
    slots: RwLock<Vec<Option<SubscriberFn>>>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slots: RwLock::new(Vec::new()),
        })
    }

    /// Register a callback. The returned [`Subscription`] clears the slot
    /// when dropped.
    pub fn subscribe(self: &Arc<Self>, callback: SubscriberFn) -> Subscription {
        let mut slots = self.slots.write();
        let slot = slots.len();
        slots.push(Some(callback));
        Subscription {
            registry: Arc::downgrade(self),
            slot,
        }
    }

    /// Notify every live subscriber, awaiting all callbacks.
    ///
    /// The live set is snapshotted up front, so a subscriber removed during
    /// the pass is still delivered to and one added during the pass is not.
    pub async fn notify(&self, changed: &ChangedKeys) {
        let live: SmallVec<[SubscriberFn; 4]> =
            self.slots.read().iter().flatten().cloned().collect();
        if live.is_empty() {
            return;
        }
        trace!(subscribers = live.len(), changed = changed.len(), "notifying");
        join_all(live.iter().map(|callback| callback(changed.clone()))).await;
    }

    /// Number of occupied slots.
    pub fn live_count(&self) -> usize {
        self.slots.read().iter().flatten().count()
    }

    /// Total slots ever allocated (cleared slots included).
    pub fn slot_count(&self) -> usize {
        self.slots.read().len()
    }

    fn clear(&self, slot: usize) {
        let mut slots = self.slots.write();
        if let Some(entry) = slots.get_mut(slot) {
            *entry = None;
        }
    }
}

/// Handle to a registered subscriber; dropping it unsubscribes.
pub struct Subscription {
    registry: Weak<SubscriberRegistry>,
    slot: usize,
}

impl Subscription {
    /// Remove the subscriber now, consuming the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.clear(self.slot);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    fn changed(keys: &[&str]) -> ChangedKeys {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[tokio::test]
    async fn unsubscribe_clears_the_slot_without_compacting() {
        let registry = SubscriberRegistry::new();
        let first = registry.subscribe(subscriber(|_| async {}));
        let _second = registry.subscribe(subscriber(|_| async {}));

        assert_eq!(registry.slot_count(), 2);
        assert_eq!(registry.live_count(), 2);

        first.unsubscribe();
        assert_eq!(registry.slot_count(), 2);
        assert_eq!(registry.live_count(), 1);

        // A later subscription takes a fresh slot; nothing shifts.
        let _third = registry.subscribe(subscriber(|_| async {}));
        assert_eq!(registry.slot_count(), 3);
    }

    #[tokio::test]
    async fn notify_reaches_every_live_subscriber() {
        let registry = SubscriberRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let a = Arc::clone(&hits);
        let _sa = registry.subscribe(subscriber(move |keys| {
            let a = Arc::clone(&a);
            async move {
                assert!(keys.contains("n"));
                a.fetch_add(1, Ordering::SeqCst);
            }
        }));
        let b = Arc::clone(&hits);
        let removed = registry.subscribe(subscriber(move |_| {
            let b = Arc::clone(&b);
            async move {
                b.fetch_add(1, Ordering::SeqCst);
            }
        }));
        removed.unsubscribe();

        registry.notify(&changed(&["n"])).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribing_mid_pass_does_not_disturb_delivery() {
        let registry = SubscriberRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        // The first subscriber drops the second's subscription from inside
        // its callback.
        let dropper = Arc::clone(&victim);
        let a = Arc::clone(&hits);
        let _first = registry.subscribe(subscriber(move |_| {
            let dropper = Arc::clone(&dropper);
            let a = Arc::clone(&a);
            async move {
                dropper.lock().take();
                a.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let b = Arc::clone(&hits);
        let second = registry.subscribe(subscriber(move |_| {
            let b = Arc::clone(&b);
            async move {
                b.fetch_add(1, Ordering::SeqCst);
            }
        }));
        *victim.lock() = Some(second);

        // The pass was snapshotted before the removal, so both deliver.
        registry.notify(&changed(&["n"])).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.slot_count(), 2);

        // The cleared slot stays out of the next pass.
        registry.notify(&changed(&["n"])).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
