//! The state container: raw state, computed-value cache, dependency graph.
//!
//! A container owns one node's key/value state together with the lazily
//! evaluated computed values derived from it. Dependency edges are recorded
//! while a computed function runs (see [`TrackedView`]) and drive cache
//! invalidation when state changes.
//!
//! # Invalidation
//!
//! `invalidate(k)` removes the cache entry for `k`, then recurses into every
//! computed key whose recorded edge set includes `k`. Edges accumulate for
//! the container's lifetime and are never pruned, so a computed function
//! that conditionally reads different keys across evaluations can
//! over-invalidate. That trade (cheap and safe, but imprecise) is kept on
//! purpose. Cyclic computed graphs are unsupported; there is no cycle guard.
//!
//! # Locking
//!
//! The mutable interior sits behind one `RwLock`. User computed functions
//! are always invoked with the lock released; their reads re-enter through
//! short lock acquisitions, so computed values may freely read other
//! computed values.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use tracing::trace;

use super::tracked::TrackedView;
use super::value::{ChangedKeys, StateMap, Value};
use super::view::{ParentLink, StateView};

/// Counter for generating unique container IDs.
static CONTAINER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_container_id() -> u64 {
    CONTAINER_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A pure derivation over a tracked view of container state.
///
/// Fixed for the container's lifetime; every read through the view records
/// a dependency edge for the computed key being evaluated.
pub type ComputedFn = Arc<dyn Fn(&TrackedView) -> Value + Send + Sync>;

/// Wrap a closure as a [`ComputedFn`].
pub fn computed<F>(f: F) -> ComputedFn
where
    F: Fn(&TrackedView) -> Value + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Callback invoked after `set_state` with the changed-key set.
///
/// The returned future completes when propagation has finished; `set_state`
/// resolves only after awaiting it.
pub type PropagateFn = Arc<dyn Fn(ChangedKeys) -> BoxFuture<'static, ()> + Send + Sync>;

/// Mutable interior of a container.
struct StateContainer {
    /// Raw key/value state, exclusively owned by this container.
    state: StateMap,
    /// Cached computed values. At most one live entry per computed key.
    cache: HashMap<String, Value>,
    /// Dependency edges: key -> computed keys observed reading it.
    dependents: HashMap<String, IndexSet<String>>,
}

/// Shared handle to one node's state container.
///
/// Cheap to clone via `Arc`; views, tracked views, and effect actions all
/// hold one. The computed definitions live outside the lock because they
/// never change after construction.
pub struct ContainerCore {
    id: u64,
    inner: RwLock<StateContainer>,
    computed: IndexMap<String, ComputedFn>,
    propagate: RwLock<Option<PropagateFn>>,
}

impl ContainerCore {
    /// Create a container with the given initial state and computed
    /// definitions.
    pub fn new(initial: StateMap, computed: IndexMap<String, ComputedFn>) -> Arc<Self> {
        Arc::new(Self {
            id: next_container_id(),
            inner: RwLock::new(StateContainer {
                state: initial,
                cache: HashMap::new(),
                dependents: HashMap::new(),
            }),
            computed,
            propagate: RwLock::new(None),
        })
    }

    /// The container's unique ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Install the propagation callback. The owning node sets this once
    /// after construction; replacing it later is allowed but unused.
    pub fn set_propagate(&self, propagate: PropagateFn) {
        *self.propagate.write() = Some(propagate);
    }

    /// Snapshot the raw state.
    pub fn raw_state(&self) -> StateMap {
        self.inner.read().state.clone()
    }

    /// Build a fresh view over this container: a shallow copy of raw state
    /// plus one lazy accessor per computed key, optionally grafting a
    /// parent layer. Each call returns a new view backed by the same
    /// cache and dependency graph.
    pub fn get_state(self: &Arc<Self>, parent: Option<ParentLink>) -> StateView {
        StateView::new(Arc::clone(self), self.raw_state(), parent)
    }

    /// Whether `key` names a computed value.
    pub fn has_computed(&self, key: &str) -> bool {
        self.computed.contains_key(key)
    }

    /// The computed keys, in definition order.
    pub fn computed_keys(&self) -> impl Iterator<Item = &str> {
        self.computed.keys().map(String::as_str)
    }

    pub(crate) fn computed_fn(&self, key: &str) -> Option<ComputedFn> {
        self.computed.get(key).cloned()
    }

    pub(crate) fn cached(&self, key: &str) -> Option<Value> {
        self.inner.read().cache.get(key).cloned()
    }

    pub(crate) fn store_cached(&self, key: &str, value: Value) {
        self.inner.write().cache.insert(key.to_string(), value);
    }

    /// Record that `consumer` (a computed key) read `accessed` during its
    /// last evaluation. Edges accumulate; nothing removes them.
    pub(crate) fn record_edge(&self, accessed: &str, consumer: &str) {
        trace!(container = self.id, accessed, consumer, "dependency edge");
        self.inner
            .write()
            .dependents
            .entry(accessed.to_string())
            .or_default()
            .insert(consumer.to_string());
    }

    /// The computed keys recorded as depending on `key`.
    pub(crate) fn dependents_of(&self, key: &str) -> Vec<String> {
        self.inner
            .read()
            .dependents
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop the cache entry for `key` (if any), then recurse into every
    /// computed key recorded as dependent on it.
    pub fn invalidate(&self, key: &str) {
        let mut inner = self.inner.write();
        Self::invalidate_locked(&mut inner, key);
    }

    fn invalidate_locked(inner: &mut StateContainer, key: &str) {
        if inner.cache.remove(key).is_some() {
            trace!(key, "cache entry invalidated");
        }
        let dependants: Vec<String> = inner
            .dependents
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for dependant in dependants {
            Self::invalidate_locked(inner, &dependant);
        }
    }

    /// Write one key. A no-op when the new value is identical (shallow
    /// identity, not deep equality) to the current one; otherwise dependent
    /// cache entries are invalidated before the write. `None` removes the
    /// key. Returns whether the key actually changed.
    pub fn set(&self, key: &str, value: Option<Value>) -> bool {
        let mut inner = self.inner.write();
        let changed = match (inner.state.get(key), &value) {
            (Some(old), Some(new)) => !old.identical(new),
            (None, None) => false,
            _ => true,
        };
        if !changed {
            return false;
        }

        Self::invalidate_locked(&mut inner, key);
        match value {
            Some(value) => {
                inner.state.insert(key.to_string(), value);
            }
            None => {
                inner.state.shift_remove(key);
            }
        }
        true
    }

    /// Apply a patch over the union of current and patch keys via repeated
    /// [`set`](Self::set), returning the keys that actually changed.
    ///
    /// Keys present in the current state but absent from the patch are
    /// removed; the `soft_update` and `hard_update` helpers always produce
    /// full-state patches.
    pub fn apply_patch(&self, patch: &StateMap) -> ChangedKeys {
        let mut all_keys: Vec<String> = self.inner.read().state.keys().cloned().collect();
        for key in patch.keys() {
            if !all_keys.iter().any(|k| k == key) {
                all_keys.push(key.clone());
            }
        }

        let mut changed = ChangedKeys::new();
        for key in all_keys {
            if self.set(&key, patch.get(&key).cloned()) {
                changed.insert(key);
            }
        }
        changed
    }

    /// Apply a patch, then run the propagation callback with the changed-key
    /// set (possibly empty). Resolves once propagation completes, and
    /// returns the changed keys.
    pub async fn set_state(&self, patch: StateMap) -> ChangedKeys {
        let changed = self.apply_patch(&patch);
        trace!(container = self.id, changed = changed.len(), "set_state applied");
        let propagate = self.propagate.read().clone();
        if let Some(propagate) = propagate {
            propagate(changed.clone()).await;
        }
        changed
    }
}

impl std::fmt::Debug for ContainerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ContainerCore")
            .field("id", &self.id)
            .field("keys", &inner.state.len())
            .field("computed", &self.computed.len())
            .field("cached", &inner.cache.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn bare(initial: StateMap) -> Arc<ContainerCore> {
        ContainerCore::new(initial, IndexMap::new())
    }

    fn state(entries: &[(&str, i64)]) -> StateMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect()
    }

    #[test]
    fn set_is_a_noop_for_identical_values() {
        let core = bare(state(&[("n", 5)]));
        assert!(!core.set("n", Some(Value::from(5i64))));
        assert!(core.set("n", Some(Value::from(6i64))));
        assert!(core.set("n", None));
        assert!(!core.set("n", None));
    }

    #[test]
    fn apply_patch_reports_only_real_changes() {
        let core = bare(state(&[("a", 1), ("b", 2)]));

        let patch = state(&[("a", 1), ("b", 3)]);
        let changed = core.apply_patch(&patch);
        assert_eq!(changed.len(), 1);
        assert!(changed.contains("b"));
    }

    #[test]
    fn apply_patch_removes_absent_keys() {
        let core = bare(state(&[("a", 1), ("b", 2)]));

        let changed = core.apply_patch(&state(&[("a", 1)]));
        assert!(changed.contains("b"));
        assert!(!core.raw_state().contains_key("b"));
    }

    #[test]
    fn invalidate_recurses_through_recorded_edges() {
        let core = bare(state(&[("s", 0)]));
        // Edges: s -> b, b -> a (state key s feeds computed b feeds a).
        core.record_edge("s", "b");
        core.record_edge("b", "a");
        core.store_cached("a", Value::from(1i64));
        core.store_cached("b", Value::from(2i64));

        core.invalidate("s");
        assert!(core.cached("a").is_none());
        assert!(core.cached("b").is_none());
    }

    #[tokio::test]
    async fn set_state_invokes_propagation_with_raw_changed_keys() {
        let core = bare(state(&[("n", 5)]));
        // Even with an edge recorded for a computed key, the raw callback
        // sees only the state keys; the relay layer adds the rest.
        core.record_edge("n", "doubled");
        core.store_cached("doubled", Value::from(10i64));

        let seen: Arc<Mutex<Vec<ChangedKeys>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        core.set_propagate(Arc::new(move |changed| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.lock().push(changed);
            })
        }));

        core.set_state(state(&[("n", 3)])).await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("n"));
        assert!(!seen[0].contains("doubled"));
        // The dependent cache entry is still invalidated.
        assert!(core.cached("doubled").is_none());
    }

    #[tokio::test]
    async fn set_state_with_no_changes_reports_empty_set() {
        let core = bare(state(&[("n", 5)]));
        let calls = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&calls);
        core.set_propagate(Arc::new(move |changed| {
            assert!(changed.is_empty());
            *sink.lock() += 1;
            Box::pin(async {})
        }));

        let changed = core.set_state(state(&[("n", 5)])).await;
        assert!(changed.is_empty());
        assert_eq!(*calls.lock(), 1);
    }
}
