//! State views and parent-state grafting.
//!
//! A [`StateView`] is what consumers see: a shallow copy of raw state taken
//! at creation, one lazy accessor per computed key, and (for non-root nodes)
//! a grafted parent layer. Grafting is an explicit two-layer lookup, never
//! true delegation: the own layer is checked first, then the captured parent
//! accessor is evaluated lazily on every read. The grafting layer itself
//! never caches parent values.

use std::sync::Arc;

use super::container::ContainerCore;
use super::tracked::TrackedView;
use super::value::{StateMap, Value};

/// Read-only link to a parent view, captured when a context is built.
///
/// Holds the parent's key list (fixed at capture time) and an accessor that
/// is evaluated once per read. Parent state is never writable through this.
#[derive(Clone)]
pub struct ParentLink {
    keys: Arc<Vec<String>>,
    read: Arc<dyn Fn(&str) -> Option<Value> + Send + Sync>,
}

impl ParentLink {
    /// Build a link from an explicit key list and accessor. Mostly useful
    /// for tests; nodes use [`ParentLink::from_view`].
    pub fn new<F>(keys: Vec<String>, read: F) -> Self
    where
        F: Fn(&str) -> Option<Value> + Send + Sync + 'static,
    {
        Self {
            keys: Arc::new(keys),
            read: Arc::new(read),
        }
    }

    /// Capture a parent view as a graft source.
    pub fn from_view(view: &StateView) -> Self {
        let keys = Arc::new(view.keys());
        let parent = view.clone();
        Self {
            keys,
            read: Arc::new(move |key| parent.get(key)),
        }
    }

    /// The parent keys visible through this link.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }

    pub(crate) fn get(&self, key: &str) -> Option<Value> {
        (self.read)(key)
    }
}

/// A fresh view over one container's state.
///
/// Cloning shares the same snapshot, cache, and dependency graph; views are
/// handles over a shared interior.
#[derive(Clone)]
pub struct StateView {
    inner: Arc<ViewInner>,
}

struct ViewInner {
    core: Arc<ContainerCore>,
    raw: StateMap,
    parent: Option<ParentLink>,
}

impl StateView {
    pub(crate) fn new(core: Arc<ContainerCore>, raw: StateMap, parent: Option<ParentLink>) -> Self {
        Self {
            inner: Arc::new(ViewInner { core, raw, parent }),
        }
    }

    /// Read a key.
    ///
    /// Precedence: computed values shadow raw state, and both shadow grafted
    /// parent keys. Computed values evaluate lazily on first access (or the
    /// first access after invalidation) and are served from cache after
    /// that. Parent keys re-evaluate the parent accessor on every read.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.computed_value(key) {
            return Some(value);
        }
        if let Some(value) = self.inner.raw.get(key) {
            return Some(value.clone());
        }
        match &self.inner.parent {
            Some(parent) if parent.contains(key) => parent.get(key),
            _ => None,
        }
    }

    /// Whether `key` is visible through this view.
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.raw.contains_key(key)
            || self.inner.core.has_computed(key)
            || self
                .inner
                .parent
                .as_ref()
                .is_some_and(|parent| parent.contains(key))
    }

    /// All visible keys: own raw state, computed values, then non-shadowed
    /// parent keys, preserving each layer's order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.raw.keys().cloned().collect();
        for key in self.inner.core.computed_keys() {
            if !self.inner.raw.contains_key(key) {
                keys.push(key.to_string());
            }
        }
        if let Some(parent) = &self.inner.parent {
            for key in parent.keys() {
                if !keys.iter().any(|k| k == key) {
                    keys.push(key.clone());
                }
            }
        }
        keys
    }

    /// The raw-state snapshot this view was built from. Used for SSR
    /// capture; computed and grafted keys are excluded.
    pub fn raw(&self) -> &StateMap {
        &self.inner.raw
    }

    /// Shorthand for `get` followed by an integer coercion.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    /// Shorthand for `get` followed by a boolean coercion.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    /// Shorthand for `get` followed by a string coercion.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }

    pub(crate) fn core(&self) -> &Arc<ContainerCore> {
        &self.inner.core
    }

    /// A key is accessible to dependency tracking when it names a computed
    /// value, an own raw key, or a grafted parent key.
    pub(crate) fn is_accessible(&self, key: &str) -> bool {
        self.contains_key(key)
    }

    /// Evaluate a computed key, serving from cache when possible. Returns
    /// `None` when `key` is not a computed value.
    fn computed_value(&self, key: &str) -> Option<Value> {
        let core = &self.inner.core;
        if !core.has_computed(key) {
            return None;
        }
        if let Some(cached) = core.cached(key) {
            return Some(cached);
        }

        // Evaluate with the container lock released; reads re-enter through
        // the tracked view, which also lets computed values read each other.
        let function = core.computed_fn(key)?;
        let tracked = TrackedView::new(self, key);
        let value = function(&tracked);
        core.store_cached(key, value.clone());
        Some(value)
    }
}

impl std::fmt::Debug for StateView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateView")
            .field("container", &self.inner.core.id())
            .field("raw_keys", &self.inner.raw.len())
            .field("grafted", &self.inner.parent.is_some())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
