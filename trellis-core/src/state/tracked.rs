//! Dependency-recording read access for computed functions.
//!
//! While a computed value evaluates, every read goes through a
//! [`TrackedView`]: an explicit `get(key)` accessor that records the edge
//! `(accessed key -> consumer key)` into the container's dependency graph
//! before resolving the value. The tracking context is an explicit value
//! rather than anything ambient; computed functions receive it directly.

use super::value::Value;
use super::view::StateView;

/// Read-through accessor handed to a computed function during evaluation.
///
/// Reads resolve with the same precedence as the underlying view (computed,
/// then own state, then grafted parent keys) and record a dependency edge
/// for every accessible key touched. Reads outside the accessible key set
/// resolve to `None` and record nothing.
pub struct TrackedView {
    consumer: String,
    view: StateView,
}

impl TrackedView {
    pub(crate) fn new(view: &StateView, consumer: &str) -> Self {
        Self {
            consumer: consumer.to_string(),
            view: view.clone(),
        }
    }

    /// The computed key being evaluated through this view.
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Read a key, recording the dependency edge.
    ///
    /// Reading another computed key evaluates it lazily (through its own
    /// tracked view) if it is not already cached.
    pub fn get(&self, key: &str) -> Option<Value> {
        if self.view.is_accessible(key) {
            self.view.core().record_edge(key, &self.consumer);
        }
        self.view.get(key)
    }

    /// Shorthand for `get` followed by an integer coercion.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    /// Shorthand for `get` followed by a float coercion.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_f64())
    }

    /// Shorthand for `get` followed by a string coercion.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }

    /// Shorthand for `get` followed by a boolean coercion.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }
}
