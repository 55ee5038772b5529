//! State injection for consumers at the bottom of the context chain.
//!
//! A consumer (typically a wrapped component) asks the nearest
//! context source for state and effects. Asking without an enclosing
//! container is a configuration error at construction time. The injection
//! tracks which keys the consumer actually read, so `should_update` can
//! skip notification passes that touched none of them.

use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::RwLock;

use crate::effects::Effects;
use crate::error::Error;
use crate::state::{ChangedKeys, StateView, Value};

use super::context::ContextSource;

/// A validated connection to the nearest container's context.
pub struct Injection {
    source: Arc<dyn ContextSource>,
    keys: Option<Vec<String>>,
    used: RwLock<IndexSet<String>>,
}

/// Connect to the nearest container.
///
/// Fails with [`Error::MissingContainer`] when the source publishes no
/// state or effects, i.e. there is no enclosing container in the chain.
pub fn inject_state(source: Arc<dyn ContextSource>) -> Result<Injection, Error> {
    let context = source.context();
    if context.state.is_none() || context.effects.is_none() {
        return Err(Error::MissingContainer);
    }
    Ok(Injection {
        source,
        keys: None,
        used: RwLock::new(IndexSet::new()),
    })
}

impl std::fmt::Debug for Injection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Injection")
            .field("keys", &self.keys)
            .field("used", &*self.used.read())
            .finish_non_exhaustive()
    }
}

impl Injection {
    /// Restrict update filtering to an explicit key list instead of the
    /// recorded used keys.
    pub fn with_keys(mut self, keys: Vec<String>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// The current state view.
    pub fn state(&self) -> Result<StateView, Error> {
        self.source.context().state.clone().ok_or(Error::MissingContainer)
    }

    /// The current effect map.
    pub fn effects(&self) -> Result<Effects, Error> {
        self.source
            .context()
            .effects
            .clone()
            .ok_or(Error::MissingContainer)
    }

    /// Read a key from the current view, recording it as used.
    pub fn tracked_get(&self, key: &str) -> Result<Option<Value>, Error> {
        self.used.write().insert(key.to_string());
        Ok(self.state()?.get(key))
    }

    /// Forget recorded used keys. Callers reset these when new props
    /// arrive, so stale reads stop pinning updates.
    pub fn reset_used(&self) {
        self.used.write().clear();
    }

    /// Whether a notification with these changed keys concerns this
    /// consumer. With an explicit key list, any overlap counts; otherwise
    /// any overlap with the recorded used keys counts, and a consumer that
    /// has recorded nothing updates unconditionally.
    pub fn should_update(&self, changed: &ChangedKeys) -> bool {
        if let Some(keys) = &self.keys {
            return keys.iter().any(|key| changed.contains(key));
        }
        let used = self.used.read();
        if used.is_empty() {
            return true;
        }
        used.iter().any(|key| changed.contains(key))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
