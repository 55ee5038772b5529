//! The published context: what a node exposes to its descendants.
//!
//! A context snapshot is rebuilt on every propagation pass and never mutated
//! in place by consumers. Descendants reach their parent through a
//! [`ContextSource`], so they always observe the most recently published
//! snapshot rather than a stale copy.

use std::sync::Arc;

use crate::effects::Effects;
use crate::hydrate::HydrateCursor;
use crate::state::{ChangedKeys, StateMap, StateView};

use super::subscriber::{SubscriberFn, SubscriberRegistry, Subscription};

/// Transforms the context snapshot a node is about to publish. Applied in
/// order during `build_context`.
pub type Middleware = Arc<dyn Fn(ContextSnapshot) -> ContextSnapshot + Send + Sync>;

/// Server-side capture hook: appends one container's raw state to an
/// accumulating pre-order sequence.
pub type CaptureHook = Arc<dyn Fn(StateMap) + Send + Sync>;

/// One published context.
#[derive(Clone, Default)]
pub struct ContextSnapshot {
    /// The node's grafted state view, absent on bare roots such as the SSR
    /// capture context.
    pub state: Option<StateView>,
    /// The node's composed effect map.
    pub effects: Option<Effects>,
    /// Relayed changed keys from the propagation pass that produced this
    /// snapshot; absent on the initial publish.
    pub changed_keys: Option<ChangedKeys>,
    /// Capture hook inherited down the tree during server-side rendering.
    pub capture: Option<CaptureHook>,
    /// Hydration cursor threaded down the tree; descendants pull their
    /// initial state from it sequentially.
    pub next_container_state: Option<HydrateCursor>,
    pub(crate) subscribers: Option<Arc<SubscriberRegistry>>,
}

impl ContextSnapshot {
    /// A context exposing nothing. Used as the fallback before a node has
    /// published.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A bare root context carrying only a capture hook.
    pub(crate) fn capture_root(capture: CaptureHook) -> Self {
        Self {
            capture: Some(capture),
            ..Self::default()
        }
    }

    /// Subscribe to the publishing node's notification stream. Returns
    /// `None` when the context has no stream (e.g. the capture root).
    pub fn subscribe(&self, callback: SubscriberFn) -> Option<Subscription> {
        self.subscribers
            .as_ref()
            .map(|registry| registry.subscribe(callback))
    }
}

impl std::fmt::Debug for ContextSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextSnapshot")
            .field("state", &self.state.is_some())
            .field("effects", &self.effects.as_ref().map(Effects::len))
            .field("capture", &self.capture.is_some())
            .field("hydrating", &self.next_container_state.is_some())
            .finish()
    }
}

/// Anything a node can treat as its parent: a mounted [`ContainerNode`]
/// or a capture session root.
///
/// [`ContainerNode`]: super::ContainerNode
pub trait ContextSource: Send + Sync {
    /// The most recently published context.
    fn context(&self) -> Arc<ContextSnapshot>;
}
