//! Trellis Core
//!
//! This crate provides the reactive state-container engine behind the
//! Trellis UI tree. It implements:
//!
//! - Key/value state containers with lazily evaluated, dependency-tracked
//!   computed values
//! - Asynchronous effects that produce pure state-transforming reducers
//! - Hierarchical composition: descendants graft ancestor state and inherit
//!   ancestor effects, with updates propagating top-down through explicit
//!   subscriptions
//! - Snapshot capture and hydration for server-side rendering
//!
//! The rendering runtime is a consumer of this crate: it mounts container
//! nodes, hands the published context to components, and re-renders when a
//! subscription fires.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `state`: containers, computed values, dependency tracking, grafted views
//! - `effects`: effect wrapping, composition, and async dispatch
//! - `node`: tree nodes, context publication, update propagation
//! - `hydrate`: pre-order snapshot capture and sequential rehydration
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{
//!     computed, create_stateful_container, effect, initial_state,
//!     ContainerOptions, EffectOutcome, Value,
//! };
//!
//! let options = ContainerOptions::new()
//!     .with_initial_state(initial_state(|_| {
//!         [("n".to_string(), Value::from(5i64))].into_iter().collect()
//!     }))
//!     .with_computed("doubled", computed(|s| {
//!         Value::from(s.get_i64("n").unwrap_or(0) * 2)
//!     }))
//!     .with_effect("increment", effect(|_effects, _args| async move {
//!         Ok(EffectOutcome::reducer(|state| {
//!             let n = state.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
//!             let mut next = state.clone();
//!             next.insert("n".to_string(), Value::from(n + 1));
//!             next
//!         }))
//!     }));
//!
//! let node = create_stateful_container(options, None)?;
//! node.effects().run("increment", vec![]).await?;
//! // The context now shows n == 6 and doubled == 12.
//! ```

pub mod effects;
pub mod error;
pub mod hydrate;
pub mod node;
pub mod state;

use std::sync::Arc;

pub use effects::{
    effect, hard_update, soft_update, update, EffectFn, EffectOutcome, Effects, ReducerFn,
    UpdateArg,
};
pub use error::Error;
pub use hydrate::{hydrate, parse_snapshot, serialize_snapshot, CaptureSession, HydrateCursor};
pub use node::{
    initial_state, inject_state, subscriber, CaptureHook, ContainerNode, ContainerOptions,
    ContextSnapshot, ContextSource, InitialArgs, InitialState, InitialStateFn, Injection,
    Middleware, Phase, SubscriberFn, Subscription,
};
pub use state::{
    computed, object_entries, object_value, ChangedKeys, ComputedFn, ContainerCore, ParentLink,
    StateMap, StateView, TrackedView, Value,
};

/// Construct and mount a stateful container node.
///
/// This is the construction entry point: `options` carries the initial
/// state, effects, computed definitions, and middleware; `parent` is the
/// enclosing node's context source, or `None` for a tree root.
pub fn create_stateful_container(
    options: ContainerOptions,
    parent: Option<Arc<dyn ContextSource>>,
) -> Result<Arc<ContainerNode>, Error> {
    ContainerNode::mount(options, parent)
}
