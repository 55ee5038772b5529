//! Effect wrapping, composition, and dispatch.
//!
//! A user effect function receives the full effect map (so it can call
//! itself and its siblings) plus positional arguments, and asynchronously
//! produces a reducer. The wrapper turns each definition into an action:
//!
//! 1. yield once, so the body never runs inside the caller's current turn;
//! 2. await the user function;
//! 3. apply the produced reducer (if any) through `set_state`;
//! 4. resolve once the owning container's propagation completes.
//!
//! Actions begin in dispatch order, but completion order is not guaranteed
//! and there is no mutual exclusion between overlapping calls on one
//! container. Two interleaved calls apply `set_state` independently and the
//! later write wins. That race is a documented property of the engine, kept
//! for compatibility.
//!
//! # Composition
//!
//! A map is seeded with the parent's actions and local names override
//! inherited ones. Inherited actions still close over the container and
//! effect map of the container that declared them, so a descendant calling
//! an inherited effect mutates the ancestor's state, not its own.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::error::Error;
use crate::state::{ContainerCore, StateMap, Value};

static EFFECTS_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_effects_id() -> u64 {
    EFFECTS_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A pure state transformation produced by an effect.
///
/// Receives the raw state of the container that declared the effect, at
/// application time, and returns the patch handed to `set_state`.
pub type ReducerFn = Box<dyn FnOnce(&StateMap) -> StateMap + Send>;

/// What a user effect function resolves to.
pub enum EffectOutcome {
    /// Apply this reducer to the declaring container.
    Reducer(ReducerFn),
    /// Apply nothing; the effect ran purely for its side effects.
    Skip,
}

impl EffectOutcome {
    /// Wrap a closure as a reducer outcome.
    pub fn reducer<F>(f: F) -> Self
    where
        F: FnOnce(&StateMap) -> StateMap + Send + 'static,
    {
        EffectOutcome::Reducer(Box::new(f))
    }
}

/// A user-defined effect body.
pub type EffectFn =
    Arc<dyn Fn(Effects, Vec<Value>) -> BoxFuture<'static, Result<EffectOutcome, Error>> + Send + Sync>;

/// Wrap an async closure as an [`EffectFn`].
pub fn effect<F, Fut>(f: F) -> EffectFn
where
    F: Fn(Effects, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<EffectOutcome, Error>> + Send + 'static,
{
    Arc::new(move |effects, args| f(effects, args).boxed())
}

/// A wrapped effect: dispatchable by name, resolves after propagation.
type Action = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

struct EffectsInner {
    id: u64,
    // Set exactly once at the end of `build`; actions hold a weak handle
    // taken before the map exists so they can see the whole map when called.
    actions: OnceLock<IndexMap<String, Action>>,
}

/// The composed effect map of one container.
///
/// Cheap to clone; clones share the same actions. Inherited entries are the
/// parent's actions verbatim, local definitions shadow them by name.
///
/// Actions reach their own map through a weak handle, so dropping every
/// external handle frees the map and the container its actions close over.
/// A dispatch racing that teardown is rejected like an unknown name.
#[derive(Clone)]
pub struct Effects {
    inner: Arc<EffectsInner>,
}

impl Effects {
    /// Build the effect map for a container: seed with the parent's actions,
    /// then wrap and insert each local definition (overriding by name).
    pub fn build(
        core: Arc<ContainerCore>,
        defs: IndexMap<String, EffectFn>,
        parent: Option<&Effects>,
    ) -> Effects {
        let handle = Effects {
            inner: Arc::new(EffectsInner {
                id: next_effects_id(),
                actions: OnceLock::new(),
            }),
        };

        let mut actions: IndexMap<String, Action> = parent
            .and_then(|p| p.inner.actions.get())
            .cloned()
            .unwrap_or_default();
        for (name, function) in defs {
            let action = make_action(
                name.clone(),
                Arc::clone(&core),
                Arc::downgrade(&handle.inner),
                function,
            );
            actions.insert(name, action);
        }
        let _ = handle.inner.actions.set(actions);
        handle
    }

    /// An empty effect map bound to no container.
    pub fn empty() -> Effects {
        let handle = Effects {
            inner: Arc::new(EffectsInner {
                id: next_effects_id(),
                actions: OnceLock::new(),
            }),
        };
        let _ = handle.inner.actions.set(IndexMap::new());
        handle
    }

    /// Dispatch an effect by name.
    ///
    /// The returned future rejects with [`Error::UnknownEffect`] for names
    /// absent from the map, and otherwise resolves after the declaring
    /// container's propagation completes.
    pub fn run(&self, name: &str, args: Vec<Value>) -> BoxFuture<'static, Result<(), Error>> {
        match self.action(name) {
            Some(action) => action(args),
            None => {
                let name = name.to_string();
                async move { Err(Error::UnknownEffect { name }) }.boxed()
            }
        }
    }

    /// Whether an effect with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.action(name).is_some()
    }

    /// Effect names, inherited first, in map order.
    pub fn names(&self) -> Vec<String> {
        self.inner
            .actions
            .get()
            .map(|actions| actions.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of dispatchable effects.
    pub fn len(&self) -> usize {
        self.inner.actions.get().map_or(0, IndexMap::len)
    }

    /// Whether the map has no effects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn action(&self, name: &str) -> Option<Action> {
        self.inner.actions.get().and_then(|m| m.get(name).cloned())
    }
}

impl std::fmt::Debug for Effects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effects")
            .field("id", &self.inner.id)
            .field("names", &self.names())
            .finish()
    }
}

fn make_action(
    name: String,
    core: Arc<ContainerCore>,
    effects: Weak<EffectsInner>,
    function: EffectFn,
) -> Action {
    Arc::new(move |args| {
        let name = name.clone();
        let core = Arc::clone(&core);
        let effects = Weak::clone(&effects);
        let function = Arc::clone(&function);
        async move {
            // Dispatch is asynchronous: the body starts on a later tick.
            tokio::task::yield_now().await;

            // A strong capture here would cycle through the stored actions
            // and pin the map and container forever.
            let effects = match effects.upgrade() {
                Some(inner) => Effects { inner },
                None => return Err(Error::UnknownEffect { name }),
            };

            debug!(effect = %name, container = core.id(), "dispatching effect");

            let outcome = function(effects, args).await.map_err(|err| match err {
                Error::Effect { name: inner, message } if inner.is_empty() => Error::Effect {
                    name: name.clone(),
                    message,
                },
                other => other,
            })?;

            match outcome {
                EffectOutcome::Reducer(reduce) => {
                    let snapshot = core.raw_state();
                    let patch = reduce(&snapshot);
                    core.set_state(patch).await;
                }
                EffectOutcome::Skip => {
                    trace!(effect = %name, "effect produced no reducer");
                }
            }
            Ok(())
        }
        .boxed()
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counter_state(n: i64) -> StateMap {
        let mut map = StateMap::new();
        map.insert("n".to_string(), Value::from(n));
        map
    }

    fn increment_def() -> EffectFn {
        effect(|_effects, _args| async move {
            Ok(EffectOutcome::reducer(|state| {
                let mut next = state.clone();
                let n = state.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
                next.insert("n".to_string(), Value::from(n + 1));
                next
            }))
        })
    }

    #[tokio::test]
    async fn effect_body_never_runs_in_the_callers_turn() {
        let entered = Arc::new(AtomicUsize::new(0));
        let probe = Arc::clone(&entered);
        let mut defs = IndexMap::new();
        defs.insert(
            "noop".to_string(),
            effect(move |_effects, _args| {
                probe.fetch_add(1, Ordering::SeqCst);
                async move { Ok(EffectOutcome::Skip) }
            }),
        );
        let core = ContainerCore::new(StateMap::new(), IndexMap::new());
        let effects = Effects::build(core, defs, None);

        let handle = tokio::spawn(effects.run("noop", Vec::new()));
        // Still this turn: the body has not started.
        assert_eq!(entered.load(Ordering::SeqCst), 0);
        handle.await.unwrap().unwrap();
        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reducer_applies_against_state_at_application_time() {
        let mut defs = IndexMap::new();
        defs.insert("increment".to_string(), increment_def());
        let core = ContainerCore::new(counter_state(0), IndexMap::new());
        let effects = Effects::build(Arc::clone(&core), defs, None);

        effects.run("increment", Vec::new()).await.unwrap();
        effects.run("increment", Vec::new()).await.unwrap();
        assert_eq!(core.raw_state().get("n").and_then(|v| v.as_i64()), Some(2));
    }

    #[tokio::test]
    async fn inherited_effects_route_to_the_declaring_container() {
        let mut parent_defs = IndexMap::new();
        parent_defs.insert("mark".to_string(), effect(|_effects, args| async move {
            let value = args.into_iter().next().unwrap_or_else(Value::null);
            Ok(EffectOutcome::reducer(move |state| {
                let mut next = state.clone();
                next.insert("marked".to_string(), value);
                next
            }))
        }));
        let parent_core = ContainerCore::new(StateMap::new(), IndexMap::new());
        let parent = Effects::build(Arc::clone(&parent_core), parent_defs, None);

        let mut child_defs = IndexMap::new();
        child_defs.insert("local".to_string(), effect(|effects, _args| async move {
            // Calling the inherited name writes to the parent's container.
            effects.run("mark", vec![Value::from("from-child")]).await?;
            Ok(EffectOutcome::reducer(|state| {
                let mut next = state.clone();
                next.insert("child_done".to_string(), Value::from(true));
                next
            }))
        }));
        let child_core = ContainerCore::new(StateMap::new(), IndexMap::new());
        let child = Effects::build(Arc::clone(&child_core), child_defs, Some(&parent));

        child.run("local", Vec::new()).await.unwrap();

        let parent_state = parent_core.raw_state();
        assert_eq!(
            parent_state.get("marked").and_then(|v| v.as_str().map(String::from)),
            Some("from-child".to_string())
        );
        assert!(!parent_state.contains_key("child_done"));

        let child_state = child_core.raw_state();
        assert_eq!(child_state.get("child_done").and_then(|v| v.as_bool()), Some(true));
        assert!(!child_state.contains_key("marked"));
    }

    #[tokio::test]
    async fn local_names_shadow_inherited_ones() {
        let mut parent_defs = IndexMap::new();
        parent_defs.insert("tag".to_string(), effect(|_e, _a| async move {
            Ok(EffectOutcome::reducer(|state| {
                let mut next = state.clone();
                next.insert("who".to_string(), Value::from("parent"));
                next
            }))
        }));
        let parent_core = ContainerCore::new(StateMap::new(), IndexMap::new());
        let parent = Effects::build(Arc::clone(&parent_core), parent_defs, None);

        let mut child_defs = IndexMap::new();
        child_defs.insert("tag".to_string(), effect(|_e, _a| async move {
            Ok(EffectOutcome::reducer(|state| {
                let mut next = state.clone();
                next.insert("who".to_string(), Value::from("child"));
                next
            }))
        }));
        let child_core = ContainerCore::new(StateMap::new(), IndexMap::new());
        let child = Effects::build(Arc::clone(&child_core), child_defs, Some(&parent));

        child.run("tag", Vec::new()).await.unwrap();
        assert!(parent_core.raw_state().is_empty());
        assert_eq!(
            child_core.raw_state().get("who").and_then(|v| v.as_str().map(String::from)),
            Some("child".to_string())
        );
    }

    #[tokio::test]
    async fn failing_effect_rejects_without_writing() {
        let mut defs = IndexMap::new();
        defs.insert("explode".to_string(), effect(|_e, _a| async move {
            Err::<EffectOutcome, _>(Error::failed("boom"))
        }));
        let core = ContainerCore::new(counter_state(1), IndexMap::new());
        let effects = Effects::build(Arc::clone(&core), defs, None);

        let err = effects.run("explode", Vec::new()).await.unwrap_err();
        match err {
            Error::Effect { name, message } => {
                assert_eq!(name, "explode");
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(core.raw_state().get("n").and_then(|v| v.as_i64()), Some(1));
    }

    #[tokio::test]
    async fn dropping_the_map_releases_the_container() {
        let core = ContainerCore::new(counter_state(0), IndexMap::new());
        let weak_core = Arc::downgrade(&core);

        let mut defs = IndexMap::new();
        defs.insert("increment".to_string(), increment_def());
        let effects = Effects::build(core, defs, None);
        effects.run("increment", Vec::new()).await.unwrap();

        // The map's actions must not keep the map (and through it the
        // container) alive once the last external handle is gone.
        drop(effects);
        assert!(weak_core.upgrade().is_none());
    }

    #[tokio::test]
    async fn unknown_names_are_rejected() {
        let core = ContainerCore::new(StateMap::new(), IndexMap::new());
        let effects = Effects::build(core, IndexMap::new(), None);
        let err = effects.run("nope", Vec::new()).await.unwrap_err();
        assert!(matches!(err, Error::UnknownEffect { name } if name == "nope"));
    }
}
