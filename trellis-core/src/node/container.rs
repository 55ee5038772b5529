//! Container nodes: lifecycle, context publication, and update propagation.
//!
//! One node exists per tree position. It owns a state container and a
//! composed effect map, publishes a context for its descendants, and keeps
//! that context consistent across mutations:
//!
//! - `push_update` runs when the node's own container changes;
//! - `relay_update` runs when an ancestor notifies it, so the node rebuilds
//!   its grafted view against the ancestor's fresh state and re-derives the
//!   changed-key set for its own subscribers.
//!
//! Nodes are single-use: `Mounting -> Mounted -> Unmounting -> Unmounted`,
//! with no reverse transitions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::effects::{EffectFn, Effects};
use crate::error::Error;
use crate::hydrate::HydrateCursor;
use crate::state::{
    object_value, ChangedKeys, ComputedFn, ContainerCore, ParentLink, StateMap,
};

use super::context::{ContextSnapshot, ContextSource, Middleware};
use super::subscriber::{SubscriberFn, SubscriberRegistry, Subscription};

static NODE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_node_id() -> u64 {
    NODE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Lifecycle phase of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Constructing the container and evaluating initial state.
    Mounting,
    /// Subscribed and publishing context; receives push/relay indefinitely.
    Mounted,
    /// `finalize` in flight.
    Unmounting,
    /// Done. Nodes are single-use; there is no way back.
    Unmounted,
}

/// Arguments handed to an initial-state function.
pub struct InitialArgs<'a> {
    /// Props supplied at mount.
    pub props: &'a StateMap,
    /// The parent's published context, if the node has a parent.
    pub parent: Option<&'a ContextSnapshot>,
}

/// What an initial-state function produces.
pub enum InitialState {
    /// Plain initial state.
    State(StateMap),
    /// Initial state restored from a snapshot; the cursor is published for
    /// descendants to consume the remaining entries.
    Hydrated {
        /// This container's restored raw state.
        state: StateMap,
        /// Cursor over the rest of the snapshot.
        cursor: HydrateCursor,
    },
}

/// Computes a container's initial state from props and parent context.
pub type InitialStateFn =
    Arc<dyn for<'a> Fn(&InitialArgs<'a>) -> Result<InitialState, Error> + Send + Sync>;

/// Wrap a plain closure as an [`InitialStateFn`].
pub fn initial_state<F>(f: F) -> InitialStateFn
where
    F: for<'a> Fn(&InitialArgs<'a>) -> StateMap + Send + Sync + 'static,
{
    Arc::new(move |args| Ok(InitialState::State(f(args))))
}

/// Options recognized by [`create_stateful_container`].
///
/// [`create_stateful_container`]: crate::create_stateful_container
#[derive(Default)]
pub struct ContainerOptions {
    /// Initial-state function; an absent one yields empty state.
    pub initial_state: Option<InitialStateFn>,
    /// Local effect definitions, composed over the parent's.
    pub effects: IndexMap<String, EffectFn>,
    /// Computed-value definitions, fixed for the container's lifetime.
    pub computed: IndexMap<String, ComputedFn>,
    /// Context transforms applied in order on every publish.
    pub middleware: Vec<Middleware>,
    /// Props passed to the initial-state function and to `initialize`.
    pub props: StateMap,
}

impl ContainerOptions {
    /// Empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial-state function.
    pub fn with_initial_state(mut self, f: InitialStateFn) -> Self {
        self.initial_state = Some(f);
        self
    }

    /// Add an effect definition.
    pub fn with_effect(mut self, name: &str, f: EffectFn) -> Self {
        self.effects.insert(name.to_string(), f);
        self
    }

    /// Add a computed-value definition.
    pub fn with_computed(mut self, name: &str, f: ComputedFn) -> Self {
        self.computed.insert(name.to_string(), f);
        self
    }

    /// Append a middleware.
    pub fn with_middleware(mut self, middleware: Middleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Set the mount props.
    pub fn with_props(mut self, props: StateMap) -> Self {
        self.props = props;
        self
    }
}

/// A mounted tree node: one state container, one effect map, one published
/// context, one subscriber list.
pub struct ContainerNode {
    id: u64,
    core: Arc<ContainerCore>,
    effects: Effects,
    middleware: Vec<Middleware>,
    parent: Option<Arc<dyn ContextSource>>,
    subscribers: Arc<SubscriberRegistry>,
    published: RwLock<Option<Arc<ContextSnapshot>>>,
    cursor: Option<HydrateCursor>,
    phase: RwLock<Phase>,
    parent_subscription: Mutex<Option<Subscription>>,
}

impl ContainerNode {
    /// Construct and mount a node.
    ///
    /// Order of operations: evaluate initial state, build the container and
    /// effect map, append raw state to the parent's capture hook (if any),
    /// publish the first context, fire `initialize(props)` without awaiting
    /// it, and subscribe to the parent's notification stream.
    ///
    /// Lifecycle effects are spawned onto the ambient Tokio runtime, so a
    /// node defining `initialize` or `finalize` fails with
    /// [`Error::MissingRuntime`] when mounted outside one. Nodes without
    /// lifecycle effects mount anywhere.
    pub fn mount(
        options: ContainerOptions,
        parent: Option<Arc<dyn ContextSource>>,
    ) -> Result<Arc<Self>, Error> {
        let parent_ctx = parent.as_ref().map(|p| p.context());

        let initial = match &options.initial_state {
            Some(f) => f(&InitialArgs {
                props: &options.props,
                parent: parent_ctx.as_deref(),
            })?,
            None => InitialState::State(StateMap::new()),
        };
        let (initial, cursor) = match initial {
            InitialState::State(state) => (state, None),
            InitialState::Hydrated { state, cursor } => (state, Some(cursor)),
        };

        let core = ContainerCore::new(initial, options.computed);
        let parent_effects = parent_ctx.as_ref().and_then(|ctx| ctx.effects.clone());
        let effects = Effects::build(Arc::clone(&core), options.effects, parent_effects.as_ref());

        if (effects.contains("initialize") || effects.contains("finalize"))
            && tokio::runtime::Handle::try_current().is_err()
        {
            return Err(Error::MissingRuntime);
        }

        let node = Arc::new(Self {
            id: next_node_id(),
            core: Arc::clone(&core),
            effects,
            middleware: options.middleware,
            parent,
            subscribers: SubscriberRegistry::new(),
            published: RwLock::new(None),
            cursor,
            phase: RwLock::new(Phase::Mounting),
            parent_subscription: Mutex::new(None),
        });

        // Route the container's propagation through this node. The weak
        // link lets an effect that outlives the node still write state; its
        // propagation then goes nowhere.
        let weak = Arc::downgrade(&node);
        core.set_propagate(Arc::new(move |changed| match weak.upgrade() {
            Some(node) => async move { node.push_update(changed).await }.boxed(),
            None => async {}.boxed(),
        }));

        // Capture before the context below replaces the parent's view of
        // the tree: one raw-state entry per container, pre-order.
        if let Some(capture) = parent_ctx.as_ref().and_then(|ctx| ctx.capture.clone()) {
            capture(node.core.raw_state());
        }

        node.publish(None);

        if node.effects.contains("initialize") {
            let action = node
                .effects
                .run("initialize", vec![object_value(&options.props)]);
            tokio::spawn(async move {
                if let Err(err) = action.await {
                    warn!(%err, "initialize effect failed");
                }
            });
        }

        if let Some(ctx) = parent_ctx.as_ref() {
            let weak = Arc::downgrade(&node);
            let relay: SubscriberFn = Arc::new(move |changed| match weak.upgrade() {
                Some(node) => async move { node.relay_update(changed).await }.boxed(),
                None => async {}.boxed(),
            });
            *node.parent_subscription.lock() = ctx.subscribe(relay);
        }

        *node.phase.write() = Phase::Mounted;
        debug!(node = node.id, container = core.id(), "node mounted");
        Ok(node)
    }

    /// Tear the node down: fire `finalize` (not awaited) and drop the
    /// parent subscription. Repeat calls are no-ops.
    pub fn unmount(&self) {
        {
            let mut phase = self.phase.write();
            if *phase != Phase::Mounted {
                return;
            }
            *phase = Phase::Unmounting;
        }

        if self.effects.contains("finalize") {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let action = self.effects.run("finalize", Vec::new());
                    handle.spawn(async move {
                        if let Err(err) = action.await {
                            warn!(%err, "finalize effect failed");
                        }
                    });
                }
                // The runtime that mounted us has already shut down.
                Err(_) => warn!(node = self.id, "finalize skipped: no async runtime"),
            }
        }

        self.parent_subscription.lock().take();
        *self.phase.write() = Phase::Unmounted;
        debug!(node = self.id, "node unmounted");
    }

    /// The node's unique ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        *self.phase.read()
    }

    /// The node's state container.
    pub fn container(&self) -> &Arc<ContainerCore> {
        &self.core
    }

    /// The node's composed effect map.
    pub fn effects(&self) -> &Effects {
        &self.effects
    }

    /// Register an update subscriber on this node.
    pub fn subscribe(&self, callback: SubscriberFn) -> Subscription {
        self.subscribers.subscribe(callback)
    }

    /// Starting from the reported keys, add every transitively affected
    /// computed key, invalidating caches along the way.
    pub fn invalidate_changed(&self, changed: &ChangedKeys) -> ChangedKeys {
        let mut relayed = changed.clone();
        for key in changed {
            self.core.invalidate(key);
            self.mark_changed(key, &mut relayed);
        }
        relayed
    }

    fn mark_changed(&self, key: &str, relayed: &mut ChangedKeys) {
        relayed.insert(key.to_string());
        for dependant in self.core.dependents_of(key) {
            if !relayed.contains(&dependant) {
                self.mark_changed(&dependant, relayed);
            }
        }
    }

    /// Handle a change in this node's own container.
    ///
    /// Resolves immediately with no notification when the changed set is
    /// empty or no context has been published yet; otherwise the pass is
    /// deferred one tick, the context is rebuilt, and subscribers are
    /// notified with the relayed set.
    pub async fn push_update(&self, changed: ChangedKeys) {
        if changed.is_empty() {
            return;
        }
        if self.published.read().is_none() {
            return;
        }
        tokio::task::yield_now().await;
        self.propagate(changed).await;
    }

    /// Handle a notification from the parent: the parent's state may have
    /// shifted, so the grafted view is rebuilt unconditionally and this
    /// node's subscribers see the locally re-derived changed set.
    pub async fn relay_update(&self, changed: ChangedKeys) {
        self.propagate(changed).await;
    }

    async fn propagate(&self, changed: ChangedKeys) {
        let relayed = self.invalidate_changed(&changed);
        self.publish(Some(relayed.clone()));
        self.subscribers.notify(&relayed).await;
    }

    /// Build the context this node exposes: grafted state, composed
    /// effects, the subscription stream, and inherited capture/hydration
    /// hooks, run through the middleware chain.
    pub fn build_context(&self, changed: Option<ChangedKeys>) -> Arc<ContextSnapshot> {
        let parent_ctx = self.parent.as_ref().map(|p| p.context());
        let parent_link = parent_ctx
            .as_ref()
            .and_then(|ctx| ctx.state.as_ref())
            .map(ParentLink::from_view);

        let mut context = ContextSnapshot {
            state: Some(self.core.get_state(parent_link)),
            effects: Some(self.effects.clone()),
            changed_keys: changed,
            capture: parent_ctx.as_ref().and_then(|ctx| ctx.capture.clone()),
            next_container_state: self.cursor.clone().or_else(|| {
                parent_ctx
                    .as_ref()
                    .and_then(|ctx| ctx.next_container_state.clone())
            }),
            subscribers: Some(Arc::clone(&self.subscribers)),
        };
        for middleware in &self.middleware {
            context = middleware(context);
        }
        Arc::new(context)
    }

    fn publish(&self, changed: Option<ChangedKeys>) {
        let context = self.build_context(changed);
        *self.published.write() = Some(context);
    }
}

impl ContextSource for ContainerNode {
    fn context(&self) -> Arc<ContextSnapshot> {
        self.published
            .read()
            .clone()
            .unwrap_or_else(|| Arc::new(ContextSnapshot::empty()))
    }
}

impl std::fmt::Debug for ContainerNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerNode")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .field("subscribers", &self.subscribers.live_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
