//! Snapshot capture and hydration.
//!
//! A serialized snapshot is an ordered sequence of raw-state objects, one
//! per container in tree pre-order. [`CaptureSession`] produces the
//! sequence during server-side rendering; [`hydrate`] consumes it on the
//! client: the root container takes `snapshot[0]` and threads a cursor
//! through its published context, and every descendant hydrating from the
//! same tree pulls the next sequential entry instead of computing its
//! initial state.
//!
//! The cursor travels in the published context, carried explicitly by
//! [`InitialState::Hydrated`], never inside the state itself.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::Error;
use crate::node::{ContextSnapshot, ContextSource, InitialState, InitialStateFn};
use crate::state::StateMap;

/// Shared position into a hydration snapshot.
///
/// Cloned into every context the root publishes, so all descendants consume
/// from the same sequence in mount order.
#[derive(Clone)]
pub struct HydrateCursor {
    inner: Arc<CursorInner>,
}

struct CursorInner {
    snapshot: Vec<StateMap>,
    next: Mutex<usize>,
}

impl HydrateCursor {
    fn new(snapshot: Vec<StateMap>, start: usize) -> Self {
        Self {
            inner: Arc::new(CursorInner {
                snapshot,
                next: Mutex::new(start),
            }),
        }
    }

    /// Take the next container state from the snapshot.
    pub fn next_state(&self) -> Result<StateMap, Error> {
        let mut next = self.inner.next.lock();
        let state = self
            .inner
            .snapshot
            .get(*next)
            .cloned()
            .ok_or(Error::SnapshotExhausted)?;
        *next += 1;
        Ok(state)
    }

    /// Snapshot entries not yet consumed.
    pub fn remaining(&self) -> usize {
        self.inner.snapshot.len().saturating_sub(*self.inner.next.lock())
    }
}

impl std::fmt::Debug for HydrateCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HydrateCursor")
            .field("len", &self.inner.snapshot.len())
            .field("next", &*self.inner.next.lock())
            .finish()
    }
}

/// Build an initial-state function that restores captured state instead of
/// computing it.
///
/// When the parent context threads a cursor, the container takes the next
/// sequential entry. Otherwise this container is the hydration root: it
/// takes `snapshot[0]` and publishes a cursor starting at index 1.
pub fn hydrate(snapshot: Vec<StateMap>) -> InitialStateFn {
    Arc::new(move |args| {
        if let Some(cursor) = args.parent.and_then(|ctx| ctx.next_container_state.clone()) {
            return Ok(InitialState::State(cursor.next_state()?));
        }
        let root = snapshot.first().cloned().ok_or(Error::SnapshotExhausted)?;
        debug!(containers = snapshot.len(), "hydrating tree from snapshot");
        Ok(InitialState::Hydrated {
            state: root,
            cursor: HydrateCursor::new(snapshot.clone(), 1),
        })
    })
}

/// Parse a serialized snapshot (a JSON array of raw-state objects).
pub fn parse_snapshot(text: &str) -> Result<Vec<StateMap>, Error> {
    serde_json::from_str(text).map_err(|err| Error::MalformedSnapshot {
        message: err.to_string(),
    })
}

/// Serialize a captured sequence for embedding in rendered output.
pub fn serialize_snapshot(states: &[StateMap]) -> Result<String, Error> {
    serde_json::to_string(states).map_err(|err| Error::MalformedSnapshot {
        message: err.to_string(),
    })
}

/// Accumulates raw container state during a server-side render.
///
/// Acts as the root [`ContextSource`] of the tree being captured: every
/// container mounted beneath it appends its raw state once, in tree
/// pre-order.
pub struct CaptureSession {
    states: Arc<Mutex<Vec<StateMap>>>,
    context: Arc<ContextSnapshot>,
}

impl CaptureSession {
    /// Start a capture.
    pub fn new() -> Arc<Self> {
        let states: Arc<Mutex<Vec<StateMap>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&states);
        let context = Arc::new(ContextSnapshot::capture_root(Arc::new(move |state| {
            sink.lock().push(state);
        })));
        Arc::new(Self { states, context })
    }

    /// The captured raw states, in capture (pre-)order.
    pub fn states(&self) -> Vec<StateMap> {
        self.states.lock().clone()
    }

    /// Serialize the captured sequence.
    pub fn serialized(&self) -> Result<String, Error> {
        serialize_snapshot(&self.states())
    }
}

impl ContextSource for CaptureSession {
    fn context(&self) -> Arc<ContextSnapshot> {
        Arc::clone(&self.context)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
