//! State containers, computed values, and dependency tracking.
//!
//! Each tree node owns one [`ContainerCore`]: raw key/value state, fixed
//! computed definitions, a lazily filled value cache, and the dependency
//! graph that drives invalidation.
//!
//! # Reading state
//!
//! Consumers never touch the container directly; they read through a
//! [`StateView`] built per propagation pass. A view layers three sources:
//! computed values, the node's own state, and (via [`ParentLink`]) grafted
//! ancestor state, checked in that order.
//!
//! # Tracking
//!
//! While a computed function runs, its reads go through a [`TrackedView`]
//! that records `(accessed key -> computed key)` edges. A later write to any
//! recorded key clears the computed value's cache entry, transitively.

mod container;
mod tracked;
mod value;
mod view;

pub use container::{computed, ComputedFn, ContainerCore, PropagateFn};
pub use tracked::TrackedView;
pub use value::{object_entries, object_value, ChangedKeys, StateMap, Value};
pub use view::{ParentLink, StateView};

pub(crate) use value::json_kind;
