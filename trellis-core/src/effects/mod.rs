//! Asynchronous effects: actions that produce state-transforming reducers.
//!
//! Effects are the only mutation path. A container's effect map composes
//! with its parent's (local names shadow inherited ones), and inherited
//! actions keep writing to the container that declared them. Dispatch is
//! always asynchronous and overlapping calls are not serialized; the later
//! write wins.

mod helpers;
mod runner;

pub use helpers::{hard_update, soft_update, update, UpdateArg};
pub use runner::{effect, EffectFn, EffectOutcome, Effects, ReducerFn};
