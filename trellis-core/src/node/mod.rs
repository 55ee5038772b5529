//! Tree nodes, published contexts, and the propagation protocol.
//!
//! A [`ContainerNode`] ties a state container and an effect map to one
//! position in the UI tree. It publishes a [`ContextSnapshot`] for its
//! descendants, relays ancestor updates downward layer by layer, and keeps
//! grafted views and caches consistent across mutations.

mod container;
mod context;
mod inject;
mod subscriber;

pub use container::{
    initial_state, ContainerNode, ContainerOptions, InitialArgs, InitialState, InitialStateFn,
    Phase,
};
pub use context::{CaptureHook, ContextSnapshot, ContextSource, Middleware};
pub use inject::{inject_state, Injection};
pub use subscriber::{subscriber, SubscriberFn, SubscriberRegistry, Subscription};
