//! Error types for the state-container engine.
//!
//! Configuration errors (missing container, bad update arguments) are fatal
//! and surface at construction or call time. Effect failures reject the
//! action future without touching state.

use thiserror::Error;

/// Errors produced by container construction, effect dispatch, and hydration.
#[derive(Debug, Error)]
pub enum Error {
    /// State or effects were requested without an enclosing container in the
    /// context chain. Raised at construction time, never retried.
    #[error("no enclosing state container in the context chain")]
    MissingContainer,

    /// The generic `update` helper was called with an argument that is
    /// neither a reducer function nor an object.
    #[error("update argument must be a reducer or an object, got {kind}")]
    InvalidUpdate {
        /// The JSON kind of the rejected argument.
        kind: &'static str,
    },

    /// An effect name was dispatched that is absent from the effect map.
    #[error("unknown effect `{name}`")]
    UnknownEffect {
        /// The dispatched name.
        name: String,
    },

    /// A user effect function failed. The reducer was never produced, so no
    /// partial state write occurred.
    #[error("effect `{name}` failed: {message}")]
    Effect {
        /// Name of the failing effect.
        name: String,
        /// Failure description from the user function.
        message: String,
    },

    /// A node with `initialize` or `finalize` effects was mounted outside a
    /// Tokio runtime, so the lifecycle effect could never be dispatched.
    #[error("lifecycle effects require a running async runtime")]
    MissingRuntime,

    /// Hydration consumed more snapshot entries than were captured.
    #[error("hydration snapshot exhausted: more containers than captured states")]
    SnapshotExhausted,

    /// A serialized snapshot could not be parsed or produced.
    #[error("malformed snapshot: {message}")]
    MalformedSnapshot {
        /// Underlying serde failure.
        message: String,
    },
}

impl Error {
    /// Build a generic failure for use inside user effect functions.
    ///
    /// The effect pipeline rewraps it with the effect's name on the way out.
    pub fn failed(message: impl Into<String>) -> Self {
        Error::Effect {
            name: String::new(),
            message: message.into(),
        }
    }
}
