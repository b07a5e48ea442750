//! Error types for the replay core.
//!
//! [`StateError`] covers slice access and the apply loop,
//! [`ReducerError`] is what an individual reducer may return, and
//! [`ReducerGraphError`] rejects an invalid reducer composition.

use jamkeeper_types::IdError;

/// Errors raised by [`GameStateStore`](crate::GameStateStore).
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// No slice has been stored under this name.
    #[error("state slice {name} is not initialized")]
    Uninitialized {
        /// The slice name that was looked up.
        name: String,
    },

    /// The slice exists but holds a different type.
    #[error("state slice {name} is not a {expected}")]
    TypeMismatch {
        /// The slice name that was looked up.
        name: String,
        /// The slice type the caller asked for.
        expected: &'static str,
    },

    /// Cached pre-batch state was requested outside `apply_events`.
    #[error("no event batch is in flight")]
    NoBatchInFlight,

    /// One apply call expanded more implicit events than allowed.
    #[error("implicit event expansion exceeded {limit} events")]
    ExpansionLimit {
        /// The configured limit.
        limit: usize,
    },

    /// A slice could not be converted to JSON.
    #[error("failed to serialize state slice {name}: {source}")]
    Serialization {
        /// The slice being serialized.
        name: String,
        /// The underlying serde error.
        source: serde_json::Error,
    },
}

/// Errors a reducer may return while handling an event or a tick.
///
/// These never abort the apply loop; they are logged and the remaining
/// reducers still run.
#[derive(Debug, thiserror::Error)]
pub enum ReducerError {
    /// Reading or writing a slice failed.
    #[error("state error: {source}")]
    State {
        /// The underlying state error.
        #[from]
        source: StateError,
    },

    /// An implicit event id could not be built.
    #[error("id error: {source}")]
    Id {
        /// The underlying id error.
        #[from]
        source: IdError,
    },

    /// The reducer refused the event.
    #[error("event rejected: {reason}")]
    Rejected {
        /// Why the event was rejected.
        reason: String,
    },
}

/// Errors found while validating a reducer composition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReducerGraphError {
    /// A reducer depends on a reducer type that is not registered.
    #[error("reducer {reducer} depends on missing reducer {dependency}")]
    MissingDependency {
        /// The reducer declaring the dependency.
        reducer: String,
        /// The dependency that could not be found.
        dependency: String,
    },

    /// The dependency graph contains a cycle.
    #[error("reducer dependency cycle among: {}", reducers.join(", "))]
    Cycle {
        /// Reducer types that could not be ordered.
        reducers: Vec<String>,
    },

    /// Two reducers claim the same state slice.
    #[error("state slice {slice} is owned by more than one reducer")]
    DuplicateSlice {
        /// The contested slice name.
        slice: String,
    },
}
