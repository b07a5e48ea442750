//! Error types for the engine binary.

use jamkeeper_core::{BusError, ConfigError, ContextError};
use jamkeeper_events::StateError;

/// Top-level error for the engine binary.
///
/// Wraps every failure `main` can hit so it can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// A game context could not be built.
    #[error("context error: {source}")]
    Context {
        /// The underlying context error.
        #[from]
        source: ContextError,
    },

    /// An event could not be routed to its game.
    #[error("event bus error: {source}")]
    Bus {
        /// The underlying bus error.
        #[from]
        source: BusError,
    },

    /// Reading the final state failed.
    #[error("state error: {source}")]
    State {
        /// The underlying state error.
        #[from]
        source: StateError,
    },

    /// Serializing the final state failed.
    #[error("serialization error: {source}")]
    Json {
        /// The underlying serde error.
        #[from]
        source: serde_json::Error,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        source: std::io::Error,
    },
}
