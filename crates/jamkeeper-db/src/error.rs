//! Error types for the event store.

use jamkeeper_types::{EventId, GameId};

/// Errors that can occur in an [`EventStore`](crate::EventStore).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The game has no event log.
    #[error("game not found: {game_id}")]
    GameNotFound {
        /// The game that was looked up.
        game_id: GameId,
    },

    /// The event is not in the game's log.
    #[error("event not found: {event_id}")]
    EventNotFound {
        /// The event that was looked up.
        event_id: EventId,
    },

    /// An event with this id is already stored.
    #[error("duplicate event id: {event_id}")]
    DuplicateEvent {
        /// The conflicting id.
        event_id: EventId,
    },

    /// Commit or rollback without a matching begin.
    #[error("no transaction in progress for game {game_id}")]
    NoTransaction {
        /// The game the call was made for.
        game_id: GameId,
    },

    /// Begin while a transaction is already open.
    #[error("transaction already in progress for game {game_id}")]
    TransactionActive {
        /// The game the call was made for.
        game_id: GameId,
    },

    /// The storage backend failed.
    #[error("event store backend error: {0}")]
    Backend(String),
}
