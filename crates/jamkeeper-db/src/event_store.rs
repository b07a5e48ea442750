//! The event store interface.
//!
//! The event log is the source of truth for a game: every piece of derived
//! state can be rebuilt by replaying it. Implementations must return events
//! in id order and keep ids exactly as given, since the id carries the
//! event's tick.

use std::sync::Arc;

use async_trait::async_trait;
use jamkeeper_types::{Event, EventId, GameId, Tick};

use crate::error::StoreError;

/// Append, query, and delete events for a game, ordered by id.
///
/// Also implemented for `Arc<S>` so a store can be shared between the
/// engine and test assertions.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Whether the game has an event log.
    async fn game_exists(&self, game_id: GameId) -> Result<bool, StoreError>;

    /// Append an event and return its id.
    async fn add_event(&self, game_id: GameId, event: &Event) -> Result<EventId, StoreError>;

    /// Fetch one event, or `None` if it is not in the log.
    async fn get_event(
        &self,
        game_id: GameId,
        event_id: EventId,
    ) -> Result<Option<Event>, StoreError>;

    /// Every event of the game in id order.
    async fn get_events(&self, game_id: GameId) -> Result<Vec<Event>, StoreError>;

    /// Events with an id strictly greater than `after`, in id order.
    async fn get_events_after(
        &self,
        game_id: GameId,
        after: EventId,
    ) -> Result<Vec<Event>, StoreError> {
        let mut events = self.get_events(game_id).await?;
        events.retain(|event| event.id > after);
        Ok(events)
    }

    /// Events at or after `tick`, in id order.
    async fn get_events_from_tick(
        &self,
        game_id: GameId,
        tick: Tick,
    ) -> Result<Vec<Event>, StoreError> {
        let mut events = self.get_events(game_id).await?;
        events.retain(|event| event.tick() >= tick);
        Ok(events)
    }

    /// Remove an event.
    async fn delete_event(&self, game_id: GameId, event_id: EventId) -> Result<(), StoreError>;

    /// Start a transaction for multi-event edits.
    async fn begin_transaction(&self, game_id: GameId) -> Result<(), StoreError>;

    /// Make the open transaction's changes permanent.
    async fn commit_transaction(&self, game_id: GameId) -> Result<(), StoreError>;

    /// Undo every change since the open transaction began.
    async fn rollback_transaction(&self, game_id: GameId) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: EventStore + ?Sized> EventStore for Arc<S> {
    async fn game_exists(&self, game_id: GameId) -> Result<bool, StoreError> {
        (**self).game_exists(game_id).await
    }

    async fn add_event(&self, game_id: GameId, event: &Event) -> Result<EventId, StoreError> {
        (**self).add_event(game_id, event).await
    }

    async fn get_event(
        &self,
        game_id: GameId,
        event_id: EventId,
    ) -> Result<Option<Event>, StoreError> {
        (**self).get_event(game_id, event_id).await
    }

    async fn get_events(&self, game_id: GameId) -> Result<Vec<Event>, StoreError> {
        (**self).get_events(game_id).await
    }

    async fn get_events_after(
        &self,
        game_id: GameId,
        after: EventId,
    ) -> Result<Vec<Event>, StoreError> {
        (**self).get_events_after(game_id, after).await
    }

    async fn get_events_from_tick(
        &self,
        game_id: GameId,
        tick: Tick,
    ) -> Result<Vec<Event>, StoreError> {
        (**self).get_events_from_tick(game_id, tick).await
    }

    async fn delete_event(&self, game_id: GameId, event_id: EventId) -> Result<(), StoreError> {
        (**self).delete_event(game_id, event_id).await
    }

    async fn begin_transaction(&self, game_id: GameId) -> Result<(), StoreError> {
        (**self).begin_transaction(game_id).await
    }

    async fn commit_transaction(&self, game_id: GameId) -> Result<(), StoreError> {
        (**self).commit_transaction(game_id).await
    }

    async fn rollback_transaction(&self, game_id: GameId) -> Result<(), StoreError> {
        (**self).rollback_transaction(game_id).await
    }
}
