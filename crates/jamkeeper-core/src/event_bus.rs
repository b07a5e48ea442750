//! The per-game entry point for every change to a game's log.
//!
//! Each operation takes the game's lock for its whole duration, so changes
//! to one game are applied strictly one after another while different
//! games proceed in parallel.
//!
//! Appends are applied forward. Structural edits (move, replace, offset,
//! remove) change the store inside a transaction and then integrate: the
//! game is reset to its newest keyframe before the edit and the rest of
//! the log is replayed, or the whole log is replayed if no such frame
//! exists.

use std::sync::Arc;

use jamkeeper_db::{EventStore, StoreError};
use jamkeeper_events::StateError;
use jamkeeper_types::{Event, EventBody, EventId, GameId, IdError, Tick};
use tracing::{debug, error, info, warn};

use crate::context::{ContextError, GameContextFactory};
use crate::runtime::{ReplayError, persist_generated};

/// Errors returned by [`EventBus`] operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The game has no event log.
    #[error("game {game_id} not found")]
    GameNotFound {
        /// The requested game.
        game_id: GameId,
    },

    /// The event is not in the game's log.
    #[error("event {event_id} not found in game {game_id}")]
    EventNotFound {
        /// The game searched.
        game_id: GameId,
        /// The missing event.
        event_id: EventId,
    },

    /// A computed tick does not fit an event id.
    #[error("invalid tick: {0}")]
    InvalidTick(#[from] IdError),

    /// Shifting an event by the offset would move it before tick zero.
    #[error("cannot shift tick {tick} by {offset} ms")]
    OffsetOutOfRange {
        /// The event's current tick.
        tick: Tick,
        /// The requested offset.
        offset: i64,
    },

    /// The event store failed.
    #[error("event store error: {0}")]
    Store(#[from] StoreError),

    /// Applying events to the state failed.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// The game context could not be built.
    #[error("context error: {0}")]
    Context(ContextError),
}

impl From<ContextError> for BusError {
    fn from(error: ContextError) -> Self {
        match error {
            ContextError::GameNotFound { game_id } => Self::GameNotFound { game_id },
            ContextError::Store(e) => Self::Store(e),
            ContextError::State(e) => Self::State(e),
            other => Self::Context(other),
        }
    }
}

impl From<ReplayError> for BusError {
    fn from(error: ReplayError) -> Self {
        match error {
            ReplayError::Store(e) => Self::Store(e),
            ReplayError::State(e) => Self::State(e),
        }
    }
}

/// Result of [`EventBus::add_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// The event was persisted and applied. Carries the event as stored,
    /// which may have an aligned id.
    Recorded(Event),
    /// The store rejected the event; it was not applied. Carries the event
    /// as submitted.
    Dropped(Event),
}

impl AddOutcome {
    /// Whether the event made it into the log.
    pub const fn is_recorded(&self) -> bool {
        matches!(self, Self::Recorded(_))
    }

    /// The carried event.
    pub const fn event(&self) -> &Event {
        match self {
            Self::Recorded(event) | Self::Dropped(event) => event,
        }
    }
}

/// One step of a multi-event store edit.
#[derive(Debug)]
enum StoreOp {
    Delete(EventId),
    Add(Event),
}

/// Serialised access to every game's log and live state.
#[derive(Debug, Clone)]
pub struct EventBus {
    factory: Arc<GameContextFactory>,
}

impl EventBus {
    /// Create a bus over the contexts built by `factory`.
    pub const fn new(factory: Arc<GameContextFactory>) -> Self {
        Self { factory }
    }

    /// The context factory behind this bus.
    pub fn factory(&self) -> &GameContextFactory {
        &self.factory
    }

    // -----------------------------------------------------------------------
    // Appending
    // -----------------------------------------------------------------------

    /// Persist `event`, then apply it.
    ///
    /// Event types tied to the period clock get their id aligned first. An
    /// event that sorts before the last applied one is integrated rather
    /// than applied forward. If the store rejects the event it is dropped
    /// and returned as [`AddOutcome::Dropped`].
    pub async fn add_event(&self, game_id: GameId, event: Event) -> Result<AddOutcome, BusError> {
        let context = self.factory.get_game(game_id).await?;
        let mut runtime = context.lock().await;
        let store = self.factory.store();

        let mut recorded = event.clone();
        if recorded.body.aligns_to_period_clock() {
            recorded.id = runtime.state().align_event_id(recorded.id);
        }

        if let Err(e) = store.add_event(game_id, &recorded).await {
            error!(
                %game_id,
                event_id = %recorded.id,
                event_type = %recorded.event_type(),
                error = %e,
                "failed to persist event, dropping it"
            );
            return Ok(AddOutcome::Dropped(event));
        }

        runtime.apply_recorded(store, recorded.clone()).await?;
        debug!(%game_id, event_id = %recorded.id, event_type = %recorded.event_type(), "event added");
        Ok(AddOutcome::Recorded(recorded))
    }

    /// Stamp `body` with the current tick and [`add_event`](Self::add_event) it.
    pub async fn add_event_at_current_tick(
        &self,
        game_id: GameId,
        body: EventBody,
    ) -> Result<AddOutcome, BusError> {
        let event = Event::at_tick(self.factory.tick_source().now(), body)?;
        self.add_event(game_id, event).await
    }

    /// Apply `event` to the live state without writing it to the store.
    ///
    /// The event is lost on the next reload. Generated events it causes
    /// are still persisted.
    pub async fn add_event_without_persisting(
        &self,
        game_id: GameId,
        event: Event,
    ) -> Result<Event, BusError> {
        let context = self.factory.get_game(game_id).await?;
        let mut runtime = context.lock().await;
        let generated = runtime.apply(None, vec![event.clone()])?;
        persist_generated(self.factory.store(), game_id, generated).await;
        debug!(%game_id, event_id = %event.id, event_type = %event.event_type(), "transient event applied");
        Ok(event)
    }

    // -----------------------------------------------------------------------
    // Editing
    // -----------------------------------------------------------------------

    /// Move an event to `new_tick`, keeping the rest of its id.
    pub async fn move_event(
        &self,
        game_id: GameId,
        event_id: EventId,
        new_tick: Tick,
    ) -> Result<Event, BusError> {
        let context = self.factory.get_game(game_id).await?;
        let mut runtime = context.lock().await;
        let store = self.factory.store();

        let original = find_event(store, game_id, event_id).await?;
        let old_tick = original.tick();
        let moved = Event::new(original.id.with_tick(new_tick)?, original.body);

        run_in_transaction(
            store,
            game_id,
            vec![StoreOp::Delete(event_id), StoreOp::Add(moved.clone())],
        )
        .await?;
        runtime.integrate(store, old_tick.min(new_tick)).await?;
        info!(%game_id, %event_id, old_tick, new_tick, "event moved");
        Ok(moved)
    }

    /// Replace an event's body, keeping its id and tick.
    pub async fn replace_event(
        &self,
        game_id: GameId,
        event_id: EventId,
        body: EventBody,
    ) -> Result<Event, BusError> {
        let context = self.factory.get_game(game_id).await?;
        let mut runtime = context.lock().await;
        let store = self.factory.store();

        let original = find_event(store, game_id, event_id).await?;
        let replacement = Event::new(original.id, body);

        run_in_transaction(
            store,
            game_id,
            vec![StoreOp::Delete(event_id), StoreOp::Add(replacement.clone())],
        )
        .await?;
        runtime.integrate(store, original.tick()).await?;
        info!(
            %game_id,
            %event_id,
            from = %original.event_type(),
            to = %replacement.event_type(),
            "event replaced"
        );
        Ok(replacement)
    }

    /// Shift an event and every later event by `offset` milliseconds.
    ///
    /// Returns the shifted events in id order.
    pub async fn offset_events_after(
        &self,
        game_id: GameId,
        event_id: EventId,
        offset: i64,
    ) -> Result<Vec<Event>, BusError> {
        let context = self.factory.get_game(game_id).await?;
        let mut runtime = context.lock().await;
        let store = self.factory.store();

        let target = find_event(store, game_id, event_id).await?;
        let mut moving = store.get_events(game_id).await?;
        moving.retain(|event| event.id >= target.id);

        let mut shifted = Vec::with_capacity(moving.len());
        for event in &moving {
            let tick = event
                .tick()
                .checked_add_signed(offset)
                .ok_or(BusError::OffsetOutOfRange {
                    tick: event.tick(),
                    offset,
                })?;
            shifted.push(Event::new(event.id.with_tick(tick)?, event.body.clone()));
        }

        let ops = moving
            .iter()
            .map(|event| StoreOp::Delete(event.id))
            .chain(shifted.iter().cloned().map(StoreOp::Add))
            .collect();
        run_in_transaction(store, game_id, ops).await?;

        let from = shifted
            .first()
            .map_or(target.tick(), |first| first.tick().min(target.tick()));
        runtime.integrate(store, from).await?;
        info!(%game_id, %event_id, offset, moved = shifted.len(), "events offset");
        Ok(shifted)
    }

    /// Delete one event, leaving its deletion sentinel behind if its type
    /// declares one. Returns the deleted event.
    pub async fn remove_event(&self, game_id: GameId, event_id: EventId) -> Result<Event, BusError> {
        let context = self.factory.get_game(game_id).await?;
        let mut runtime = context.lock().await;
        let store = self.factory.store();

        let removed = find_event(store, game_id, event_id).await?;
        run_in_transaction(store, game_id, removal_ops(std::slice::from_ref(&removed))).await?;
        runtime.integrate(store, removed.tick()).await?;
        info!(%game_id, %event_id, event_type = %removed.event_type(), "event removed");
        Ok(removed)
    }

    /// Delete an event and every later event. Returns the deleted events in
    /// id order.
    pub async fn remove_events_starting_at(
        &self,
        game_id: GameId,
        event_id: EventId,
    ) -> Result<Vec<Event>, BusError> {
        let context = self.factory.get_game(game_id).await?;
        let mut runtime = context.lock().await;
        let store = self.factory.store();

        let first = find_event(store, game_id, event_id).await?;
        let mut removed = store.get_events(game_id).await?;
        removed.retain(|event| event.id >= first.id);

        run_in_transaction(store, game_id, removal_ops(&removed)).await?;
        runtime.integrate(store, first.tick()).await?;
        info!(%game_id, %event_id, removed = removed.len(), "events removed");
        Ok(removed)
    }
}

async fn find_event(
    store: &dyn EventStore,
    game_id: GameId,
    event_id: EventId,
) -> Result<Event, BusError> {
    store
        .get_event(game_id, event_id)
        .await?
        .ok_or(BusError::EventNotFound { game_id, event_id })
}

/// Deletes for `events`, plus the sentinels their types leave behind.
fn removal_ops(events: &[Event]) -> Vec<StoreOp> {
    let deletes = events.iter().map(|event| StoreOp::Delete(event.id));
    let sentinels = events.iter().filter_map(|event| {
        event
            .body
            .deletion_replacement()
            .map(|body| StoreOp::Add(Event::new(event.id, body)))
    });
    deletes.chain(sentinels).collect()
}

/// Apply `ops` to the store atomically. The first failure rolls back
/// every earlier step.
async fn run_in_transaction(
    store: &dyn EventStore,
    game_id: GameId,
    ops: Vec<StoreOp>,
) -> Result<(), BusError> {
    store.begin_transaction(game_id).await?;
    for op in ops {
        let result = match op {
            StoreOp::Delete(event_id) => store.delete_event(game_id, event_id).await,
            StoreOp::Add(event) => store.add_event(game_id, &event).await.map(|_| ()),
        };
        if let Err(e) = result {
            warn!(%game_id, error = %e, "store edit failed, rolling back");
            if let Err(rollback) = store.rollback_transaction(game_id).await {
                error!(%game_id, error = %rollback, "rollback failed");
            }
            return Err(e.into());
        }
    }
    store.commit_transaction(game_id).await?;
    Ok(())
}
