//! One game's live replay state and the operations that rebuild it.
//!
//! A [`GameRuntime`] bundles the state store, the dependency-ordered
//! reducers, and the keyframe service for a single game. It is always
//! reached through the game's lock, so nothing in here synchronises.
//!
//! Recovery after a structural log edit ("integration") looks for the
//! newest keyframe strictly before the edited tick. With one, the state is
//! reset to that frame and only the events after it are replayed. Without
//! one, the whole log is replayed from defaults.

use jamkeeper_db::{EventStore, StoreError};
use jamkeeper_events::{
    GameStateStore, KeyFrame, KeyFrameService, NoopObserver, ReducerSet, StateError,
};
use jamkeeper_types::{Event, EventId, GameId, Tick};
use tracing::{debug, error, info};

/// Errors raised while replaying or integrating a game's log.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// Reading from or writing to the event store failed.
    #[error("event store error: {0}")]
    Store(#[from] StoreError),

    /// Applying events to the state store failed.
    #[error("state error: {0}")]
    State(#[from] StateError),
}

/// Live state of one game.
#[derive(Debug)]
pub struct GameRuntime {
    game_id: GameId,
    state: GameStateStore,
    reducers: ReducerSet,
    keyframes: KeyFrameService,
}

impl GameRuntime {
    /// Bundle the collaborators of one game. Call [`reload`](Self::reload)
    /// before use; the state starts empty.
    pub const fn new(
        game_id: GameId,
        state: GameStateStore,
        reducers: ReducerSet,
        keyframes: KeyFrameService,
    ) -> Self {
        Self {
            game_id,
            state,
            reducers,
            keyframes,
        }
    }

    /// The game this runtime belongs to.
    pub const fn game_id(&self) -> GameId {
        self.game_id
    }

    /// Read access to the derived state.
    pub const fn state(&self) -> &GameStateStore {
        &self.state
    }

    /// Write access to the derived state, for registering watchers.
    pub const fn state_mut(&mut self) -> &mut GameStateStore {
        &mut self.state
    }

    /// The game's reducers in dispatch order.
    pub const fn reducers(&self) -> &ReducerSet {
        &self.reducers
    }

    /// The keyframes captured so far.
    pub const fn keyframes(&self) -> &KeyFrameService {
        &self.keyframes
    }

    // -----------------------------------------------------------------------
    // Forward application
    // -----------------------------------------------------------------------

    /// Apply `events` forward, capturing keyframes at settled points.
    ///
    /// Returns the generated events that must be written to the store.
    pub fn apply(
        &mut self,
        root: Option<EventId>,
        events: Vec<Event>,
    ) -> Result<Vec<Event>, StateError> {
        self.state
            .apply_events_observed(&mut self.reducers, root, events, &mut self.keyframes)
    }

    /// Run tick handlers up to `tick`.
    ///
    /// Clock-driven progress never captures keyframes: a frame must only
    /// contain what replaying the log reproduces.
    pub fn advance_clock(&mut self, tick: Tick) -> Result<Vec<Event>, StateError> {
        self.state
            .advance_to(&mut self.reducers, tick, &mut NoopObserver)
    }

    /// Apply an event that is already in the store.
    ///
    /// Keyframes at or after its tick are stale. An event the state has
    /// already moved past, whether through later events or through the
    /// clock, is integrated instead of applied forward.
    pub async fn apply_recorded(
        &mut self,
        store: &dyn EventStore,
        event: Event,
    ) -> Result<(), ReplayError> {
        let tick = event.tick();
        self.keyframes.clear_frames_after(tick);
        if self.state.is_behind(&event) {
            debug!(
                game_id = %self.game_id,
                event_id = %event.id,
                tick,
                current_tick = ?self.state.current_tick(),
                "event behind the state, integrating"
            );
            return self.integrate(store, tick).await;
        }
        let generated = self.apply(None, vec![event])?;
        persist_generated(store, self.game_id, generated).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Rebuilding
    // -----------------------------------------------------------------------

    /// Reset to defaults and replay the whole log.
    ///
    /// Notifications are held back during the replay and then sent once
    /// for every slice.
    pub async fn reload(&mut self, store: &dyn EventStore) -> Result<(), ReplayError> {
        let resume_at = self.state.current_tick();
        let events = store.get_events(self.game_id).await?;
        let count = events.len();

        self.state.disable_notifications();
        self.state.load_default_states(&self.reducers);
        self.keyframes.clear();
        let result = self.replay(events, resume_at);
        self.state.enable_notifications();
        self.state.force_notify();

        let generated = result?;
        persist_generated(store, self.game_id, generated).await;
        info!(game_id = %self.game_id, events = count, keyframes = self.keyframes.len(), "game reloaded");
        Ok(())
    }

    /// Reset to `frame` and replay only the events after it.
    pub async fn apply_key_frame(
        &mut self,
        store: &dyn EventStore,
        frame: &KeyFrame,
    ) -> Result<(), ReplayError> {
        let resume_at = self.state.current_tick();
        let events = match frame.last_event_id {
            Some(last) => store.get_events_after(self.game_id, last).await?,
            None => store.get_events(self.game_id).await?,
        };
        let count = events.len();

        self.state.disable_notifications();
        self.state.apply_key_frame(&self.reducers, frame);
        self.keyframes.clear_frames_after(frame.tick.saturating_add(1));
        self.keyframes.reset_cadence();
        let result = self.replay(events, resume_at);
        self.state.enable_notifications();
        self.state.force_notify();

        let generated = result?;
        persist_generated(store, self.game_id, generated).await;
        info!(
            game_id = %self.game_id,
            frame_tick = frame.tick,
            replayed = count,
            "keyframe applied"
        );
        Ok(())
    }

    /// Recompute the state after an edit at `tick`.
    pub async fn integrate(
        &mut self,
        store: &dyn EventStore,
        tick: Tick,
    ) -> Result<(), ReplayError> {
        match self.keyframes.get_key_frame_before(tick) {
            Some(frame) => self.apply_key_frame(store, &frame).await,
            None => self.reload(store).await,
        }
    }

    /// Replay `events`, then catch the clocks up to where the live state
    /// had already been.
    fn replay(
        &mut self,
        events: Vec<Event>,
        resume_at: Option<Tick>,
    ) -> Result<Vec<Event>, StateError> {
        let mut generated = self.apply(None, events)?;
        if let Some(tick) = resume_at {
            generated.extend(self.advance_clock(tick)?);
        }
        Ok(generated)
    }
}

/// Write generated events back to the store.
///
/// Failures are logged, not returned: the events are already part of the
/// live state and will be generated again on the next replay.
pub async fn persist_generated(store: &dyn EventStore, game_id: GameId, events: Vec<Event>) {
    for event in events {
        match store.add_event(game_id, &event).await {
            Ok(event_id) => {
                debug!(%game_id, %event_id, event_type = %event.event_type(), "generated event persisted");
            }
            Err(StoreError::DuplicateEvent { event_id }) => {
                debug!(%game_id, %event_id, "generated event already stored");
            }
            Err(e) => {
                error!(
                    %game_id,
                    event_id = %event.id,
                    event_type = %event.event_type(),
                    error = %e,
                    "failed to persist generated event"
                );
            }
        }
    }
}
