//! Per-game contexts and the factory that owns them.
//!
//! A [`GameContext`] is everything one game needs at runtime: its
//! [`GameRuntime`] behind the game's lock, and its realtime [`GameClock`].
//! The [`GameContextFactory`] builds a context the first time a game is
//! asked for and hands out the same one afterwards. Concurrent first
//! callers share a single construction.

use std::collections::HashMap;
use std::sync::Arc;

use jamkeeper_db::{EventStore, StoreError};
use jamkeeper_events::{
    GameStateStore, KeyFrameService, ReducerGraphError, ReducerRegistry, StateError,
};
use jamkeeper_types::{GameId, Tick};
use tokio::sync::{Mutex, MutexGuard, OnceCell};
use tracing::{debug, info};

use crate::clock::GameClock;
use crate::config::ReplayConfig;
use crate::runtime::{GameRuntime, ReplayError};
use crate::tick_source::TickSource;

/// Errors raised while building or rebuilding a game context.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// The event store has no log for the game.
    #[error("game {game_id} not found")]
    GameNotFound {
        /// The requested game.
        game_id: GameId,
    },

    /// No keyframe exists before the requested tick.
    #[error("no keyframe before tick {tick} for game {game_id}")]
    KeyFrameNotFound {
        /// The game searched.
        game_id: GameId,
        /// The exclusive upper bound searched.
        tick: Tick,
    },

    /// The reducer graph is invalid; the game cannot be built.
    #[error("invalid reducer graph: {0}")]
    ReducerGraph(#[from] ReducerGraphError),

    /// The event store failed.
    #[error("event store error: {0}")]
    Store(#[from] StoreError),

    /// Replaying the log failed.
    #[error("state error: {0}")]
    State(#[from] StateError),
}

impl From<ReplayError> for ContextError {
    fn from(error: ReplayError) -> Self {
        match error {
            ReplayError::Store(e) => Self::Store(e),
            ReplayError::State(e) => Self::State(e),
        }
    }
}

/// One loaded game.
#[derive(Debug)]
pub struct GameContext {
    game_id: GameId,
    runtime: Arc<Mutex<GameRuntime>>,
    clock: GameClock,
}

impl GameContext {
    /// The game this context serves.
    pub const fn game_id(&self) -> GameId {
        self.game_id
    }

    /// Take the game's lock. Every mutation of the game's state happens
    /// while holding it.
    pub async fn lock(&self) -> MutexGuard<'_, GameRuntime> {
        self.runtime.lock().await
    }

    /// The game's realtime clock.
    pub const fn clock(&self) -> &GameClock {
        &self.clock
    }

    /// Pause the clock for a rebuild. Returns whether it was already
    /// paused, for [`end_rebuild`](Self::end_rebuild).
    fn begin_rebuild(&self) -> bool {
        let was_paused = self.clock.is_paused();
        self.clock.pause();
        was_paused
    }

    fn end_rebuild(&self, was_paused: bool) {
        if !was_paused {
            self.clock.resume();
        }
    }
}

/// Builds and owns the contexts of every loaded game.
pub struct GameContextFactory {
    config: ReplayConfig,
    store: Arc<dyn EventStore>,
    registry: ReducerRegistry,
    tick_source: Arc<dyn TickSource>,
    contexts: Mutex<HashMap<GameId, Arc<OnceCell<Arc<GameContext>>>>>,
}

impl GameContextFactory {
    /// Create a factory. No game is loaded until asked for.
    pub fn new(
        config: ReplayConfig,
        store: Arc<dyn EventStore>,
        registry: ReducerRegistry,
        tick_source: Arc<dyn TickSource>,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            tick_source,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// The event store every game is loaded from.
    pub fn store(&self) -> &dyn EventStore {
        self.store.as_ref()
    }

    /// The source of the current tick.
    pub fn tick_source(&self) -> &dyn TickSource {
        self.tick_source.as_ref()
    }

    /// The context of `game_id`, building it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::GameNotFound`] if the store has no log for
    /// the game, or [`ContextError::ReducerGraph`] if the reducer set is
    /// invalid. A failed build is retried by the next caller.
    pub async fn get_game(&self, game_id: GameId) -> Result<Arc<GameContext>, ContextError> {
        let cell = {
            let mut contexts = self.contexts.lock().await;
            Arc::clone(contexts.entry(game_id).or_default())
        };
        let result = cell.get_or_try_init(|| self.build(game_id)).await;
        if result.is_err() {
            self.forget_failed(game_id, &cell).await;
        }
        result.map(Arc::clone)
    }

    /// Reset `game_id` to defaults and replay its whole log.
    ///
    /// # Errors
    ///
    /// See [`get_game`](Self::get_game); also fails if the replay does.
    pub async fn reload_game(&self, game_id: GameId) -> Result<(), ContextError> {
        let context = self.get_game(game_id).await?;
        let was_paused = context.begin_rebuild();
        let result = context.lock().await.reload(self.store.as_ref()).await;
        context.end_rebuild(was_paused);
        result.map_err(ContextError::from)
    }

    /// Reset `game_id` to its newest keyframe strictly before `tick` and
    /// replay the events after it. Returns the tick of the frame used.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::KeyFrameNotFound`] if there is no such
    /// frame.
    pub async fn apply_key_frame(&self, game_id: GameId, tick: Tick) -> Result<Tick, ContextError> {
        let context = self.get_game(game_id).await?;
        let was_paused = context.begin_rebuild();
        let result = {
            let mut runtime = context.lock().await;
            match runtime.keyframes().get_key_frame_before(tick) {
                Some(frame) => runtime
                    .apply_key_frame(self.store.as_ref(), &frame)
                    .await
                    .map(|()| frame.tick)
                    .map_err(ContextError::from),
                None => Err(ContextError::KeyFrameNotFound { game_id, tick }),
            }
        };
        context.end_rebuild(was_paused);
        result
    }

    /// Stop the game's clock and drop its context. Returns whether the
    /// game was loaded.
    pub async fn unload_game(&self, game_id: GameId) -> bool {
        let removed = self.contexts.lock().await.remove(&game_id);
        let Some(context) = removed.and_then(|cell| cell.get().cloned()) else {
            return false;
        };
        context.clock.stop();
        info!(%game_id, "game unloaded");
        true
    }

    /// Ids of every loaded game, sorted.
    pub async fn loaded_games(&self) -> Vec<GameId> {
        let mut games: Vec<GameId> = self
            .contexts
            .lock()
            .await
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(game_id, _)| *game_id)
            .collect();
        games.sort_unstable();
        games
    }

    /// Number of games with a context entry, loaded or still loading.
    pub async fn tracked_games(&self) -> usize {
        self.contexts.lock().await.len()
    }

    /// Drop the entry a failed build left behind. Kept while any other
    /// caller still holds the cell, since that caller retries the build.
    async fn forget_failed(&self, game_id: GameId, cell: &Arc<OnceCell<Arc<GameContext>>>) {
        let mut contexts = self.contexts.lock().await;
        // Only the map and this caller hold it; new holders need the lock.
        let stale = contexts.get(&game_id).is_some_and(|current| {
            Arc::ptr_eq(current, cell) && !current.initialized() && Arc::strong_count(cell) == 2
        });
        if stale {
            contexts.remove(&game_id);
            debug!(%game_id, "dropped context entry after failed load");
        }
    }

    async fn build(&self, game_id: GameId) -> Result<Arc<GameContext>, ContextError> {
        if !self.store.game_exists(game_id).await? {
            return Err(ContextError::GameNotFound { game_id });
        }

        let reducers = self.registry.build(game_id)?;
        let mut state =
            GameStateStore::new(game_id).with_max_implicit_events(self.config.max_implicit_events);
        if let Some(anchor) = self.registry.alignment_anchor() {
            state.set_alignment_anchor(anchor);
        }
        let keyframes = KeyFrameService::new(self.config.keyframe_interval, self.config.max_keyframes);
        let reducer_count = reducers.len();

        let mut runtime = GameRuntime::new(game_id, state, reducers, keyframes);
        runtime.reload(self.store.as_ref()).await?;

        let runtime = Arc::new(Mutex::new(runtime));
        let clock = GameClock::start(
            game_id,
            Arc::clone(&runtime),
            Arc::clone(&self.store),
            Arc::clone(&self.tick_source),
            self.config.clock_interval_ms,
        );
        info!(%game_id, reducers = reducer_count, "game context built");

        Ok(Arc::new(GameContext {
            game_id,
            runtime,
            clock,
        }))
    }
}

impl std::fmt::Debug for GameContextFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameContextFactory")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
