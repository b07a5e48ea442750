//! In-memory [`EventStore`] for tests, demos, and offline replay.
//!
//! Each game's log is a `BTreeMap` keyed by event id, so iteration order is
//! id order. A transaction snapshots the game's log on begin and restores
//! it on rollback.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use jamkeeper_types::{Event, EventId, GameId};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::event_store::EventStore;

#[derive(Debug, Default)]
struct GameLog {
    events: BTreeMap<EventId, Event>,
    snapshot: Option<BTreeMap<EventId, Event>>,
}

/// Event store that keeps every game's log in memory.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    games: RwLock<HashMap<GameId, GameLog>>,
}

impl InMemoryEventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a game with an empty log. Existing logs are kept.
    pub async fn create_game(&self, game_id: GameId) {
        let mut games = self.games.write().await;
        if !games.contains_key(&game_id) {
            games.insert(game_id, GameLog::default());
            info!(%game_id, "game log created");
        }
    }

    /// Register a game with an initial log, replacing any existing one.
    pub async fn import_game(&self, game_id: GameId, events: Vec<Event>) {
        let log = GameLog {
            events: events.into_iter().map(|event| (event.id, event)).collect(),
            snapshot: None,
        };
        let count = log.events.len();
        self.games.write().await.insert(game_id, log);
        info!(%game_id, events = count, "game log imported");
    }

    /// Number of events in a game's log.
    pub async fn event_count(&self, game_id: GameId) -> usize {
        self.games
            .read()
            .await
            .get(&game_id)
            .map_or(0, |log| log.events.len())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn game_exists(&self, game_id: GameId) -> Result<bool, StoreError> {
        Ok(self.games.read().await.contains_key(&game_id))
    }

    async fn add_event(&self, game_id: GameId, event: &Event) -> Result<EventId, StoreError> {
        let mut games = self.games.write().await;
        let log = games
            .get_mut(&game_id)
            .ok_or(StoreError::GameNotFound { game_id })?;
        if log.events.contains_key(&event.id) {
            return Err(StoreError::DuplicateEvent { event_id: event.id });
        }
        log.events.insert(event.id, event.clone());
        debug!(%game_id, event_id = %event.id, event_type = %event.event_type(), "event stored");
        Ok(event.id)
    }

    async fn get_event(
        &self,
        game_id: GameId,
        event_id: EventId,
    ) -> Result<Option<Event>, StoreError> {
        let games = self.games.read().await;
        let log = games.get(&game_id).ok_or(StoreError::GameNotFound { game_id })?;
        Ok(log.events.get(&event_id).cloned())
    }

    async fn get_events(&self, game_id: GameId) -> Result<Vec<Event>, StoreError> {
        let games = self.games.read().await;
        let log = games.get(&game_id).ok_or(StoreError::GameNotFound { game_id })?;
        Ok(log.events.values().cloned().collect())
    }

    async fn get_events_after(
        &self,
        game_id: GameId,
        after: EventId,
    ) -> Result<Vec<Event>, StoreError> {
        use std::ops::Bound;

        let games = self.games.read().await;
        let log = games.get(&game_id).ok_or(StoreError::GameNotFound { game_id })?;
        Ok(log
            .events
            .range((Bound::Excluded(after), Bound::Unbounded))
            .map(|(_, event)| event.clone())
            .collect())
    }

    async fn delete_event(&self, game_id: GameId, event_id: EventId) -> Result<(), StoreError> {
        let mut games = self.games.write().await;
        let log = games
            .get_mut(&game_id)
            .ok_or(StoreError::GameNotFound { game_id })?;
        log.events
            .remove(&event_id)
            .ok_or(StoreError::EventNotFound { event_id })?;
        debug!(%game_id, %event_id, "event deleted");
        Ok(())
    }

    async fn begin_transaction(&self, game_id: GameId) -> Result<(), StoreError> {
        let mut games = self.games.write().await;
        let log = games
            .get_mut(&game_id)
            .ok_or(StoreError::GameNotFound { game_id })?;
        if log.snapshot.is_some() {
            return Err(StoreError::TransactionActive { game_id });
        }
        log.snapshot = Some(log.events.clone());
        Ok(())
    }

    async fn commit_transaction(&self, game_id: GameId) -> Result<(), StoreError> {
        let mut games = self.games.write().await;
        let log = games
            .get_mut(&game_id)
            .ok_or(StoreError::GameNotFound { game_id })?;
        log.snapshot
            .take()
            .ok_or(StoreError::NoTransaction { game_id })?;
        Ok(())
    }

    async fn rollback_transaction(&self, game_id: GameId) -> Result<(), StoreError> {
        let mut games = self.games.write().await;
        let log = games
            .get_mut(&game_id)
            .ok_or(StoreError::GameNotFound { game_id })?;
        log.events = log
            .snapshot
            .take()
            .ok_or(StoreError::NoTransaction { game_id })?;
        info!(%game_id, "event store transaction rolled back");
        Ok(())
    }
}
