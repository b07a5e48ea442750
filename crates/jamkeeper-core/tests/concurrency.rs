//! Concurrent writers, context lifecycle, and store failure handling.

#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::arithmetic_side_effects
)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::{Harness, ev, factory_over, from_scratch, harness, score};
use jamkeeper_core::{AddOutcome, BusError, ContextError, EventBus, ManualTickSource};
use jamkeeper_db::{EventStore, InMemoryEventStore, StoreError};
use jamkeeper_reducers::{GameRules, TeamScoreState};
use jamkeeper_types::{Event, EventBody, EventId, GameId, TeamSide, Tick};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_serialize_per_game() {
    let h = harness(1).await;
    h.add(ev(0, EventBody::JamStarted)).await;

    let mut handles = Vec::new();
    for i in (1..=20u64).rev() {
        let bus = h.bus.clone();
        let game = h.game;
        handles.push(tokio::spawn(async move {
            bus.add_event(game, score(i * 1_000, TeamSide::Home, 1))
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_recorded());
    }

    h.settle(25_000).await;
    let home: TeamScoreState = h.team_state(TeamSide::Home).await;
    assert_eq!(home.score, 20);
    let logged = h.logged().await;
    assert_eq!(logged.len(), 21);

    let expected = from_scratch(GameRules::default(), logged, 25_000).await;
    assert_eq!(h.snapshot().await, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn first_load_is_shared_by_concurrent_callers() {
    let store = Arc::new(InMemoryEventStore::new());
    let game = GameId::new();
    store
        .import_game(game, vec![ev(0, EventBody::JamStarted)])
        .await;
    let factory = Arc::new(factory_over(
        store,
        GameRules::default(),
        1,
        Arc::new(ManualTickSource::new(0)),
    ));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let factory = Arc::clone(&factory);
        handles.push(tokio::spawn(async move {
            factory.get_game(game).await.unwrap()
        }));
    }
    let mut contexts = Vec::new();
    for handle in handles {
        contexts.push(handle.await.unwrap());
    }

    let first = contexts.first().unwrap();
    assert!(contexts.iter().all(|context| Arc::ptr_eq(context, first)));
    assert_eq!(factory.loaded_games().await, vec![game]);
}

#[tokio::test]
async fn unload_stops_the_clock_and_forgets_the_game() {
    let h = harness(50).await;
    let context = h.context().await;
    assert_eq!(h.bus.factory().loaded_games().await, vec![h.game]);

    assert!(h.bus.factory().unload_game(h.game).await);
    assert!(context.clock().is_stopped());
    assert!(h.bus.factory().loaded_games().await.is_empty());
    assert!(!h.bus.factory().unload_game(h.game).await);

    // The log survives, so the game loads again on demand.
    let reloaded = h.context().await;
    assert!(!Arc::ptr_eq(&context, &reloaded));
}

#[tokio::test]
async fn unknown_game_is_not_found() {
    let h = harness(50).await;
    let missing = GameId::new();

    let result = h.bus.factory().get_game(missing).await;
    assert!(matches!(result, Err(ContextError::GameNotFound { game_id }) if game_id == missing));

    let result = h.bus.add_event(missing, ev(0, EventBody::JamStarted)).await;
    assert!(matches!(result, Err(BusError::GameNotFound { .. })));
    assert!(h.bus.factory().loaded_games().await.is_empty());
    assert_eq!(h.bus.factory().tracked_games().await, 0);
}

#[tokio::test]
async fn lookups_of_unknown_games_leave_no_entries() {
    let h = harness(50).await;
    h.context().await;
    for _ in 0..10 {
        assert!(h.bus.factory().get_game(GameId::new()).await.is_err());
    }
    assert_eq!(h.bus.factory().tracked_games().await, 1);

    // A game created after a failed lookup still loads.
    let late = GameId::new();
    assert!(h.bus.factory().get_game(late).await.is_err());
    h.store.create_game(late).await;
    h.bus.factory().get_game(late).await.unwrap();
    assert_eq!(h.bus.factory().tracked_games().await, 2);
}

// ---------------------------------------------------------------------------
// Store failures
// ---------------------------------------------------------------------------

/// In-memory store whose appends fail while `reject` is set.
struct RejectingStore {
    inner: Arc<InMemoryEventStore>,
    reject: AtomicBool,
}

#[async_trait]
impl EventStore for RejectingStore {
    async fn game_exists(&self, game_id: GameId) -> Result<bool, StoreError> {
        self.inner.game_exists(game_id).await
    }

    async fn add_event(&self, game_id: GameId, event: &Event) -> Result<EventId, StoreError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("disk full".to_owned()));
        }
        self.inner.add_event(game_id, event).await
    }

    async fn get_event(
        &self,
        game_id: GameId,
        event_id: EventId,
    ) -> Result<Option<Event>, StoreError> {
        self.inner.get_event(game_id, event_id).await
    }

    async fn get_events(&self, game_id: GameId) -> Result<Vec<Event>, StoreError> {
        self.inner.get_events(game_id).await
    }

    async fn delete_event(&self, game_id: GameId, event_id: EventId) -> Result<(), StoreError> {
        self.inner.delete_event(game_id, event_id).await
    }

    async fn begin_transaction(&self, game_id: GameId) -> Result<(), StoreError> {
        self.inner.begin_transaction(game_id).await
    }

    async fn commit_transaction(&self, game_id: GameId) -> Result<(), StoreError> {
        self.inner.commit_transaction(game_id).await
    }

    async fn rollback_transaction(&self, game_id: GameId) -> Result<(), StoreError> {
        self.inner.rollback_transaction(game_id).await
    }
}

async fn rejecting_harness(events: Vec<Event>) -> (Harness, Arc<RejectingStore>) {
    let inner = Arc::new(InMemoryEventStore::new());
    let game = GameId::new();
    inner.import_game(game, events).await;
    let rejecting = Arc::new(RejectingStore {
        inner: Arc::clone(&inner),
        reject: AtomicBool::new(false),
    });
    let ticks = Arc::new(ManualTickSource::new(0));
    let factory = factory_over(
        Arc::clone(&rejecting) as Arc<dyn EventStore>,
        GameRules::default(),
        1,
        Arc::clone(&ticks),
    );
    let harness = Harness {
        bus: EventBus::new(Arc::new(factory)),
        store: inner,
        ticks,
        game,
    };
    (harness, rejecting)
}

#[tokio::test]
async fn rejected_append_is_dropped_without_state_change() {
    let (h, store) = rejecting_harness(vec![ev(0, EventBody::JamStarted)]).await;
    let before = h.snapshot().await;

    store.reject.store(true, Ordering::SeqCst);
    let event = score(1_000, TeamSide::Home, 4);
    let outcome = h.bus.add_event(h.game, event.clone()).await.unwrap();
    assert!(!outcome.is_recorded());
    assert!(matches!(&outcome, AddOutcome::Dropped(dropped) if *dropped == event));

    assert_eq!(h.snapshot().await, before);
    assert_eq!(h.logged().await.len(), 1);
}

#[tokio::test]
async fn failed_edit_rolls_back() {
    let score_tick: Tick = 1_000;
    let (h, store) = rejecting_harness(vec![
        ev(0, EventBody::JamStarted),
        score(score_tick, TeamSide::Home, 4),
    ])
    .await;
    let original = h.logged().await.pop().unwrap();

    store.reject.store(true, Ordering::SeqCst);
    let result = h
        .bus
        .replace_event(
            h.game,
            original.id,
            EventBody::ScoreModifiedRelative {
                team: TeamSide::Away,
                value: 4,
            },
        )
        .await;
    assert!(matches!(result, Err(BusError::Store(_))));

    let logged = h.logged().await;
    assert_eq!(logged.len(), 2);
    assert_eq!(logged.last(), Some(&original));
    let home: TeamScoreState = h.team_state(TeamSide::Home).await;
    assert_eq!(home.score, 4);
}
