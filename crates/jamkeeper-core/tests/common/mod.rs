//! Fixtures shared by the engine integration tests.
//!
//! Every harness runs with the realtime clock disabled and a
//! [`ManualTickSource`], so time only moves when a test says so.

#![allow(dead_code, clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::BTreeMap;
use std::sync::Arc;

use jamkeeper_core::{
    EventBus, GameContext, GameContextFactory, ManualTickSource, ReplayConfig, TickSource,
};
use jamkeeper_db::{EventStore, InMemoryEventStore};
use jamkeeper_events::StateSlice;
use jamkeeper_reducers::{GameRules, derby_registry};
use jamkeeper_types::{Event, EventBody, GameId, TeamSide, Tick};
use serde_json::Value;

/// One game behind a bus, over an in-memory store.
pub struct Harness {
    pub bus: EventBus,
    pub store: Arc<InMemoryEventStore>,
    pub ticks: Arc<ManualTickSource>,
    pub game: GameId,
}

pub fn replay_config(keyframe_interval: u64) -> ReplayConfig {
    ReplayConfig {
        clock_interval_ms: 0,
        keyframe_interval,
        ..ReplayConfig::default()
    }
}

pub fn factory_over(
    store: Arc<dyn EventStore>,
    rules: GameRules,
    keyframe_interval: u64,
    ticks: Arc<ManualTickSource>,
) -> GameContextFactory {
    GameContextFactory::new(
        replay_config(keyframe_interval),
        store,
        derby_registry(rules),
        ticks as Arc<dyn TickSource>,
    )
}

pub async fn harness_with(rules: GameRules, keyframe_interval: u64, events: Vec<Event>) -> Harness {
    let store = Arc::new(InMemoryEventStore::new());
    let game = GameId::new();
    store.import_game(game, events).await;
    let ticks = Arc::new(ManualTickSource::new(0));
    let factory = factory_over(
        Arc::clone(&store) as Arc<dyn EventStore>,
        rules,
        keyframe_interval,
        Arc::clone(&ticks),
    );
    Harness {
        bus: EventBus::new(Arc::new(factory)),
        store,
        ticks,
        game,
    }
}

pub async fn harness(keyframe_interval: u64) -> Harness {
    harness_with(GameRules::default(), keyframe_interval, Vec::new()).await
}

impl Harness {
    /// Add an event that must be recorded; returns it as stored.
    pub async fn add(&self, event: Event) -> Event {
        let outcome = self.bus.add_event(self.game, event).await.unwrap();
        assert!(outcome.is_recorded());
        outcome.event().clone()
    }

    pub async fn context(&self) -> Arc<GameContext> {
        self.bus.factory().get_game(self.game).await.unwrap()
    }

    /// Move the tick source to `tick` and run the clock once.
    pub async fn settle(&self, tick: Tick) {
        self.ticks.set(tick);
        let context = self.context().await;
        context.clock().tick_now().await;
    }

    pub async fn snapshot(&self) -> BTreeMap<String, Value> {
        let context = self.context().await;
        let runtime = context.lock().await;
        runtime.state().snapshot_json().unwrap()
    }

    pub async fn state<T: StateSlice>(&self) -> T {
        let context = self.context().await;
        let runtime = context.lock().await;
        runtime.state().get_state::<T>().unwrap().clone()
    }

    pub async fn team_state<T: StateSlice>(&self, side: TeamSide) -> T {
        let context = self.context().await;
        let runtime = context.lock().await;
        runtime
            .state()
            .get_keyed_state::<T>(side.as_key())
            .unwrap()
            .clone()
    }

    /// The game's log, in id order.
    pub async fn logged(&self) -> Vec<Event> {
        self.store.get_events(self.game).await.unwrap()
    }
}

/// State computed from defaults for `events`, with the clock run at `tick`.
pub async fn from_scratch(rules: GameRules, events: Vec<Event>, tick: Tick) -> BTreeMap<String, Value> {
    let fresh = harness_with(rules, 1_000, events).await;
    fresh.settle(tick).await;
    fresh.snapshot().await
}

pub fn ev(tick: Tick, body: EventBody) -> Event {
    Event::at_tick(tick, body).unwrap()
}

pub fn score(tick: Tick, team: TeamSide, value: i32) -> Event {
    ev(tick, EventBody::ScoreModifiedRelative { team, value })
}
