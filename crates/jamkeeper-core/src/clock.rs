//! The realtime game clock.
//!
//! Each loaded game gets one background task that wakes on a short fixed
//! interval, reads the current tick from the [`TickSource`], and runs the
//! tick-reactive reducers up to it. Events the reducers generate on the
//! way (an automatic period end, for example) are written back to the
//! store.
//!
//! A failing tick is logged and the loop keeps going. Reducer errors are
//! already isolated per reducer inside the state store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use jamkeeper_db::EventStore;
use jamkeeper_types::{GameId, Tick};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::runtime::{GameRuntime, persist_generated};
use crate::tick_source::TickSource;

/// Pause and stop flags shared between a [`GameClock`] and its task.
#[derive(Debug, Default)]
struct ClockControl {
    paused: AtomicBool,
    stopped: AtomicBool,
    stop_notify: Notify,
}

/// What the clock task needs to advance one game.
struct ClockDriver {
    game_id: GameId,
    runtime: Arc<Mutex<GameRuntime>>,
    store: Arc<dyn EventStore>,
    tick_source: Arc<dyn TickSource>,
}

impl ClockDriver {
    async fn advance(&self) -> Tick {
        let now = self.tick_source.now();
        let mut runtime = self.runtime.lock().await;
        match runtime.advance_clock(now) {
            Ok(generated) => {
                if !generated.is_empty() {
                    debug!(game_id = %self.game_id, tick = now, generated = generated.len(), "clock generated events");
                }
                persist_generated(self.store.as_ref(), self.game_id, generated).await;
            }
            Err(e) => {
                error!(game_id = %self.game_id, tick = now, error = %e, "clock tick failed");
            }
        }
        now
    }
}

/// Drives one game's tick-reactive reducers in real time.
pub struct GameClock {
    game_id: GameId,
    interval_ms: u64,
    control: Arc<ClockControl>,
    driver: Arc<ClockDriver>,
    handle: Option<JoinHandle<()>>,
}

impl GameClock {
    /// Start a clock for `game_id` firing every `interval_ms`.
    ///
    /// An interval of zero leaves the clock without a background task;
    /// time then only moves through [`tick_now`](Self::tick_now). Must be
    /// called from within a tokio runtime otherwise.
    pub fn start(
        game_id: GameId,
        runtime: Arc<Mutex<GameRuntime>>,
        store: Arc<dyn EventStore>,
        tick_source: Arc<dyn TickSource>,
        interval_ms: u64,
    ) -> Self {
        let control = Arc::new(ClockControl::default());
        let driver = Arc::new(ClockDriver {
            game_id,
            runtime,
            store,
            tick_source,
        });

        let handle = if interval_ms == 0 {
            info!(%game_id, "realtime clock disabled");
            None
        } else {
            info!(%game_id, interval_ms, "realtime clock started");
            Some(tokio::spawn(run_clock(
                Arc::clone(&driver),
                Arc::clone(&control),
                interval_ms,
            )))
        };

        Self {
            game_id,
            interval_ms,
            control,
            driver,
            handle,
        }
    }

    /// The interval between ticks in milliseconds; zero when disabled.
    pub const fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Whether a background task drives this clock.
    pub const fn is_realtime(&self) -> bool {
        self.handle.is_some()
    }

    /// Advance the game to the tick source's current tick right away,
    /// regardless of the pause flag. Returns the tick advanced to.
    pub async fn tick_now(&self) -> Tick {
        self.driver.advance().await
    }

    // -----------------------------------------------------------------------
    // Pause / Resume
    // -----------------------------------------------------------------------

    /// Whether the clock is paused.
    pub fn is_paused(&self) -> bool {
        self.control.paused.load(Ordering::Acquire)
    }

    /// Skip ticks until resumed.
    pub fn pause(&self) {
        self.control.paused.store(true, Ordering::Release);
        debug!(game_id = %self.game_id, "clock paused");
    }

    /// Resume ticking.
    pub fn resume(&self) {
        self.control.paused.store(false, Ordering::Release);
        debug!(game_id = %self.game_id, "clock resumed");
    }

    // -----------------------------------------------------------------------
    // Stop
    // -----------------------------------------------------------------------

    /// Stop the background task for good.
    pub fn stop(&self) {
        if !self.control.stopped.swap(true, Ordering::AcqRel) {
            self.control.stop_notify.notify_waiters();
            info!(game_id = %self.game_id, "realtime clock stopped");
        }
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.control.stopped.load(Ordering::Acquire)
    }
}

impl Drop for GameClock {
    fn drop(&mut self) {
        self.control.stopped.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for GameClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameClock")
            .field("game_id", &self.game_id)
            .field("interval_ms", &self.interval_ms)
            .field("paused", &self.is_paused())
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

async fn run_clock(driver: Arc<ClockDriver>, control: Arc<ClockControl>, interval_ms: u64) {
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            () = control.stop_notify.notified() => break,
        }
        if control.stopped.load(Ordering::Acquire) {
            break;
        }
        if control.paused.load(Ordering::Acquire) {
            continue;
        }
        driver.advance().await;
    }
    debug!(game_id = %driver.game_id, "clock loop exited");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use jamkeeper_db::InMemoryEventStore;
    use jamkeeper_events::{GameStateStore, KeyFrameService};
    use jamkeeper_reducers::{GameRules, JamClockState, derby_registry};
    use jamkeeper_types::{Event, EventBody};

    use super::*;
    use crate::tick_source::ManualTickSource;

    async fn setup(
        interval_ms: u64,
    ) -> (Arc<Mutex<GameRuntime>>, Arc<ManualTickSource>, GameClock) {
        let game = GameId::new();
        let store = Arc::new(InMemoryEventStore::new());
        store
            .import_game(game, vec![Event::at_tick(0, EventBody::JamStarted).unwrap()])
            .await;
        let mut state = GameStateStore::new(game);
        let registry = derby_registry(GameRules::default());
        if let Some(anchor) = registry.alignment_anchor() {
            state.set_alignment_anchor(anchor);
        }
        let mut runtime = GameRuntime::new(
            game,
            state,
            registry.build(game).unwrap(),
            KeyFrameService::default(),
        );
        runtime.reload(store.as_ref()).await.unwrap();
        let runtime = Arc::new(Mutex::new(runtime));
        let ticks = Arc::new(ManualTickSource::new(0));
        let clock = GameClock::start(
            game,
            Arc::clone(&runtime),
            store,
            Arc::clone(&ticks) as Arc<dyn TickSource>,
            interval_ms,
        );
        (runtime, ticks, clock)
    }

    #[tokio::test]
    async fn tick_now_ends_jam_at_its_duration() {
        let (runtime, ticks, clock) = setup(0).await;
        assert!(!clock.is_realtime());

        ticks.set(130_000);
        assert_eq!(clock.tick_now().await, 130_000);

        let runtime = runtime.lock().await;
        let jam = runtime.state().get_state::<JamClockState>().unwrap();
        assert!(!jam.is_running);
        assert_eq!(jam.ended_tick, Some(120_000));
    }

    #[tokio::test]
    async fn background_task_advances_until_stopped() {
        let (runtime, ticks, clock) = setup(5).await;
        assert!(clock.is_realtime());

        ticks.set(10_500);
        tokio::time::sleep(Duration::from_millis(100)).await;
        {
            let runtime = runtime.lock().await;
            let jam = runtime.state().get_state::<JamClockState>().unwrap();
            assert_eq!(jam.seconds_passed, 10);
        }

        clock.stop();
        assert!(clock.is_stopped());
        ticks.set(20_500);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let runtime = runtime.lock().await;
        let jam = runtime.state().get_state::<JamClockState>().unwrap();
        assert_eq!(jam.seconds_passed, 10);
    }

    #[tokio::test]
    async fn paused_clock_skips_ticks() {
        let (runtime, ticks, clock) = setup(5).await;
        clock.pause();
        assert!(clock.is_paused());
        ticks.set(10_500);
        tokio::time::sleep(Duration::from_millis(50)).await;
        {
            let runtime = runtime.lock().await;
            let jam = runtime.state().get_state::<JamClockState>().unwrap();
            assert_eq!(jam.seconds_passed, 0);
        }

        clock.resume();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let runtime = runtime.lock().await;
        let jam = runtime.state().get_state::<JamClockState>().unwrap();
        assert_eq!(jam.seconds_passed, 10);
    }
}
