//! The jam clock.
//!
//! A jam runs from `JamStarted` until `JamEnded`, a timeout, or until the
//! jam duration elapses, whichever comes first. Elapsed time is always
//! recomputed from the start tick so tick handling is memoryless.

use jamkeeper_events::{
    ClockTick, GameStateStore, Reducer, ReducerError, SliceRef, StateSlice, default_slice,
};
use jamkeeper_types::{Event, EventBody, EventId, Tick};
use serde::{Deserialize, Serialize};
use tracing::debug;
use ts_rs::TS;

use crate::rules::{GameRules, whole_seconds};

/// Reducer type name.
pub const JAM_CLOCK: &str = "JamClock";

/// State of the current (or last) jam.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct JamClockState {
    /// A jam is in progress.
    pub is_running: bool,
    /// 1-based number of the current or last jam in the game.
    pub jam_number: u32,
    /// Tick the current or last jam started at.
    pub started_tick: Tick,
    /// Tick the last jam ended at, if it has ended.
    pub ended_tick: Option<Tick>,
    /// Milliseconds elapsed in the jam. Not part of change detection.
    pub ticks_passed: Tick,
    /// Whole seconds elapsed in the jam.
    pub seconds_passed: u64,
}

impl StateSlice for JamClockState {
    const NAME: &'static str = "JamClockState";

    fn unchanged_from(&self, previous: &Self) -> bool {
        Self {
            ticks_passed: previous.ticks_passed,
            ..self.clone()
        } == *previous
    }
}

/// Runs the jam clock.
#[derive(Debug, Clone)]
pub struct JamClock {
    rules: GameRules,
}

impl JamClock {
    /// Create a jam clock for `rules`.
    pub const fn new(rules: GameRules) -> Self {
        Self { rules }
    }

    fn end(state: &mut GameStateStore, mut jam: JamClockState, tick: Tick) {
        jam.is_running = false;
        jam.ended_tick = Some(tick);
        jam.ticks_passed = tick.saturating_sub(jam.started_tick);
        jam.seconds_passed = whole_seconds(jam.ticks_passed);
        state.set_state(jam);
    }
}

impl Reducer for JamClock {
    fn name(&self) -> &'static str {
        JAM_CLOCK
    }

    fn default_states(&self) -> Vec<(String, SliceRef)> {
        vec![default_slice(None, JamClockState::default())]
    }

    fn handle(
        &mut self,
        state: &mut GameStateStore,
        event: &Event,
        _source: Option<EventId>,
    ) -> Result<Vec<Event>, ReducerError> {
        let jam = state.get_state::<JamClockState>()?.clone();
        let tick = event.tick();
        match event.body {
            EventBody::JamStarted => {
                if jam.is_running {
                    debug!(tick, jam = jam.jam_number, "jam already running");
                    return Ok(Vec::new());
                }
                state.set_state(JamClockState {
                    is_running: true,
                    jam_number: jam.jam_number.saturating_add(1),
                    started_tick: tick,
                    ended_tick: None,
                    ticks_passed: 0,
                    seconds_passed: 0,
                });
            }
            EventBody::JamEnded => {
                if jam.is_running {
                    Self::end(state, jam, tick);
                }
            }
            EventBody::TimeoutStarted { .. } if jam.is_running => {
                return Ok(vec![Event::at_tick(tick, EventBody::JamEnded)?]);
            }
            _ => {}
        }
        Ok(Vec::new())
    }

    fn reacts_to_ticks(&self) -> bool {
        true
    }

    fn tick(
        &mut self,
        state: &mut GameStateStore,
        clock: ClockTick,
    ) -> Result<Vec<Event>, ReducerError> {
        let jam = state.get_state::<JamClockState>()?.clone();
        if !jam.is_running {
            return Ok(Vec::new());
        }
        let expires = jam.started_tick.saturating_add(self.rules.jam_duration_ms);
        if clock.tick >= expires {
            return Ok(vec![Event::at_tick(expires, EventBody::JamEnded)?]);
        }
        let ticks_passed = clock.tick.saturating_sub(jam.started_tick);
        state.set_state(JamClockState {
            ticks_passed,
            seconds_passed: whole_seconds(ticks_passed),
            ..jam
        });
        Ok(Vec::new())
    }
}
