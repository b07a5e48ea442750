//! The period clock.
//!
//! The period clock starts with the first jam of a period, stops for
//! timeouts, and resumes with the next jam. Once the period duration has
//! elapsed the clock has expired, and as soon as no jam is running a
//! `PeriodEnded` event is generated and written back to the event store.
//!
//! Deleting a generated `PeriodEnded` leaves a `PeriodEndSuppressed`
//! sentinel behind, which keeps the period from ending again on replay.

use jamkeeper_events::{
    ClockTick, GameStateStore, Reducer, ReducerError, SliceRef, StateSlice, default_slice,
};
use jamkeeper_types::{Event, EventBody, EventId, Tick};
use serde::{Deserialize, Serialize};
use tracing::debug;
use ts_rs::TS;

use crate::jam_clock::{JAM_CLOCK, JamClockState};
use crate::rules::{GameRules, whole_seconds};
use crate::timeout_clock::TIMEOUT_CLOCK;

/// Reducer type name.
pub const PERIOD_CLOCK: &str = "PeriodClock";

/// Tail of generated period-end ids. Sorts after every other event at the
/// same tick.
const PERIOD_END_TAIL: [u8; 10] = [0xFF; 10];

/// State of the current period.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PeriodClockState {
    /// The period clock is counting.
    pub is_running: bool,
    /// The period duration has fully elapsed.
    pub has_expired: bool,
    /// 1-based period number; 0 before the first jam.
    pub period_number: u32,
    /// Tick the clock last started or resumed at.
    pub last_started_tick: Tick,
    /// Milliseconds already on the clock when it last started.
    pub ticks_passed_at_start: Tick,
    /// Milliseconds elapsed in the period. Not part of change detection.
    pub ticks_passed: Tick,
    /// Whole seconds elapsed in the period.
    pub seconds_passed: u64,
    /// An automatic period end was deleted for this period.
    pub end_suppressed: bool,
}

impl PeriodClockState {
    fn elapsed_at(&self, tick: Tick) -> Tick {
        self.ticks_passed_at_start
            .saturating_add(tick.saturating_sub(self.last_started_tick))
    }
}

impl StateSlice for PeriodClockState {
    const NAME: &'static str = "PeriodClockState";

    fn unchanged_from(&self, previous: &Self) -> bool {
        Self {
            ticks_passed: previous.ticks_passed,
            ..self.clone()
        } == *previous
    }
}

/// Alignment anchor for implicit events: the period clock's last start,
/// while it is running.
pub fn period_clock_anchor(state: &GameStateStore) -> Option<Tick> {
    state
        .get_state::<PeriodClockState>()
        .ok()
        .filter(|period| period.is_running)
        .map(|period| period.last_started_tick)
}

/// Runs the period clock.
#[derive(Debug, Clone)]
pub struct PeriodClock {
    rules: GameRules,
}

impl PeriodClock {
    /// Create a period clock for `rules`.
    pub const fn new(rules: GameRules) -> Self {
        Self { rules }
    }

    fn capped(&self, ticks: Tick) -> Tick {
        ticks.min(self.rules.period_duration_ms)
    }
}

impl Reducer for PeriodClock {
    fn name(&self) -> &'static str {
        PERIOD_CLOCK
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[JAM_CLOCK, TIMEOUT_CLOCK]
    }

    fn default_states(&self) -> Vec<(String, SliceRef)> {
        vec![default_slice(None, PeriodClockState::default())]
    }

    fn handle(
        &mut self,
        state: &mut GameStateStore,
        event: &Event,
        _source: Option<EventId>,
    ) -> Result<Vec<Event>, ReducerError> {
        let mut period = state.get_state::<PeriodClockState>()?.clone();
        let tick = event.tick();
        match event.body {
            EventBody::JamStarted if !period.is_running => {
                if period.period_number == 0 || period.has_expired {
                    period = PeriodClockState {
                        period_number: period.period_number.saturating_add(1),
                        ..PeriodClockState::default()
                    };
                    debug!(tick, period = period.period_number, "period started");
                } else {
                    period.ticks_passed_at_start = period.ticks_passed;
                }
                period.is_running = true;
                period.last_started_tick = tick;
                state.set_state(period);
            }
            EventBody::TimeoutStarted { .. } if period.is_running => {
                period.ticks_passed = self.capped(period.elapsed_at(tick));
                period.seconds_passed = whole_seconds(period.ticks_passed);
                period.is_running = false;
                state.set_state(period);
            }
            EventBody::PeriodEnded => {
                if period.has_expired && !period.is_running {
                    return Ok(Vec::new());
                }
                if period.is_running {
                    period.ticks_passed = self.capped(period.elapsed_at(tick));
                    period.seconds_passed = whole_seconds(period.ticks_passed);
                }
                period.is_running = false;
                period.has_expired = true;
                state.set_state(period);
            }
            EventBody::PeriodEndSuppressed => {
                period.end_suppressed = true;
                state.set_state(period);
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
        let period = state.get_state::<PeriodClockState>()?.clone();
        if !period.is_running {
            return Ok(Vec::new());
        }

        let elapsed = period.elapsed_at(clock.tick);
        let has_expired = elapsed >= self.rules.period_duration_ms;
        let ticks_passed = self.capped(elapsed);
        state.set_state(PeriodClockState {
            has_expired,
            ticks_passed,
            seconds_passed: whole_seconds(ticks_passed),
            ..period.clone()
        });

        if !has_expired || period.end_suppressed {
            return Ok(Vec::new());
        }
        let jam = state.get_state::<JamClockState>()?;
        if jam.is_running {
            return Ok(Vec::new());
        }
        let remaining = self
            .rules
            .period_duration_ms
            .saturating_sub(period.ticks_passed_at_start);
        let expiry_tick = period.last_started_tick.saturating_add(remaining);
        // Never at the jam end's own tick: a replay ticks before that jam
        // end, so it would see the period end first.
        let end_tick = jam
            .ended_tick
            .map_or(expiry_tick, |ended| expiry_tick.max(ended.saturating_add(1)));
        if end_tick > clock.tick {
            return Ok(Vec::new());
        }
        let id = EventId::from_parts(end_tick, PERIOD_END_TAIL)?;
        Ok(vec![Event::new(id, EventBody::PeriodEnded)])
    }
}
