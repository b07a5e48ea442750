//! The lineup clock, counting the break between jams.

use jamkeeper_events::{
    ClockTick, GameStateStore, Reducer, ReducerError, SliceRef, StateSlice, default_slice,
};
use jamkeeper_types::{Event, EventBody, EventId, Tick};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::jam_clock::{JAM_CLOCK, JamClockState};
use crate::period_clock::{PERIOD_CLOCK, PeriodClockState};
use crate::rules::{GameRules, whole_seconds};
use crate::timeout_clock::TIMEOUT_CLOCK;

/// Reducer type name.
pub const LINEUP_CLOCK: &str = "LineupClock";

/// State of the lineup between jams.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct LineupClockState {
    /// Teams are lining up.
    pub is_running: bool,
    /// Tick the lineup started at.
    pub started_tick: Tick,
    /// Milliseconds elapsed in the lineup. Not part of change detection.
    pub ticks_passed: Tick,
    /// Whole seconds elapsed in the lineup.
    pub seconds_passed: u64,
    /// The lineup has run past its allotted time.
    pub is_overdue: bool,
}

impl StateSlice for LineupClockState {
    const NAME: &'static str = "LineupClockState";

    fn unchanged_from(&self, previous: &Self) -> bool {
        Self {
            ticks_passed: previous.ticks_passed,
            ..self.clone()
        } == *previous
    }
}

/// Runs the lineup clock.
#[derive(Debug, Clone)]
pub struct LineupClock {
    rules: GameRules,
}

impl LineupClock {
    /// Create a lineup clock for `rules`.
    pub const fn new(rules: GameRules) -> Self {
        Self { rules }
    }
}

impl Reducer for LineupClock {
    fn name(&self) -> &'static str {
        LINEUP_CLOCK
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[JAM_CLOCK, TIMEOUT_CLOCK, PERIOD_CLOCK]
    }

    fn default_states(&self) -> Vec<(String, SliceRef)> {
        vec![default_slice(None, LineupClockState::default())]
    }

    fn handle(
        &mut self,
        state: &mut GameStateStore,
        event: &Event,
        _source: Option<EventId>,
    ) -> Result<Vec<Event>, ReducerError> {
        let tick = event.tick();
        let start = match event.body {
            EventBody::JamEnded => true,
            EventBody::TimeoutEnded => {
                let jam = state.get_state::<JamClockState>()?;
                let period = state.get_state::<PeriodClockState>()?;
                let period_over = period.has_expired && !period.is_running;
                !jam.is_running && !period_over
            }
            EventBody::JamStarted | EventBody::TimeoutStarted { .. } | EventBody::PeriodEnded => {
                false
            }
            _ => return Ok(Vec::new()),
        };

        let lineup = state.get_state::<LineupClockState>()?.clone();
        if start {
            state.set_state(LineupClockState {
                is_running: true,
                started_tick: tick,
                ticks_passed: 0,
                seconds_passed: 0,
                is_overdue: false,
            });
        } else if lineup.is_running {
            let ticks_passed = tick.saturating_sub(lineup.started_tick);
            state.set_state(LineupClockState {
                is_running: false,
                ticks_passed,
                seconds_passed: whole_seconds(ticks_passed),
                is_overdue: ticks_passed > self.rules.lineup_duration_ms,
                ..lineup
            });
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
        let lineup = state.get_state::<LineupClockState>()?.clone();
        if lineup.is_running {
            let ticks_passed = clock.tick.saturating_sub(lineup.started_tick);
            state.set_state(LineupClockState {
                ticks_passed,
                seconds_passed: whole_seconds(ticks_passed),
                is_overdue: ticks_passed > self.rules.lineup_duration_ms,
                ..lineup
            });
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use jamkeeper_events::{NoopObserver, ReducerSet};
    use jamkeeper_types::{GameId, TimeoutCaller};

    use super::*;
    use crate::jam_clock::JamClock;
    use crate::period_clock::PeriodClock;
    use crate::timeout_clock::TimeoutClock;

    fn setup() -> (ReducerSet, GameStateStore) {
        let rules = GameRules::default();
        let reducers = ReducerSet::new(vec![
            Box::new(JamClock::new(rules)),
            Box::new(TimeoutClock::new(rules)),
            Box::new(PeriodClock::new(rules)),
            Box::new(LineupClock::new(rules)),
        ])
        .unwrap();
        let mut state = GameStateStore::new(GameId::new());
        state.load_default_states(&reducers);
        (reducers, state)
    }

    fn ev(tick: Tick, body: EventBody) -> Event {
        Event::at_tick(tick, body).unwrap()
    }

    #[test]
    fn runs_between_jams() {
        let (mut reducers, mut state) = setup();
        state
            .apply_events(
                &mut reducers,
                None,
                vec![ev(0, EventBody::JamStarted), ev(60_000, EventBody::JamEnded)],
            )
            .unwrap();
        state.advance_to(&mut reducers, 95_000, &mut NoopObserver).unwrap();
        let lineup = state.get_state::<LineupClockState>().unwrap();
        assert!(lineup.is_running);
        assert_eq!(lineup.seconds_passed, 35);
        assert!(lineup.is_overdue);

        state
            .apply_events(&mut reducers, None, vec![ev(96_000, EventBody::JamStarted)])
            .unwrap();
        let lineup = state.get_state::<LineupClockState>().unwrap();
        assert!(!lineup.is_running);
        assert_eq!(lineup.seconds_passed, 36);
        assert!(lineup.is_overdue);
    }

    #[test]
    fn timeout_restarts_lineup() {
        let (mut reducers, mut state) = setup();
        state
            .apply_events(
                &mut reducers,
                None,
                vec![
                    ev(0, EventBody::JamStarted),
                    ev(60_000, EventBody::JamEnded),
                    ev(
                        70_000,
                        EventBody::TimeoutStarted {
                            caller: TimeoutCaller::Official,
                        },
                    ),
                    ev(130_000, EventBody::TimeoutEnded),
                ],
            )
            .unwrap();
        let lineup = state.get_state::<LineupClockState>().unwrap();
        assert!(lineup.is_running);
        assert_eq!(lineup.started_tick, 130_000);
    }
}
