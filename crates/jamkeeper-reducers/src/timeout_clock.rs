//! The timeout clock and per-team timeout allowances.
//!
//! Team timeouts end on their own after the configured duration; official
//! timeouts and reviews run until ended. Starting a jam ends any running
//! timeout.

use jamkeeper_events::{
    ClockTick, GameStateStore, Reducer, ReducerError, SliceRef, StateSlice, default_slice,
};
use jamkeeper_types::{Event, EventBody, EventId, TeamSide, Tick, TimeoutCaller};
use serde::{Deserialize, Serialize};
use tracing::warn;
use ts_rs::TS;

use crate::rules::{GameRules, whole_seconds};

/// Reducer type name.
pub const TIMEOUT_CLOCK: &str = "TimeoutClock";

/// State of the current (or last) timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TimeoutClockState {
    /// A timeout is in progress.
    pub is_running: bool,
    /// Who called the current or last timeout.
    pub caller: Option<TimeoutCaller>,
    /// Tick the current or last timeout started at.
    pub started_tick: Tick,
    /// Milliseconds elapsed in the timeout. Not part of change detection.
    pub ticks_passed: Tick,
    /// Whole seconds elapsed in the timeout.
    pub seconds_passed: u64,
    /// Team timeouts the home team has left.
    pub home_timeouts_remaining: u32,
    /// Team timeouts the away team has left.
    pub away_timeouts_remaining: u32,
}

impl TimeoutClockState {
    fn with_allowance(team_timeouts: u32) -> Self {
        Self {
            is_running: false,
            caller: None,
            started_tick: 0,
            ticks_passed: 0,
            seconds_passed: 0,
            home_timeouts_remaining: team_timeouts,
            away_timeouts_remaining: team_timeouts,
        }
    }

    /// Timeouts `side` has left.
    pub const fn remaining(&self, side: TeamSide) -> u32 {
        match side {
            TeamSide::Home => self.home_timeouts_remaining,
            TeamSide::Away => self.away_timeouts_remaining,
        }
    }

    const fn remaining_mut(&mut self, side: TeamSide) -> &mut u32 {
        match side {
            TeamSide::Home => &mut self.home_timeouts_remaining,
            TeamSide::Away => &mut self.away_timeouts_remaining,
        }
    }
}

impl StateSlice for TimeoutClockState {
    const NAME: &'static str = "TimeoutClockState";

    fn unchanged_from(&self, previous: &Self) -> bool {
        Self {
            ticks_passed: previous.ticks_passed,
            ..self.clone()
        } == *previous
    }
}

/// Runs the timeout clock.
#[derive(Debug, Clone)]
pub struct TimeoutClock {
    rules: GameRules,
}

impl TimeoutClock {
    /// Create a timeout clock for `rules`.
    pub const fn new(rules: GameRules) -> Self {
        Self { rules }
    }
}

impl Reducer for TimeoutClock {
    fn name(&self) -> &'static str {
        TIMEOUT_CLOCK
    }

    fn default_states(&self) -> Vec<(String, SliceRef)> {
        vec![default_slice(
            None,
            TimeoutClockState::with_allowance(self.rules.team_timeouts),
        )]
    }

    fn handle(
        &mut self,
        state: &mut GameStateStore,
        event: &Event,
        _source: Option<EventId>,
    ) -> Result<Vec<Event>, ReducerError> {
        let mut timeout = state.get_state::<TimeoutClockState>()?.clone();
        let tick = event.tick();
        match event.body {
            EventBody::TimeoutStarted { caller } => {
                if let TimeoutCaller::Team(side) = caller {
                    let remaining = timeout.remaining_mut(side);
                    if *remaining == 0 {
                        warn!(tick, team = %side, "team timeout called with none remaining");
                    }
                    *remaining = remaining.saturating_sub(1);
                }
                timeout.is_running = true;
                timeout.caller = Some(caller);
                timeout.started_tick = tick;
                timeout.ticks_passed = 0;
                timeout.seconds_passed = 0;
                state.set_state(timeout);
            }
            EventBody::TimeoutEnded if timeout.is_running => {
                timeout.is_running = false;
                timeout.ticks_passed = tick.saturating_sub(timeout.started_tick);
                timeout.seconds_passed = whole_seconds(timeout.ticks_passed);
                state.set_state(timeout);
            }
            EventBody::JamStarted if timeout.is_running => {
                return Ok(vec![Event::at_tick(tick, EventBody::TimeoutEnded)?]);
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
        let timeout = state.get_state::<TimeoutClockState>()?.clone();
        if !timeout.is_running {
            return Ok(Vec::new());
        }
        if matches!(timeout.caller, Some(TimeoutCaller::Team(_))) {
            let expires = timeout
                .started_tick
                .saturating_add(self.rules.timeout_duration_ms);
            if clock.tick >= expires {
                return Ok(vec![Event::at_tick(expires, EventBody::TimeoutEnded)?]);
            }
        }
        let ticks_passed = clock.tick.saturating_sub(timeout.started_tick);
        state.set_state(TimeoutClockState {
            ticks_passed,
            seconds_passed: whole_seconds(ticks_passed),
            ..timeout
        });
        Ok(Vec::new())
    }
}
