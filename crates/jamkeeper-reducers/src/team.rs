//! Per-team reducers: score, lineup, and penalties.
//!
//! Each reducer is instantiated once per [`TeamSide`] and keys its slice by
//! the side, e.g. `TeamScoreState_Home`.

use jamkeeper_events::{GameStateStore, Reducer, ReducerError, SliceRef, StateSlice, default_slice};
use jamkeeper_types::{Event, EventBody, EventId, SkaterPosition, TeamSide, Tick};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::jam_clock::{JAM_CLOCK, JamClockState};
use crate::period_clock::{PERIOD_CLOCK, PeriodClockState};

/// Reducer type name of [`TeamScore`].
pub const TEAM_SCORE: &str = "TeamScore";

/// Reducer type name of [`TeamLineup`].
pub const TEAM_LINEUP: &str = "TeamLineup";

/// Reducer type name of [`TeamPenalties`].
pub const TEAM_PENALTIES: &str = "TeamPenalties";

// ---- score ----

/// A team's score.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TeamScoreState {
    /// Game total.
    pub score: u32,
    /// Points in the current (or last) jam.
    pub jam_score: u32,
    /// Points in the jam before that.
    pub last_jam_score: u32,
}

impl StateSlice for TeamScoreState {
    const NAME: &'static str = "TeamScoreState";
}

fn add_points(current: u32, value: i32) -> u32 {
    let total = i64::from(current).saturating_add(i64::from(value)).max(0);
    u32::try_from(total).unwrap_or(u32::MAX)
}

/// Keeps one team's score.
#[derive(Debug, Clone, Copy)]
pub struct TeamScore {
    side: TeamSide,
}

impl TeamScore {
    /// Create the score reducer for `side`.
    pub const fn new(side: TeamSide) -> Self {
        Self { side }
    }
}

impl Reducer for TeamScore {
    fn name(&self) -> &'static str {
        TEAM_SCORE
    }

    fn state_key(&self) -> Option<&str> {
        Some(self.side.as_key())
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[JAM_CLOCK]
    }

    fn default_states(&self) -> Vec<(String, SliceRef)> {
        vec![default_slice(
            Some(self.side.as_key()),
            TeamScoreState::default(),
        )]
    }

    fn handle(
        &mut self,
        state: &mut GameStateStore,
        event: &Event,
        _source: Option<EventId>,
    ) -> Result<Vec<Event>, ReducerError> {
        let key = self.side.as_key();
        match event.body {
            EventBody::ScoreModifiedRelative { team, value } if team == self.side => {
                let score = state.get_keyed_state::<TeamScoreState>(key)?;
                let next = TeamScoreState {
                    score: add_points(score.score, value),
                    jam_score: add_points(score.jam_score, value),
                    last_jam_score: score.last_jam_score,
                };
                state.set_keyed_state(key, next);
            }
            EventBody::JamStarted => {
                // A start while a jam runs is ignored by the jam clock.
                let jam = state.get_state::<JamClockState>()?;
                let fresh = jam.is_running && jam.started_tick == event.tick();
                let score = state.get_keyed_state::<TeamScoreState>(key)?;
                if fresh {
                    let next = TeamScoreState {
                        score: score.score,
                        jam_score: 0,
                        last_jam_score: score.jam_score,
                    };
                    state.set_keyed_state(key, next);
                }
            }
            _ => {}
        }
        Ok(Vec::new())
    }
}

// ---- lineup ----

/// A skater lined up for the coming jam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct LinedUpSkater {
    /// Roster number.
    pub number: String,
    /// Track position.
    pub position: SkaterPosition,
}

/// Skaters a team has on the track.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TeamLineupState {
    /// Skaters in the order they were placed.
    pub skaters: Vec<LinedUpSkater>,
}

impl StateSlice for TeamLineupState {
    const NAME: &'static str = "TeamLineupState";
}

/// Tracks one team's lineup. The track is cleared when a jam ends.
#[derive(Debug, Clone, Copy)]
pub struct TeamLineup {
    side: TeamSide,
}

impl TeamLineup {
    /// Create the lineup reducer for `side`.
    pub const fn new(side: TeamSide) -> Self {
        Self { side }
    }
}

impl Reducer for TeamLineup {
    fn name(&self) -> &'static str {
        TEAM_LINEUP
    }

    fn state_key(&self) -> Option<&str> {
        Some(self.side.as_key())
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[JAM_CLOCK]
    }

    fn default_states(&self) -> Vec<(String, SliceRef)> {
        vec![default_slice(
            Some(self.side.as_key()),
            TeamLineupState::default(),
        )]
    }

    fn handle(
        &mut self,
        state: &mut GameStateStore,
        event: &Event,
        _source: Option<EventId>,
    ) -> Result<Vec<Event>, ReducerError> {
        let key = self.side.as_key();
        let mut lineup = state.get_keyed_state::<TeamLineupState>(key)?.clone();
        match &event.body {
            EventBody::SkaterOnTrack {
                team,
                number,
                position,
            } if *team == self.side => {
                // Only one jammer and one pivot per team.
                if matches!(position, SkaterPosition::Jammer | SkaterPosition::Pivot) {
                    lineup.skaters.retain(|s| s.position != *position);
                }
                lineup.skaters.retain(|s| s.number != *number);
                lineup.skaters.push(LinedUpSkater {
                    number: number.clone(),
                    position: *position,
                });
            }
            EventBody::SkaterOffTrack { team, number } if *team == self.side => {
                lineup.skaters.retain(|s| s.number != *number);
            }
            EventBody::JamEnded => lineup.skaters.clear(),
            _ => return Ok(Vec::new()),
        }
        state.set_keyed_state(key, lineup);
        Ok(Vec::new())
    }
}

// ---- penalties ----

/// One assessed penalty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PenaltyRecord {
    /// Roster number of the penalized skater.
    pub number: String,
    /// Penalty code.
    pub code: String,
    /// Tick the penalty was assessed at.
    pub tick: Tick,
    /// Period it was assessed in.
    pub period: u32,
    /// Jam it was assessed in (or after).
    pub jam: u32,
}

/// All penalties assessed against a team.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TeamPenaltiesState {
    /// Penalties in assessment order.
    pub penalties: Vec<PenaltyRecord>,
}

impl TeamPenaltiesState {
    /// Number of penalties assessed against `number`.
    pub fn count_for(&self, number: &str) -> usize {
        self.penalties.iter().filter(|p| p.number == number).count()
    }
}

impl StateSlice for TeamPenaltiesState {
    const NAME: &'static str = "TeamPenaltiesState";
}

/// Records one team's penalties.
#[derive(Debug, Clone, Copy)]
pub struct TeamPenalties {
    side: TeamSide,
}

impl TeamPenalties {
    /// Create the penalty reducer for `side`.
    pub const fn new(side: TeamSide) -> Self {
        Self { side }
    }
}

impl Reducer for TeamPenalties {
    fn name(&self) -> &'static str {
        TEAM_PENALTIES
    }

    fn state_key(&self) -> Option<&str> {
        Some(self.side.as_key())
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[JAM_CLOCK, PERIOD_CLOCK]
    }

    fn default_states(&self) -> Vec<(String, SliceRef)> {
        vec![default_slice(
            Some(self.side.as_key()),
            TeamPenaltiesState::default(),
        )]
    }

    fn handle(
        &mut self,
        state: &mut GameStateStore,
        event: &Event,
        _source: Option<EventId>,
    ) -> Result<Vec<Event>, ReducerError> {
        let EventBody::PenaltyAssessed { team, number, code } = &event.body else {
            return Ok(Vec::new());
        };
        if *team != self.side {
            return Ok(Vec::new());
        }
        let key = self.side.as_key();
        let jam = state.get_state::<JamClockState>()?.jam_number;
        let period = state.get_state::<PeriodClockState>()?.period_number;
        let mut penalties = state.get_keyed_state::<TeamPenaltiesState>(key)?.clone();
        penalties.penalties.push(PenaltyRecord {
            number: number.clone(),
            code: code.clone(),
            tick: event.tick(),
            period,
            jam,
        });
        state.set_keyed_state(key, penalties);
        Ok(Vec::new())
    }
}
