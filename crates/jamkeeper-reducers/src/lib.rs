//! Roller derby game rules as Jamkeeper reducers.
//!
//! This crate is the domain layer: it defines the state slices a derby
//! scoreboard shows and the reducers that derive them from the event log.
//! It knows nothing about persistence or scheduling; those live in
//! `jamkeeper-core`.
//!
//! # Modules
//!
//! - [`rules`] -- Timing rules ([`GameRules`])
//! - [`jam_clock`] -- Jam clock ([`JamClock`], [`JamClockState`])
//! - [`timeout_clock`] -- Timeout clock and team allowances
//! - [`period_clock`] -- Period clock, automatic period end, alignment anchor
//! - [`lineup_clock`] -- Lineup clock between jams
//! - [`team`] -- Per-team score, lineup, and penalties

pub mod jam_clock;
pub mod lineup_clock;
pub mod period_clock;
pub mod rules;
pub mod team;
pub mod timeout_clock;

use jamkeeper_events::{Reducer, ReducerRegistry};
use jamkeeper_types::TeamSide;

pub use jam_clock::{JamClock, JamClockState};
pub use lineup_clock::{LineupClock, LineupClockState};
pub use period_clock::{PeriodClock, PeriodClockState, period_clock_anchor};
pub use rules::GameRules;
pub use team::{
    LinedUpSkater, PenaltyRecord, TeamLineup, TeamLineupState, TeamPenalties, TeamPenaltiesState,
    TeamScore, TeamScoreState,
};
pub use timeout_clock::{TimeoutClock, TimeoutClockState};

/// The full derby reducer set, aligned to the period clock.
pub fn derby_registry(rules: GameRules) -> ReducerRegistry {
    ReducerRegistry::new()
        .with(move |_| vec![Box::new(JamClock::new(rules)) as Box<dyn Reducer>])
        .with(move |_| vec![Box::new(TimeoutClock::new(rules)) as Box<dyn Reducer>])
        .with(move |_| vec![Box::new(PeriodClock::new(rules)) as Box<dyn Reducer>])
        .with(move |_| vec![Box::new(LineupClock::new(rules)) as Box<dyn Reducer>])
        .with(|_| per_team(|side| Box::new(TeamScore::new(side))))
        .with(|_| per_team(|side| Box::new(TeamLineup::new(side))))
        .with(|_| per_team(|side| Box::new(TeamPenalties::new(side))))
        .with_alignment_anchor(period_clock_anchor)
}

fn per_team(build: impl Fn(TeamSide) -> Box<dyn Reducer>) -> Vec<Box<dyn Reducer>> {
    TeamSide::ALL.into_iter().map(build).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use jamkeeper_types::GameId;

    use super::*;

    #[test]
    fn derby_set_is_valid_and_ordered() {
        let registry = derby_registry(GameRules::default());
        let set = registry.build(GameId::new()).unwrap();
        assert_eq!(
            set.names(),
            vec![
                "JamClock",
                "TimeoutClock",
                "PeriodClock",
                "LineupClock",
                "TeamScore_Home",
                "TeamScore_Away",
                "TeamLineup_Home",
                "TeamLineup_Away",
                "TeamPenalties_Home",
                "TeamPenalties_Away",
            ]
        );
        assert!(registry.alignment_anchor().is_some());
    }

    #[test]
    fn export_bindings() {
        use ts_rs::TS;

        let _ = JamClockState::export_all();
        let _ = TimeoutClockState::export_all();
        let _ = PeriodClockState::export_all();
        let _ = LineupClockState::export_all();
        let _ = TeamScoreState::export_all();
        let _ = TeamLineupState::export_all();
        let _ = TeamPenaltiesState::export_all();
    }
}
