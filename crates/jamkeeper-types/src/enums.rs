//! Enumeration types shared by events and state slices.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// One of the two teams in a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum TeamSide {
    /// The home team.
    Home,
    /// The away team.
    Away,
}

impl TeamSide {
    /// Both sides, home first.
    pub const ALL: [Self; 2] = [Self::Home, Self::Away];

    /// Key suffix used for per-team state slices (`TeamScoreState_Home`).
    pub const fn as_key(self) -> &'static str {
        match self {
            Self::Home => "Home",
            Self::Away => "Away",
        }
    }
}

impl core::fmt::Display for TeamSide {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_key())
    }
}

/// Who called a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum TimeoutCaller {
    /// Officials' timeout.
    Official,
    /// A team timeout.
    Team(TeamSide),
    /// An official review requested by a team.
    Review(TeamSide),
}

/// Track position of a skater in a jam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum SkaterPosition {
    /// Scoring skater.
    Jammer,
    /// Blocker who may take the jammer's star.
    Pivot,
    /// Regular blocker.
    Blocker,
}

/// Discriminant of an [`EventBody`](crate::EventBody), used in logs and by
/// the event store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum EventType {
    /// A jam started.
    JamStarted,
    /// A jam ended.
    JamEnded,
    /// The period ended.
    PeriodEnded,
    /// Sentinel left behind when a period end is deleted.
    PeriodEndSuppressed,
    /// A timeout started.
    TimeoutStarted,
    /// A timeout ended.
    TimeoutEnded,
    /// A team's score changed by a relative amount.
    ScoreModifiedRelative,
    /// A skater was placed on the track for the upcoming jam.
    SkaterOnTrack,
    /// A skater was removed from the track.
    SkaterOffTrack,
    /// A penalty was assessed.
    PenaltyAssessed,
}

impl EventType {
    /// Stable name of the event type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::JamStarted => "JamStarted",
            Self::JamEnded => "JamEnded",
            Self::PeriodEnded => "PeriodEnded",
            Self::PeriodEndSuppressed => "PeriodEndSuppressed",
            Self::TimeoutStarted => "TimeoutStarted",
            Self::TimeoutEnded => "TimeoutEnded",
            Self::ScoreModifiedRelative => "ScoreModifiedRelative",
            Self::SkaterOnTrack => "SkaterOnTrack",
            Self::SkaterOffTrack => "SkaterOffTrack",
            Self::PenaltyAssessed => "PenaltyAssessed",
        }
    }
}

impl core::fmt::Display for EventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
