//! Events: immutable facts about a game, ordered by their [`EventId`].
//!
//! An event is never edited in place. Moving or replacing one is a delete
//! followed by an insert under a new id.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{EventType, SkaterPosition, TeamSide, TimeoutCaller};
use crate::ids::{EventId, IdError, Tick};

/// Payload of an event. The variant is the event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "body")]
#[ts(export, export_to = "bindings/")]
pub enum EventBody {
    /// A jam started. Starts the period clock if it is stopped.
    JamStarted,
    /// A jam ended, either called by an official or on time.
    JamEnded,
    /// The period ended.
    PeriodEnded,
    /// Keeps the period from ending automatically after a deleted period end.
    PeriodEndSuppressed,
    /// A timeout started.
    TimeoutStarted {
        /// Who called the timeout.
        caller: TimeoutCaller,
    },
    /// The running timeout ended.
    TimeoutEnded,
    /// Add `value` (possibly negative) to a team's score.
    ScoreModifiedRelative {
        /// The scoring team.
        team: TeamSide,
        /// Points to add.
        value: i32,
    },
    /// A skater lined up for the next jam.
    SkaterOnTrack {
        /// The skater's team.
        team: TeamSide,
        /// Roster number.
        number: String,
        /// Track position.
        position: SkaterPosition,
    },
    /// A skater left the lineup.
    SkaterOffTrack {
        /// The skater's team.
        team: TeamSide,
        /// Roster number.
        number: String,
    },
    /// A penalty was assessed against a skater.
    PenaltyAssessed {
        /// The skater's team.
        team: TeamSide,
        /// Roster number.
        number: String,
        /// Penalty code.
        code: String,
    },
}

impl EventBody {
    /// The discriminant of this body.
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::JamStarted => EventType::JamStarted,
            Self::JamEnded => EventType::JamEnded,
            Self::PeriodEnded => EventType::PeriodEnded,
            Self::PeriodEndSuppressed => EventType::PeriodEndSuppressed,
            Self::TimeoutStarted { .. } => EventType::TimeoutStarted,
            Self::TimeoutEnded => EventType::TimeoutEnded,
            Self::ScoreModifiedRelative { .. } => EventType::ScoreModifiedRelative,
            Self::SkaterOnTrack { .. } => EventType::SkaterOnTrack,
            Self::SkaterOffTrack { .. } => EventType::SkaterOffTrack,
            Self::PenaltyAssessed { .. } => EventType::PenaltyAssessed,
        }
    }

    /// Implicit events of this type are written back to the event store.
    pub const fn always_persisted(&self) -> bool {
        matches!(self, Self::PeriodEnded)
    }

    /// Ids of this type snap to whole seconds of the running period clock.
    pub const fn aligns_to_period_clock(&self) -> bool {
        matches!(
            self,
            Self::JamStarted | Self::JamEnded | Self::TimeoutStarted { .. }
        )
    }

    /// Sentinel that must remain in the log when an event of this type is
    /// deleted.
    pub fn deletion_replacement(&self) -> Option<Self> {
        match self {
            Self::PeriodEnded => Some(Self::PeriodEndSuppressed),
            _ => None,
        }
    }
}

/// An event in a game's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Time-ordered id; primary key and sort key.
    pub id: EventId,
    /// Type and payload.
    #[serde(flatten)]
    pub body: EventBody,
}

impl Event {
    /// Wrap a body with an existing id.
    pub const fn new(id: EventId, body: EventBody) -> Self {
        Self { id, body }
    }

    /// Create an event with a fresh id at `tick`.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::TickOutOfRange`] if `tick` cannot be encoded.
    pub fn at_tick(tick: Tick, body: EventBody) -> Result<Self, IdError> {
        Ok(Self::new(EventId::from_tick(tick)?, body))
    }

    /// The tick embedded in the id.
    pub const fn tick(&self) -> Tick {
        self.id.tick()
    }

    /// The event type.
    pub const fn event_type(&self) -> EventType {
        self.body.event_type()
    }
}
