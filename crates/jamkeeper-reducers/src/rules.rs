//! Timing rules for a derby game.
//!
//! These map to the `rules` section of `jamkeeper.yaml`. Every field has a
//! default, so a partial section only overrides what it names.

use jamkeeper_types::Tick;
use serde::{Deserialize, Serialize};

/// Durations and allowances that drive the clock reducers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRules {
    /// Length of one period in milliseconds (default: 30 minutes).
    #[serde(default = "default_period_duration_ms")]
    pub period_duration_ms: Tick,

    /// Maximum length of a jam in milliseconds (default: 2 minutes).
    #[serde(default = "default_jam_duration_ms")]
    pub jam_duration_ms: Tick,

    /// Length of the lineup between jams in milliseconds (default: 30 seconds).
    #[serde(default = "default_lineup_duration_ms")]
    pub lineup_duration_ms: Tick,

    /// Length of a team timeout in milliseconds (default: 1 minute).
    #[serde(default = "default_timeout_duration_ms")]
    pub timeout_duration_ms: Tick,

    /// Team timeouts available per game (default: 3).
    #[serde(default = "default_team_timeouts")]
    pub team_timeouts: u32,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            period_duration_ms: default_period_duration_ms(),
            jam_duration_ms: default_jam_duration_ms(),
            lineup_duration_ms: default_lineup_duration_ms(),
            timeout_duration_ms: default_timeout_duration_ms(),
            team_timeouts: default_team_timeouts(),
        }
    }
}

const fn default_period_duration_ms() -> Tick {
    1_800_000
}

const fn default_jam_duration_ms() -> Tick {
    120_000
}

const fn default_lineup_duration_ms() -> Tick {
    30_000
}

const fn default_timeout_duration_ms() -> Tick {
    60_000
}

const fn default_team_timeouts() -> u32 {
    3
}

/// Whole seconds in a tick span.
pub(crate) const fn whole_seconds(ticks: Tick) -> u64 {
    ticks / 1_000
}
