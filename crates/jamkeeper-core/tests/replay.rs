//! Replay, keyframe, and log edit behaviour of the engine, end to end.
//!
//! Edits are checked against a game computed from scratch over the same
//! final log: whatever path the engine takes to recover (keyframe plus
//! partial replay, or full reload), the state must come out identical.

#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::missing_panics_doc
)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{ev, from_scratch, harness, harness_with, score};
use jamkeeper_core::ContextError;
use jamkeeper_reducers::{
    GameRules, JamClockState, LineupClockState, PeriodClockState, TeamLineupState,
    TeamPenaltiesState, TeamScoreState, TimeoutClockState,
};
use jamkeeper_types::{Event, EventBody, EventType, SkaterPosition, TeamSide, TimeoutCaller};

fn short_period() -> GameRules {
    GameRules {
        period_duration_ms: 60_000,
        jam_duration_ms: 40_000,
        ..GameRules::default()
    }
}

fn on_track(tick: u64, team: TeamSide, number: &str, position: SkaterPosition) -> Event {
    ev(
        tick,
        EventBody::SkaterOnTrack {
            team,
            number: number.to_owned(),
            position,
        },
    )
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn score_counts_in_running_jam() {
    let h = harness(50).await;
    h.add(ev(0, EventBody::JamStarted)).await;
    h.add(score(1_000, TeamSide::Home, 3)).await;

    let home: TeamScoreState = h.team_state(TeamSide::Home).await;
    assert_eq!(home.score, 3);
    assert_eq!(home.jam_score, 3);
    let away: TeamScoreState = h.team_state(TeamSide::Away).await;
    assert_eq!(away.score, 0);
}

#[tokio::test]
async fn deleting_jam_end_resumes_the_jam() {
    let h = harness(1).await;
    h.add(ev(0, EventBody::JamStarted)).await;
    let jam_end = h.add(ev(30_000, EventBody::JamEnded)).await;
    h.add(ev(31_000, EventBody::JamStarted)).await;

    let jam: JamClockState = h.state().await;
    assert_eq!(jam.jam_number, 2);
    assert_eq!(jam.started_tick, 31_000);

    let removed = h.bus.remove_event(h.game, jam_end.id).await.unwrap();
    assert_eq!(removed, jam_end);

    h.settle(50_000).await;
    let jam: JamClockState = h.state().await;
    assert!(jam.is_running);
    assert_eq!(jam.jam_number, 1);
    assert_eq!(jam.started_tick, 0);
    assert_eq!(jam.ended_tick, None);
    assert_eq!(jam.seconds_passed, 50);

    let expected = from_scratch(GameRules::default(), h.logged().await, 50_000).await;
    assert_eq!(h.snapshot().await, expected);
}

#[tokio::test]
async fn moved_event_is_reordered_by_its_new_tick() {
    let h = harness(1).await;
    h.add(ev(0, EventBody::JamStarted)).await;
    let home = h.add(score(10_000, TeamSide::Home, 1)).await;
    h.add(score(20_000, TeamSide::Away, 2)).await;

    let moved = h.bus.move_event(h.game, home.id, 25_000).await.unwrap();
    assert_eq!(moved.tick(), 25_000);
    assert_eq!(moved.id.tail(), home.id.tail());

    let logged = h.logged().await;
    let ticks: Vec<u64> = logged.iter().map(Event::tick).collect();
    assert_eq!(ticks, vec![0, 20_000, 25_000]);
    assert!(logged.windows(2).all(|pair| pair[0].id < pair[1].id));
    assert_eq!(logged[2], moved);

    let home_score: TeamScoreState = h.team_state(TeamSide::Home).await;
    let away_score: TeamScoreState = h.team_state(TeamSide::Away).await;
    assert_eq!(home_score.score, 1);
    assert_eq!(away_score.score, 2);
}

// ---------------------------------------------------------------------------
// Replay properties
// ---------------------------------------------------------------------------

fn full_game() -> Vec<Event> {
    vec![
        on_track(0, TeamSide::Home, "12", SkaterPosition::Jammer),
        on_track(0, TeamSide::Away, "7", SkaterPosition::Pivot),
        ev(1_000, EventBody::JamStarted),
        score(5_000, TeamSide::Home, 4),
        ev(
            8_000,
            EventBody::PenaltyAssessed {
                team: TeamSide::Away,
                number: "7".to_owned(),
                code: "X".to_owned(),
            },
        ),
        score(10_000, TeamSide::Away, 1),
        ev(61_000, EventBody::JamEnded),
        ev(91_000, EventBody::JamStarted),
        score(95_000, TeamSide::Home, 2),
        ev(
            100_000,
            EventBody::TimeoutStarted {
                caller: TimeoutCaller::Team(TeamSide::Home),
            },
        ),
        ev(170_000, EventBody::JamStarted),
        score(175_000, TeamSide::Away, 3),
    ]
}

#[tokio::test]
async fn replaying_the_same_log_is_deterministic() {
    let first = from_scratch(GameRules::default(), full_game(), 180_000).await;
    let second = from_scratch(GameRules::default(), full_game(), 180_000).await;
    assert_eq!(first, second);
    assert!(first.contains_key("TeamScoreState_Home"));
    assert!(first.contains_key("JamClockState"));
}

#[tokio::test]
async fn full_game_derives_expected_state() {
    let h = harness_with(GameRules::default(), 2, full_game()).await;
    h.settle(180_000).await;

    let jam: JamClockState = h.state().await;
    assert_eq!(jam.jam_number, 3);
    assert!(jam.is_running);

    let timeout: TimeoutClockState = h.state().await;
    assert!(!timeout.is_running);
    assert_eq!(timeout.home_timeouts_remaining, 2);
    assert_eq!(timeout.away_timeouts_remaining, 3);
    assert_eq!(timeout.seconds_passed, 60);

    let lineup: LineupClockState = h.state().await;
    assert!(!lineup.is_running);

    let home: TeamScoreState = h.team_state(TeamSide::Home).await;
    assert_eq!(home.score, 6);
    let away: TeamScoreState = h.team_state(TeamSide::Away).await;
    assert_eq!(away.score, 4);
    assert_eq!(away.jam_score, 3);

    let penalties: TeamPenaltiesState = h.team_state(TeamSide::Away).await;
    assert_eq!(penalties.count_for("7"), 1);
    let lineup: TeamLineupState = h.team_state(TeamSide::Home).await;
    assert!(lineup.skaters.is_empty());
}

#[tokio::test]
async fn keyframe_recovery_matches_full_replay() {
    let h = harness(2).await;
    for event in full_game() {
        h.add(event).await;
    }
    h.settle(180_000).await;
    let live = h.snapshot().await;

    let frame_tick = h
        .bus
        .factory()
        .apply_key_frame(h.game, 120_000)
        .await
        .unwrap();
    assert!(frame_tick < 120_000);
    h.settle(180_000).await;
    let from_frame = h.snapshot().await;

    h.bus.factory().reload_game(h.game).await.unwrap();
    h.settle(180_000).await;
    let reloaded = h.snapshot().await;

    let expected = from_scratch(GameRules::default(), h.logged().await, 180_000).await;
    assert_eq!(live, expected);
    assert_eq!(from_frame, expected);
    assert_eq!(reloaded, expected);
}

#[tokio::test]
async fn apply_key_frame_without_frames_is_not_found() {
    let h = harness(50).await;
    h.add(ev(0, EventBody::JamStarted)).await;
    let result = h.bus.factory().apply_key_frame(h.game, 10_000).await;
    assert!(matches!(
        result,
        Err(ContextError::KeyFrameNotFound { tick: 10_000, .. })
    ));
}

#[tokio::test]
async fn deleting_root_event_removes_its_effects() {
    let h = harness(1).await;
    h.add(ev(0, EventBody::JamStarted)).await;
    let timeout = h
        .add(ev(
            50_000,
            EventBody::TimeoutStarted {
                caller: TimeoutCaller::Official,
            },
        ))
        .await;
    h.add(score(60_000, TeamSide::Home, 1)).await;

    // The jam end caused by the timeout is derived, never stored.
    let jam: JamClockState = h.state().await;
    assert!(!jam.is_running);
    assert_eq!(jam.ended_tick, Some(50_000));
    assert_eq!(h.logged().await.len(), 3);

    h.bus.remove_event(h.game, timeout.id).await.unwrap();
    h.settle(70_000).await;

    let jam: JamClockState = h.state().await;
    assert!(jam.is_running);
    assert_eq!(jam.ended_tick, None);
    let expected = from_scratch(GameRules::default(), h.logged().await, 70_000).await;
    assert_eq!(h.snapshot().await, expected);
}

#[tokio::test]
async fn unchanged_values_do_not_notify() {
    let h = harness(50).await;
    let seen = Arc::new(AtomicUsize::new(0));
    {
        let context = h.context().await;
        let mut runtime = context.lock().await;
        let counter = Arc::clone(&seen);
        runtime
            .state_mut()
            .watch_state::<JamClockState, _>(None, move |_: &JamClockState| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
    }

    h.add(ev(0, EventBody::JamStarted)).await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    // Only the raw millisecond counter moves before this event.
    h.add(score(400, TeamSide::Home, 1)).await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    h.bus.factory().reload_game(h.game).await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

// ---------------------------------------------------------------------------
// Log edits
// ---------------------------------------------------------------------------

#[tokio::test]
async fn late_event_is_integrated_in_order() {
    let h = harness(1).await;
    h.add(ev(0, EventBody::JamStarted)).await;
    h.add(ev(50_000, EventBody::JamStarted)).await;
    h.add(ev(30_000, EventBody::JamEnded)).await;

    let jam: JamClockState = h.state().await;
    assert!(jam.is_running);
    assert_eq!(jam.jam_number, 2);
    assert_eq!(jam.started_tick, 50_000);

    h.settle(60_000).await;
    let expected = from_scratch(GameRules::default(), h.logged().await, 60_000).await;
    assert_eq!(h.snapshot().await, expected);
}

#[tokio::test]
async fn event_behind_the_clock_is_integrated() {
    let h = harness(1).await;
    h.add(ev(0, EventBody::JamStarted)).await;
    h.settle(130_000).await;

    // Nothing later is logged, but the clock already ran the jam out.
    h.add(ev(60_000, EventBody::JamEnded)).await;

    let jam: JamClockState = h.state().await;
    assert!(!jam.is_running);
    assert_eq!(jam.ended_tick, Some(60_000));
    assert_eq!(jam.seconds_passed, 60);
    let lineup: LineupClockState = h.state().await;
    assert!(lineup.is_running);
    assert_eq!(lineup.seconds_passed, 70);
    assert!(lineup.is_overdue);

    let expected = from_scratch(GameRules::default(), h.logged().await, 130_000).await;
    assert_eq!(h.snapshot().await, expected);
}

#[tokio::test]
async fn offset_shifts_target_and_later_events() {
    let h = harness(1).await;
    h.add(ev(0, EventBody::JamStarted)).await;
    let first = h.add(score(10_000, TeamSide::Home, 1)).await;
    h.add(score(20_000, TeamSide::Home, 1)).await;

    let shifted = h
        .bus
        .offset_events_after(h.game, first.id, 5_000)
        .await
        .unwrap();
    let shifted_ticks: Vec<u64> = shifted.iter().map(Event::tick).collect();
    assert_eq!(shifted_ticks, vec![15_000, 25_000]);

    let ticks: Vec<u64> = h
        .logged()
        .await
        .iter()
        .map(Event::tick)
        .collect();
    assert_eq!(ticks, vec![0, 15_000, 25_000]);
    let home: TeamScoreState = h.team_state(TeamSide::Home).await;
    assert_eq!(home.score, 2);
}

#[tokio::test]
async fn removing_a_tail_matches_a_shorter_log() {
    let h = harness(1).await;
    h.add(ev(0, EventBody::JamStarted)).await;
    h.add(score(10_000, TeamSide::Home, 1)).await;
    let jam_end = h.add(ev(20_000, EventBody::JamEnded)).await;
    h.add(score(25_000, TeamSide::Home, 2)).await;

    let removed = h
        .bus
        .remove_events_starting_at(h.game, jam_end.id)
        .await
        .unwrap();
    assert_eq!(removed.len(), 2);
    assert_eq!(h.logged().await.len(), 2);

    h.settle(30_000).await;
    let jam: JamClockState = h.state().await;
    assert!(jam.is_running);
    let home: TeamScoreState = h.team_state(TeamSide::Home).await;
    assert_eq!(home.score, 1);
    let expected = from_scratch(GameRules::default(), h.logged().await, 30_000).await;
    assert_eq!(h.snapshot().await, expected);
}

#[tokio::test]
async fn transient_events_vanish_on_reload() {
    let h = harness(50).await;
    h.add(ev(0, EventBody::JamStarted)).await;
    h.bus
        .add_event_without_persisting(h.game, score(1_000, TeamSide::Home, 2))
        .await
        .unwrap();

    let home: TeamScoreState = h.team_state(TeamSide::Home).await;
    assert_eq!(home.score, 2);
    assert_eq!(h.logged().await.len(), 1);

    h.bus.factory().reload_game(h.game).await.unwrap();
    let home: TeamScoreState = h.team_state(TeamSide::Home).await;
    assert_eq!(home.score, 0);
}

// ---------------------------------------------------------------------------
// Period end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn period_end_is_persisted_and_leaves_a_sentinel_when_deleted() {
    let h = harness_with(short_period(), 1, Vec::new()).await;
    h.add(ev(0, EventBody::JamStarted)).await;
    h.add(ev(5_000, EventBody::JamEnded)).await;

    h.settle(65_000).await;
    let period: PeriodClockState = h.state().await;
    assert!(period.has_expired);
    assert!(!period.is_running);

    let logged = h.logged().await;
    assert_eq!(logged.len(), 3);
    let period_end = logged[2].clone();
    assert_eq!(period_end.event_type(), EventType::PeriodEnded);
    assert_eq!(period_end.tick(), 60_000);

    h.bus.remove_event(h.game, period_end.id).await.unwrap();
    let types: Vec<EventType> = h
        .logged()
        .await
        .iter()
        .map(Event::event_type)
        .collect();
    assert_eq!(
        types,
        vec![
            EventType::JamStarted,
            EventType::JamEnded,
            EventType::PeriodEndSuppressed
        ]
    );

    let period: PeriodClockState = h.state().await;
    assert!(period.end_suppressed);
    assert!(period.has_expired);

    // The clock does not end the period again.
    h.settle(70_000).await;
    assert_eq!(h.logged().await.len(), 3);
}

#[tokio::test]
async fn clock_interleaved_edits_match_full_replay() {
    let h = harness_with(short_period(), 1, Vec::new()).await;
    h.add(ev(0, EventBody::JamStarted)).await;
    // The first jam runs out at 40s.
    h.settle(45_000).await;
    h.add(score(30_000, TeamSide::Home, 2)).await;

    h.add(ev(50_000, EventBody::JamStarted)).await;
    // The second jam runs out at 90s, past the end of the period.
    h.settle(95_000).await;
    h.add(score(70_000, TeamSide::Away, 1)).await;
    h.settle(100_000).await;

    let logged = h.logged().await;
    let period_ends: Vec<u64> = logged
        .iter()
        .filter(|event| event.event_type() == EventType::PeriodEnded)
        .map(Event::tick)
        .collect();
    assert_eq!(period_ends, vec![90_001]);

    let jam: JamClockState = h.state().await;
    assert_eq!(jam.jam_number, 2);
    assert!(!jam.is_running);
    assert_eq!(jam.ended_tick, Some(90_000));
    let period: PeriodClockState = h.state().await;
    assert!(period.has_expired);
    assert!(!period.is_running);
    let home: TeamScoreState = h.team_state(TeamSide::Home).await;
    assert_eq!(home.score, 2);
    let away: TeamScoreState = h.team_state(TeamSide::Away).await;
    assert_eq!(away.score, 1);

    let expected = from_scratch(short_period(), logged, 100_000).await;
    assert_eq!(h.snapshot().await, expected);

    h.bus
        .factory()
        .apply_key_frame(h.game, 95_000)
        .await
        .unwrap();
    h.settle(100_000).await;
    assert_eq!(h.snapshot().await, expected);

    h.bus.factory().reload_game(h.game).await.unwrap();
    h.settle(100_000).await;
    assert_eq!(h.snapshot().await, expected);
    assert_eq!(h.logged().await.len(), 5);
}
