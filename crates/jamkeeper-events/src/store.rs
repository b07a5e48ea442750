//! Per-game state store and the deterministic replay loop.
//!
//! [`GameStateStore`] owns every state slice of one game. All mutation goes
//! through [`GameStateStore::apply_events`] (or [`GameStateStore::advance_to`]
//! for clock-driven catch-up), which drives events through the reducers in
//! strict id order using an explicit priority queue:
//!
//! 1. Pop the earliest queued event.
//! 2. Run every tick-reactive reducer at `tick - 1`. Events they emit are
//!    queued and the popped event is put back, so time is caught up before
//!    the event is applied.
//! 3. Dispatch the event to every reducer in dependency order and queue the
//!    implicit events they return into the same pass.
//! 4. Report the handled event to the [`ApplyObserver`].
//!
//! Because implicit events discovered mid-flight are ordered by the same
//! rule as explicit ones, replaying an identical log always reaches an
//! identical state.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::fmt;
use std::sync::Arc;

use jamkeeper_types::{Event, EventId, GameId, Tick};
use tracing::{debug, error, warn};

use crate::error::StateError;
use crate::keyframe::KeyFrame;
use crate::reducer::{ClockTick, ReducerSet};
use crate::slice::{SliceRef, StateSlice, slice_name, slice_ref};

/// Default cap on implicit events per apply call.
pub const DEFAULT_MAX_IMPLICIT_EVENTS: usize = 10_000;

const SECOND_MS: Tick = 1_000;
const HALF_SECOND_MS: Tick = 500;

/// Callback invoked with the slice name and its new value.
pub type SliceWatcher = Arc<dyn Fn(&str, &SliceRef) + Send + Sync>;

/// Reads the tick implicit events should be aligned against, if any.
pub type AlignmentAnchor = fn(&GameStateStore) -> Option<Tick>;

/// Progress report for one processed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHandled {
    /// Id of the event just processed.
    pub event_id: EventId,
    /// Its tick.
    pub tick: Tick,
    /// Running count of processed events since the last reset.
    pub processed: u64,
    /// No implicit events are pending and nothing else is queued at this
    /// tick, so the state is a valid replay point.
    pub settled: bool,
}

/// Hook notified after each processed event.
pub trait ApplyObserver {
    /// Called once per processed event, after every reducer has run.
    fn event_handled(&mut self, state: &GameStateStore, handled: &EventHandled);
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ApplyObserver for NoopObserver {
    fn event_handled(&mut self, _state: &GameStateStore, _handled: &EventHandled) {}
}

/// A queued event with its root source.
#[derive(Debug)]
struct Queued {
    event: Event,
    source: Option<EventId>,
    implicit: bool,
    seq: u64,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // Reversed so the max-heap pops the smallest id first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .event
            .id
            .cmp(&self.event.id)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Id-ordered work queue for one apply call.
#[derive(Debug, Default)]
struct EventQueue {
    heap: BinaryHeap<Queued>,
    seq: u64,
    pending_implicit: usize,
    expanded: usize,
}

impl EventQueue {
    fn push(&mut self, event: Event, source: Option<EventId>, implicit: bool) {
        self.seq = self.seq.saturating_add(1);
        if implicit {
            self.pending_implicit = self.pending_implicit.saturating_add(1);
        }
        self.heap.push(Queued {
            event,
            source,
            implicit,
            seq: self.seq,
        });
    }

    fn requeue(&mut self, entry: Queued) {
        if entry.implicit {
            self.pending_implicit = self.pending_implicit.saturating_add(1);
        }
        self.heap.push(entry);
    }

    fn pop(&mut self) -> Option<Queued> {
        let entry = self.heap.pop()?;
        if entry.implicit {
            self.pending_implicit = self.pending_implicit.saturating_sub(1);
        }
        Some(entry)
    }

    fn next_tick(&self) -> Option<Tick> {
        self.heap.peek().map(|entry| entry.event.tick())
    }
}

/// Holds all state slices for one game and applies events to them.
pub struct GameStateStore {
    game_id: GameId,
    slices: BTreeMap<String, SliceRef>,
    pre_batch: Option<BTreeMap<String, SliceRef>>,
    watchers: HashMap<String, Vec<SliceWatcher>>,
    notifications_enabled: bool,
    alignment_anchor: Option<AlignmentAnchor>,
    max_implicit_events: usize,
    processed: u64,
    last_event_id: Option<EventId>,
    last_processed_id: Option<EventId>,
    current_tick: Option<Tick>,
    ticked_at: Option<Tick>,
}

impl GameStateStore {
    /// Create an empty store for `game_id`.
    pub fn new(game_id: GameId) -> Self {
        Self {
            game_id,
            slices: BTreeMap::new(),
            pre_batch: None,
            watchers: HashMap::new(),
            notifications_enabled: true,
            alignment_anchor: None,
            max_implicit_events: DEFAULT_MAX_IMPLICIT_EVENTS,
            processed: 0,
            last_event_id: None,
            last_processed_id: None,
            current_tick: None,
            ticked_at: None,
        }
    }

    /// Cap the implicit events one apply call may expand.
    #[must_use]
    pub const fn with_max_implicit_events(mut self, limit: usize) -> Self {
        self.max_implicit_events = limit;
        self
    }

    /// Install the function that reports the period clock's last start.
    pub fn set_alignment_anchor(&mut self, anchor: AlignmentAnchor) {
        self.alignment_anchor = Some(anchor);
    }

    /// The game this store belongs to.
    pub const fn game_id(&self) -> GameId {
        self.game_id
    }

    /// Events processed since the last reset.
    pub const fn processed(&self) -> u64 {
        self.processed
    }

    /// The most recently processed event that belongs to the log: an
    /// input event or an always-persisted one. Replays resume after it.
    pub const fn last_event_id(&self) -> Option<EventId> {
        self.last_event_id
    }

    /// The most recently processed event of any kind, implicit or not.
    pub const fn last_processed_id(&self) -> Option<EventId> {
        self.last_processed_id
    }

    /// Whether `event` can no longer be applied forward.
    ///
    /// That is the case once the state holds anything a replay would
    /// process after `event`: a later processed event, or tick handlers
    /// already run past its tick (or at it, since a replay only ticks up
    /// to the tick before an event).
    pub fn is_behind(&self, event: &Event) -> bool {
        let tick = event.tick();
        let clock_passed = self.current_tick.is_some_and(|current| {
            tick < current || (tick == current && self.ticked_at == Some(tick))
        });
        let sorts_earlier = |last: Option<EventId>| last.is_some_and(|last| event.id < last);
        clock_passed || sorts_earlier(self.last_event_id) || sorts_earlier(self.last_processed_id)
    }

    /// The tick state has been advanced to.
    pub const fn current_tick(&self) -> Option<Tick> {
        self.current_tick
    }

    // ---- reads ----

    /// Read an unkeyed slice.
    ///
    /// # Errors
    ///
    /// Fails if the slice is missing or holds another type.
    pub fn get_state<T: StateSlice>(&self) -> Result<&T, StateError> {
        Self::lookup(&self.slices, &slice_name::<T>(None))
    }

    /// Read a keyed slice.
    ///
    /// # Errors
    ///
    /// Fails if the slice is missing or holds another type.
    pub fn get_keyed_state<T: StateSlice>(&self, key: &str) -> Result<&T, StateError> {
        Self::lookup(&self.slices, &slice_name::<T>(Some(key)))
    }

    /// Read the pre-batch value of an unkeyed slice.
    ///
    /// # Errors
    ///
    /// Fails outside an apply call, or if the slice is missing.
    pub fn get_cached_state<T: StateSlice>(&self) -> Result<&T, StateError> {
        let cache = self.pre_batch.as_ref().ok_or(StateError::NoBatchInFlight)?;
        Self::lookup(cache, &slice_name::<T>(None))
    }

    /// Read the pre-batch value of a keyed slice.
    ///
    /// # Errors
    ///
    /// Fails outside an apply call, or if the slice is missing.
    pub fn get_cached_keyed_state<T: StateSlice>(&self, key: &str) -> Result<&T, StateError> {
        let cache = self.pre_batch.as_ref().ok_or(StateError::NoBatchInFlight)?;
        Self::lookup(cache, &slice_name::<T>(Some(key)))
    }

    fn lookup<'a, T: StateSlice>(
        slices: &'a BTreeMap<String, SliceRef>,
        name: &str,
    ) -> Result<&'a T, StateError> {
        let slice = slices.get(name).ok_or_else(|| StateError::Uninitialized {
            name: name.to_owned(),
        })?;
        slice
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| StateError::TypeMismatch {
                name: name.to_owned(),
                expected: T::NAME,
            })
    }

    /// Read any slice by its full name as JSON.
    ///
    /// # Errors
    ///
    /// Fails if the slice is missing or cannot be serialized.
    pub fn get_state_by_name(&self, name: &str) -> Result<serde_json::Value, StateError> {
        let slice = self.slices.get(name).ok_or_else(|| StateError::Uninitialized {
            name: name.to_owned(),
        })?;
        slice.to_json().map_err(|source| StateError::Serialization {
            name: name.to_owned(),
            source,
        })
    }

    /// Every slice as JSON, keyed by name.
    ///
    /// # Errors
    ///
    /// Fails if any slice cannot be serialized.
    pub fn snapshot_json(&self) -> Result<BTreeMap<String, serde_json::Value>, StateError> {
        self.slices
            .keys()
            .map(|name| Ok((name.clone(), self.get_state_by_name(name)?)))
            .collect()
    }

    /// Names of all initialized slices, sorted.
    pub fn slice_names(&self) -> Vec<String> {
        self.slices.keys().cloned().collect()
    }

    /// All slices, for keyframe capture.
    pub const fn slices(&self) -> &BTreeMap<String, SliceRef> {
        &self.slices
    }

    // ---- writes ----

    /// Replace an unkeyed slice.
    pub fn set_state<T: StateSlice>(&mut self, value: T) {
        self.set_slice(slice_name::<T>(None), slice_ref(value));
    }

    /// Replace a keyed slice.
    pub fn set_keyed_state<T: StateSlice>(&mut self, key: &str, value: T) {
        self.set_slice(slice_name::<T>(Some(key)), slice_ref(value));
    }

    /// Replace a slice by name, notifying watchers when it changed.
    pub fn set_slice(&mut self, name: String, value: SliceRef) {
        let changed = self
            .slices
            .get(&name)
            .is_none_or(|previous| !value.same_as(previous.as_ref()));
        if changed && self.notifications_enabled {
            self.notify(&name, &value);
        }
        self.slices.insert(name, value);
    }

    // ---- notifications ----

    /// Subscribe to changes of a typed slice.
    pub fn watch_state<T, F>(&mut self, key: Option<&str>, callback: F)
    where
        T: StateSlice,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let watcher: SliceWatcher = Arc::new(move |_: &str, value: &SliceRef| {
            if let Some(typed) = value.as_any().downcast_ref::<T>() {
                callback(typed);
            }
        });
        self.watchers
            .entry(slice_name::<T>(key))
            .or_default()
            .push(watcher);
    }

    /// Subscribe to changes of a slice by name; values arrive as JSON.
    pub fn watch_state_by_name<F>(&mut self, name: &str, callback: F)
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        let watcher: SliceWatcher = Arc::new(move |name: &str, value: &SliceRef| match value.to_json() {
            Ok(json) => callback(&json),
            Err(e) => warn!(slice = name, error = %e, "failed to serialize watched slice"),
        });
        self.watchers.entry(name.to_owned()).or_default().push(watcher);
    }

    /// Resume change notifications.
    pub const fn enable_notifications(&mut self) {
        self.notifications_enabled = true;
    }

    /// Suppress change notifications, e.g. during a reload.
    pub const fn disable_notifications(&mut self) {
        self.notifications_enabled = false;
    }

    /// Whether change notifications are currently delivered.
    pub const fn notifications_enabled(&self) -> bool {
        self.notifications_enabled
    }

    /// Notify every watcher once with the current value of its slice.
    pub fn force_notify(&self) {
        for (name, value) in &self.slices {
            self.notify(name, value);
        }
    }

    fn notify(&self, name: &str, value: &SliceRef) {
        if let Some(watchers) = self.watchers.get(name) {
            for watcher in watchers {
                watcher(name, value);
            }
        }
    }

    // ---- lifecycle ----

    /// Reset every declared slice to its default and forget replay progress.
    pub fn load_default_states(&mut self, reducers: &ReducerSet) {
        let previous = std::mem::take(&mut self.slices);
        for reducer in reducers.iter() {
            for (name, value) in reducer.default_states() {
                let changed = previous
                    .get(&name)
                    .is_none_or(|old| !value.same_as(old.as_ref()));
                if changed && self.notifications_enabled {
                    self.notify(&name, &value);
                }
                self.slices.insert(name, value);
            }
        }
        self.processed = 0;
        self.last_event_id = None;
        self.last_processed_id = None;
        self.current_tick = None;
        self.ticked_at = None;
    }

    /// Reset to defaults, then overwrite exactly the slices in `frame`.
    pub fn apply_key_frame(&mut self, reducers: &ReducerSet, frame: &KeyFrame) {
        self.load_default_states(reducers);
        for (name, value) in &frame.slices {
            self.set_slice(name.clone(), Arc::clone(value));
        }
        self.processed = frame.processed;
        self.last_event_id = frame.last_event_id;
        self.last_processed_id = frame.last_event_id;
        self.current_tick = Some(frame.tick);
    }

    // ---- applying ----

    /// Apply `events` (and everything they expand into) in id order.
    ///
    /// `root` tags the events as effects of an earlier root event.
    /// Returns the implicit events that must be written back to the store.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::ExpansionLimit`] if reducers keep producing
    /// implicit events past the configured cap.
    pub fn apply_events(
        &mut self,
        reducers: &mut ReducerSet,
        root: Option<EventId>,
        events: Vec<Event>,
    ) -> Result<Vec<Event>, StateError> {
        self.apply_events_observed(reducers, root, events, &mut NoopObserver)
    }

    /// [`apply_events`](Self::apply_events) with a progress observer.
    ///
    /// # Errors
    ///
    /// See [`apply_events`](Self::apply_events).
    pub fn apply_events_observed(
        &mut self,
        reducers: &mut ReducerSet,
        root: Option<EventId>,
        events: Vec<Event>,
        observer: &mut dyn ApplyObserver,
    ) -> Result<Vec<Event>, StateError> {
        let mut queue = EventQueue::default();
        for event in events {
            queue.push(event, root, false);
        }
        self.run_batch(reducers, queue, None, observer)
    }

    /// Run tick handlers up to `tick` and expand what they emit.
    ///
    /// Returns the always-persisted events produced on the way.
    ///
    /// # Errors
    ///
    /// See [`apply_events`](Self::apply_events).
    pub fn advance_to(
        &mut self,
        reducers: &mut ReducerSet,
        tick: Tick,
        observer: &mut dyn ApplyObserver,
    ) -> Result<Vec<Event>, StateError> {
        self.run_batch(reducers, EventQueue::default(), Some(tick), observer)
    }

    fn run_batch(
        &mut self,
        reducers: &mut ReducerSet,
        queue: EventQueue,
        catch_up: Option<Tick>,
        observer: &mut dyn ApplyObserver,
    ) -> Result<Vec<Event>, StateError> {
        let outermost = self.pre_batch.is_none();
        if outermost {
            self.pre_batch = Some(self.slices.clone());
        }
        let result = self.drain(reducers, queue, catch_up, observer);
        if outermost {
            self.pre_batch = None;
        }
        result
    }

    fn drain(
        &mut self,
        reducers: &mut ReducerSet,
        mut queue: EventQueue,
        catch_up: Option<Tick>,
        observer: &mut dyn ApplyObserver,
    ) -> Result<Vec<Event>, StateError> {
        let mut to_persist = Vec::new();

        loop {
            let Some(entry) = queue.pop() else {
                let Some(target) = catch_up else { break };
                if !self.should_tick(target) {
                    break;
                }
                let emitted = self.run_tick_handlers(reducers, target);
                if emitted.is_empty() {
                    break;
                }
                self.enqueue_implicit(&mut queue, &mut to_persist, emitted, None)?;
                continue;
            };

            let tick = entry.event.tick();
            let before = tick.saturating_sub(1);
            if self.should_tick(before) {
                let emitted = self.run_tick_handlers(reducers, before);
                if !emitted.is_empty() {
                    self.enqueue_implicit(&mut queue, &mut to_persist, emitted, None)?;
                    queue.requeue(entry);
                    continue;
                }
            }

            let mut children = Vec::new();
            for reducer in reducers.iter_mut() {
                match reducer.handle(self, &entry.event, entry.source) {
                    Ok(emitted) => children.extend(emitted),
                    Err(e) => error!(
                        game_id = %self.game_id,
                        event_id = %entry.event.id,
                        event_type = %entry.event.event_type(),
                        reducer = reducer.name(),
                        key = reducer.state_key().unwrap_or_default(),
                        error = %e,
                        "reducer failed to handle event, state may be invalid"
                    ),
                }
            }

            self.ticked_at = None;
            self.processed = self.processed.saturating_add(1);
            // Effects that replay regenerates never bound a replay.
            if !entry.implicit || entry.event.body.always_persisted() {
                self.last_event_id = Some(entry.event.id);
            }
            self.last_processed_id = Some(entry.event.id);
            self.current_tick = Some(tick);
            debug!(
                game_id = %self.game_id,
                event_id = %entry.event.id,
                event_type = %entry.event.event_type(),
                tick,
                implicit = entry.implicit,
                processed = self.processed,
                "event applied"
            );

            let root = entry.source.unwrap_or(entry.event.id);
            self.enqueue_implicit(&mut queue, &mut to_persist, children, Some(root))?;

            let handled = EventHandled {
                event_id: entry.event.id,
                tick,
                processed: self.processed,
                settled: queue.pending_implicit == 0
                    && queue.next_tick().is_none_or(|next| next > tick),
            };
            observer.event_handled(self, &handled);
        }

        Ok(to_persist)
    }

    /// Tick handlers run at most once per tick between events, and never
    /// move time backwards past the last processed event.
    fn should_tick(&self, tick: Tick) -> bool {
        self.ticked_at != Some(tick) && self.current_tick.is_none_or(|current| tick >= current)
    }

    fn run_tick_handlers(&mut self, reducers: &mut ReducerSet, tick: Tick) -> Vec<Event> {
        let delta = tick.saturating_sub(self.current_tick.unwrap_or(tick));
        self.current_tick = Some(tick);
        self.ticked_at = Some(tick);
        let clock = ClockTick { tick, delta };

        let mut emitted = Vec::new();
        for reducer in reducers.iter_mut() {
            if !reducer.reacts_to_ticks() {
                continue;
            }
            match reducer.tick(self, clock) {
                Ok(events) => emitted.extend(events),
                Err(e) => error!(
                    game_id = %self.game_id,
                    tick,
                    reducer = reducer.name(),
                    key = reducer.state_key().unwrap_or_default(),
                    error = %e,
                    "reducer failed to handle tick, state may be invalid"
                ),
            }
        }
        emitted
    }

    fn enqueue_implicit(
        &self,
        queue: &mut EventQueue,
        to_persist: &mut Vec<Event>,
        events: Vec<Event>,
        root: Option<EventId>,
    ) -> Result<(), StateError> {
        for mut event in events {
            queue.expanded = queue.expanded.saturating_add(1);
            if queue.expanded > self.max_implicit_events {
                error!(
                    game_id = %self.game_id,
                    limit = self.max_implicit_events,
                    "implicit event expansion limit reached"
                );
                return Err(StateError::ExpansionLimit {
                    limit: self.max_implicit_events,
                });
            }
            if event.body.aligns_to_period_clock() {
                event.id = self.align_event_id(event.id);
            }
            if event.body.always_persisted() {
                to_persist.push(event.clone());
                queue.push(event, None, true);
            } else {
                queue.push(event, root, true);
            }
        }
        Ok(())
    }

    /// Snap `id` to the nearest whole second of the running period clock.
    ///
    /// Returns `id` unchanged when no anchor is installed or the period
    /// clock is not running.
    pub fn align_event_id(&self, id: EventId) -> EventId {
        let Some(anchor) = self.alignment_anchor.and_then(|read| read(self)) else {
            return id;
        };
        let aligned = align_to_second(id.tick(), anchor);
        if aligned == id.tick() {
            return id;
        }
        match id.with_tick(aligned) {
            Ok(moved) => moved,
            Err(e) => {
                warn!(game_id = %self.game_id, event_id = %id, error = %e, "alignment skipped");
                id
            }
        }
    }
}

/// Round `tick` to the nearest whole second counted from `anchor`.
///
/// Exactly half a second rounds up. Ticks before the anchor are returned
/// unchanged.
pub fn align_to_second(tick: Tick, anchor: Tick) -> Tick {
    let Some(offset) = tick.checked_sub(anchor) else {
        return tick;
    };
    let remainder = offset % SECOND_MS;
    let floor = offset.saturating_sub(remainder);
    let rounded = if remainder >= HALF_SECOND_MS {
        floor.saturating_add(SECOND_MS)
    } else {
        floor
    };
    anchor.saturating_add(rounded)
}

impl fmt::Debug for GameStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameStateStore")
            .field("game_id", &self.game_id)
            .field("slices", &self.slices.keys().collect::<Vec<_>>())
            .field("notifications_enabled", &self.notifications_enabled)
            .field("processed", &self.processed)
            .field("last_event_id", &self.last_event_id)
            .field("last_processed_id", &self.last_processed_id)
            .field("current_tick", &self.current_tick)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing
)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use jamkeeper_types::EventBody;
    use serde::Serialize;

    use super::*;
    use crate::error::ReducerError;
    use crate::reducer::Reducer;
    use crate::slice::default_slice;

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Log {
        seen: Vec<String>,
        ticks: Vec<Tick>,
    }

    impl StateSlice for Log {
        const NAME: &'static str = "Log";

        fn unchanged_from(&self, previous: &Self) -> bool {
            self.seen == previous.seen
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Running {
        running: bool,
        started: Tick,
    }

    impl StateSlice for Running {
        const NAME: &'static str = "Running";
    }

    /// Records every event; a jam start emits an implicit jam end 100 ms
    /// later through the tick handler.
    struct Recorder;

    impl Reducer for Recorder {
        fn name(&self) -> &'static str {
            "Recorder"
        }

        fn default_states(&self) -> Vec<(String, SliceRef)> {
            vec![
                default_slice(
                    None,
                    Log {
                        seen: Vec::new(),
                        ticks: Vec::new(),
                    },
                ),
                default_slice(
                    None,
                    Running {
                        running: false,
                        started: 0,
                    },
                ),
            ]
        }

        fn handle(
            &mut self,
            state: &mut GameStateStore,
            event: &Event,
            _source: Option<EventId>,
        ) -> Result<Vec<Event>, ReducerError> {
            let mut log = state.get_state::<Log>()?.clone();
            log.seen
                .push(format!("{}@{}", event.event_type(), event.tick()));
            state.set_state(log);
            match event.body {
                EventBody::JamStarted => state.set_state(Running {
                    running: true,
                    started: event.tick(),
                }),
                EventBody::JamEnded => state.set_state(Running {
                    running: false,
                    started: 0,
                }),
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
            let mut log = state.get_state::<Log>()?.clone();
            log.ticks.push(clock.tick);
            state.set_state(log);
            let running = state.get_state::<Running>()?;
            let end = running.started + 100;
            if running.running && clock.tick >= end {
                return Ok(vec![Event::at_tick(end, EventBody::JamEnded)?]);
            }
            Ok(Vec::new())
        }
    }

    /// Always fails.
    struct Broken;

    impl Reducer for Broken {
        fn name(&self) -> &'static str {
            "Broken"
        }

        fn default_states(&self) -> Vec<(String, SliceRef)> {
            Vec::new()
        }

        fn handle(
            &mut self,
            _state: &mut GameStateStore,
            _event: &Event,
            _source: Option<EventId>,
        ) -> Result<Vec<Event>, ReducerError> {
            Err(ReducerError::Rejected {
                reason: "broken".to_owned(),
            })
        }
    }

    /// Emits a period end whenever it sees a jam end.
    struct Ender;

    impl Reducer for Ender {
        fn name(&self) -> &'static str {
            "Ender"
        }

        fn default_states(&self) -> Vec<(String, SliceRef)> {
            Vec::new()
        }

        fn handle(
            &mut self,
            _state: &mut GameStateStore,
            event: &Event,
            _source: Option<EventId>,
        ) -> Result<Vec<Event>, ReducerError> {
            if event.body == EventBody::JamEnded {
                return Ok(vec![Event::at_tick(event.tick(), EventBody::PeriodEnded)?]);
            }
            Ok(Vec::new())
        }
    }

    /// Answers every event with another event one tick later.
    struct Echo;

    impl Reducer for Echo {
        fn name(&self) -> &'static str {
            "Echo"
        }

        fn default_states(&self) -> Vec<(String, SliceRef)> {
            Vec::new()
        }

        fn handle(
            &mut self,
            _state: &mut GameStateStore,
            event: &Event,
            _source: Option<EventId>,
        ) -> Result<Vec<Event>, ReducerError> {
            Ok(vec![Event::at_tick(event.tick() + 1, EventBody::TimeoutEnded)?])
        }
    }

    fn set(reducers: Vec<Box<dyn Reducer>>) -> ReducerSet {
        ReducerSet::new(reducers).unwrap()
    }

    fn store(reducers: &ReducerSet) -> GameStateStore {
        let mut store = GameStateStore::new(GameId::new());
        store.load_default_states(reducers);
        store
    }

    fn ev(tick: Tick, body: EventBody) -> Event {
        Event::at_tick(tick, body).unwrap()
    }

    #[test]
    fn uninitialized_slice_is_an_error() {
        let store = GameStateStore::new(GameId::new());
        assert!(matches!(
            store.get_state::<Log>(),
            Err(StateError::Uninitialized { .. })
        ));
    }

    #[test]
    fn events_apply_in_id_order() {
        let mut reducers = set(vec![Box::new(Recorder)]);
        let mut store = store(&reducers);
        store
            .apply_events(
                &mut reducers,
                None,
                vec![ev(20, EventBody::TimeoutEnded), ev(10, EventBody::JamEnded)],
            )
            .unwrap();
        let log = store.get_state::<Log>().unwrap();
        assert_eq!(log.seen, vec!["JamEnded@10", "TimeoutEnded@20"]);
        assert_eq!(store.processed(), 2);
        assert_eq!(store.current_tick(), Some(20));
    }

    #[test]
    fn ticks_catch_up_before_each_event() {
        let mut reducers = set(vec![Box::new(Recorder)]);
        let mut store = store(&reducers);
        store
            .apply_events(
                &mut reducers,
                None,
                vec![
                    ev(0, EventBody::JamStarted),
                    ev(500, EventBody::TimeoutEnded),
                ],
            )
            .unwrap();
        let log = store.get_state::<Log>().unwrap();
        // The jam end generated at 100 lands before the later event.
        assert_eq!(
            log.seen,
            vec!["JamStarted@0", "JamEnded@100", "TimeoutEnded@500"]
        );
        assert!(!store.get_state::<Running>().unwrap().running);
    }

    #[test]
    fn advance_to_expands_tick_events() {
        let mut reducers = set(vec![Box::new(Recorder)]);
        let mut store = store(&reducers);
        store
            .apply_events(&mut reducers, None, vec![ev(0, EventBody::JamStarted)])
            .unwrap();
        store.advance_to(&mut reducers, 50, &mut NoopObserver).unwrap();
        assert!(store.get_state::<Running>().unwrap().running);
        store.advance_to(&mut reducers, 250, &mut NoopObserver).unwrap();
        assert!(!store.get_state::<Running>().unwrap().running);
        assert_eq!(store.current_tick(), Some(250));
    }

    #[test]
    fn events_behind_processed_state_are_detected() {
        let mut reducers = set(vec![Box::new(Recorder)]);
        let mut store = store(&reducers);
        store
            .apply_events(&mut reducers, None, vec![ev(0, EventBody::JamStarted)])
            .unwrap();
        assert!(!store.is_behind(&ev(50, EventBody::TimeoutEnded)));

        // The clock generates and applies the jam end at 100.
        store.advance_to(&mut reducers, 250, &mut NoopObserver).unwrap();
        assert_eq!(store.last_event_id().map(EventId::tick), Some(0));
        assert!(store.is_behind(&ev(150, EventBody::TimeoutEnded)));
        assert!(store.is_behind(&ev(250, EventBody::TimeoutEnded)));
        assert!(!store.is_behind(&ev(251, EventBody::TimeoutEnded)));

        // An event at the last processed tick is fine once no tick ran there.
        store
            .apply_events(&mut reducers, None, vec![ev(300, EventBody::TimeoutEnded)])
            .unwrap();
        let later = Event::new(
            EventId::from_parts(300, [0xFF; 10]).unwrap(),
            EventBody::TimeoutEnded,
        );
        assert!(!store.is_behind(&later));
        let earlier = Event::new(
            EventId::from_parts(300, [0x00; 10]).unwrap(),
            EventBody::TimeoutEnded,
        );
        assert!(store.is_behind(&earlier));
    }

    #[test]
    fn failing_reducer_is_isolated() {
        let mut reducers = set(vec![Box::new(Broken), Box::new(Recorder)]);
        let mut store = store(&reducers);
        store
            .apply_events(&mut reducers, None, vec![ev(5, EventBody::JamEnded)])
            .unwrap();
        assert_eq!(store.get_state::<Log>().unwrap().seen, vec!["JamEnded@5"]);
    }

    #[test]
    fn always_persisted_events_are_returned() {
        let mut reducers = set(vec![Box::new(Recorder), Box::new(Ender)]);
        let mut store = store(&reducers);
        let persist = store
            .apply_events(&mut reducers, None, vec![ev(5, EventBody::JamEnded)])
            .unwrap();
        assert_eq!(persist.len(), 1);
        assert_eq!(persist[0].body, EventBody::PeriodEnded);
        assert_eq!(
            store.get_state::<Log>().unwrap().seen,
            vec!["JamEnded@5", "PeriodEnded@5"]
        );
    }

    #[test]
    fn runaway_expansion_is_bounded() {
        let mut reducers = set(vec![Box::new(Echo)]);
        let mut store = GameStateStore::new(GameId::new()).with_max_implicit_events(10);
        store.load_default_states(&reducers);
        let result = store.apply_events(&mut reducers, None, vec![ev(0, EventBody::JamStarted)]);
        assert!(matches!(result, Err(StateError::ExpansionLimit { limit: 10 })));
        assert!(matches!(
            store.get_cached_state::<Log>(),
            Err(StateError::NoBatchInFlight)
        ));
    }

    #[test]
    fn unchanged_values_do_not_notify() {
        let reducers = set(vec![Box::new(Recorder)]);
        let mut store = store(&reducers);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        store.watch_state::<Log, _>(None, move |_| {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
        });

        let log = store.get_state::<Log>().unwrap().clone();
        store.set_state(log.clone());
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 0);

        let mut ticked = log.clone();
        ticked.ticks.push(1);
        store.set_state(ticked);
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 0);

        let mut changed = log;
        changed.seen.push("x".to_owned());
        store.set_state(changed);
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn disabled_notifications_then_force_notify() {
        let reducers = set(vec![Box::new(Recorder)]);
        let mut store = store(&reducers);
        let values = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&values);
        store.watch_state_by_name("Running", move |value| {
            sink.lock().unwrap().push(value["running"].clone());
        });

        store.disable_notifications();
        store.set_state(Running {
            running: true,
            started: 3,
        });
        assert!(values.lock().unwrap().is_empty());

        store.enable_notifications();
        store.force_notify();
        assert_eq!(*values.lock().unwrap(), vec![serde_json::json!(true)]);
    }

    #[test]
    fn name_based_reads() {
        let reducers = set(vec![Box::new(Recorder)]);
        let store = store(&reducers);
        assert_eq!(store.slice_names(), vec!["Log", "Running"]);
        let running = store.get_state_by_name("Running").unwrap();
        assert_eq!(running["running"], false);
        assert_eq!(store.snapshot_json().unwrap().len(), 2);
        assert!(store.get_state_by_name("Missing").is_err());
    }

    #[test]
    fn observer_sees_settled_points() {
        struct Collect(Vec<EventHandled>);
        impl ApplyObserver for Collect {
            fn event_handled(&mut self, _state: &GameStateStore, handled: &EventHandled) {
                self.0.push(*handled);
            }
        }

        let mut reducers = set(vec![Box::new(Recorder)]);
        let mut store = store(&reducers);
        let mut collect = Collect(Vec::new());
        store
            .apply_events_observed(
                &mut reducers,
                None,
                vec![
                    ev(10, EventBody::TimeoutEnded),
                    ev(10, EventBody::TimeoutEnded),
                    ev(20, EventBody::TimeoutEnded),
                ],
                &mut collect,
            )
            .unwrap();
        let settled: Vec<bool> = collect.0.iter().map(|h| h.settled).collect();
        assert_eq!(settled, vec![false, true, true]);
        assert_eq!(collect.0[2].processed, 3);
    }

    #[test]
    fn alignment_rounds_half_up() {
        assert_eq!(align_to_second(1_499, 0), 1_000);
        assert_eq!(align_to_second(1_500, 0), 2_000);
        assert_eq!(align_to_second(10_740, 250), 10_250);
        assert_eq!(align_to_second(100, 250), 100);
    }

    #[test]
    fn align_event_id_uses_anchor() {
        fn anchor(_: &GameStateStore) -> Option<Tick> {
            Some(250)
        }
        let mut store = GameStateStore::new(GameId::new());
        let id = EventId::from_tick(1_900).unwrap();
        assert_eq!(store.align_event_id(id), id);

        store.set_alignment_anchor(anchor);
        let aligned = store.align_event_id(id);
        assert_eq!(aligned.tick(), 2_250);
        assert_eq!(aligned.tail(), id.tail());
    }
}
