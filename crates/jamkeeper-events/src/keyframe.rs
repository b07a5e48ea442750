//! Keyframes: full-state snapshots that bound replay cost.
//!
//! A [`KeyFrame`] shares slice values with the live store (slices are
//! immutable `Arc`s), so capturing one is a map clone, not a deep copy.
//! [`KeyFrameService`] captures frames every `interval` processed events,
//! but only at settled points where the state equals a full replay through
//! the frame's tick.

use std::collections::BTreeMap;
use std::sync::Arc;

use jamkeeper_types::{EventId, Tick};
use tracing::{debug, warn};

use crate::slice::SliceRef;
use crate::store::{ApplyObserver, EventHandled, GameStateStore};

/// Default number of processed events between captures.
pub const DEFAULT_KEYFRAME_INTERVAL: u64 = 50;

/// Default number of retained frames.
pub const DEFAULT_MAX_KEYFRAMES: usize = 256;

/// Snapshot of every slice at a tick.
#[derive(Debug, Clone)]
pub struct KeyFrame {
    /// Tick the snapshot was taken at.
    pub tick: Tick,
    /// Last event applied before the snapshot. Replay resumes after it.
    pub last_event_id: Option<EventId>,
    /// Processed-event count at capture.
    pub processed: u64,
    /// Every slice, by name.
    pub slices: BTreeMap<String, SliceRef>,
}

impl KeyFrame {
    /// Snapshot `state` as of `tick`.
    pub fn capture(state: &GameStateStore, tick: Tick) -> Self {
        Self {
            tick,
            last_event_id: state.last_event_id(),
            processed: state.processed(),
            slices: state.slices().clone(),
        }
    }
}

/// Tick-indexed keyframe store for one game.
#[derive(Debug)]
pub struct KeyFrameService {
    frames: BTreeMap<Tick, Arc<KeyFrame>>,
    interval: u64,
    max_frames: usize,
    since_last: u64,
}

impl Default for KeyFrameService {
    fn default() -> Self {
        Self::new(DEFAULT_KEYFRAME_INTERVAL, DEFAULT_MAX_KEYFRAMES)
    }
}

impl KeyFrameService {
    /// Capture every `interval` events, keeping at most `max_frames`.
    pub fn new(interval: u64, max_frames: usize) -> Self {
        Self {
            frames: BTreeMap::new(),
            interval: interval.max(1),
            max_frames: max_frames.max(1),
            since_last: 0,
        }
    }

    /// Snapshot at the tick of the last applied event.
    ///
    /// Returns `None` before any event has been applied.
    pub fn capture_key_frame(&mut self, state: &GameStateStore) -> Option<Arc<KeyFrame>> {
        let tick = state.last_event_id()?.tick();
        Some(self.capture_key_frame_at_tick(state, tick))
    }

    /// Snapshot at `tick`. An existing frame at that tick is kept as is.
    pub fn capture_key_frame_at_tick(
        &mut self,
        state: &GameStateStore,
        tick: Tick,
    ) -> Arc<KeyFrame> {
        if let Some(existing) = self.frames.get(&tick) {
            return Arc::clone(existing);
        }
        let frame = Arc::new(KeyFrame::capture(state, tick));
        self.frames.insert(tick, Arc::clone(&frame));
        self.since_last = 0;
        debug!(game_id = %state.game_id(), tick, frames = self.frames.len(), "keyframe captured");

        while self.frames.len() > self.max_frames {
            if let Some((evicted, _)) = self.frames.pop_first() {
                warn!(game_id = %state.game_id(), tick = evicted, "keyframe evicted");
            }
        }
        frame
    }

    /// Most recent frame strictly before `tick`.
    pub fn get_key_frame_before(&self, tick: Tick) -> Option<Arc<KeyFrame>> {
        self.frames
            .range(..tick)
            .next_back()
            .map(|(_, frame)| Arc::clone(frame))
    }

    /// Drop every frame at or after `tick`.
    pub fn clear_frames_after(&mut self, tick: Tick) {
        let _ = self.frames.split_off(&tick);
    }

    /// Drop every frame.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.since_last = 0;
    }

    /// Restart the capture cadence, e.g. after a reload.
    pub const fn reset_cadence(&mut self) {
        self.since_last = 0;
    }

    /// The newest frame.
    pub fn latest(&self) -> Option<Arc<KeyFrame>> {
        self.frames.last_key_value().map(|(_, frame)| Arc::clone(frame))
    }

    /// Number of retained frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frame is retained.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl ApplyObserver for KeyFrameService {
    fn event_handled(&mut self, state: &GameStateStore, handled: &EventHandled) {
        self.since_last = self.since_last.saturating_add(1);
        if handled.settled && self.since_last >= self.interval {
            self.capture_key_frame_at_tick(state, handled.tick);
        }
    }
}
