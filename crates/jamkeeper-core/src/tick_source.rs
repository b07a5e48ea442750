//! Where the current tick comes from.
//!
//! Live games read the wall clock. Tests and offline replay drive a
//! [`ManualTickSource`] so clock behaviour is deterministic.

use std::sync::atomic::{AtomicU64, Ordering};

use jamkeeper_types::Tick;

/// Supplies the current tick in milliseconds.
pub trait TickSource: Send + Sync {
    /// The current tick.
    fn now(&self) -> Tick;
}

/// Wall-clock milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTickSource;

impl TickSource for SystemTickSource {
    fn now(&self) -> Tick {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// A tick source that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualTickSource {
    tick: AtomicU64,
}

impl ManualTickSource {
    /// Start at `tick`.
    pub const fn new(tick: Tick) -> Self {
        Self {
            tick: AtomicU64::new(tick),
        }
    }

    /// Jump to `tick`.
    pub fn set(&self, tick: Tick) {
        self.tick.store(tick, Ordering::SeqCst);
    }

    /// Move forward by `delta` and return the new tick.
    pub fn advance(&self, delta: Tick) -> Tick {
        let previous = self
            .tick
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |tick| {
                Some(tick.saturating_add(delta))
            })
            .unwrap_or_else(|tick| tick);
        previous.saturating_add(delta)
    }
}

impl TickSource for ManualTickSource {
    fn now(&self) -> Tick {
        self.tick.load(Ordering::SeqCst)
    }
}
