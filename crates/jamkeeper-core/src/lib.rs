//! Game clock, event bus, and per-game context orchestration for Jamkeeper.
//!
//! This crate wires the replay core (`jamkeeper-events`) to an event store
//! (`jamkeeper-db`) and a source of time. It owns one context per loaded
//! game and serialises every change to that game behind a single lock.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `jamkeeper.yaml` into
//!   strongly-typed structs.
//! - [`tick_source`] -- [`TickSource`] trait, wall-clock and manual sources.
//! - [`runtime`] -- [`GameRuntime`]: one game's state, reducers, and
//!   keyframes, plus reload and keyframe integration.
//! - [`clock`] -- [`GameClock`], the realtime tick loop.
//! - [`context`] -- [`GameContextFactory`], lazily building one
//!   [`GameContext`] per game.
//! - [`event_bus`] -- [`EventBus`], the add/move/replace/offset/remove API.

pub mod clock;
pub mod config;
pub mod context;
pub mod event_bus;
pub mod runtime;
pub mod tick_source;

pub use clock::GameClock;
pub use config::{ConfigError, EngineConfig, LogFormat, LoggingConfig, ReplayConfig};
pub use context::{ContextError, GameContext, GameContextFactory};
pub use event_bus::{AddOutcome, BusError, EventBus};
pub use runtime::{GameRuntime, ReplayError, persist_generated};
pub use tick_source::{ManualTickSource, SystemTickSource, TickSource};
