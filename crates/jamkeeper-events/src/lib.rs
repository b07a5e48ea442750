//! Deterministic replay core for the Jamkeeper game engine.
//!
//! Game state is derived, never stored: every slice is the result of
//! replaying a game's ordered event log through a dependency-ordered set of
//! reducers. This crate holds the machinery that makes that replay
//! deterministic and cheap to redo after an edit.
//!
//! # Modules
//!
//! - [`slice`] -- Typed, immutable state slices and their type-erased form
//! - [`reducer`] -- The [`Reducer`] trait, [`ReducerSet`] validation, and
//!   the per-game [`ReducerRegistry`]
//! - [`store`] -- [`GameStateStore`] and the id-ordered apply loop
//! - [`keyframe`] -- [`KeyFrame`] snapshots and the [`KeyFrameService`]
//! - [`error`] -- Error types for the replay core

pub mod error;
pub mod keyframe;
pub mod reducer;
pub mod slice;
pub mod store;

pub use error::{ReducerError, ReducerGraphError, StateError};
pub use keyframe::{KeyFrame, KeyFrameService};
pub use reducer::{ClockTick, Reducer, ReducerFactory, ReducerRegistry, ReducerSet};
pub use slice::{ErasedSlice, SliceRef, StateSlice, default_slice, slice_name, slice_ref};
pub use store::{
    AlignmentAnchor, ApplyObserver, EventHandled, GameStateStore, NoopObserver, SliceWatcher,
    align_to_second,
};
