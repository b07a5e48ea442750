//! Shared type definitions for the Jamkeeper game engine.
//!
//! This crate is the single source of truth for identifiers and the event
//! vocabulary used across the workspace. Types flow downstream to
//! `TypeScript` via `ts-rs` for scoreboard and operator UIs.
//!
//! # Modules
//!
//! - [`ids`] -- [`GameId`] and the time-ordered [`EventId`]
//! - [`enums`] -- Teams, timeout callers, skater positions, event types
//! - [`event`] -- [`Event`] and its typed [`EventBody`]

pub mod enums;
pub mod event;
pub mod ids;

// Re-export all public types at crate root for convenience.
pub use enums::{EventType, SkaterPosition, TeamSide, TimeoutCaller};
pub use event::{Event, EventBody};
pub use ids::{EventId, GameId, IdError, MAX_TICK, Tick};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation.

    #[test]
    fn export_bindings() {
        use ts_rs::TS;

        let _ = crate::ids::GameId::export_all();
        let _ = crate::ids::EventId::export_all();
        let _ = crate::enums::TeamSide::export_all();
        let _ = crate::enums::TimeoutCaller::export_all();
        let _ = crate::enums::SkaterPosition::export_all();
        let _ = crate::enums::EventType::export_all();
        let _ = crate::event::EventBody::export_all();
    }
}
