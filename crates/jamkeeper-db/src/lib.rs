//! Event store layer for the Jamkeeper game engine.
//!
//! The engine treats event storage as an external collaborator behind the
//! [`EventStore`] trait. [`InMemoryEventStore`] implements it for tests,
//! demos, and single-process deployments; a durable backend implements the
//! same trait.
//!
//! # Modules
//!
//! - [`event_store`] -- The [`EventStore`] trait
//! - [`memory`] -- [`InMemoryEventStore`] with snapshot transactions
//! - [`error`] -- [`StoreError`]

pub mod error;
pub mod event_store;
pub mod memory;

pub use error::StoreError;
pub use event_store::EventStore;
pub use memory::InMemoryEventStore;
