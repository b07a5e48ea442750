//! Type-safe identifier wrappers around [`Uuid`].
//!
//! [`GameId`] is an opaque identifier for one game. [`EventId`] is a
//! time-ordered identifier: the first six bytes carry the event tick
//! (milliseconds, big-endian) and the remaining ten bytes are random apart
//! from the UUID version and variant bits. Because [`Uuid`] orders by its
//! bytes, sorting event ids sorts events by tick, and every id is still a
//! syntactically valid UUID that an external store can keep as-is.
//!
//! Two ids minted in the same millisecond differ only in their random tail.
//! There is no collision detection; ~74 usable random bits make a clash
//! within one game vanishingly unlikely.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Millisecond timestamp used both as wall-clock reference and event order.
pub type Tick = u64;

/// Largest tick representable in the 48-bit tick field of an [`EventId`].
pub const MAX_TICK: Tick = 0x0000_FFFF_FFFF_FFFF;

/// Version nibble written into byte 6 (UUID version 7, time-ordered).
const VERSION_BITS: u8 = 0x70;

/// Variant bits written into byte 8 (RFC 4122 variant).
const VARIANT_BITS: u8 = 0x80;

/// Errors that can occur when building identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The tick does not fit the 48-bit field of an event id.
    #[error("tick {tick} exceeds the 48-bit event id range")]
    TickOutOfRange {
        /// The rejected tick.
        tick: Tick,
    },
}

/// Unique identifier for a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GameId(pub Uuid);

impl GameId {
    /// Create a new game identifier using UUID v7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for GameId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for GameId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for GameId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Time-ordered event identifier. Doubles as primary key and sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct EventId(Uuid);

impl EventId {
    /// Mint a new id for `tick` with a random tail.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::TickOutOfRange`] if `tick` exceeds [`MAX_TICK`].
    pub fn from_tick(tick: Tick) -> Result<Self, IdError> {
        let mut tail = [0_u8; 10];
        rand::rng().fill_bytes(&mut tail);
        Self::from_parts(tick, tail)
    }

    /// Build an id from a tick and an explicit ten-byte tail.
    ///
    /// The version and variant bits inside the tail are overwritten so the
    /// result is always a valid version 7 UUID.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::TickOutOfRange`] if `tick` exceeds [`MAX_TICK`].
    pub const fn from_parts(tick: Tick, tail: [u8; 10]) -> Result<Self, IdError> {
        if tick > MAX_TICK {
            return Err(IdError::TickOutOfRange { tick });
        }
        let [_, _, t0, t1, t2, t3, t4, t5] = tick.to_be_bytes();
        let [r0, r1, r2, r3, r4, r5, r6, r7, r8, r9] = tail;
        Ok(Self(Uuid::from_bytes([
            t0,
            t1,
            t2,
            t3,
            t4,
            t5,
            (r0 & 0x0F) | VERSION_BITS,
            r1,
            (r2 & 0x3F) | VARIANT_BITS,
            r3,
            r4,
            r5,
            r6,
            r7,
            r8,
            r9,
        ])))
    }

    /// The tick embedded in this id.
    pub const fn tick(self) -> Tick {
        let [t0, t1, t2, t3, t4, t5, ..] = *self.0.as_bytes();
        u64::from_be_bytes([0, 0, t0, t1, t2, t3, t4, t5])
    }

    /// The ten bytes following the tick field.
    pub const fn tail(self) -> [u8; 10] {
        let [_, _, _, _, _, _, r0, r1, r2, r3, r4, r5, r6, r7, r8, r9] = *self.0.as_bytes();
        [r0, r1, r2, r3, r4, r5, r6, r7, r8, r9]
    }

    /// Same random tail, different tick.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::TickOutOfRange`] if `tick` exceeds [`MAX_TICK`].
    pub const fn with_tick(self, tick: Tick) -> Result<Self, IdError> {
        Self::from_parts(tick, self.tail())
    }

    /// Raw 128-bit value.
    pub const fn as_u128(self) -> u128 {
        self.0.as_u128()
    }

    /// Rebuild an id from its raw 128-bit value.
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl core::fmt::Display for EventId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<EventId> for Uuid {
    fn from(id: EventId) -> Self {
        id.0
    }
}
