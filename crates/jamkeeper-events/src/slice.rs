//! State slices: named, immutable pieces of derived game state.
//!
//! Each slice type implements [`StateSlice`]. The store keeps slices behind
//! [`SliceRef`] (an `Arc` of the type-erased [`ErasedSlice`]) so a slice is
//! replaced, never mutated, and keyframes can share unchanged slices.
//!
//! Keyed slices (one per team, for example) are stored as
//! `"<NAME>_<key>"`, e.g. `TeamScoreState_Home`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// A typed state slice.
pub trait StateSlice: Any + Clone + PartialEq + Serialize + Send + Sync + fmt::Debug {
    /// Base slice name. Keyed slices append `_<key>`.
    const NAME: &'static str;

    /// Whether replacing `previous` with `self` is a no-op for observers.
    ///
    /// The default is structural equality (sequences compare element-wise).
    /// Slices override this to skip bookkeeping fields that change without
    /// anything visible changing.
    fn unchanged_from(&self, previous: &Self) -> bool {
        self == previous
    }
}

/// Object-safe view of a [`StateSlice`].
pub trait ErasedSlice: Any + Send + Sync + fmt::Debug {
    /// Upcast for downcasting to the concrete slice type.
    fn as_any(&self) -> &dyn Any;

    /// The base name of the slice type.
    fn slice_type(&self) -> &'static str;

    /// Change detection against another slice; different types never match.
    fn same_as(&self, previous: &dyn ErasedSlice) -> bool;

    /// JSON form for name-based readers.
    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error>;
}

impl<T: StateSlice> ErasedSlice for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn slice_type(&self) -> &'static str {
        T::NAME
    }

    fn same_as(&self, previous: &dyn ErasedSlice) -> bool {
        previous
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|prev| StateSlice::unchanged_from(self, prev))
    }

    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Shared handle to an immutable slice value.
pub type SliceRef = Arc<dyn ErasedSlice>;

/// Wrap a slice value for storage.
pub fn slice_ref<T: StateSlice>(value: T) -> SliceRef {
    Arc::new(value)
}

/// Storage name of a slice, with an optional key suffix.
pub fn slice_name<T: StateSlice>(key: Option<&str>) -> String {
    match key {
        Some(key) => format!("{}_{key}", T::NAME),
        None => T::NAME.to_owned(),
    }
}

/// Named default value, as declared by a reducer.
pub fn default_slice<T: StateSlice>(key: Option<&str>, value: T) -> (String, SliceRef) {
    (slice_name::<T>(key), slice_ref(value))
}
