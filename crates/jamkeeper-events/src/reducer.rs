//! The reducer abstraction and validated reducer compositions.
//!
//! A [`Reducer`] owns one or more state slices and the rules for how they
//! change. It is a transition function over the [`GameStateStore`]:
//! given an event it updates its slices and may return implicit events,
//! which the store feeds back into the same id-ordered pass.
//!
//! Reducers declare the reducer types they read from. [`ReducerSet::new`]
//! rejects missing dependencies and cycles, then orders reducers so that
//! every reducer runs after everything it depends on, for every event.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use jamkeeper_types::{Event, EventId, GameId, Tick};

use crate::error::{ReducerError, ReducerGraphError};
use crate::slice::SliceRef;
use crate::store::{AlignmentAnchor, GameStateStore};

/// Current time as seen by tick-reactive reducers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockTick {
    /// The tick being advanced to.
    pub tick: Tick,
    /// Milliseconds since the previous tick call (0 when time moved back).
    pub delta: Tick,
}

/// Unit of derived state and the rules for changing it.
pub trait Reducer: Send {
    /// Reducer type name. Dependencies refer to reducers by this name, and
    /// keyed instances of one reducer share it.
    fn name(&self) -> &'static str;

    /// Key of the slices this instance owns, for keyed reducers.
    fn state_key(&self) -> Option<&str> {
        None
    }

    /// Reducer types whose slices this reducer reads.
    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    /// The slices this reducer owns, with their default values.
    fn default_states(&self) -> Vec<(String, SliceRef)>;

    /// Apply `event`. `source` is the root event that caused it, if it is
    /// an implicit event. Returns implicit events to process in this pass.
    fn handle(
        &mut self,
        state: &mut GameStateStore,
        event: &Event,
        source: Option<EventId>,
    ) -> Result<Vec<Event>, ReducerError>;

    /// Whether [`tick`](Self::tick) should be called.
    fn reacts_to_ticks(&self) -> bool {
        false
    }

    /// Advance time-derived state to `clock.tick`.
    fn tick(
        &mut self,
        state: &mut GameStateStore,
        clock: ClockTick,
    ) -> Result<Vec<Event>, ReducerError> {
        let _ = (state, clock);
        Ok(Vec::new())
    }
}

/// A validated, dependency-ordered set of reducers for one game.
pub struct ReducerSet {
    reducers: Vec<Box<dyn Reducer>>,
}

impl ReducerSet {
    /// Validate and topologically sort `reducers`.
    ///
    /// Ties are broken by registration order so the resulting order is
    /// deterministic.
    ///
    /// # Errors
    ///
    /// Returns [`ReducerGraphError`] if a dependency is missing, the graph
    /// has a cycle, or two reducers claim the same slice.
    pub fn new(mut reducers: Vec<Box<dyn Reducer>>) -> Result<Self, ReducerGraphError> {
        let mut owned = HashSet::new();
        for reducer in &reducers {
            for (slice, _) in reducer.default_states() {
                if !owned.insert(slice.clone()) {
                    return Err(ReducerGraphError::DuplicateSlice { slice });
                }
            }
        }

        // Distinct reducer types in registration order.
        let mut types: Vec<&'static str> = Vec::new();
        for reducer in &reducers {
            if !types.contains(&reducer.name()) {
                types.push(reducer.name());
            }
        }
        let index: HashMap<&'static str, usize> =
            types.iter().enumerate().map(|(i, name)| (*name, i)).collect();

        let mut edges: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); types.len()];
        let mut waiting_on: Vec<usize> = vec![0; types.len()];
        for reducer in &reducers {
            let Some(&this) = index.get(reducer.name()) else {
                continue;
            };
            for dependency in reducer.dependencies() {
                let Some(&dep) = index.get(dependency) else {
                    return Err(ReducerGraphError::MissingDependency {
                        reducer: reducer.name().to_owned(),
                        dependency: (*dependency).to_owned(),
                    });
                };
                let inserted = edges.get_mut(dep).is_some_and(|out| out.insert(this));
                if inserted && let Some(count) = waiting_on.get_mut(this) {
                    *count = count.saturating_add(1);
                }
            }
        }

        let mut ready: BTreeSet<usize> = waiting_on
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(i, _)| i)
            .collect();
        let mut rank: HashMap<&'static str, usize> = HashMap::new();
        while let Some(next) = ready.pop_first() {
            if let Some(name) = types.get(next) {
                rank.insert(*name, rank.len());
            }
            for &dependent in edges.get(next).into_iter().flatten() {
                if let Some(count) = waiting_on.get_mut(dependent) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if rank.len() < types.len() {
            let mut stuck: Vec<String> = types
                .iter()
                .filter(|name| !rank.contains_key(*name))
                .map(|name| (*name).to_owned())
                .collect();
            stuck.sort();
            return Err(ReducerGraphError::Cycle { reducers: stuck });
        }

        reducers.sort_by_key(|reducer| rank.get(reducer.name()).copied().unwrap_or(usize::MAX));
        Ok(Self { reducers })
    }

    /// Reducers in dependency order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Reducer> {
        self.reducers
            .iter()
            .map(|reducer| &**reducer as &dyn Reducer)
    }

    /// Mutable reducers in dependency order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Reducer>> {
        self.reducers.iter_mut()
    }

    /// Reducer names in execution order, keyed instances as `Name_key`.
    pub fn names(&self) -> Vec<String> {
        self.reducers
            .iter()
            .map(|r| match r.state_key() {
                Some(key) => format!("{}_{key}", r.name()),
                None => r.name().to_owned(),
            })
            .collect()
    }

    /// Number of reducer instances.
    pub fn len(&self) -> usize {
        self.reducers.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.reducers.is_empty()
    }
}

impl fmt::Debug for ReducerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReducerSet")
            .field("reducers", &self.names())
            .finish()
    }
}

/// Builds the reducer instances of one reducer type for a game.
pub type ReducerFactory = Arc<dyn Fn(GameId) -> Vec<Box<dyn Reducer>> + Send + Sync>;

/// The reducer factories a game context is built from, plus the anchor
/// implicit events align against.
#[derive(Clone, Default)]
pub struct ReducerRegistry {
    factories: Vec<ReducerFactory>,
    alignment_anchor: Option<AlignmentAnchor>,
}

impl ReducerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory.
    #[must_use]
    pub fn with<F>(mut self, factory: F) -> Self
    where
        F: Fn(GameId) -> Vec<Box<dyn Reducer>> + Send + Sync + 'static,
    {
        self.factories.push(Arc::new(factory));
        self
    }

    /// Set the period-clock anchor installed on every game's state store.
    #[must_use]
    pub fn with_alignment_anchor(mut self, anchor: AlignmentAnchor) -> Self {
        self.alignment_anchor = Some(anchor);
        self
    }

    /// The configured alignment anchor.
    pub fn alignment_anchor(&self) -> Option<AlignmentAnchor> {
        self.alignment_anchor
    }

    /// Instantiate every factory for `game_id` and validate the result.
    ///
    /// # Errors
    ///
    /// Returns [`ReducerGraphError`] if the composed set is invalid.
    pub fn build(&self, game_id: GameId) -> Result<ReducerSet, ReducerGraphError> {
        let reducers = self
            .factories
            .iter()
            .flat_map(|factory| factory(game_id))
            .collect();
        ReducerSet::new(reducers)
    }

    /// Number of registered factories.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether no factory is registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for ReducerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReducerRegistry")
            .field("factories", &self.factories.len())
            .field("aligned", &self.alignment_anchor.is_some())
            .finish()
    }
}
