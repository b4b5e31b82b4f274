//! Aggregate root traits for event-sourced domain models.

/// Aggregate root marker + minimal interface.
///
/// This is intentionally small so domain modules can decide how they model
/// state transitions without bringing in any infrastructure concerns.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// For event-sourced aggregates this equals the number of events applied
    /// (the stream revision).
    fn version(&self) -> u64;
}

/// Event-sourced aggregate: decide (`handle`) and evolve (`apply`).
///
/// `handle` is pure: it inspects current state and either returns the events
/// the command produces or a domain error. It never mutates state and never
/// performs I/O. `apply` folds one event into state and bumps the version;
/// replaying a stream from version 1 rebuilds the aggregate deterministically.
pub trait Aggregate: AggregateRoot {
    type Command;
    type Event;
    type Error;

    /// Decide which events a command produces. No mutation, no I/O.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// Fold a single event into state (version += 1).
    fn apply(&mut self, event: &Self::Event);
}

/// Expected stream version for optimistic concurrency control.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// The stream must be at exactly this version (0 = no events yet).
    Exact(u64),
    /// Skip the concurrency check (rebuilds, migrations).
    Any,
}

impl ExpectedVersion {
    pub fn matches(&self, current: u64) -> bool {
        match self {
            ExpectedVersion::Exact(v) => *v == current,
            ExpectedVersion::Any => true,
        }
    }
}
