use chrono::{DateTime, Utc};

/// A domain-agnostic event trait for event-sourced aggregates.
///
/// Events are facts that happened in the domain: immutable, append-only, and
/// replayable. They must own all their data (`'static`) and cross thread
/// boundaries freely, since the bus and projection workers run concurrently.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "chat.created").
    ///
    /// Used for routing, filtering and deserialization of historical events.
    /// Never change it once events of this type have been stored; use dot
    /// notation (`{aggregate}.{action}`) to avoid collisions.
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    ///
    /// Starts at 1 and only ever increases. When an event's structure changes,
    /// bump the version and keep deserializing the old shape until historical
    /// events are migrated or deprecated.
    fn schema_version(&self) -> u32;

    /// When the event occurred (business time, not persistence time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
