use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use flowra_core::{AggregateId, ExpectedVersion};
use flowra_events::{EventEnvelope, EventMetadata};

/// An event ready to be appended to a stream.
///
/// The `version` is assigned by the command pipeline (`expected + 1 …`), and
/// the store rejects any batch whose carried versions do not line up with the
/// stream positions it would assign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// 1-based target position in the aggregate stream.
    pub version: u64,

    pub event_type: String,
    pub schema_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub metadata: EventMetadata,

    pub payload: JsonValue,
}

/// A stored event in an append-only stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream (1-based).
    pub version: u64,

    pub event_type: String,
    pub schema_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub metadata: EventMetadata,

    pub payload: JsonValue,
}

impl StoredEvent {
    /// Convert a stored event into an envelope for publication.
    pub fn to_envelope(&self) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            self.event_id,
            self.event_type.clone(),
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.version,
            self.occurred_at,
            self.metadata.clone(),
            self.payload.clone(),
        )
    }
}

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("carried event version does not match stream position: {0}")]
    InvalidVersion(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("outbox co-persistence failed: {0}")]
    Outbox(String),
}

/// Append-only event store.
///
/// - **No storage assumptions** (works for in-memory tests/dev and future SQL
///   backends behind the same contract)
/// - **Optimistic locking** via `ExpectedVersion`
/// - **Transactional outbox**: appended events and their outbox entries are
///   co-persisted; a partial append is never observable
pub trait EventStore: Send + Sync {
    /// Append events to an aggregate stream (append-only).
    ///
    /// Implementations must:
    /// - enforce optimistic concurrency against the current stream version
    /// - verify each event's carried `version` equals the position it lands at
    ///   (`expected + 1 ..= expected + n`)
    /// - insert one outbox entry per appended event in the same transaction
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load the full stream for an aggregate, ascending by version.
    ///
    /// Unknown aggregates yield an empty vec, not an error; repository helpers
    /// translate empty into their own not-found.
    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Highest committed version for an aggregate (0 if none).
    fn current_version(&self, aggregate_id: AggregateId) -> Result<u64, EventStoreError>;

    /// Distinct aggregate IDs with at least one event of the given type.
    fn aggregate_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(events, expected_version)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(aggregate_id)
    }

    fn current_version(&self, aggregate_id: AggregateId) -> Result<u64, EventStoreError> {
        (**self).current_version(aggregate_id)
    }

    fn aggregate_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>, EventStoreError> {
        (**self).aggregate_ids(aggregate_type)
    }
}

impl UncommittedEvent {
    /// Convenience constructor from a typed event.
    ///
    /// Keeps infra decoupled from the domain while capturing the event
    /// metadata needed for future deserialization.
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: u64,
        event_id: Uuid,
        metadata: EventMetadata,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: flowra_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            event_type: event.event_type().to_string(),
            schema_version: event.schema_version(),
            occurred_at: event.occurred_at(),
            metadata,
            payload,
        })
    }
}
