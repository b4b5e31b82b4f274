use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use flowra_core::{AggregateId, ExpectedVersion};

use super::store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
use crate::outbox::{Outbox, OutboxEntry};

/// In-memory append-only event store.
///
/// Intended for tests/dev. Not optimized for performance. When constructed
/// with an outbox, every appended event gets a matching outbox entry inside
/// the same append: all validation and outbox insertion happen before the
/// stream is mutated, so a partial append is never observable.
#[derive(Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<AggregateId, Vec<StoredEvent>>>,
    outbox: Option<Arc<dyn Outbox>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that co-persists outbox entries with every append.
    pub fn with_outbox(outbox: Arc<dyn Outbox>) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            outbox: Some(outbox),
        }
    }

    fn stream_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.version).unwrap_or(0)
    }
}

impl core::fmt::Debug for InMemoryEventStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryEventStore")
            .field("has_outbox", &self.outbox.is_some())
            .finish_non_exhaustive()
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        // All events must target the same aggregate stream.
        let aggregate_id = events[0].aggregate_id;
        let aggregate_type = events[0].aggregate_type.clone();

        for (idx, e) in events.iter().enumerate() {
            if e.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if e.aggregate_type != aggregate_type {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        let stream = streams.entry(aggregate_id).or_default();
        let current = Self::stream_version(stream);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        // Enforce aggregate type stability across the stream.
        if let Some(existing) = stream.first() {
            if existing.aggregate_type != aggregate_type {
                return Err(EventStoreError::InvalidAppend(format!(
                    "stream aggregate_type is '{}', attempted append with '{}'",
                    existing.aggregate_type, aggregate_type
                )));
            }
        }

        // Carried versions must line up with the positions they land at.
        let mut next = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            if e.version != next {
                return Err(EventStoreError::InvalidVersion(format!(
                    "event '{}' carries version {}, stream position is {next}",
                    e.event_type, e.version
                )));
            }
            committed.push(StoredEvent {
                event_id: e.event_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                version: e.version,
                event_type: e.event_type,
                schema_version: e.schema_version,
                occurred_at: e.occurred_at,
                metadata: e.metadata,
                payload: e.payload,
            });
            next += 1;
        }

        // Insert outbox entries before touching the stream, still under the
        // stream lock: if this fails, nothing was appended.
        if let Some(outbox) = &self.outbox {
            let entries = committed
                .iter()
                .map(OutboxEntry::from_stored)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| EventStoreError::Outbox(e.to_string()))?;
            outbox
                .add_batch(entries)
                .map_err(|e| EventStoreError::Outbox(e.to_string()))?;
        }

        stream.extend(committed.iter().cloned());

        Ok(committed)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        Ok(streams.get(&aggregate_id).cloned().unwrap_or_default())
    }

    fn current_version(&self, aggregate_id: AggregateId) -> Result<u64, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        Ok(streams
            .get(&aggregate_id)
            .map(|s| Self::stream_version(s))
            .unwrap_or(0))
    }

    fn aggregate_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        let mut ids: Vec<AggregateId> = streams
            .iter()
            .filter(|(_, stream)| {
                stream
                    .first()
                    .is_some_and(|e| e.aggregate_type == aggregate_type)
            })
            .map(|(id, _)| *id)
            .collect();

        // Deterministic enumeration order for rebuilds.
        ids.sort_by_key(|id| *id.as_uuid().as_bytes());
        Ok(ids)
    }
}
