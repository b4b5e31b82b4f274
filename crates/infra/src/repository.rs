//! Event-sourced chat repository.
//!
//! Flow: load stream → validate ordering → rehydrate aggregate → (caller
//! decides) → append decided events + outbox entries atomically. The aggregate
//! never performs I/O; this module composes the store around it.

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use flowra_chat::{AGGREGATE_TYPE, Chat, ChatEvent, ChatId, is_known_event_type};
use flowra_core::{Aggregate, AggregateId, ExpectedVersion, RequestContext, UserId};
use flowra_events::EventMetadata;

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The stream has no events; at this boundary that means not found.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(AggregateId),

    /// Optimistic concurrency failure; the caller may retry from a fresh load.
    #[error("concurrent update: {0}")]
    Concurrency(String),

    /// A known event type failed to deserialize (corrupt stream).
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    #[error("event store failure: {0}")]
    Store(EventStoreError),
}

impl From<EventStoreError> for RepositoryError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => RepositoryError::Concurrency(msg),
            other => RepositoryError::Store(other),
        }
    }
}

/// A rehydrated aggregate plus the stream version it was loaded at.
///
/// The stream version is tracked separately from `chat.version()` so that
/// events skipped for forward compatibility cannot desync the optimistic
/// concurrency check.
#[derive(Debug, Clone)]
pub struct LoadedChat {
    pub chat: Chat,
    pub version: u64,
}

/// Replay a validated stream into an empty aggregate.
///
/// Unknown event types are skipped (debug-logged); known types that fail to
/// deserialize are surfaced as errors. Returns the aggregate and the stream
/// version.
pub fn rehydrate_chat(
    chat_id: ChatId,
    stream: &[StoredEvent],
) -> Result<LoadedChat, RepositoryError> {
    validate_stream(chat_id.0, stream)?;

    let mut chat = Chat::empty(chat_id);
    for stored in stream {
        if !is_known_event_type(&stored.event_type) {
            debug!(
                event_type = %stored.event_type,
                aggregate_id = %stored.aggregate_id,
                version = stored.version,
                "skipping unknown event type during replay"
            );
            continue;
        }
        let event: ChatEvent = serde_json::from_value(stored.payload.clone())
            .map_err(|e| RepositoryError::Deserialize(format!("{} v{}: {e}", stored.event_type, stored.version)))?;
        chat.apply(&event);
    }

    Ok(LoadedChat {
        chat,
        version: stream.last().map(|e| e.version).unwrap_or(0),
    })
}

fn validate_stream(aggregate_id: AggregateId, stream: &[StoredEvent]) -> Result<(), RepositoryError> {
    // Guard against buggy backends: wrong stream contents or broken ordering.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(RepositoryError::Store(EventStoreError::InvalidAppend(
                format!("loaded stream contains wrong aggregate_id at index {idx}"),
            )));
        }
        if e.version == 0 {
            return Err(RepositoryError::Store(EventStoreError::InvalidAppend(
                "stored event has version=0".to_string(),
            )));
        }
        if e.version <= last {
            return Err(RepositoryError::Store(EventStoreError::InvalidAppend(
                format!(
                    "non-monotonic version in loaded stream (last={last}, found={})",
                    e.version
                ),
            )));
        }
        last = e.version;
    }
    Ok(())
}

/// Repository over the chat aggregate's event streams.
#[derive(Debug)]
pub struct ChatRepository<S> {
    store: S,
}

impl<S> ChatRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S> ChatRepository<S>
where
    S: EventStore,
{
    /// Load and rehydrate a chat. Empty stream → `AggregateNotFound`.
    pub fn load(&self, chat_id: ChatId) -> Result<LoadedChat, RepositoryError> {
        let stream = self.store.load_stream(chat_id.0)?;
        if stream.is_empty() {
            return Err(RepositoryError::AggregateNotFound(chat_id.0));
        }
        rehydrate_chat(chat_id, &stream)
    }

    /// Append decided events, co-persisting outbox entries.
    ///
    /// Event metadata is drawn from the request context; an absent user id is
    /// recorded as nil. Versions are assigned `expected_version + 1 …` and
    /// double-checked by the store.
    pub fn save(
        &self,
        ctx: &RequestContext,
        chat_id: ChatId,
        events: &[ChatEvent],
        expected_version: u64,
    ) -> Result<Vec<StoredEvent>, RepositoryError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let metadata = EventMetadata::new(
            ctx.correlation_id(),
            ctx.causation_id(),
            ctx.user_id().unwrap_or_else(|_| UserId::nil()),
        );

        let uncommitted = events
            .iter()
            .enumerate()
            .map(|(i, ev)| {
                UncommittedEvent::from_typed(
                    chat_id.0,
                    AGGREGATE_TYPE,
                    expected_version + 1 + i as u64,
                    Uuid::now_v7(),
                    metadata.clone(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self
            .store
            .append(uncommitted, ExpectedVersion::Exact(expected_version))?;

        Ok(committed)
    }
}
