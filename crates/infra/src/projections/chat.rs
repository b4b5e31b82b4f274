use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, info};

use flowra_chat::{AGGREGATE_TYPE, ChatId};
use flowra_core::AggregateId;
use flowra_events::EventEnvelope;

use crate::event_store::{EventStore, EventStoreError};
use crate::read_model::{ChatDocument, DocumentStore};
use crate::repository::{RepositoryError, rehydrate_chat};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("aggregate not found: {0}")]
    AggregateNotFound(AggregateId),

    #[error("failed to rehydrate aggregate {0}: {1}")]
    Rehydrate(AggregateId, String),

    #[error("event store failure: {0}")]
    Store(#[from] EventStoreError),

    #[error("rebuild finished with {failed} of {total} aggregates failing")]
    RebuildAll { failed: usize, total: usize },
}

/// Outcome of a full rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildSummary {
    pub rebuilt: usize,
    pub failed: usize,
}

/// Chat read-model projector.
///
/// Incremental updates take the rebuild-on-event path: replay cost is bounded
/// by aggregate size, and it removes the ordering bugs incremental patch code
/// is prone to. Re-delivery is therefore naturally idempotent. This projector
/// is the only writer to its document collection.
#[derive(Debug)]
pub struct ChatProjector<S, D> {
    store: S,
    documents: D,
}

impl<S, D> ChatProjector<S, D>
where
    S: EventStore,
    D: DocumentStore<ChatId, ChatDocument>,
{
    pub fn new(store: S, documents: D) -> Self {
        Self { store, documents }
    }

    pub fn documents(&self) -> &D {
        &self.documents
    }

    /// Replay one aggregate from its events and upsert the document.
    ///
    /// Idempotent: replaying the same stream produces the same document.
    /// Message counters maintained by the message projections survive the
    /// full-document replace.
    pub fn rebuild_one(&self, chat_id: ChatId) -> Result<ChatDocument, ProjectionError> {
        let stream = self.store.load_stream(chat_id.0)?;
        if stream.is_empty() {
            return Err(ProjectionError::AggregateNotFound(chat_id.0));
        }

        let loaded = rehydrate_chat(chat_id, &stream).map_err(|e| match e {
            RepositoryError::AggregateNotFound(id) => ProjectionError::AggregateNotFound(id),
            other => ProjectionError::Rehydrate(chat_id.0, other.to_string()),
        })?;

        let mut document = ChatDocument::project(&loaded.chat, loaded.version);
        if let Some(existing) = self.documents.get(&chat_id) {
            document.last_message_at = existing.last_message_at;
            document.message_count = existing.message_count;
        }

        self.documents.upsert(chat_id, document.clone());
        Ok(document)
    }

    /// Rebuild every chat document, continuing past individual failures.
    pub fn rebuild_all(&self) -> Result<RebuildSummary, ProjectionError> {
        let ids = self.store.aggregate_ids(AGGREGATE_TYPE)?;
        let total = ids.len();
        let mut summary = RebuildSummary::default();

        for id in ids {
            match self.rebuild_one(ChatId::new(id)) {
                Ok(_) => summary.rebuilt += 1,
                Err(err) => {
                    summary.failed += 1;
                    error!(aggregate_id = %id, error = %err, "chat rebuild failed");
                }
            }
        }

        info!(rebuilt = summary.rebuilt, failed = summary.failed, "chat rebuild pass finished");

        if summary.failed > 0 {
            return Err(ProjectionError::RebuildAll {
                failed: summary.failed,
                total,
            });
        }
        Ok(summary)
    }

    /// Incremental path: rebuild the aggregate the envelope belongs to.
    ///
    /// Envelopes for other aggregate types are ignored.
    pub fn process_event(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE {
            return Ok(());
        }
        self.rebuild_one(ChatId::new(envelope.aggregate_id()))?;
        Ok(())
    }

    /// Compare the stored document against a fresh replay of the events.
    ///
    /// A missing document while the stream has events is inconsistent.
    pub fn verify_consistency(&self, chat_id: ChatId) -> Result<bool, ProjectionError> {
        let stream = self.store.load_stream(chat_id.0)?;
        if stream.is_empty() {
            return Err(ProjectionError::AggregateNotFound(chat_id.0));
        }

        let loaded = rehydrate_chat(chat_id, &stream).map_err(|e| match e {
            RepositoryError::AggregateNotFound(id) => ProjectionError::AggregateNotFound(id),
            other => ProjectionError::Rehydrate(chat_id.0, other.to_string()),
        })?;
        let expected = ChatDocument::project(&loaded.chat, loaded.version);

        match self.documents.get(&chat_id) {
            Some(stored) => Ok(expected.matches_projection(&stored)),
            None => Ok(false),
        }
    }
}
