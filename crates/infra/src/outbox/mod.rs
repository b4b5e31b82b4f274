//! Transactional outbox: "to be published" records co-persisted with domain
//! writes, so downstream delivery survives crashes.
//!
//! Delivery is at-least-once: an entry may be published more than once if the
//! process dies between publish and `mark_processed`, so subscribers must be
//! idempotent.

mod in_memory;

pub use in_memory::InMemoryOutbox;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use flowra_core::AggregateId;

use crate::event_store::StoredEvent;

/// One outbox record. Pending iff `processed_at` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub event_id: Uuid,
    pub event_type: String,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Opaque payload: the serialized event envelope.
    pub payload: JsonValue,

    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl OutboxEntry {
    /// Build an entry for a freshly appended event.
    pub fn from_stored(event: &StoredEvent) -> Result<Self, OutboxError> {
        let payload = serde_json::to_value(event.to_envelope())
            .map_err(|e| OutboxError::Storage(format!("envelope serialization failed: {e}")))?;

        Ok(Self {
            id: Uuid::now_v7(),
            event_id: event.event_id,
            event_type: event.event_type.clone(),
            aggregate_id: event.aggregate_id,
            aggregate_type: event.aggregate_type.clone(),
            payload,
            created_at: Utc::now(),
            processed_at: None,
            retry_count: 0,
            last_error: None,
        })
    }

    pub fn is_pending(&self) -> bool {
        self.processed_at.is_none()
    }
}

/// Outbox health snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutboxStats {
    pub pending: usize,
    pub oldest_pending_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Error)]
pub enum OutboxError {
    #[error("outbox entry not found: {0}")]
    NotFound(Uuid),

    #[error("outbox entry already processed: {0}")]
    AlreadyProcessed(Uuid),

    #[error("outbox storage error: {0}")]
    Storage(String),
}

/// Transactional outbox contract.
pub trait Outbox: Send + Sync {
    /// Insert one entry. Called by the event store inside its append.
    fn add(&self, entry: OutboxEntry) -> Result<(), OutboxError>;

    /// Insert a batch of entries (all-or-nothing).
    fn add_batch(&self, entries: Vec<OutboxEntry>) -> Result<(), OutboxError>;

    /// Up to `batch_size` pending entries, oldest first.
    fn poll(&self, batch_size: usize) -> Result<Vec<OutboxEntry>, OutboxError>;

    /// Terminal success transition for a polled entry.
    fn mark_processed(&self, id: Uuid) -> Result<(), OutboxError>;

    /// Record a publish failure; the entry stays pending for retry.
    fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), OutboxError>;

    /// Remove an entry (dead-letter move), returning it.
    fn remove(&self, id: Uuid) -> Result<OutboxEntry, OutboxError>;

    /// Delete processed entries older than the cutoff. Never touches pending
    /// entries. Returns the number removed.
    fn cleanup(&self, older_than: DateTime<Utc>) -> Result<usize, OutboxError>;

    fn pending_count(&self) -> Result<usize, OutboxError>;

    fn stats(&self) -> Result<OutboxStats, OutboxError>;
}

impl<O> Outbox for Arc<O>
where
    O: Outbox + ?Sized,
{
    fn add(&self, entry: OutboxEntry) -> Result<(), OutboxError> {
        (**self).add(entry)
    }

    fn add_batch(&self, entries: Vec<OutboxEntry>) -> Result<(), OutboxError> {
        (**self).add_batch(entries)
    }

    fn poll(&self, batch_size: usize) -> Result<Vec<OutboxEntry>, OutboxError> {
        (**self).poll(batch_size)
    }

    fn mark_processed(&self, id: Uuid) -> Result<(), OutboxError> {
        (**self).mark_processed(id)
    }

    fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), OutboxError> {
        (**self).mark_failed(id, error)
    }

    fn remove(&self, id: Uuid) -> Result<OutboxEntry, OutboxError> {
        (**self).remove(id)
    }

    fn cleanup(&self, older_than: DateTime<Utc>) -> Result<usize, OutboxError> {
        (**self).cleanup(older_than)
    }

    fn pending_count(&self) -> Result<usize, OutboxError> {
        (**self).pending_count()
    }

    fn stats(&self) -> Result<OutboxStats, OutboxError> {
        (**self).stats()
    }
}
