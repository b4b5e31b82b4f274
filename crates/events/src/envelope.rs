use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use flowra_core::{AggregateId, UserId};

/// Request-scoped metadata carried by every event.
///
/// `correlation_id` spans the logical request, `causation_id` is the id of the
/// message that directly produced this event, `user_id` is the acting user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub correlation_id: Uuid,
    pub causation_id: Uuid,
    pub user_id: UserId,
}

impl EventMetadata {
    pub fn new(correlation_id: Uuid, causation_id: Uuid, user_id: UserId) -> Self {
        Self {
            correlation_id,
            causation_id,
            user_id,
        }
    }
}

/// Envelope for an event, containing stream metadata.
///
/// An `EventEnvelope` wraps a domain event with the infrastructure metadata
/// needed for event sourcing. This is the unit of persistence and publication:
/// what the event store appends and what the bus fans out.
///
/// The envelope separates infrastructure concerns (identity, ordering,
/// tracing) from domain concerns (the payload). `version` is the 1-based,
/// strictly monotonic position in the aggregate stream; `(aggregate_id,
/// version)` is unique. Infrastructure typically carries
/// `EventEnvelope<serde_json::Value>` for schema flexibility, while domain
/// code works with typed event enums.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    event_type: String,

    aggregate_id: AggregateId,
    aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream (1-based).
    version: u64,

    occurred_at: DateTime<Utc>,
    metadata: EventMetadata,

    payload: E,
}

impl<E> EventEnvelope<E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: Uuid,
        event_type: impl Into<String>,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: u64,
        occurred_at: DateTime<Utc>,
        metadata: EventMetadata,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            event_type: event_type.into(),
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            occurred_at,
            metadata,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
