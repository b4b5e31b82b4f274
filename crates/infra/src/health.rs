//! Health checkers over the asynchronous machinery.
//!
//! Each checker reports a point-in-time `HealthStatus`; the read-model sync
//! checker additionally feeds the repair queue so divergence between the event
//! store and the projections stays bounded.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use flowra_chat::{AGGREGATE_TYPE, ChatId};
use flowra_core::RequestContext;

use crate::event_store::EventStore;
use crate::outbox::Outbox;
use crate::publisher::DeadLetterQueue;
use crate::read_model::{ChatDocument, DocumentStore};
use crate::repair::RepairQueue;

/// Point-in-time health report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: String,
    pub details: BTreeMap<String, String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthStatus {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            healthy: true,
            message: message.into(),
            details: BTreeMap::new(),
            checked_at: Utc::now(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: message.into(),
            details: BTreeMap::new(),
            checked_at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }
}

/// A named health check.
pub trait HealthChecker: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, ctx: &RequestContext) -> HealthStatus;
}

/// Outbox backlog: healthy while the pending count stays under the threshold.
pub struct OutboxBacklogChecker {
    outbox: Arc<dyn Outbox>,
    warn_threshold: usize,
}

impl OutboxBacklogChecker {
    pub fn new(outbox: Arc<dyn Outbox>, warn_threshold: usize) -> Self {
        Self {
            outbox,
            warn_threshold,
        }
    }
}

impl HealthChecker for OutboxBacklogChecker {
    fn name(&self) -> &str {
        "outbox_backlog"
    }

    fn check(&self, _ctx: &RequestContext) -> HealthStatus {
        let stats = match self.outbox.stats() {
            Ok(stats) => stats,
            Err(err) => {
                return HealthStatus::unhealthy(format!("outbox unavailable: {err}"));
            }
        };

        let oldest_age_secs = stats
            .oldest_pending_at
            .map(|at| (Utc::now() - at).num_seconds().max(0))
            .unwrap_or(0);

        let status = if stats.pending < self.warn_threshold {
            HealthStatus::healthy(format!("{} pending entries", stats.pending))
        } else {
            HealthStatus::unhealthy(format!(
                "outbox backlog at {} entries (threshold {})",
                stats.pending, self.warn_threshold
            ))
        };

        status
            .with_detail("pending", stats.pending)
            .with_detail("oldest_pending_age_secs", oldest_age_secs)
    }
}

/// Dead-letter queue: healthy iff empty.
pub struct DeadLetterChecker {
    dead_letters: Arc<DeadLetterQueue>,
}

impl DeadLetterChecker {
    pub fn new(dead_letters: Arc<DeadLetterQueue>) -> Self {
        Self { dead_letters }
    }
}

impl HealthChecker for DeadLetterChecker {
    fn name(&self) -> &str {
        "dead_letter_queue"
    }

    fn check(&self, _ctx: &RequestContext) -> HealthStatus {
        let len = self.dead_letters.len();
        let status = if len == 0 {
            HealthStatus::healthy("no dead letters")
        } else {
            HealthStatus::unhealthy(format!("{len} undeliverable entries"))
        };
        status.with_detail("dead_letters", len)
    }
}

/// Repair queue: healthy while backlog is small and nothing has failed.
pub struct RepairQueueChecker {
    queue: Arc<dyn RepairQueue>,
    warn_threshold: usize,
}

impl RepairQueueChecker {
    pub fn new(queue: Arc<dyn RepairQueue>, warn_threshold: usize) -> Self {
        Self {
            queue,
            warn_threshold,
        }
    }
}

impl HealthChecker for RepairQueueChecker {
    fn name(&self) -> &str {
        "repair_queue"
    }

    fn check(&self, _ctx: &RequestContext) -> HealthStatus {
        let stats = match self.queue.stats() {
            Ok(stats) => stats,
            Err(err) => {
                return HealthStatus::unhealthy(format!("repair queue unavailable: {err}"));
            }
        };

        let status = if stats.failed > 0 {
            HealthStatus::unhealthy(format!("{} repairs failed", stats.failed))
        } else if stats.pending >= self.warn_threshold {
            HealthStatus::unhealthy(format!(
                "repair backlog at {} (threshold {})",
                stats.pending, self.warn_threshold
            ))
        } else {
            HealthStatus::healthy("repair queue draining normally")
        };

        status
            .with_detail("pending", stats.pending)
            .with_detail("in_flight", stats.in_flight)
            .with_detail("failed", stats.failed)
            .with_detail("repaired", stats.repaired)
    }
}

/// Read-model sync: samples chat streams and compares versions against the
/// projected documents. Divergent aggregates are queued for repair.
pub struct ReadModelSyncChecker<S, D> {
    store: S,
    documents: D,
    repair_queue: Arc<dyn RepairQueue>,
    sample_size: usize,
}

impl<S, D> ReadModelSyncChecker<S, D>
where
    S: EventStore,
    D: DocumentStore<ChatId, ChatDocument>,
{
    pub fn new(store: S, documents: D, repair_queue: Arc<dyn RepairQueue>, sample_size: usize) -> Self {
        Self {
            store,
            documents,
            repair_queue,
            sample_size,
        }
    }
}

impl<S, D> HealthChecker for ReadModelSyncChecker<S, D>
where
    S: EventStore,
    D: DocumentStore<ChatId, ChatDocument>,
{
    fn name(&self) -> &str {
        "read_model_sync"
    }

    fn check(&self, ctx: &RequestContext) -> HealthStatus {
        if ctx.ensure_active().is_err() {
            return HealthStatus::unhealthy("check aborted: request no longer active");
        }

        let ids = match self.store.aggregate_ids(AGGREGATE_TYPE) {
            Ok(ids) => ids,
            Err(err) => {
                return HealthStatus::unhealthy(format!("event store unavailable: {err}"));
            }
        };

        let mut sampled = 0usize;
        let mut divergent = 0usize;
        for id in ids.into_iter().take(self.sample_size) {
            sampled += 1;
            let store_version = match self.store.current_version(id) {
                Ok(v) => v,
                Err(err) => {
                    return HealthStatus::unhealthy(format!("event store unavailable: {err}"));
                }
            };
            let doc_version = self.documents.get(&ChatId::new(id)).map(|d| d.version);

            if doc_version != Some(store_version) {
                divergent += 1;
                if let Err(err) = self.repair_queue.enqueue(id) {
                    return HealthStatus::unhealthy(format!("repair enqueue failed: {err}"));
                }
            }
        }

        let status = if divergent == 0 {
            HealthStatus::healthy(format!("{sampled} sampled aggregates in sync"))
        } else {
            HealthStatus::unhealthy(format!(
                "{divergent} of {sampled} sampled aggregates diverged; repairs queued"
            ))
        };

        status
            .with_detail("sampled", sampled)
            .with_detail("divergent", divergent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;
    use crate::outbox::{InMemoryOutbox, OutboxEntry};
    use crate::projections::ChatProjector;
    use crate::read_model::InMemoryDocumentStore;
    use crate::repair::{InMemoryRepairQueue, RepairQueue};
    use crate::repository::ChatRepository;
    use chrono::Utc;
    use flowra_chat::{Chat, ChatCommand, CreateChat};
    use flowra_core::{Aggregate, AggregateId, UserId, WorkspaceId};
    use serde_json::json;
    use uuid::Uuid;

    fn ctx() -> RequestContext {
        RequestContext::new()
    }

    fn pending_entry() -> OutboxEntry {
        OutboxEntry {
            id: Uuid::now_v7(),
            event_id: Uuid::now_v7(),
            event_type: "chat.created".to_string(),
            aggregate_id: AggregateId::new(),
            aggregate_type: "chat".to_string(),
            payload: json!({}),
            created_at: Utc::now(),
            processed_at: None,
            retry_count: 0,
            last_error: None,
        }
    }

    #[test]
    fn outbox_checker_flags_backlog() {
        let outbox = Arc::new(InMemoryOutbox::new());
        let checker = OutboxBacklogChecker::new(outbox.clone(), 2);

        assert!(checker.check(&ctx()).healthy);

        outbox.add(pending_entry()).unwrap();
        outbox.add(pending_entry()).unwrap();
        let status = checker.check(&ctx());
        assert!(!status.healthy);
        assert_eq!(status.details.get("pending").unwrap(), "2");
    }

    #[test]
    fn dead_letter_checker_is_healthy_iff_empty() {
        let dlq = Arc::new(DeadLetterQueue::new());
        let checker = DeadLetterChecker::new(dlq.clone());

        assert!(checker.check(&ctx()).healthy);

        dlq.push(pending_entry(), "undeliverable");
        assert!(!checker.check(&ctx()).healthy);
    }

    #[test]
    fn repair_checker_flags_failures() {
        let queue = Arc::new(InMemoryRepairQueue::new());
        let checker = RepairQueueChecker::new(queue.clone(), 10);

        assert!(checker.check(&ctx()).healthy);

        let id = AggregateId::new();
        queue.enqueue(id).unwrap();
        let task = queue.claim_next().unwrap().unwrap();
        queue.mark_failed(task.aggregate_id, "boom").unwrap();

        let status = checker.check(&ctx());
        assert!(!status.healthy);
        assert_eq!(status.details.get("failed").unwrap(), "1");
    }

    #[test]
    fn sync_checker_enqueues_divergent_aggregates() {
        let store = Arc::new(InMemoryEventStore::new());
        let documents = Arc::new(InMemoryDocumentStore::new());
        let repo = ChatRepository::new(store.clone());
        let projector = ChatProjector::new(store.clone(), documents.clone());
        let queue = Arc::new(InMemoryRepairQueue::new());

        let chat_id = flowra_chat::ChatId::new(AggregateId::new());
        let creator = UserId::new();
        let chat = Chat::empty(chat_id);
        let events = chat
            .handle(&ChatCommand::CreateChat(CreateChat {
                chat_id,
                workspace_id: WorkspaceId::new(),
                is_public: true,
                created_by: creator,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        repo.save(&RequestContext::new().with_user(creator), chat_id, &events, 0)
            .unwrap();

        let checker = ReadModelSyncChecker::new(store.clone(), documents.clone(), queue.clone(), 16);

        // No document yet: divergent, repair queued.
        let status = checker.check(&ctx());
        assert!(!status.healthy);
        assert_eq!(queue.stats().unwrap().pending, 1);

        // Drain the repair and re-check.
        let task = queue.claim_next().unwrap().unwrap();
        projector.rebuild_one(chat_id).unwrap();
        queue.mark_repaired(task.aggregate_id).unwrap();

        let status = checker.check(&ctx());
        assert!(status.healthy, "{}", status.message);
        assert_eq!(queue.stats().unwrap().pending, 0);
    }
}
