//! Repair queue: aggregates whose read models diverged and need a rebuild.
//!
//! The read-model sync checker enqueues divergent aggregate ids; a worker
//! drains the queue calling the projector. Divergence between stores is
//! thereby bounded by the checker interval plus queue latency.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use flowra_chat::ChatId;
use flowra_core::AggregateId;

use crate::event_store::EventStore;
use crate::projections::ChatProjector;
use crate::read_model::{ChatDocument, DocumentStore};
use crate::workers::WorkerHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairTaskStatus {
    Pending,
    InFlight,
    Repaired,
    Failed,
}

/// One scheduled rebuild.
#[derive(Debug, Clone)]
pub struct RepairTask {
    pub aggregate_id: AggregateId,
    pub status: RepairTaskStatus,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Repair queue statistics for health checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairStats {
    pub pending: usize,
    pub in_flight: usize,
    pub repaired: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Error)]
pub enum RepairError {
    #[error("repair task not found: {0}")]
    NotFound(AggregateId),

    #[error("repair queue storage error: {0}")]
    Storage(String),
}

/// Durable list of aggregate ids awaiting a rebuild.
pub trait RepairQueue: Send + Sync {
    /// Schedule a rebuild. Deduplicates against tasks already waiting.
    fn enqueue(&self, aggregate_id: AggregateId) -> Result<(), RepairError>;

    /// Claim the oldest pending task, marking it in-flight.
    fn claim_next(&self) -> Result<Option<RepairTask>, RepairError>;

    fn mark_repaired(&self, aggregate_id: AggregateId) -> Result<(), RepairError>;

    fn mark_failed(&self, aggregate_id: AggregateId, error: &str) -> Result<(), RepairError>;

    fn stats(&self) -> Result<RepairStats, RepairError>;
}

impl<Q> RepairQueue for Arc<Q>
where
    Q: RepairQueue + ?Sized,
{
    fn enqueue(&self, aggregate_id: AggregateId) -> Result<(), RepairError> {
        (**self).enqueue(aggregate_id)
    }

    fn claim_next(&self) -> Result<Option<RepairTask>, RepairError> {
        (**self).claim_next()
    }

    fn mark_repaired(&self, aggregate_id: AggregateId) -> Result<(), RepairError> {
        (**self).mark_repaired(aggregate_id)
    }

    fn mark_failed(&self, aggregate_id: AggregateId, error: &str) -> Result<(), RepairError> {
        (**self).mark_failed(aggregate_id, error)
    }

    fn stats(&self) -> Result<RepairStats, RepairError> {
        (**self).stats()
    }
}

/// In-memory repair queue for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryRepairQueue {
    tasks: RwLock<Vec<RepairTask>>,
}

impl InMemoryRepairQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_err() -> RepairError {
        RepairError::Storage("lock poisoned".to_string())
    }
}

impl RepairQueue for InMemoryRepairQueue {
    fn enqueue(&self, aggregate_id: AggregateId) -> Result<(), RepairError> {
        let mut tasks = self.tasks.write().map_err(|_| Self::lock_err())?;
        let waiting = tasks.iter().any(|t| {
            t.aggregate_id == aggregate_id
                && matches!(t.status, RepairTaskStatus::Pending | RepairTaskStatus::InFlight)
        });
        if waiting {
            return Ok(());
        }
        tasks.push(RepairTask {
            aggregate_id,
            status: RepairTaskStatus::Pending,
            enqueued_at: Utc::now(),
            attempts: 0,
            last_error: None,
        });
        Ok(())
    }

    fn claim_next(&self) -> Result<Option<RepairTask>, RepairError> {
        let mut tasks = self.tasks.write().map_err(|_| Self::lock_err())?;
        let next = tasks
            .iter_mut()
            .filter(|t| t.status == RepairTaskStatus::Pending)
            .min_by_key(|t| t.enqueued_at);

        Ok(next.map(|task| {
            task.status = RepairTaskStatus::InFlight;
            task.attempts += 1;
            task.clone()
        }))
    }

    fn mark_repaired(&self, aggregate_id: AggregateId) -> Result<(), RepairError> {
        let mut tasks = self.tasks.write().map_err(|_| Self::lock_err())?;
        let task = tasks
            .iter_mut()
            .find(|t| t.aggregate_id == aggregate_id && t.status == RepairTaskStatus::InFlight)
            .ok_or(RepairError::NotFound(aggregate_id))?;
        task.status = RepairTaskStatus::Repaired;
        Ok(())
    }

    fn mark_failed(&self, aggregate_id: AggregateId, error: &str) -> Result<(), RepairError> {
        let mut tasks = self.tasks.write().map_err(|_| Self::lock_err())?;
        let task = tasks
            .iter_mut()
            .find(|t| t.aggregate_id == aggregate_id && t.status == RepairTaskStatus::InFlight)
            .ok_or(RepairError::NotFound(aggregate_id))?;
        task.status = RepairTaskStatus::Failed;
        task.last_error = Some(error.to_string());
        Ok(())
    }

    fn stats(&self) -> Result<RepairStats, RepairError> {
        let tasks = self.tasks.read().map_err(|_| Self::lock_err())?;
        let mut stats = RepairStats::default();
        for t in tasks.iter() {
            match t.status {
                RepairTaskStatus::Pending => stats.pending += 1,
                RepairTaskStatus::InFlight => stats.in_flight += 1,
                RepairTaskStatus::Repaired => stats.repaired += 1,
                RepairTaskStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}

/// Worker draining the repair queue into projector rebuilds.
#[derive(Debug)]
pub struct RepairWorker;

impl RepairWorker {
    pub fn spawn<Q, S, D>(
        queue: Q,
        projector: Arc<ChatProjector<S, D>>,
        poll_interval: Duration,
    ) -> WorkerHandle
    where
        Q: RepairQueue + 'static,
        S: EventStore + Send + Sync + 'static,
        D: DocumentStore<ChatId, ChatDocument> + Send + Sync + 'static,
    {
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();

        let join = std::thread::Builder::new()
            .name("repair-worker".to_string())
            .spawn(move || {
                loop {
                    match queue.claim_next() {
                        Ok(Some(task)) => {
                            let chat_id = ChatId::new(task.aggregate_id);
                            let outcome = match projector.rebuild_one(chat_id) {
                                Ok(_) => {
                                    info!(aggregate_id = %task.aggregate_id, "read model repaired");
                                    queue.mark_repaired(task.aggregate_id)
                                }
                                Err(err) => {
                                    warn!(aggregate_id = %task.aggregate_id, error = %err, "repair rebuild failed");
                                    queue.mark_failed(task.aggregate_id, &err.to_string())
                                }
                            };
                            if let Err(err) = outcome {
                                warn!(error = %err, "repair bookkeeping failed");
                            }
                            // Keep draining without sleeping while work remains.
                            continue;
                        }
                        Ok(None) => {}
                        Err(err) => warn!(error = %err, "repair queue poll failed"),
                    }

                    match shutdown_rx.recv_timeout(poll_interval) {
                        Ok(()) | Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                        Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                    }
                }
            })
            .expect("failed to spawn repair worker thread");

        WorkerHandle::new(shutdown_tx, join)
    }
}
