//! Outbox publisher: drains pending outbox entries to the event bus.
//!
//! Delivery is at-least-once. A publish failure marks the entry failed but
//! leaves it pending; once the retry threshold is exhausted the entry moves to
//! the dead-letter queue, where it stays visible to health checks instead of
//! being silently dropped.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use flowra_events::{EventBus, EventEnvelope};

use crate::outbox::{Outbox, OutboxEntry, OutboxError};
use crate::workers::WorkerHandle;

/// An outbox entry that exhausted its retries.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub entry: OutboxEntry,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Dead-letter queue for undeliverable outbox entries.
#[derive(Debug, Default)]
pub struct DeadLetterQueue {
    inner: RwLock<Vec<DeadLetter>>,
}

impl DeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: OutboxEntry, reason: impl Into<String>) {
        if let Ok(mut inner) = self.inner.write() {
            inner.push(DeadLetter {
                entry,
                reason: reason.into(),
                dead_lettered_at: Utc::now(),
            });
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn list(&self) -> Vec<DeadLetter> {
        self.inner.read().map(|v| v.clone()).unwrap_or_default()
    }

    /// Take everything out (manual redelivery tooling).
    pub fn drain(&self) -> Vec<DeadLetter> {
        self.inner
            .write()
            .map(|mut v| v.drain(..).collect())
            .unwrap_or_default()
    }
}

/// Publisher configuration.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Entries polled per pass.
    pub batch_size: usize,
    /// Publish attempts before an entry is dead-lettered.
    pub max_retries: u32,
    /// Sleep between polling passes in the background worker.
    pub poll_interval: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_retries: 5,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Polls the outbox and publishes entries to subscribers.
///
/// Safe to run concurrently with other pollers: the poll/mark race only
/// produces duplicate publishes, which at-least-once delivery tolerates.
pub struct OutboxPublisher<B> {
    outbox: Arc<dyn Outbox>,
    bus: B,
    dead_letters: Arc<DeadLetterQueue>,
    config: PublisherConfig,
}

impl<B> std::fmt::Debug for OutboxPublisher<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxPublisher")
            .field("dead_letters", &self.dead_letters)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<B> OutboxPublisher<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        outbox: Arc<dyn Outbox>,
        bus: B,
        dead_letters: Arc<DeadLetterQueue>,
        config: PublisherConfig,
    ) -> Self {
        Self {
            outbox,
            bus,
            dead_letters,
            config,
        }
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterQueue> {
        &self.dead_letters
    }

    /// One polling pass. Returns the number of entries published.
    pub fn run_once(&self) -> Result<usize, OutboxError> {
        let batch = self.outbox.poll(self.config.batch_size)?;
        let mut published = 0;

        for entry in batch {
            match self.publish_entry(&entry) {
                Ok(()) => {
                    self.outbox.mark_processed(entry.id)?;
                    published += 1;
                }
                Err(reason) => {
                    self.outbox.mark_failed(entry.id, &reason)?;
                    let attempts = entry.retry_count + 1;
                    if attempts >= self.config.max_retries {
                        // Exhausted: move out of the outbox, keep for operators.
                        let entry = self.outbox.remove(entry.id)?;
                        warn!(
                            entry_id = %entry.id,
                            event_type = %entry.event_type,
                            attempts,
                            reason = %reason,
                            "outbox entry moved to dead-letter queue"
                        );
                        self.dead_letters.push(entry, reason);
                    } else {
                        debug!(
                            entry_id = %entry.id,
                            event_type = %entry.event_type,
                            attempts,
                            reason = %reason,
                            "outbox publish failed, will retry"
                        );
                    }
                }
            }
        }

        Ok(published)
    }

    fn publish_entry(&self, entry: &OutboxEntry) -> Result<(), String> {
        let envelope: EventEnvelope<JsonValue> = serde_json::from_value(entry.payload.clone())
            .map_err(|e| format!("malformed outbox payload: {e}"))?;

        self.bus
            .publish(envelope)
            .map_err(|e| format!("bus publish failed: {e:?}"))
    }
}

/// Background publisher loop.
#[derive(Debug)]
pub struct PublisherWorker;

impl PublisherWorker {
    pub fn spawn<B>(publisher: OutboxPublisher<B>) -> WorkerHandle
    where
        B: EventBus<EventEnvelope<JsonValue>> + Send + Sync + 'static,
    {
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();
        let poll_interval = publisher.config.poll_interval;

        let join = std::thread::Builder::new()
            .name("outbox-publisher".to_string())
            .spawn(move || {
                loop {
                    if let Err(err) = publisher.run_once() {
                        warn!(error = %err, "outbox publisher pass failed");
                    }
                    // Idle wait doubles as the shutdown check.
                    match shutdown_rx.recv_timeout(poll_interval) {
                        Ok(()) | Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                        Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                    }
                }
            })
            .expect("failed to spawn outbox publisher thread");

        WorkerHandle::new(shutdown_tx, join)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::InMemoryOutbox;
    use flowra_core::{AggregateId, UserId};
    use flowra_events::{EventMetadata, InMemoryEventBus};
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    /// Bus that fails while `broken` is set.
    struct FlakyBus {
        inner: InMemoryEventBus<EventEnvelope<JsonValue>>,
        broken: AtomicBool,
    }

    impl FlakyBus {
        fn new(broken: bool) -> Self {
            Self {
                inner: InMemoryEventBus::new(),
                broken: AtomicBool::new(broken),
            }
        }

        fn repair(&self) {
            self.broken.store(false, Ordering::SeqCst);
        }
    }

    impl EventBus<EventEnvelope<JsonValue>> for FlakyBus {
        type Error = String;

        fn publish(&self, message: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
            if self.broken.load(Ordering::SeqCst) {
                return Err("bus down".to_string());
            }
            self.inner.publish(message).map_err(|e| format!("{e:?}"))
        }

        fn subscribe(&self) -> flowra_events::Subscription<EventEnvelope<JsonValue>> {
            self.inner.subscribe()
        }
    }

    fn entry() -> OutboxEntry {
        let correlation = Uuid::now_v7();
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            "chat.created",
            AggregateId::new(),
            "chat",
            1,
            Utc::now(),
            EventMetadata::new(correlation, correlation, UserId::new()),
            serde_json::json!({}),
        );
        OutboxEntry {
            id: Uuid::now_v7(),
            event_id: envelope.event_id(),
            event_type: "chat.created".to_string(),
            aggregate_id: envelope.aggregate_id(),
            aggregate_type: "chat".to_string(),
            payload: serde_json::to_value(envelope).unwrap(),
            created_at: Utc::now(),
            processed_at: None,
            retry_count: 0,
            last_error: None,
        }
    }

    fn publisher(bus: Arc<FlakyBus>, max_retries: u32) -> (Arc<InMemoryOutbox>, OutboxPublisher<Arc<FlakyBus>>) {
        let outbox = Arc::new(InMemoryOutbox::new());
        let publisher = OutboxPublisher::new(
            outbox.clone(),
            bus,
            Arc::new(DeadLetterQueue::new()),
            PublisherConfig {
                max_retries,
                ..PublisherConfig::default()
            },
        );
        (outbox, publisher)
    }

    #[test]
    fn publishes_and_marks_processed() {
        let bus = Arc::new(FlakyBus::new(false));
        let sub = bus.subscribe();
        let (outbox, publisher) = publisher(bus, 5);

        let e = entry();
        outbox.add(e.clone()).unwrap();

        assert_eq!(publisher.run_once().unwrap(), 1);
        assert_eq!(outbox.pending_count().unwrap(), 0);

        let received = sub.try_recv().unwrap();
        assert_eq!(received.event_id(), e.event_id);
    }

    #[test]
    fn failure_keeps_entry_pending_for_retry() {
        let bus = Arc::new(FlakyBus::new(true));
        let (outbox, publisher) = publisher(bus.clone(), 5);

        outbox.add(entry()).unwrap();
        assert_eq!(publisher.run_once().unwrap(), 0);

        let pending = outbox.poll(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].retry_count, 1);
        assert!(pending[0].last_error.is_some());

        // Once the bus recovers, the retry succeeds.
        bus.repair();
        assert_eq!(publisher.run_once().unwrap(), 1);
        assert_eq!(outbox.pending_count().unwrap(), 0);
    }

    #[test]
    fn exhausted_retries_move_entry_to_dead_letters() {
        let bus = Arc::new(FlakyBus::new(true));
        let (outbox, publisher) = publisher(bus, 3);

        outbox.add(entry()).unwrap();
        for _ in 0..3 {
            publisher.run_once().unwrap();
        }

        assert_eq!(outbox.pending_count().unwrap(), 0);
        assert_eq!(publisher.dead_letters().len(), 1);

        let dead = publisher.dead_letters().list();
        assert_eq!(dead[0].entry.retry_count, 3);
        assert!(dead[0].reason.contains("bus down"));
    }

    #[test]
    fn worker_drains_outbox_in_background() {
        let bus = Arc::new(FlakyBus::new(false));
        let outbox = Arc::new(InMemoryOutbox::new());
        outbox.add(entry()).unwrap();
        outbox.add(entry()).unwrap();

        let publisher = OutboxPublisher::new(
            outbox.clone() as Arc<dyn Outbox>,
            bus,
            Arc::new(DeadLetterQueue::new()),
            PublisherConfig {
                poll_interval: Duration::from_millis(10),
                ..PublisherConfig::default()
            },
        );

        let handle = PublisherWorker::spawn(publisher);
        std::thread::sleep(Duration::from_millis(100));
        handle.shutdown();

        assert_eq!(outbox.pending_count().unwrap(), 0);
    }
}
