use std::hash::{Hash, Hasher};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::warn;

use flowra_events::{EventBus, EventEnvelope, Subscription};

use super::WorkerHandle;

const TICK: Duration = Duration::from_millis(250);

/// Generic projection worker loop.
///
/// - Subscribes to an event bus
/// - Applies an idempotent handler for each message
/// - Supports graceful shutdown
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    /// Spawn a worker thread that processes events from a bus subscription.
    ///
    /// `handler` must be idempotent (at-least-once delivery safe). Handler
    /// failures are logged and the loop continues; the rebuild-on-event
    /// projector recovers on the next event or via the repair queue.
    pub fn spawn<M, B, H, E>(name: &'static str, bus: B, mut handler: H) -> WorkerHandle
    where
        M: Send + 'static,
        B: EventBus<M> + Send + Sync + 'static,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<M> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, &mut handler))
            .expect("failed to spawn projection worker thread");

        WorkerHandle::new(shutdown_tx, join)
    }
}

fn worker_loop<M, H, E>(
    name: &'static str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    handler: &mut H,
) where
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Debug,
{
    loop {
        // Shutdown check (non-blocking)
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(TICK) {
            Ok(msg) => {
                if let Err(err) = handler(msg) {
                    warn!(worker = name, error = ?err, "projection worker handler failed");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Handle for a partitioned worker pool.
#[derive(Debug)]
pub struct PoolHandle {
    router: WorkerHandle,
    workers: Vec<thread::JoinHandle<()>>,
}

impl PoolHandle {
    /// Stop the router, then wait for the partition workers to drain.
    pub fn shutdown(mut self) {
        self.router.shutdown();
        for j in self.workers.drain(..) {
            let _ = j.join();
        }
    }
}

/// Projection worker pool, partitioned by aggregate id.
///
/// A router thread hashes each envelope's aggregate id onto one of `size`
/// workers, so all events of one aggregate are handled serially by the same
/// worker (per-aggregate order preserved); different aggregates proceed in
/// parallel.
#[derive(Debug)]
pub struct ProjectionWorkerPool;

impl ProjectionWorkerPool {
    pub fn spawn<B, H, E>(name: &'static str, bus: B, size: usize, handler: H) -> PoolHandle
    where
        B: EventBus<EventEnvelope<JsonValue>> + Send + Sync + 'static,
        H: Fn(EventEnvelope<JsonValue>) -> Result<(), E> + Clone + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        let size = size.max(1);
        let mut senders = Vec::with_capacity(size);
        let mut workers = Vec::with_capacity(size);

        for idx in 0..size {
            let (tx, rx) = mpsc::channel::<EventEnvelope<JsonValue>>();
            senders.push(tx);

            let handler = handler.clone();
            let join = thread::Builder::new()
                .name(format!("{name}-{idx}"))
                .spawn(move || partition_loop(name, rx, handler))
                .expect("failed to spawn partition worker thread");
            workers.push(join);
        }

        // The router owns the senders; dropping it on shutdown disconnects
        // the partition channels and lets the workers drain out.
        let router = ProjectionWorker::spawn(name, bus, move |envelope: EventEnvelope<JsonValue>| {
            let idx = partition_index(&envelope, senders.len());
            senders[idx]
                .send(envelope)
                .map_err(|e| format!("partition {idx} unavailable: {e}"))
        });

        PoolHandle { router, workers }
    }
}

fn partition_index(envelope: &EventEnvelope<JsonValue>, size: usize) -> usize {
    let mut hasher = std::hash::DefaultHasher::new();
    envelope.aggregate_id().as_uuid().as_bytes().hash(&mut hasher);
    (hasher.finish() % size as u64) as usize
}

fn partition_loop<H, E>(
    name: &'static str,
    rx: mpsc::Receiver<EventEnvelope<JsonValue>>,
    handler: H,
) where
    H: Fn(EventEnvelope<JsonValue>) -> Result<(), E>,
    E: core::fmt::Debug,
{
    while let Ok(envelope) = rx.recv() {
        if let Err(err) = handler(envelope) {
            warn!(worker = name, error = ?err, "partition worker handler failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowra_core::{AggregateId, UserId};
    use flowra_events::{EventMetadata, InMemoryEventBus};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    fn envelope(aggregate_id: AggregateId, version: u64) -> EventEnvelope<JsonValue> {
        let correlation = Uuid::now_v7();
        EventEnvelope::new(
            Uuid::now_v7(),
            "chat.renamed",
            aggregate_id,
            "chat",
            version,
            chrono::Utc::now(),
            EventMetadata::new(correlation, correlation, UserId::new()),
            serde_json::json!({}),
        )
    }

    #[test]
    fn worker_processes_published_messages() {
        let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());
        let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        let handle = ProjectionWorker::spawn("test-worker", bus.clone(), move |env: EventEnvelope<JsonValue>| {
            seen_clone.lock().unwrap().push(env.version());
            Ok::<(), String>(())
        });

        let id = AggregateId::new();
        for v in 1..=3 {
            bus.publish(envelope(id, v)).unwrap();
        }

        // Give the worker a moment to drain.
        std::thread::sleep(Duration::from_millis(100));
        handle.shutdown();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn pool_keeps_per_aggregate_order() {
        let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());
        let seen: Arc<Mutex<HashMap<AggregateId, Vec<u64>>>> = Arc::new(Mutex::new(HashMap::new()));

        let seen_clone = seen.clone();
        let pool = ProjectionWorkerPool::spawn("test-pool", bus.clone(), 4, move |env: EventEnvelope<JsonValue>| {
            seen_clone
                .lock()
                .unwrap()
                .entry(env.aggregate_id())
                .or_default()
                .push(env.version());
            Ok::<(), String>(())
        });

        let aggregates: Vec<AggregateId> = (0..8).map(|_| AggregateId::new()).collect();
        for v in 1..=5 {
            for id in &aggregates {
                bus.publish(envelope(*id, v)).unwrap();
            }
        }

        std::thread::sleep(Duration::from_millis(200));
        pool.shutdown();

        let seen = seen.lock().unwrap();
        for id in &aggregates {
            assert_eq!(seen.get(id).unwrap(), &vec![1, 2, 3, 4, 5], "order broken for {id}");
        }
    }
}
