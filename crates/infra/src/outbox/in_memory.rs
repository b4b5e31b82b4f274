use std::sync::RwLock;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Outbox, OutboxEntry, OutboxError, OutboxStats};

/// In-memory outbox for tests/dev.
///
/// Entries are kept in insertion order, which equals creation order, so
/// pending polls are oldest-first without extra sorting.
#[derive(Debug, Default)]
pub struct InMemoryOutbox {
    entries: RwLock<Vec<OutboxEntry>>,
}

impl InMemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_err() -> OutboxError {
        OutboxError::Storage("lock poisoned".to_string())
    }
}

impl Outbox for InMemoryOutbox {
    fn add(&self, entry: OutboxEntry) -> Result<(), OutboxError> {
        let mut entries = self.entries.write().map_err(|_| Self::lock_err())?;
        entries.push(entry);
        Ok(())
    }

    fn add_batch(&self, batch: Vec<OutboxEntry>) -> Result<(), OutboxError> {
        let mut entries = self.entries.write().map_err(|_| Self::lock_err())?;
        entries.extend(batch);
        Ok(())
    }

    fn poll(&self, batch_size: usize) -> Result<Vec<OutboxEntry>, OutboxError> {
        let entries = self.entries.read().map_err(|_| Self::lock_err())?;
        Ok(entries
            .iter()
            .filter(|e| e.is_pending())
            .take(batch_size)
            .cloned()
            .collect())
    }

    fn mark_processed(&self, id: Uuid) -> Result<(), OutboxError> {
        let mut entries = self.entries.write().map_err(|_| Self::lock_err())?;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(OutboxError::NotFound(id))?;
        if entry.processed_at.is_some() {
            return Err(OutboxError::AlreadyProcessed(id));
        }
        entry.processed_at = Some(Utc::now());
        Ok(())
    }

    fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), OutboxError> {
        let mut entries = self.entries.write().map_err(|_| Self::lock_err())?;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(OutboxError::NotFound(id))?;
        if entry.processed_at.is_some() {
            return Err(OutboxError::AlreadyProcessed(id));
        }
        entry.retry_count += 1;
        entry.last_error = Some(error.to_string());
        Ok(())
    }

    fn remove(&self, id: Uuid) -> Result<OutboxEntry, OutboxError> {
        let mut entries = self.entries.write().map_err(|_| Self::lock_err())?;
        let idx = entries
            .iter()
            .position(|e| e.id == id)
            .ok_or(OutboxError::NotFound(id))?;
        Ok(entries.remove(idx))
    }

    fn cleanup(&self, older_than: DateTime<Utc>) -> Result<usize, OutboxError> {
        let mut entries = self.entries.write().map_err(|_| Self::lock_err())?;
        let before = entries.len();
        entries.retain(|e| match e.processed_at {
            Some(processed_at) => processed_at >= older_than,
            None => true,
        });
        Ok(before - entries.len())
    }

    fn pending_count(&self) -> Result<usize, OutboxError> {
        let entries = self.entries.read().map_err(|_| Self::lock_err())?;
        Ok(entries.iter().filter(|e| e.is_pending()).count())
    }

    fn stats(&self) -> Result<OutboxStats, OutboxError> {
        let entries = self.entries.read().map_err(|_| Self::lock_err())?;
        let pending: Vec<_> = entries.iter().filter(|e| e.is_pending()).collect();
        Ok(OutboxStats {
            pending: pending.len(),
            oldest_pending_at: pending.iter().map(|e| e.created_at).min(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use flowra_core::AggregateId;
    use serde_json::json;

    fn entry(event_type: &str) -> OutboxEntry {
        OutboxEntry {
            id: Uuid::now_v7(),
            event_id: Uuid::now_v7(),
            event_type: event_type.to_string(),
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
    fn poll_returns_pending_oldest_first() {
        let outbox = InMemoryOutbox::new();
        let first = entry("chat.created");
        let second = entry("chat.renamed");
        outbox.add(first.clone()).unwrap();
        outbox.add(second.clone()).unwrap();

        let polled = outbox.poll(10).unwrap();
        assert_eq!(polled.len(), 2);
        assert_eq!(polled[0].id, first.id);
        assert_eq!(polled[1].id, second.id);

        let polled = outbox.poll(1).unwrap();
        assert_eq!(polled.len(), 1);
        assert_eq!(polled[0].id, first.id);
    }

    #[test]
    fn mark_processed_removes_from_pending() {
        let outbox = InMemoryOutbox::new();
        let e = entry("chat.created");
        outbox.add(e.clone()).unwrap();

        outbox.mark_processed(e.id).unwrap();
        assert!(outbox.poll(10).unwrap().is_empty());
        assert_eq!(outbox.pending_count().unwrap(), 0);

        // Terminal transition is exclusive.
        assert!(matches!(
            outbox.mark_processed(e.id),
            Err(OutboxError::AlreadyProcessed(_))
        ));
        assert!(matches!(
            outbox.mark_failed(e.id, "late failure"),
            Err(OutboxError::AlreadyProcessed(_))
        ));
    }

    #[test]
    fn mark_failed_keeps_entry_pending_and_counts_retries() {
        let outbox = InMemoryOutbox::new();
        let e = entry("chat.created");
        outbox.add(e.clone()).unwrap();

        outbox.mark_failed(e.id, "bus down").unwrap();
        outbox.mark_failed(e.id, "bus still down").unwrap();

        let polled = outbox.poll(10).unwrap();
        assert_eq!(polled.len(), 1);
        assert_eq!(polled[0].retry_count, 2);
        assert_eq!(polled[0].last_error.as_deref(), Some("bus still down"));
    }

    #[test]
    fn cleanup_never_removes_pending() {
        let outbox = InMemoryOutbox::new();
        let done = entry("chat.created");
        let pending = entry("chat.renamed");
        outbox.add(done.clone()).unwrap();
        outbox.add(pending.clone()).unwrap();
        outbox.mark_processed(done.id).unwrap();

        let removed = outbox.cleanup(Utc::now() + Duration::hours(1)).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(outbox.pending_count().unwrap(), 1);

        // Recent processed entries survive an old cutoff.
        let survivor = entry("chat.closed");
        outbox.add(survivor.clone()).unwrap();
        outbox.mark_processed(survivor.id).unwrap();
        let removed = outbox.cleanup(Utc::now() - Duration::hours(1)).unwrap();
        assert_eq!(removed, 0);
    }

    #[test]
    fn stats_report_oldest_pending() {
        let outbox = InMemoryOutbox::new();
        assert_eq!(outbox.stats().unwrap(), OutboxStats::default());

        let mut old = entry("chat.created");
        old.created_at = Utc::now() - Duration::minutes(5);
        let newer = entry("chat.renamed");
        outbox.add(newer).unwrap();
        outbox.add(old.clone()).unwrap();

        let stats = outbox.stats().unwrap();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.oldest_pending_at, Some(old.created_at));
    }
}
