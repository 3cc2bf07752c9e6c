use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, DomainEventEnvelope, EventStoreError, Result, SequenceNumber, Snapshot,
    store::{EventStore, EventStream, SnapshotStore, validate_append_batch},
};

/// In-memory event and snapshot store.
///
/// Backs the repository in tests and examples with the same contract a
/// durable backend would provide: contiguous tails per aggregate and an
/// append that commits only when the expected next sequence matches.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<Vec<DomainEventEnvelope>>>,
    snapshots: Arc<RwLock<HashMap<AggregateId, Snapshot>>>,
}

impl InMemoryEventStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored, across all aggregates.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Clears all events and snapshots.
    pub async fn clear(&self) {
        self.events.write().await.clear();
        self.snapshots.write().await.clear();
    }

    /// Returns the next free sequence number for `aggregate_id` given the
    /// current contents of `events`.
    fn next_sequence(events: &[DomainEventEnvelope], aggregate_id: AggregateId) -> SequenceNumber {
        events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.sequence)
            .max()
            .map(|s| s.next())
            .unwrap_or(SequenceNumber::zero())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn read_tail(
        &self,
        aggregate_id: AggregateId,
        after: Option<SequenceNumber>,
    ) -> Result<EventStream> {
        let events = self.events.read().await;
        let mut tail: Vec<_> = events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id && after.is_none_or(|a| e.sequence > a))
            .cloned()
            .collect();
        tail.sort_by_key(|e| e.sequence);

        Ok(Box::pin(futures_util::stream::iter(
            tail.into_iter().map(Ok),
        )))
    }

    async fn append(
        &self,
        aggregate_id: AggregateId,
        expected_next: SequenceNumber,
        events: Vec<DomainEventEnvelope>,
    ) -> Result<SequenceNumber> {
        validate_append_batch(aggregate_id, expected_next, &events)?;

        let mut store = self.events.write().await;

        let actual_next = Self::next_sequence(&store, aggregate_id);
        if actual_next != expected_next {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected_next,
                actual_next,
            });
        }

        let head = events
            .last()
            .map(|e| e.sequence)
            .unwrap_or(expected_next);
        store.extend(events);

        Ok(head)
    }
}

#[async_trait]
impl SnapshotStore for InMemoryEventStore {
    async fn read_latest(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(&aggregate_id).cloned())
    }

    async fn write(&self, snapshot: Snapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(snapshot.aggregate_id, snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;

    fn event(aggregate_id: AggregateId, sequence: i64) -> DomainEventEnvelope {
        DomainEventEnvelope::new(
            aggregate_id,
            SequenceNumber::new(sequence),
            "TestEvent",
            serde_json::json!({"seq": sequence}),
        )
    }

    async fn collect_tail(
        store: &InMemoryEventStore,
        id: AggregateId,
        after: Option<SequenceNumber>,
    ) -> Vec<DomainEventEnvelope> {
        store
            .read_tail(id, after)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn append_starts_history_at_zero() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let head = store
            .append(id, SequenceNumber::zero(), vec![event(id, 0), event(id, 1)])
            .await
            .unwrap();

        assert_eq!(head, SequenceNumber::new(1));
        assert_eq!(collect_tail(&store, id, None).await.len(), 2);
    }

    #[tokio::test]
    async fn append_rejects_wrong_expected_next() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        store
            .append(id, SequenceNumber::zero(), vec![event(id, 0)])
            .await
            .unwrap();

        // A stale writer still believes the history is empty.
        let result = store
            .append(id, SequenceNumber::zero(), vec![event(id, 0)])
            .await;

        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict {
                expected_next,
                actual_next,
                ..
            }) if expected_next == SequenceNumber::zero() && actual_next == SequenceNumber::new(1)
        ));
    }

    #[tokio::test]
    async fn read_tail_after_sequence() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        store
            .append(
                id,
                SequenceNumber::zero(),
                vec![event(id, 0), event(id, 1), event(id, 2)],
            )
            .await
            .unwrap();

        let tail = collect_tail(&store, id, Some(SequenceNumber::zero())).await;
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].sequence, SequenceNumber::new(1));
        assert_eq!(tail[1].sequence, SequenceNumber::new(2));
    }

    #[tokio::test]
    async fn read_tail_is_scoped_per_aggregate() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();

        store
            .append(a, SequenceNumber::zero(), vec![event(a, 0)])
            .await
            .unwrap();
        store
            .append(b, SequenceNumber::zero(), vec![event(b, 0), event(b, 1)])
            .await
            .unwrap();

        assert_eq!(collect_tail(&store, a, None).await.len(), 1);
        assert_eq!(collect_tail(&store, b, None).await.len(), 2);
    }

    #[tokio::test]
    async fn snapshot_write_replaces_earlier_one() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        store
            .write(Snapshot::new(
                id,
                "TestAggregate",
                SequenceNumber::new(5),
                serde_json::json!({"v": 5}),
            ))
            .await
            .unwrap();
        store
            .write(Snapshot::new(
                id,
                "TestAggregate",
                SequenceNumber::new(10),
                serde_json::json!({"v": 10}),
            ))
            .await
            .unwrap();

        let latest = store.read_latest(id).await.unwrap().unwrap();
        assert_eq!(latest.sequence, SequenceNumber::new(10));
    }

    #[tokio::test]
    async fn snapshot_missing_is_none() {
        let store = InMemoryEventStore::new();
        assert!(store.read_latest(AggregateId::new()).await.unwrap().is_none());
    }
}
