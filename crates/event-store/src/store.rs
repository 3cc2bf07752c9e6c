use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{AggregateId, DomainEventEnvelope, Result, SequenceNumber, Snapshot};

/// A finite, ordered stream of domain events for one aggregate.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<DomainEventEnvelope>> + Send>>;

/// Contract for the durable event log.
///
/// Implementations must be thread-safe (`Send + Sync`). The repository never
/// retries a failed operation; conflicts and corruption are surfaced to the
/// caller.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Reads the event tail for `aggregate_id` strictly after `after`.
    ///
    /// The stream is sorted strictly ascending by sequence number and is
    /// contiguous starting at `after + 1` (at 0 when `after` is `None`).
    async fn read_tail(
        &self,
        aggregate_id: AggregateId,
        after: Option<SequenceNumber>,
    ) -> Result<EventStream>;

    /// Appends `events` as one ordered batch.
    ///
    /// The batch commits atomically only if the store's next free sequence
    /// for `aggregate_id` equals `expected_next`; otherwise the append fails
    /// with [`ConcurrencyConflict`](crate::EventStoreError::ConcurrencyConflict).
    /// This store-side check backs the repository's in-process lock with a
    /// cross-process guarantee.
    ///
    /// Returns the sequence number of the last committed event.
    async fn append(
        &self,
        aggregate_id: AggregateId,
        expected_next: SequenceNumber,
        events: Vec<DomainEventEnvelope>,
    ) -> Result<SequenceNumber>;
}

/// Contract for the optional snapshot store.
///
/// Snapshot persistence is best-effort: a failed write must not fail the
/// event append that preceded it, since the log is the source of truth.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Returns the latest snapshot for `aggregate_id`, if any.
    async fn read_latest(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>>;

    /// Persists `snapshot`, replacing any earlier snapshot for the same
    /// aggregate.
    async fn write(&self, snapshot: Snapshot) -> Result<()>;
}

/// Validates a batch before it is handed to [`EventStore::append`].
///
/// All events must target the same aggregate and carry contiguous,
/// strictly ascending sequence numbers.
pub fn validate_append_batch(
    aggregate_id: AggregateId,
    expected_next: SequenceNumber,
    events: &[DomainEventEnvelope],
) -> Result<()> {
    let mut expected = expected_next;
    for event in events {
        if event.aggregate_id != aggregate_id {
            return Err(crate::EventStoreError::Backend(format!(
                "batch for aggregate {aggregate_id} contains event for {}",
                event.aggregate_id
            )));
        }
        if event.sequence != expected {
            return Err(crate::EventStoreError::Backend(format!(
                "batch for aggregate {aggregate_id} is not contiguous: expected sequence {expected}, got {}",
                event.sequence
            )));
        }
        expected = expected.next();
    }
    Ok(())
}
