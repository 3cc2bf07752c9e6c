use event_store::{AggregateId, EventStoreError, SequenceNumber};
use thiserror::Error;

use crate::lock::LockError;

/// Errors surfaced by the aggregate repository.
///
/// [`Lock`](Self::Lock), [`DirtyAggregate`](Self::DirtyAggregate) and
/// [`NoCommittedHistory`](Self::NoCommittedHistory) indicate misuse by the
/// caller and are never retried. [`VersionConflict`](Self::VersionConflict)
/// and a store-level
/// [`ConcurrencyConflict`](EventStoreError::ConcurrencyConflict) mean a
/// concurrent writer won; the triggering command may be retried at a higher
/// level, never inside the repository.
/// [`CorruptedStream`](Self::CorruptedStream) means the log can no longer
/// be trusted for that aggregate.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// No history and no snapshot exist for the identifier.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(AggregateId),

    /// The caller's expected version did not match the version produced by
    /// replay.
    #[error(
        "version conflict for aggregate {aggregate_id}: expected {expected}, found {actual}"
    )]
    VersionConflict {
        aggregate_id: AggregateId,
        expected: SequenceNumber,
        actual: SequenceNumber,
    },

    /// The event tail read from the log had a gap or duplicate sequence.
    #[error(
        "corrupted event stream for aggregate {aggregate_id}: expected sequence {expected}, found {actual}"
    )]
    CorruptedStream {
        aggregate_id: AggregateId,
        expected: SequenceNumber,
        actual: SequenceNumber,
    },

    /// A snapshot was requested for an aggregate that still has uncommitted
    /// events.
    #[error("aggregate {aggregate_id} has {count} uncommitted events and cannot be snapshotted")]
    DirtyAggregate {
        aggregate_id: AggregateId,
        count: usize,
    },

    /// A snapshot was requested for an aggregate with no committed history.
    #[error("aggregate {0} has no committed history to snapshot")]
    NoCommittedHistory(AggregateId),

    /// A lock was released or validated incorrectly.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// An error occurred in the event store.
    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// A serialization/deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;
