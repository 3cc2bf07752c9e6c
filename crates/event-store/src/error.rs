use thiserror::Error;

use crate::{AggregateId, SequenceNumber};

/// Errors that can occur when interacting with an event or snapshot store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// An append was rejected because the store's next free sequence did not
    /// match the expected one. Another writer committed first; the caller
    /// may retry the whole command at a higher level.
    #[error(
        "concurrency conflict for aggregate {aggregate_id}: expected next sequence {expected_next}, store is at {actual_next}"
    )]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected_next: SequenceNumber,
        actual_next: SequenceNumber,
    },

    /// A serialization/deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The storage backend failed.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
