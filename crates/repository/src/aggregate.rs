//! Aggregate contract and the root wrapper that tracks versions and the
//! uncommitted event buffer.

use event_store::{AggregateId, DomainEventEnvelope, SequenceNumber, Snapshot};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::RepositoryError;

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain. They are
/// immutable and should be named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name, used as the envelope's payload type tag.
    fn event_type(&self) -> &'static str;
}

/// Trait for event-sourced aggregates.
///
/// An aggregate's authoritative state is derived from its event history:
/// it is rebuilt by replaying events and mutated only through `apply`.
/// Routing an event to the right transition is a plain `match` over the
/// event enum, fixed at compile time.
pub trait Aggregate: Default + Send + Sync + Sized {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Returns the aggregate type name, used for snapshots and logging.
    fn aggregate_type() -> &'static str;

    /// Applies an event to the aggregate, updating its state.
    ///
    /// Must be deterministic and free of side effects beyond self-mutation:
    /// the same state and event always produce the same new state. The same
    /// transition runs during replay and when new events are raised, so
    /// in-memory state is always consistent with the aggregate's history.
    fn apply(&mut self, event: Self::Event);
}

/// An aggregate together with its identity, version and uncommitted events.
///
/// The version is the sequence number of the last applied or persisted
/// event, `None` for a fresh aggregate with no history. Events raised
/// through [`raise`](Self::raise) are buffered here until the repository
/// drains and appends them.
#[derive(Debug)]
pub struct AggregateRoot<A: Aggregate> {
    id: AggregateId,
    version: Option<SequenceNumber>,
    uncommitted: Vec<DomainEventEnvelope>,
    state: A,
}

impl<A: Aggregate> AggregateRoot<A> {
    /// Creates a fresh, versionless aggregate root with default state.
    pub fn new(id: AggregateId) -> Self {
        Self {
            id,
            version: None,
            uncommitted: Vec::new(),
            state: A::default(),
        }
    }

    /// Restores an aggregate root from snapshotted state at `version`.
    pub fn restore(id: AggregateId, state: A, version: SequenceNumber) -> Self {
        Self {
            id,
            version: Some(version),
            uncommitted: Vec::new(),
            state,
        }
    }

    /// Returns the aggregate identifier.
    pub fn id(&self) -> AggregateId {
        self.id
    }

    /// Returns the sequence number of the last applied event, `None` for an
    /// aggregate with no history yet.
    pub fn version(&self) -> Option<SequenceNumber> {
        self.version
    }

    /// Returns the aggregate state.
    pub fn state(&self) -> &A {
        &self.state
    }

    /// Number of raised-but-not-yet-persisted events.
    pub fn uncommitted_count(&self) -> usize {
        self.uncommitted.len()
    }

    fn next_sequence(&self) -> SequenceNumber {
        self.version
            .map(|v| v.next())
            .unwrap_or(SequenceNumber::zero())
    }

    /// Raises a new event: assigns it the next sequence number, applies it
    /// to the state through the same transition replay uses, and buffers it
    /// for persistence.
    pub fn raise(&mut self, event: A::Event) -> Result<(), RepositoryError> {
        let sequence = self.next_sequence();
        let envelope = DomainEventEnvelope::new(
            self.id,
            sequence,
            event.event_type(),
            serde_json::to_value(&event)?,
        );
        self.state.apply(event);
        self.version = Some(sequence);
        self.uncommitted.push(envelope);
        Ok(())
    }

    /// Drains the uncommitted events in raised order, clearing the buffer.
    ///
    /// A second call returns an empty vector until more events are raised.
    pub fn pull_uncommitted_events(&mut self) -> Vec<DomainEventEnvelope> {
        std::mem::take(&mut self.uncommitted)
    }

    /// Applies a historical envelope during replay: the event mutates state
    /// without being buffered, and the version advances to the envelope's
    /// sequence number.
    pub fn apply_historical(&mut self, envelope: &DomainEventEnvelope) -> Result<(), RepositoryError> {
        let event: A::Event = serde_json::from_value(envelope.payload.clone())?;
        self.state.apply(event);
        self.version = Some(envelope.sequence);
        Ok(())
    }

    /// Captures the full aggregate state as a [`Snapshot`] at the current
    /// version.
    ///
    /// Fails before any I/O if the aggregate is dirty (has uncommitted
    /// events) or has no committed history to anchor the snapshot to.
    pub fn to_snapshot(&self) -> Result<Snapshot, RepositoryError>
    where
        A: Serialize,
    {
        if !self.uncommitted.is_empty() {
            return Err(RepositoryError::DirtyAggregate {
                aggregate_id: self.id,
                count: self.uncommitted.len(),
            });
        }
        let version = self
            .version
            .ok_or(RepositoryError::NoCommittedHistory(self.id))?;
        Ok(Snapshot::new(
            self.id,
            A::aggregate_type(),
            version,
            serde_json::to_value(&self.state)?,
        ))
    }
}

/// Constructs a fresh aggregate from the first envelope of its history when
/// no snapshot exists. Supplied by the caller; most aggregates use
/// [`GenericAggregateFactory`].
pub trait AggregateFactory<A: Aggregate>: Send + Sync {
    /// Builds the aggregate root seeded with `first`, the earliest envelope
    /// in the tail.
    fn create(
        &self,
        aggregate_id: AggregateId,
        first: &DomainEventEnvelope,
    ) -> Result<AggregateRoot<A>, RepositoryError>;
}

/// Factory for aggregates whose default state plus the first event fully
/// determines construction.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericAggregateFactory;

impl<A: Aggregate> AggregateFactory<A> for GenericAggregateFactory {
    fn create(
        &self,
        aggregate_id: AggregateId,
        first: &DomainEventEnvelope,
    ) -> Result<AggregateRoot<A>, RepositoryError> {
        let mut root = AggregateRoot::new(aggregate_id);
        root.apply_historical(first)?;
        Ok(root)
    }
}
