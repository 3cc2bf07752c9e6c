use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AggregateId, DomainEventEnvelope, MetaData, SequenceNumber};

/// A full-state capture of an aggregate at a specific sequence number.
///
/// Snapshots truncate replay: loading starts from the snapshot state and
/// only the events after its sequence number are read from the log. The
/// sequence number always equals the aggregate's version at capture time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// The aggregate this snapshot belongs to.
    pub aggregate_id: AggregateId,

    /// The type of aggregate (e.g. "Order").
    pub aggregate_type: String,

    /// The aggregate's version at capture time.
    pub sequence: SequenceNumber,

    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,

    /// The serialized aggregate state.
    pub state: serde_json::Value,

    /// Additional metadata about the snapshot.
    pub metadata: MetaData,
}

impl Snapshot {
    /// Creates a new snapshot from already-serialized state.
    pub fn new(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        sequence: SequenceNumber,
        state: serde_json::Value,
    ) -> Self {
        Self {
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            sequence,
            timestamp: Utc::now(),
            state,
            metadata: MetaData::new(),
        }
    }

    /// Deserializes the snapshot state into a concrete type.
    pub fn into_state<T: for<'de> Deserialize<'de>>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.state)
    }

    /// Represents this snapshot as a domain event envelope whose payload is
    /// the captured aggregate state.
    pub fn as_domain_event(&self) -> DomainEventEnvelope {
        DomainEventEnvelope {
            aggregate_id: self.aggregate_id,
            sequence: self.sequence,
            event_id: crate::EventId::new(),
            timestamp: self.timestamp,
            payload_type: self.aggregate_type.clone(),
            payload: self.state.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestState {
        count: i32,
        name: String,
    }

    #[test]
    fn into_state_roundtrip() {
        let state = TestState {
            count: 3,
            name: "test".to_string(),
        };
        let snapshot = Snapshot::new(
            AggregateId::new(),
            "TestAggregate",
            SequenceNumber::new(5),
            serde_json::to_value(&state).unwrap(),
        );

        let restored: TestState = snapshot.into_state().unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn as_domain_event_carries_state_and_sequence() {
        let id = AggregateId::new();
        let snapshot = Snapshot::new(
            id,
            "TestAggregate",
            SequenceNumber::new(5),
            serde_json::json!({"count": 3}),
        );

        let envelope = snapshot.as_domain_event();
        assert_eq!(envelope.aggregate_id, id);
        assert_eq!(envelope.sequence, SequenceNumber::new(5));
        assert_eq!(envelope.payload_type, "TestAggregate");
        assert_eq!(envelope.payload, serde_json::json!({"count": 3}));
    }
}
