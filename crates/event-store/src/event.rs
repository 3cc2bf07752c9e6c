use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::MetaData;

/// Unique identifier for an aggregate instance.
///
/// Wraps a UUID to prevent mixing up aggregate identifiers with other
/// UUID-based identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

impl AggregateId {
    /// Creates a new random aggregate ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an aggregate ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AggregateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AggregateId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Unique identifier for an event message.
///
/// Generated once when the envelope is constructed and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of an event within a single aggregate's history.
///
/// For a given aggregate, sequence numbers assigned by the repository are
/// contiguous non-negative integers starting at 0, strictly increasing with
/// no gaps or duplicates.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SequenceNumber(i64);

impl SequenceNumber {
    /// Creates a sequence number from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The sequence number of the first event in any history.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Returns the next sequence number.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for SequenceNumber {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// An immutable event message: a payload wrapped with identity, timestamp
/// and metadata.
///
/// Identifier, timestamp and payload are fixed at construction. The metadata
/// operations ([`with_metadata`](Self::with_metadata),
/// [`and_metadata`](Self::and_metadata)) return a new envelope and never
/// mutate the one they were called on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// When the event was created.
    pub timestamp: DateTime<Utc>,

    /// Static type tag of the payload (e.g. "OrderCreated").
    pub payload_type: String,

    /// The event payload as JSON.
    pub payload: serde_json::Value,

    /// Additional metadata about the event.
    pub metadata: MetaData,
}

impl EventEnvelope {
    /// Creates a new envelope with a fresh identifier, the current time and
    /// empty metadata.
    pub fn new(payload_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_id: EventId::new(),
            timestamp: Utc::now(),
            payload_type: payload_type.into(),
            payload,
            metadata: MetaData::new(),
        }
    }

    /// Returns an envelope with its metadata replaced wholesale by
    /// `metadata`.
    ///
    /// Identifier, timestamp and payload are carried over unchanged. An
    /// identical mapping short-circuits to a plain copy.
    pub fn with_metadata(&self, metadata: MetaData) -> Self {
        if self.metadata == metadata {
            return self.clone();
        }
        Self {
            metadata,
            ..self.clone()
        }
    }

    /// Returns an envelope with `additional` merged over the existing
    /// metadata.
    ///
    /// Overlapping keys take the new value; all other keys from both sides
    /// are kept. Empty additions short-circuit to a plain copy.
    pub fn and_metadata(&self, additional: MetaData) -> Self {
        if additional.is_empty() {
            return self.clone();
        }
        Self {
            metadata: self.metadata.merged_with(additional),
            ..self.clone()
        }
    }
}

/// An event message bound to a position in one aggregate's history.
///
/// Carries everything an [`EventEnvelope`](EventEnvelope) does, plus the
/// aggregate identifier and the sequence number of the event within that
/// aggregate's stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEventEnvelope {
    /// The aggregate this event belongs to.
    pub aggregate_id: AggregateId,

    /// Position of this event in the aggregate's history.
    pub sequence: SequenceNumber,

    /// Unique identifier for this event.
    pub event_id: EventId,

    /// When the event was created.
    pub timestamp: DateTime<Utc>,

    /// Static type tag of the payload.
    pub payload_type: String,

    /// The event payload as JSON.
    pub payload: serde_json::Value,

    /// Additional metadata about the event.
    pub metadata: MetaData,
}

impl DomainEventEnvelope {
    /// Creates a new domain event envelope with a fresh identifier, the
    /// current time and empty metadata.
    pub fn new(
        aggregate_id: AggregateId,
        sequence: SequenceNumber,
        payload_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            aggregate_id,
            sequence,
            event_id: EventId::new(),
            timestamp: Utc::now(),
            payload_type: payload_type.into(),
            payload,
            metadata: MetaData::new(),
        }
    }

    /// Binds an existing event message to an aggregate and sequence number.
    pub fn from_message(
        aggregate_id: AggregateId,
        sequence: SequenceNumber,
        message: EventEnvelope,
    ) -> Self {
        Self {
            aggregate_id,
            sequence,
            event_id: message.event_id,
            timestamp: message.timestamp,
            payload_type: message.payload_type,
            payload: message.payload,
            metadata: message.metadata,
        }
    }

    /// Returns an envelope with its metadata replaced wholesale.
    /// See [`EventEnvelope::with_metadata`].
    pub fn with_metadata(&self, metadata: MetaData) -> Self {
        if self.metadata == metadata {
            return self.clone();
        }
        Self {
            metadata,
            ..self.clone()
        }
    }

    /// Returns an envelope with `additional` merged over the existing
    /// metadata. See [`EventEnvelope::and_metadata`].
    pub fn and_metadata(&self, additional: MetaData) -> Self {
        if additional.is_empty() {
            return self.clone();
        }
        Self {
            metadata: self.metadata.merged_with(additional),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> MetaData {
        pairs
            .iter()
            .map(|(k, v)| (*k, serde_json::json!(v)))
            .collect()
    }

    #[test]
    fn event_id_new_creates_unique_ids() {
        assert_ne!(EventId::new(), EventId::new());
    }

    #[test]
    fn sequence_number_ordering() {
        let s0 = SequenceNumber::zero();
        let s1 = s0.next();
        assert!(s0 < s1);
        assert_eq!(s1.as_i64(), 1);
    }

    #[test]
    fn with_metadata_replaces_wholesale() {
        let envelope =
            EventEnvelope::new("TestEvent", serde_json::json!({"x": 1})).and_metadata(meta(&[
                ("k", "v1"),
                ("j", "x"),
            ]));

        let replaced = envelope.with_metadata(meta(&[("only", "this")]));

        assert_eq!(replaced.metadata, meta(&[("only", "this")]));
        assert_eq!(replaced.event_id, envelope.event_id);
        assert_eq!(replaced.timestamp, envelope.timestamp);
        assert_eq!(replaced.payload, envelope.payload);
        // original untouched
        assert_eq!(envelope.metadata, meta(&[("k", "v1"), ("j", "x")]));
    }

    #[test]
    fn and_metadata_merges_over_existing() {
        let envelope = EventEnvelope::new("TestEvent", serde_json::json!({}))
            .with_metadata(meta(&[("k", "v1"), ("j", "x")]));

        let merged = envelope.and_metadata(meta(&[("k", "v2")]));

        assert_eq!(merged.metadata, meta(&[("k", "v2"), ("j", "x")]));
        assert_eq!(envelope.metadata, meta(&[("k", "v1"), ("j", "x")]));
    }

    #[test]
    fn and_metadata_empty_is_a_copy() {
        let envelope =
            EventEnvelope::new("TestEvent", serde_json::json!({})).with_metadata(meta(&[("k", "v")]));
        let copy = envelope.and_metadata(MetaData::new());

        assert_eq!(copy.event_id, envelope.event_id);
        assert_eq!(copy.metadata, envelope.metadata);
    }

    #[test]
    fn domain_envelope_from_message_keeps_identity() {
        let message = EventEnvelope::new("TestEvent", serde_json::json!({"n": 7}));
        let event_id = message.event_id;
        let timestamp = message.timestamp;

        let bound =
            DomainEventEnvelope::from_message(AggregateId::new(), SequenceNumber::zero(), message);

        assert_eq!(bound.event_id, event_id);
        assert_eq!(bound.timestamp, timestamp);
        assert_eq!(bound.sequence, SequenceNumber::zero());
    }

    #[test]
    fn domain_envelope_metadata_laws() {
        let envelope = DomainEventEnvelope::new(
            AggregateId::new(),
            SequenceNumber::zero(),
            "TestEvent",
            serde_json::json!({}),
        )
        .with_metadata(meta(&[("k", "v1")]));

        let merged = envelope.and_metadata(meta(&[("k", "v2"), ("j", "x")]));
        assert_eq!(merged.metadata, meta(&[("k", "v2"), ("j", "x")]));
        assert_eq!(envelope.metadata, meta(&[("k", "v1")]));
    }
}
