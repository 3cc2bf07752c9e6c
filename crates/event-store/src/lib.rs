pub mod error;
pub mod event;
pub mod memory;
pub mod metadata;
pub mod serializer;
pub mod snapshot;
pub mod store;

pub use error::{EventStoreError, Result};
pub use event::{AggregateId, DomainEventEnvelope, EventEnvelope, EventId, SequenceNumber};
pub use memory::InMemoryEventStore;
pub use metadata::MetaData;
pub use serializer::{JsonSerializer, SerializedObject, SerializedType, Serializer, SerializerRegistry};
pub use snapshot::Snapshot;
pub use store::{EventStore, EventStream, SnapshotStore};
