//! Concurrency-controlled, event-sourced aggregate repository.
//!
//! Aggregates are reconstructed by replaying their event history (optionally
//! shortcut through a snapshot) and handed out one checkout at a time per
//! identifier: [`EventSourcingRepository::load`] returns a
//! [`CheckedOutAggregate`] holding a per-aggregate lock that is released on
//! commit, rollback or drop. Persistence is optimistic: the store rejects
//! appends whose expected next sequence no longer matches the log.

pub mod aggregate;
pub mod error;
pub mod lock;
pub mod repository;

pub use aggregate::{
    Aggregate, AggregateFactory, AggregateRoot, DomainEvent, GenericAggregateFactory,
};
pub use error::{RepositoryError, Result};
pub use lock::{LockError, LockOwner, LockRegistry};
pub use repository::{CheckedOutAggregate, EventSourcingRepository};
