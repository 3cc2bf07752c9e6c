//! Event-sourcing repository: exclusive checkout, gap-free replay,
//! optimistic persistence and conditional snapshotting.

use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use event_store::{
    AggregateId, EventStore, EventStoreError, SequenceNumber, SnapshotStore,
};
use futures_util::TryStreamExt;
use serde::{Serialize, de::DeserializeOwned};

use crate::aggregate::{Aggregate, AggregateFactory, AggregateRoot, GenericAggregateFactory};
use crate::error::RepositoryError;
use crate::lock::{LockOwner, LockRegistry};

/// Snapshotting collaborator plus the version distance that triggers a new
/// capture.
struct SnapshotPolicy {
    store: Arc<dyn SnapshotStore>,
    threshold: u64,
}

/// Repository that reconstructs aggregates by replaying their event history
/// and guarantees exclusive mutating access per aggregate within this
/// process.
///
/// [`load`](Self::load) returns the aggregate still holding its lock,
/// wrapped in a [`CheckedOutAggregate`]; the lock is released when the
/// checkout is committed, rolled back or dropped. The store-side
/// expected-sequence check on append extends the in-process guarantee
/// across processes.
pub struct EventSourcingRepository<A, S>
where
    A: Aggregate,
    S: EventStore,
{
    store: Arc<S>,
    snapshots: Option<SnapshotPolicy>,
    factory: Arc<dyn AggregateFactory<A>>,
    locks: LockRegistry,
    _phantom: PhantomData<fn() -> A>,
}

impl<A, S> EventSourcingRepository<A, S>
where
    A: Aggregate,
    S: EventStore,
{
    /// Creates a repository without snapshotting.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            snapshots: None,
            factory: Arc::new(GenericAggregateFactory),
            locks: LockRegistry::new(),
            _phantom: PhantomData,
        }
    }

    /// Creates a repository that captures a snapshot whenever the aggregate
    /// has advanced `threshold` or more events past the last snapshot.
    pub fn with_snapshots(
        store: Arc<S>,
        snapshot_store: Arc<dyn SnapshotStore>,
        threshold: u64,
    ) -> Self {
        Self {
            store,
            snapshots: Some(SnapshotPolicy {
                store: snapshot_store,
                threshold,
            }),
            factory: Arc::new(GenericAggregateFactory),
            locks: LockRegistry::new(),
            _phantom: PhantomData,
        }
    }

    /// Replaces the aggregate factory used to seed construction from the
    /// first historical event.
    pub fn with_factory(mut self, factory: Arc<dyn AggregateFactory<A>>) -> Self {
        self.factory = factory;
        self
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<A, S> EventSourcingRepository<A, S>
where
    A: Aggregate + Serialize + DeserializeOwned,
    S: EventStore,
{
    /// Checks out a brand-new aggregate under its lock.
    ///
    /// No history is read; the first commit appends from sequence 0, so an
    /// identifier that already has history fails the commit with a
    /// concurrency conflict.
    pub async fn create(&self, aggregate_id: AggregateId) -> CheckedOutAggregate<'_, A, S> {
        let owner = LockOwner::new();
        self.locks.obtain_lock(aggregate_id, owner).await;
        CheckedOutAggregate {
            repository: self,
            owner,
            root: AggregateRoot::new(aggregate_id),
            snapshot_base: None,
            finished: false,
        }
    }

    /// Loads an aggregate: obtains its lock, restores the latest snapshot
    /// if one exists, replays the event tail and hands the aggregate back
    /// still locked.
    ///
    /// When `expected_version` is given and differs from the version
    /// produced by replay, the load fails with
    /// [`VersionConflict`](RepositoryError::VersionConflict). Every failure
    /// path releases the lock before surfacing the error.
    #[tracing::instrument(skip(self), fields(aggregate_type = A::aggregate_type()))]
    pub async fn load(
        &self,
        aggregate_id: AggregateId,
        expected_version: Option<SequenceNumber>,
    ) -> Result<CheckedOutAggregate<'_, A, S>, RepositoryError> {
        let owner = LockOwner::new();
        self.locks.obtain_lock(aggregate_id, owner).await;

        match self.replay(aggregate_id, expected_version).await {
            Ok((root, snapshot_base)) => {
                metrics::counter!("aggregate_loads_total").increment(1);
                Ok(CheckedOutAggregate {
                    repository: self,
                    owner,
                    root,
                    snapshot_base,
                    finished: false,
                })
            }
            Err(error) => {
                if matches!(error, RepositoryError::VersionConflict { .. }) {
                    metrics::counter!("concurrency_conflicts_total").increment(1);
                }
                if let Err(release_error) = self.locks.release_lock(aggregate_id, owner) {
                    tracing::error!(
                        %aggregate_id,
                        error = %release_error,
                        "failed to release lock after load error"
                    );
                }
                Err(error)
            }
        }
    }

    /// Reconstructs the aggregate from snapshot and tail. Returns the root
    /// and the sequence the latest snapshot was taken at, if any.
    async fn replay(
        &self,
        aggregate_id: AggregateId,
        expected_version: Option<SequenceNumber>,
    ) -> Result<(AggregateRoot<A>, Option<SequenceNumber>), RepositoryError> {
        let snapshot = match &self.snapshots {
            Some(policy) => policy.store.read_latest(aggregate_id).await?,
            None => None,
        };

        let (mut root, snapshot_base) = match snapshot {
            Some(snapshot) => {
                let base = snapshot.sequence;
                tracing::debug!(%aggregate_id, sequence = %base, "restoring from snapshot");
                let state: A = snapshot.into_state()?;
                (
                    Some(AggregateRoot::restore(aggregate_id, state, base)),
                    Some(base),
                )
            }
            None => (None, None),
        };

        let mut expected = snapshot_base
            .map(|s| s.next())
            .unwrap_or(SequenceNumber::zero());
        let mut tail = self.store.read_tail(aggregate_id, snapshot_base).await?;

        while let Some(envelope) = tail.try_next().await? {
            if envelope.sequence != expected {
                return Err(RepositoryError::CorruptedStream {
                    aggregate_id,
                    expected,
                    actual: envelope.sequence,
                });
            }
            match root.as_mut() {
                Some(root) => root.apply_historical(&envelope)?,
                None => root = Some(self.factory.create(aggregate_id, &envelope)?),
            }
            expected = expected.next();
        }

        let root = root.ok_or(RepositoryError::AggregateNotFound(aggregate_id))?;

        if let Some(expected_version) = expected_version
            && let Some(actual) = root.version()
            && actual != expected_version
        {
            return Err(RepositoryError::VersionConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }

        Ok((root, snapshot_base))
    }

    /// Persists a checkout and releases its lock.
    ///
    /// The lock must still be held by `owner`; saving without it is a
    /// caller bug and does not release anything. On every other path,
    /// success or failure, the lock is released before returning.
    async fn save(
        &self,
        root: &mut AggregateRoot<A>,
        owner: LockOwner,
        snapshot_base: Option<SequenceNumber>,
    ) -> Result<(), RepositoryError> {
        let aggregate_id = root.id();
        if !self.locks.validate_lock(aggregate_id, owner) {
            return Err(crate::lock::LockError::NotHeld(aggregate_id).into());
        }

        let result = self.persist(root, snapshot_base).await;

        if let Err(release_error) = self.locks.release_lock(aggregate_id, owner) {
            tracing::error!(
                %aggregate_id,
                error = %release_error,
                "failed to release lock after save"
            );
        }
        result
    }

    #[tracing::instrument(
        skip(self, root),
        fields(aggregate_type = A::aggregate_type(), aggregate_id = %root.id())
    )]
    async fn persist(
        &self,
        root: &mut AggregateRoot<A>,
        snapshot_base: Option<SequenceNumber>,
    ) -> Result<(), RepositoryError> {
        let aggregate_id = root.id();
        let events = root.pull_uncommitted_events();

        if !events.is_empty() {
            let expected_next = events[0].sequence;
            let count = events.len();
            match self.store.append(aggregate_id, expected_next, events).await {
                Ok(head) => {
                    metrics::counter!("events_appended_total").increment(count as u64);
                    tracing::debug!(count, head = %head, "appended events");
                }
                Err(error) => {
                    if matches!(error, EventStoreError::ConcurrencyConflict { .. }) {
                        metrics::counter!("concurrency_conflicts_total").increment(1);
                    }
                    return Err(error.into());
                }
            }
        }

        self.write_snapshot_if_due(root, snapshot_base).await;
        metrics::counter!("aggregate_saves_total").increment(1);
        Ok(())
    }

    /// Captures a snapshot when the aggregate has advanced far enough past
    /// the last one. Snapshot failures are logged and swallowed: the event
    /// append has already committed and the log is the source of truth.
    async fn write_snapshot_if_due(
        &self,
        root: &AggregateRoot<A>,
        snapshot_base: Option<SequenceNumber>,
    ) {
        let Some(policy) = &self.snapshots else {
            return;
        };
        let Some(version) = root.version() else {
            return;
        };
        let base = snapshot_base.map(|s| s.as_i64()).unwrap_or(-1);
        if version.as_i64() - base < policy.threshold as i64 || root.uncommitted_count() != 0 {
            return;
        }

        let written = match root.to_snapshot() {
            Ok(snapshot) => policy.store.write(snapshot).await,
            Err(error) => {
                tracing::warn!(aggregate_id = %root.id(), error = %error, "snapshot skipped");
                return;
            }
        };
        match written {
            Ok(()) => {
                metrics::counter!("snapshots_written_total").increment(1);
                tracing::debug!(aggregate_id = %root.id(), sequence = %version, "snapshot written");
            }
            Err(error) => {
                tracing::warn!(
                    aggregate_id = %root.id(),
                    error = %error,
                    "snapshot write failed; event log remains authoritative"
                );
            }
        }
    }
}

/// An aggregate checked out of the repository, still holding its lock.
///
/// Exactly one of [`commit`](Self::commit) and [`rollback`](Self::rollback)
/// completes a checkout; dropping an unfinished checkout behaves like a
/// rollback, releasing the lock without persisting anything. Dereferences
/// to the [`AggregateRoot`] for raising events and inspecting state.
pub struct CheckedOutAggregate<'r, A, S>
where
    A: Aggregate,
    S: EventStore,
{
    repository: &'r EventSourcingRepository<A, S>,
    owner: LockOwner,
    root: AggregateRoot<A>,
    snapshot_base: Option<SequenceNumber>,
    finished: bool,
}

impl<A, S> CheckedOutAggregate<'_, A, S>
where
    A: Aggregate + Serialize + DeserializeOwned,
    S: EventStore,
{
    /// Commits the checkout: drains the uncommitted events, appends them as
    /// one batch, snapshots if due and releases the lock.
    pub async fn commit(mut self) -> Result<(), RepositoryError> {
        self.finished = true;
        self.repository
            .save(&mut self.root, self.owner, self.snapshot_base)
            .await
    }

    /// Abandons the checkout: releases the lock and discards the buffered
    /// events without persisting anything.
    pub fn rollback(mut self) {
        self.finished = true;
        self.release();
    }
}

impl<A, S> CheckedOutAggregate<'_, A, S>
where
    A: Aggregate,
    S: EventStore,
{
    fn release(&self) {
        if let Err(error) = self
            .repository
            .locks
            .release_lock(self.root.id(), self.owner)
        {
            tracing::error!(
                aggregate_id = %self.root.id(),
                error = %error,
                "failed to release checkout lock"
            );
        }
    }
}

impl<A, S> Deref for CheckedOutAggregate<'_, A, S>
where
    A: Aggregate,
    S: EventStore,
{
    type Target = AggregateRoot<A>;

    fn deref(&self) -> &Self::Target {
        &self.root
    }
}

impl<A, S> DerefMut for CheckedOutAggregate<'_, A, S>
where
    A: Aggregate,
    S: EventStore,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.root
    }
}

impl<A, S> Drop for CheckedOutAggregate<'_, A, S>
where
    A: Aggregate,
    S: EventStore,
{
    fn drop(&mut self) {
        if !self.finished {
            self.release();
        }
    }
}
