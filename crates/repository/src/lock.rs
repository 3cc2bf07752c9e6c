//! Per-aggregate exclusive locking with self-disposing registry entries.
//!
//! The registry maps aggregate identifiers to lock entries and shrinks back
//! to empty when uncontended: releasing the last hold on an entry closes it
//! and removes it from the map. A closed entry is never reused; obtainers
//! that raced against disposal observe the closed flag and retry against a
//! fresh entry.

use std::sync::Arc;

use dashmap::DashMap;
use event_store::AggregateId;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use uuid::Uuid;

/// Errors raised by incorrect lock usage. These indicate caller bugs and are
/// never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockError {
    /// `release_lock` was called for an identifier no lock was ever obtained
    /// for (or whose lock has already been fully released and disposed).
    #[error("no lock for aggregate {0} was ever obtained")]
    NeverObtained(AggregateId),

    /// The lock exists but is not held by the releasing owner.
    #[error("lock for aggregate {0} is not held by this owner")]
    NotHeld(AggregateId),
}

/// Identity of a lock holder.
///
/// One token represents one logical operation (a repository checkout, a
/// request handler); holds are reentrant per token. Tokens stand in for
/// thread identity, which tasks migrating across a multi-threaded runtime
/// do not have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockOwner(Uuid);

impl LockOwner {
    /// Creates a fresh owner token.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LockOwner {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct LockState {
    owner: Option<LockOwner>,
    depth: u32,
    closed: bool,
}

/// A registry entry. Once `closed` is set the entry is dead: it stays
/// closed forever and a fresh entry replaces it in the map.
#[derive(Debug, Default)]
struct DisposableLock {
    state: Mutex<LockState>,
    released: Notify,
}

/// Per-aggregate exclusive-access manager.
///
/// `obtain_lock` blocks (asynchronously) until the caller holds exclusive,
/// per-owner-reentrant access to the identifier. Entries dispose themselves
/// on the last release, so an idle registry holds no entries and no global
/// lock serializes access across identifiers.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: DashMap<AggregateId, Arc<DisposableLock>>,
}

impl LockRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Obtains the lock for `aggregate_id` on behalf of `owner`.
    ///
    /// Waits as long as another owner holds the lock; reentrant calls by the
    /// same owner return immediately with an increased hold depth. Never
    /// fails.
    pub async fn obtain_lock(&self, aggregate_id: AggregateId, owner: LockOwner) {
        loop {
            let entry = self.locks.entry(aggregate_id).or_default().clone();
            if self.acquire(&entry, aggregate_id, owner).await {
                return;
            }
            // entry was closed under us; retry against a fresh one
        }
    }

    /// Releases one level of `owner`'s hold on `aggregate_id`.
    ///
    /// When the last level is released, waiters are woken and the entry is
    /// disposed if nobody took it in the meantime.
    pub fn release_lock(
        &self,
        aggregate_id: AggregateId,
        owner: LockOwner,
    ) -> Result<(), LockError> {
        let entry = self
            .locks
            .get(&aggregate_id)
            .map(|e| e.value().clone())
            .ok_or(LockError::NeverObtained(aggregate_id))?;

        {
            let mut state = entry.state.lock();
            if state.owner != Some(owner) {
                return Err(LockError::NotHeld(aggregate_id));
            }
            state.depth -= 1;
            if state.depth == 0 {
                state.owner = None;
            }
        }

        entry.released.notify_waiters();
        self.dispose_if_unused(aggregate_id, &entry);
        Ok(())
    }

    /// Returns whether an entry exists for `aggregate_id` and `owner`
    /// currently holds it. Cheap ownership check before mutation.
    pub fn validate_lock(&self, aggregate_id: AggregateId, owner: LockOwner) -> bool {
        match self.locks.get(&aggregate_id) {
            Some(entry) => {
                let entry = entry.value().clone();
                let state = entry.state.lock();
                state.owner == Some(owner)
            }
            None => false,
        }
    }

    /// Number of live entries. An uncontended registry drains to zero.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Returns whether the registry holds no entries.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Tries to take `entry`. Returns `false` if the entry turned out to be
    /// closed, in which case its stale mapping has been removed and the
    /// caller must retry from the map.
    async fn acquire(
        &self,
        entry: &Arc<DisposableLock>,
        aggregate_id: AggregateId,
        owner: LockOwner,
    ) -> bool {
        loop {
            // Register for wakeups before inspecting the state, so a release
            // between the check and the await cannot be missed.
            let notified = entry.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = entry.state.lock();
                if state.closed {
                    drop(state);
                    self.locks
                        .remove_if(&aggregate_id, |_, current| Arc::ptr_eq(current, entry));
                    return false;
                }
                match state.owner {
                    None => {
                        state.owner = Some(owner);
                        state.depth = 1;
                        return true;
                    }
                    Some(holder) if holder == owner => {
                        state.depth += 1;
                        return true;
                    }
                    Some(_) => {}
                }
            }

            notified.await;
        }
    }

    /// Non-blocking disposal probe run after a release.
    ///
    /// If the entry's state can be inspected without waiting and nobody
    /// holds it, the entry is closed and compare-and-removed by identity,
    /// never removing a newer entry installed during a race. A failed probe
    /// under contention leaves a harmless live entry behind.
    fn dispose_if_unused(&self, aggregate_id: AggregateId, entry: &Arc<DisposableLock>) {
        let Some(mut state) = entry.state.try_lock() else {
            return;
        };
        if state.owner.is_some() || state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        self.locks
            .remove_if(&aggregate_id, |_, current| Arc::ptr_eq(current, entry));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn obtain_and_release_empties_registry() {
        let registry = LockRegistry::new();
        let id = AggregateId::new();
        let owner = LockOwner::new();

        registry.obtain_lock(id, owner).await;
        assert_eq!(registry.len(), 1);

        registry.release_lock(id, owner).unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn reentrant_holds_require_matching_releases() {
        let registry = LockRegistry::new();
        let id = AggregateId::new();
        let owner = LockOwner::new();

        registry.obtain_lock(id, owner).await;
        registry.obtain_lock(id, owner).await;

        registry.release_lock(id, owner).unwrap();
        // still held: one level remains
        assert!(registry.validate_lock(id, owner));

        registry.release_lock(id, owner).unwrap();
        assert!(!registry.validate_lock(id, owner));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn release_without_obtain_is_an_error() {
        let registry = LockRegistry::new();
        let id = AggregateId::new();

        assert_eq!(
            registry.release_lock(id, LockOwner::new()),
            Err(LockError::NeverObtained(id))
        );
    }

    #[tokio::test]
    async fn release_by_non_holder_is_an_error() {
        let registry = LockRegistry::new();
        let id = AggregateId::new();
        let holder = LockOwner::new();

        registry.obtain_lock(id, holder).await;
        assert_eq!(
            registry.release_lock(id, LockOwner::new()),
            Err(LockError::NotHeld(id))
        );

        registry.release_lock(id, holder).unwrap();
    }

    #[tokio::test]
    async fn validate_lock_distinguishes_owners() {
        let registry = LockRegistry::new();
        let id = AggregateId::new();
        let holder = LockOwner::new();

        assert!(!registry.validate_lock(id, holder));

        registry.obtain_lock(id, holder).await;
        assert!(registry.validate_lock(id, holder));
        assert!(!registry.validate_lock(id, LockOwner::new()));

        registry.release_lock(id, holder).unwrap();
        assert!(!registry.validate_lock(id, holder));
    }

    #[tokio::test]
    async fn locks_on_distinct_aggregates_are_independent() {
        let registry = LockRegistry::new();
        let a = AggregateId::new();
        let b = AggregateId::new();
        let owner_a = LockOwner::new();
        let owner_b = LockOwner::new();

        registry.obtain_lock(a, owner_a).await;
        // must not block on a different identifier
        registry.obtain_lock(b, owner_b).await;

        registry.release_lock(a, owner_a).unwrap();
        registry.release_lock(b, owner_b).unwrap();
        assert!(registry.is_empty());
    }
}
