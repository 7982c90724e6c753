mod availability;
mod conflict;
mod error;
mod ledger;
mod mutations;
mod queries;
mod store;
mod workflow;

pub use availability::{merge_overlapping, peak_demand, saturated_spans, subtract_intervals};
pub use conflict::{Conflict, ConflictReason, ConflictReport, LookupFailure};
pub use error::EngineError;
pub use store::{InMemoryStore, Store, StoreError};

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::auth::Authorizer;
use crate::model::*;
use crate::notify::Notifier;

type LockTable<K> = DashMap<K, Arc<Mutex<()>>>;

/// The reservation engine. Collaborators are passed in explicitly; the
/// engine itself only owns the lock tables that serialize check-then-commit.
pub struct Engine {
    pub(super) store: Arc<dyn Store>,
    pub(super) authz: Arc<dyn Authorizer>,
    pub(super) notifier: Arc<dyn Notifier>,
    resource_locks: LockTable<ResourceRef>,
    reservation_locks: LockTable<ReservationId>,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, authz: Arc<dyn Authorizer>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            authz,
            notifier,
            resource_locks: DashMap::new(),
            reservation_locks: DashMap::new(),
        }
    }

    pub async fn is_admin(&self, user: UserId) -> bool {
        self.authz.is_admin(user).await
    }

    /// Serializes every mutation of one reservation. Always taken before
    /// any resource lock.
    pub(super) async fn lock_reservation(&self, id: ReservationId) -> TableGuard<'_, ReservationId> {
        lock_entry(&self.reservation_locks, id).await
    }

    /// Resource locks in sorted order, so overlapping sets never deadlock.
    pub(super) async fn lock_resources(
        &self,
        resources: impl IntoIterator<Item = ResourceRef>,
    ) -> Vec<TableGuard<'_, ResourceRef>> {
        let mut refs: Vec<ResourceRef> = resources.into_iter().collect();
        refs.sort();
        refs.dedup();
        let mut guards = Vec::with_capacity(refs.len());
        for r in refs {
            guards.push(lock_entry(&self.resource_locks, r).await);
        }
        guards
    }

    pub(super) async fn require_admin(&self, actor: UserId) -> Result<(), EngineError> {
        if self.authz.is_admin(actor).await {
            Ok(())
        } else {
            Err(EngineError::Unauthorized(actor))
        }
    }

    pub(super) async fn load_reservation(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        self.store.load_reservation(id).await.map_err(|e| match e {
            StoreError::NotFound(_) => EngineError::ReservationNotFound(id),
            other => other.into(),
        })
    }
}

async fn lock_entry<K: Eq + Hash + Copy>(table: &LockTable<K>, key: K) -> TableGuard<'_, K> {
    // Clone the Arc out so the shard guard is released before awaiting.
    let mutex = table.entry(key).or_default().value().clone();
    let guard = mutex.lock_owned().await;
    TableGuard {
        table,
        key,
        guard: Some(guard),
    }
}

/// Holds one entry of a lock table. The entry is removed on drop unless
/// another task has cloned it to wait its turn.
pub(super) struct TableGuard<'a, K: Eq + Hash + Copy> {
    table: &'a LockTable<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Copy> Drop for TableGuard<'_, K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // The shard lock makes this atomic with `entry().or_default()`.
        self.table.remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_interval(interval: &TimeInterval) -> Result<(), EngineError> {
    use crate::limits::*;
    if interval.start < MIN_VALID_TIMESTAMP_MS || interval.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if interval.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("interval too wide"));
    }
    Ok(())
}
