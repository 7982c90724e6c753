use std::io;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;
use crate::wal::{Wal, WalHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(String),
    Conflict(String),
    TransientFailure(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(what) => write!(f, "not found: {what}"),
            StoreError::Conflict(what) => write!(f, "conflicting write: {what}"),
            StoreError::TransientFailure(e) => write!(f, "transient storage failure: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::TransientFailure(e.to_string())
    }
}

/// Persistence seam for resources, reservations and their history.
///
/// Every mutating call is one commit: either all of it is visible afterwards
/// or none of it is.
#[async_trait]
pub trait Store: Send + Sync {
    async fn load_resource(&self, resource: ResourceRef) -> Result<Resource, StoreError>;

    /// Items on `resource` overlapping `window` whose reservation is neither
    /// canceled nor rejected.
    async fn load_booked_intervals(
        &self,
        resource: ResourceRef,
        window: TimeInterval,
    ) -> Result<Vec<BookedInterval>, StoreError>;

    async fn register_resource(&self, resource: Resource) -> Result<(), StoreError>;
    async fn set_resource_active(&self, resource: ResourceRef, active: bool) -> Result<(), StoreError>;
    async fn list_resources(&self) -> Result<Vec<Resource>, StoreError>;

    async fn load_reservation(&self, id: ReservationId) -> Result<Reservation, StoreError>;
    async fn list_reservations(&self, requester: Option<UserId>) -> Result<Vec<Reservation>, StoreError>;

    /// Header and items together.
    async fn create_reservation(&self, reservation: Reservation) -> Result<(), StoreError>;
    async fn replace_reservation_items(
        &self,
        id: ReservationId,
        items: Vec<ReservationItem>,
        audit: ReservationAudit,
    ) -> Result<(), StoreError>;
    async fn update_reservation_status(
        &self,
        id: ReservationId,
        status: ReservationStatus,
        log: ApprovalLog,
    ) -> Result<(), StoreError>;
    async fn cancel_reservation(&self, id: ReservationId, audit: ReservationAudit) -> Result<(), StoreError>;

    /// Newest first.
    async fn approval_logs(&self, id: ReservationId) -> Result<Vec<ApprovalLog>, StoreError>;
    /// Newest first.
    async fn audit_trail(&self, id: ReservationId) -> Result<Vec<ReservationAudit>, StoreError>;

    async fn find_approval_log(&self, entry_id: Ulid) -> Result<Option<ApprovalLog>, StoreError>;
    async fn find_audit(&self, entry_id: Ulid) -> Result<Option<ReservationAudit>, StoreError>;
}

#[derive(Debug, Clone)]
struct ReservationRecord {
    reservation: Reservation,
    approval_logs: Vec<ApprovalLog>,
    audits: Vec<ReservationAudit>,
}

/// DashMap-backed store. With a WAL attached every commit is durable before
/// it becomes visible.
pub struct InMemoryStore {
    resources: DashMap<ResourceRef, Resource>,
    reservations: DashMap<ReservationId, ReservationRecord>,
    timelines: DashMap<ResourceRef, ResourceTimeline>,
    log_index: DashMap<Ulid, ReservationId>,
    audit_index: DashMap<Ulid, ReservationId>,
    wal: Option<WalHandle>,
    /// Commits share it, compaction takes it exclusively.
    commit_gate: RwLock<()>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Volatile store, nothing is written to disk.
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
            reservations: DashMap::new(),
            timelines: DashMap::new(),
            log_index: DashMap::new(),
            audit_index: DashMap::new(),
            wal: None,
            commit_gate: RwLock::new(()),
        }
    }

    /// Replay the WAL at `path` and keep appending to it.
    /// Must be called inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let mut store = Self::new();
        for event in &events {
            store.apply_event(event);
        }
        tracing::info!(
            "replayed {} WAL records: {} resources, {} reservations",
            events.len(),
            store.resources.len(),
            store.reservations.len()
        );
        store.wal = Some(WalHandle::spawn(wal));
        Ok(store)
    }

    pub async fn appends_since_compact(&self) -> u64 {
        match &self.wal {
            Some(wal) => wal.appends_since_compact().await,
            None => 0,
        }
    }

    /// Rewrite the WAL as one snapshot record per resource and reservation.
    pub async fn compact(&self) -> Result<usize, StoreError> {
        let Some(wal) = &self.wal else {
            return Ok(0);
        };
        let _gate = self.commit_gate.write().await;
        let events = self.snapshot_events();
        let count = events.len();
        wal.compact(events).await?;
        Ok(count)
    }

    fn snapshot_events(&self) -> Vec<Event> {
        let mut resources: Vec<Resource> = self.resources.iter().map(|e| e.value().clone()).collect();
        resources.sort_by_key(|r| r.resource);
        let mut records: Vec<ReservationRecord> =
            self.reservations.iter().map(|e| e.value().clone()).collect();
        records.sort_by_key(|r| r.reservation.id);

        resources
            .into_iter()
            .map(|resource| Event::ResourceRegistered { resource })
            .chain(records.into_iter().map(|r| Event::ReservationSnapshot {
                reservation: r.reservation,
                approval_logs: r.approval_logs,
                audits: r.audits,
            }))
            .collect()
    }

    /// WAL first, then memory.
    async fn commit(&self, event: Event) -> Result<(), StoreError> {
        let _gate = self.commit_gate.read().await;
        if let Some(wal) = &self.wal {
            wal.append(event.clone()).await?;
        }
        self.apply_event(&event);
        Ok(())
    }

    fn require_reservation(&self, id: ReservationId) -> Result<(), StoreError> {
        if self.reservations.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("reservation {id}")))
        }
    }

    fn index_items(&self, reservation_id: ReservationId, items: &[ReservationItem]) {
        for item in items {
            self.timelines.entry(item.resource).or_default().insert(TimelineEntry {
                item_id: item.id,
                reservation_id,
                interval: item.interval,
                quantity: item.quantity,
            });
        }
    }

    fn unindex_items(&self, reservation_id: ReservationId, items: &[ReservationItem]) {
        let mut touched: Vec<ResourceRef> = items.iter().map(|i| i.resource).collect();
        touched.sort();
        touched.dedup();
        for resource in touched {
            if let Some(mut tl) = self.timelines.get_mut(&resource) {
                tl.remove_reservation(reservation_id);
            }
        }
    }

    /// Apply an already-durable event. Guards on `reservations` are dropped
    /// before `timelines` is touched.
    fn apply_event(&self, event: &Event) {
        match event {
            Event::ResourceRegistered { resource } => {
                self.timelines.entry(resource.resource).or_default();
                self.resources.insert(resource.resource, resource.clone());
            }
            Event::ResourceActivationChanged { resource, active } => {
                if let Some(mut r) = self.resources.get_mut(resource) {
                    r.active = *active;
                }
            }
            Event::ReservationCreated { reservation } => {
                self.insert_record(ReservationRecord {
                    reservation: reservation.clone(),
                    approval_logs: Vec::new(),
                    audits: Vec::new(),
                });
            }
            Event::ReservationSnapshot {
                reservation,
                approval_logs,
                audits,
            } => {
                self.insert_record(ReservationRecord {
                    reservation: reservation.clone(),
                    approval_logs: approval_logs.clone(),
                    audits: audits.clone(),
                });
            }
            Event::ItemsReplaced {
                reservation_id,
                items,
                audit,
            } => {
                if self.audit_index.contains_key(&audit.id) {
                    return;
                }
                let old_items = {
                    let Some(mut rec) = self.reservations.get_mut(reservation_id) else {
                        return;
                    };
                    let old = std::mem::replace(&mut rec.reservation.items, items.clone());
                    rec.reservation.updated_at = audit.changed_at;
                    rec.audits.push(audit.clone());
                    old
                };
                self.audit_index.insert(audit.id, *reservation_id);
                self.unindex_items(*reservation_id, &old_items);
                self.index_items(*reservation_id, items);
            }
            Event::StatusChanged {
                reservation_id,
                status,
                log,
            } => {
                if self.log_index.contains_key(&log.id) {
                    return;
                }
                let Some(mut rec) = self.reservations.get_mut(reservation_id) else {
                    return;
                };
                rec.reservation.status = *status;
                rec.reservation.updated_at = log.acted_at;
                rec.approval_logs.push(log.clone());
                drop(rec);
                self.log_index.insert(log.id, *reservation_id);
            }
            Event::ReservationCanceled { reservation_id, audit } => {
                if self.audit_index.contains_key(&audit.id) {
                    return;
                }
                let items = {
                    let Some(mut rec) = self.reservations.get_mut(reservation_id) else {
                        return;
                    };
                    rec.reservation.is_canceled = true;
                    rec.reservation.updated_at = audit.changed_at;
                    rec.audits.push(audit.clone());
                    rec.reservation.items.clone()
                };
                self.audit_index.insert(audit.id, *reservation_id);
                self.unindex_items(*reservation_id, &items);
            }
        }
    }

    fn insert_record(&self, record: ReservationRecord) {
        let id = record.reservation.id;
        for log in &record.approval_logs {
            self.log_index.insert(log.id, id);
        }
        for audit in &record.audits {
            self.audit_index.insert(audit.id, id);
        }
        if !record.reservation.is_canceled {
            self.index_items(id, &record.reservation.items);
        }
        self.reservations.insert(id, record);
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn load_resource(&self, resource: ResourceRef) -> Result<Resource, StoreError> {
        self.resources
            .get(&resource)
            .map(|r| r.value().clone())
            .ok_or_else(|| StoreError::NotFound(resource.to_string()))
    }

    async fn load_booked_intervals(
        &self,
        resource: ResourceRef,
        window: TimeInterval,
    ) -> Result<Vec<BookedInterval>, StoreError> {
        let entries: Vec<TimelineEntry> = match self.timelines.get(&resource) {
            Some(tl) => tl.overlapping(&window).copied().collect(),
            None => return Err(StoreError::NotFound(resource.to_string())),
        };
        Ok(entries
            .into_iter()
            .filter(|e| {
                self.reservations
                    .get(&e.reservation_id)
                    .is_some_and(|rec| rec.reservation.holds_resources())
            })
            .map(|e| BookedInterval {
                interval: e.interval,
                reservation_id: e.reservation_id,
                item_id: e.item_id,
                quantity: e.quantity,
            })
            .collect())
    }

    async fn register_resource(&self, resource: Resource) -> Result<(), StoreError> {
        if self.resources.contains_key(&resource.resource) {
            return Err(StoreError::Conflict(resource.resource.to_string()));
        }
        self.commit(Event::ResourceRegistered { resource }).await
    }

    async fn set_resource_active(&self, resource: ResourceRef, active: bool) -> Result<(), StoreError> {
        if !self.resources.contains_key(&resource) {
            return Err(StoreError::NotFound(resource.to_string()));
        }
        self.commit(Event::ResourceActivationChanged { resource, active }).await
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, StoreError> {
        let mut out: Vec<Resource> = self.resources.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.resource.cmp(&b.resource)));
        Ok(out)
    }

    async fn load_reservation(&self, id: ReservationId) -> Result<Reservation, StoreError> {
        self.reservations
            .get(&id)
            .map(|rec| rec.reservation.clone())
            .ok_or_else(|| StoreError::NotFound(format!("reservation {id}")))
    }

    async fn list_reservations(&self, requester: Option<UserId>) -> Result<Vec<Reservation>, StoreError> {
        Ok(self
            .reservations
            .iter()
            .filter(|rec| requester.is_none_or(|u| rec.reservation.requester == u))
            .map(|rec| rec.reservation.clone())
            .collect())
    }

    async fn create_reservation(&self, reservation: Reservation) -> Result<(), StoreError> {
        if self.reservations.contains_key(&reservation.id) {
            return Err(StoreError::Conflict(format!("reservation {}", reservation.id)));
        }
        self.commit(Event::ReservationCreated { reservation }).await
    }

    async fn replace_reservation_items(
        &self,
        id: ReservationId,
        items: Vec<ReservationItem>,
        audit: ReservationAudit,
    ) -> Result<(), StoreError> {
        self.require_reservation(id)?;
        if self.audit_index.contains_key(&audit.id) {
            return Err(StoreError::Conflict(format!("audit entry {}", audit.id)));
        }
        self.commit(Event::ItemsReplaced {
            reservation_id: id,
            items,
            audit,
        })
        .await
    }

    async fn update_reservation_status(
        &self,
        id: ReservationId,
        status: ReservationStatus,
        log: ApprovalLog,
    ) -> Result<(), StoreError> {
        self.require_reservation(id)?;
        if self.log_index.contains_key(&log.id) {
            return Err(StoreError::Conflict(format!("approval log entry {}", log.id)));
        }
        self.commit(Event::StatusChanged {
            reservation_id: id,
            status,
            log,
        })
        .await
    }

    async fn cancel_reservation(&self, id: ReservationId, audit: ReservationAudit) -> Result<(), StoreError> {
        self.require_reservation(id)?;
        if self.audit_index.contains_key(&audit.id) {
            return Err(StoreError::Conflict(format!("audit entry {}", audit.id)));
        }
        self.commit(Event::ReservationCanceled {
            reservation_id: id,
            audit,
        })
        .await
    }

    async fn approval_logs(&self, id: ReservationId) -> Result<Vec<ApprovalLog>, StoreError> {
        let rec = self
            .reservations
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("reservation {id}")))?;
        let mut logs = rec.approval_logs.clone();
        logs.sort_by(|a, b| b.acted_at.cmp(&a.acted_at).then(b.id.cmp(&a.id)));
        Ok(logs)
    }

    async fn audit_trail(&self, id: ReservationId) -> Result<Vec<ReservationAudit>, StoreError> {
        let rec = self
            .reservations
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("reservation {id}")))?;
        let mut audits = rec.audits.clone();
        audits.sort_by(|a, b| b.changed_at.cmp(&a.changed_at).then(b.id.cmp(&a.id)));
        Ok(audits)
    }

    async fn find_approval_log(&self, entry_id: Ulid) -> Result<Option<ApprovalLog>, StoreError> {
        let Some(reservation_id) = self.log_index.get(&entry_id).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self.reservations.get(&reservation_id).and_then(|rec| {
            rec.approval_logs.iter().find(|l| l.id == entry_id).cloned()
        }))
    }

    async fn find_audit(&self, entry_id: Ulid) -> Result<Option<ReservationAudit>, StoreError> {
        let Some(reservation_id) = self.audit_index.get(&entry_id).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self
            .reservations
            .get(&reservation_id)
            .and_then(|rec| rec.audits.iter().find(|a| a.id == entry_id).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(start: Ms, end: Ms) -> TimeInterval {
        TimeInterval::new(start, end).unwrap()
    }

    fn reservation(requester: UserId, resource: ResourceRef, start: Ms, end: Ms, quantity: u32) -> Reservation {
        Reservation {
            id: Ulid::new(),
            requester,
            purpose: "lab session".into(),
            attendees: Some(12),
            status: ReservationStatus::Pending,
            is_canceled: false,
            items: vec![ReservationItem {
                id: Ulid::new(),
                resource,
                interval: iv(start, end),
                quantity,
            }],
            created_at: 1,
            updated_at: 1,
        }
    }

    fn audit(reservation_id: ReservationId, change: AuditChange, at: Ms) -> ReservationAudit {
        ReservationAudit {
            id: Ulid::new(),
            reservation_id,
            changed_by: Ulid::new(),
            change,
            change_data: "{}".into(),
            changed_at: at,
        }
    }

    fn log(reservation_id: ReservationId, action: ApprovalAction, at: Ms) -> ApprovalLog {
        ApprovalLog {
            id: Ulid::new(),
            reservation_id,
            acted_by: Ulid::new(),
            action,
            comment: None,
            acted_at: at,
        }
    }

    fn wal_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("reservd_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn booked_intervals_skip_canceled_and_rejected() {
        let store = InMemoryStore::new();
        let room = Resource::facility(Ulid::new(), "F101");
        let rref = room.resource;
        store.register_resource(room).await.unwrap();

        let kept = reservation(Ulid::new(), rref, 100, 200, 1);
        let rejected = reservation(Ulid::new(), rref, 150, 250, 1);
        let canceled = reservation(Ulid::new(), rref, 120, 180, 1);
        for r in [&kept, &rejected, &canceled] {
            store.create_reservation(r.clone()).await.unwrap();
        }
        store
            .update_reservation_status(rejected.id, ReservationStatus::Rejected, log(rejected.id, ApprovalAction::Reject, 5))
            .await
            .unwrap();
        store
            .cancel_reservation(canceled.id, audit(canceled.id, AuditChange::Canceled, 6))
            .await
            .unwrap();

        let booked = store.load_booked_intervals(rref, iv(0, 1000)).await.unwrap();
        assert_eq!(booked.len(), 1);
        assert_eq!(booked[0].reservation_id, kept.id);
    }

    #[tokio::test]
    async fn unknown_resource_is_not_found() {
        let store = InMemoryStore::new();
        let err = store
            .load_booked_intervals(ResourceRef::facility(Ulid::new()), iv(0, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn kind_is_part_of_identity() {
        let store = InMemoryStore::new();
        let id = Ulid::new();
        store.register_resource(Resource::equipment(id, "Projector", 2)).await.unwrap();
        assert!(store.load_resource(ResourceRef::facility(id)).await.is_err());
        assert!(store.load_resource(ResourceRef::equipment(id)).await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_entry_ids_are_rejected() {
        let store = InMemoryStore::new();
        let room = Resource::facility(Ulid::new(), "F102");
        let rref = room.resource;
        store.register_resource(room.clone()).await.unwrap();
        assert_eq!(
            store.register_resource(room).await,
            Err(StoreError::Conflict(rref.to_string()))
        );

        let r = reservation(Ulid::new(), rref, 0, 10, 1);
        store.create_reservation(r.clone()).await.unwrap();
        let entry = log(r.id, ApprovalAction::Approve, 3);
        store
            .update_reservation_status(r.id, ReservationStatus::Approved, entry.clone())
            .await
            .unwrap();
        let again = store
            .update_reservation_status(r.id, ReservationStatus::Approved, entry.clone())
            .await;
        assert!(matches!(again, Err(StoreError::Conflict(_))));
        assert_eq!(store.approval_logs(r.id).await.unwrap().len(), 1);
        assert_eq!(store.find_approval_log(entry.id).await.unwrap(), Some(entry));
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let store = InMemoryStore::new();
        let room = Resource::facility(Ulid::new(), "F103");
        let rref = room.resource;
        store.register_resource(room).await.unwrap();
        let r = reservation(Ulid::new(), rref, 0, 10, 1);
        store.create_reservation(r.clone()).await.unwrap();
        store
            .update_reservation_status(r.id, ReservationStatus::ChangeRequested, log(r.id, ApprovalAction::RequestChange, 10))
            .await
            .unwrap();
        store
            .update_reservation_status(r.id, ReservationStatus::Approved, log(r.id, ApprovalAction::Approve, 20))
            .await
            .unwrap();

        let logs = store.approval_logs(r.id).await.unwrap();
        assert_eq!(logs[0].action, ApprovalAction::Approve);
        assert_eq!(logs[1].action, ApprovalAction::RequestChange);
        assert_eq!(store.load_reservation(r.id).await.unwrap().updated_at, 20);
    }

    #[tokio::test]
    async fn replace_items_moves_timeline_entries() {
        let store = InMemoryStore::new();
        let a = Resource::facility(Ulid::new(), "A");
        let b = Resource::facility(Ulid::new(), "B");
        let (aref, bref) = (a.resource, b.resource);
        store.register_resource(a).await.unwrap();
        store.register_resource(b).await.unwrap();
        let r = reservation(Ulid::new(), aref, 0, 100, 1);
        store.create_reservation(r.clone()).await.unwrap();

        let moved = vec![ReservationItem {
            id: Ulid::new(),
            resource: bref,
            interval: iv(0, 100),
            quantity: 1,
        }];
        store
            .replace_reservation_items(r.id, moved, audit(r.id, AuditChange::ItemsEdited, 7))
            .await
            .unwrap();

        assert!(store.load_booked_intervals(aref, iv(0, 100)).await.unwrap().is_empty());
        assert_eq!(store.load_booked_intervals(bref, iv(0, 100)).await.unwrap().len(), 1);
        assert_eq!(store.audit_trail(r.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn wal_replay_restores_state() {
        let path = wal_path("replay_restores.wal");
        let rref;
        let rid;
        {
            let store = InMemoryStore::open(&path).unwrap();
            let kit = Resource::equipment(Ulid::new(), "Projector", 3);
            rref = kit.resource;
            store.register_resource(kit).await.unwrap();
            let r = reservation(Ulid::new(), rref, 0, 100, 2);
            rid = r.id;
            store.create_reservation(r).await.unwrap();
            store
                .update_reservation_status(rid, ReservationStatus::Approved, log(rid, ApprovalAction::Approve, 9))
                .await
                .unwrap();
        }

        let store = InMemoryStore::open(&path).unwrap();
        let r = store.load_reservation(rid).await.unwrap();
        assert_eq!(r.status, ReservationStatus::Approved);
        assert_eq!(store.approval_logs(rid).await.unwrap().len(), 1);
        let booked = store.load_booked_intervals(rref, iv(0, 100)).await.unwrap();
        assert_eq!(booked[0].quantity, 2);
    }

    #[tokio::test]
    async fn replay_skips_repeated_log_and_audit_entries() {
        let path = wal_path("repeated_entries.wal");
        let room = Resource::facility(Ulid::new(), "F104");
        let r = reservation(Ulid::new(), room.resource, 0, 10, 1);
        let approved = log(r.id, ApprovalAction::Approve, 5);
        let canceled = audit(r.id, AuditChange::Canceled, 6);
        {
            let mut wal = Wal::open(&path).unwrap();
            let status_changed = Event::StatusChanged {
                reservation_id: r.id,
                status: ReservationStatus::Approved,
                log: approved.clone(),
            };
            let cancel = Event::ReservationCanceled {
                reservation_id: r.id,
                audit: canceled.clone(),
            };
            for event in [
                Event::ResourceRegistered { resource: room },
                Event::ReservationCreated { reservation: r.clone() },
                status_changed.clone(),
                status_changed,
                cancel.clone(),
                cancel,
            ] {
                wal.append(&event).unwrap();
            }
        }

        let store = InMemoryStore::open(&path).unwrap();
        assert_eq!(store.approval_logs(r.id).await.unwrap(), vec![approved]);
        assert_eq!(store.audit_trail(r.id).await.unwrap(), vec![canceled]);
    }

    #[tokio::test]
    async fn compaction_keeps_history_and_cancellation() {
        let path = wal_path("compaction.wal");
        let (rref, rid) = {
            let store = InMemoryStore::open(&path).unwrap();
            let room = Resource::facility(Ulid::new(), "Hall");
            let rref = room.resource;
            store.register_resource(room).await.unwrap();
            store.set_resource_active(rref, false).await.unwrap();
            store.set_resource_active(rref, true).await.unwrap();
            let r = reservation(Ulid::new(), rref, 0, 50, 1);
            let rid = r.id;
            store.create_reservation(r).await.unwrap();
            store
                .cancel_reservation(rid, audit(rid, AuditChange::Canceled, 4))
                .await
                .unwrap();
            assert_eq!(store.appends_since_compact().await, 5);
            assert_eq!(store.compact().await.unwrap(), 2);
            assert_eq!(store.appends_since_compact().await, 0);
            (rref, rid)
        };

        let store = InMemoryStore::open(&path).unwrap();
        let r = store.load_reservation(rid).await.unwrap();
        assert!(r.is_canceled);
        assert_eq!(store.audit_trail(rid).await.unwrap().len(), 1);
        assert!(store.load_booked_intervals(rref, iv(0, 50)).await.unwrap().is_empty());
        assert!(store.load_resource(rref).await.unwrap().active);
    }
}
