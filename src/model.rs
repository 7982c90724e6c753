use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub type UserId = Ulid;
pub type ReservationId = Ulid;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: Ms,
    pub end: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidInterval {
    pub start: Ms,
    pub end: Ms,
}

impl fmt::Display for InvalidInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid interval [{}, {}): start must be before end", self.start, self.end)
    }
}

impl std::error::Error for InvalidInterval {}

impl TimeInterval {
    pub fn new(start: Ms, end: Ms) -> Result<Self, InvalidInterval> {
        if start >= end {
            return Err(InvalidInterval { start, end });
        }
        Ok(Self { start, end })
    }

    /// Saturates at `Ms::MAX` for intervals wider than the type can hold.
    pub fn duration_ms(&self) -> Ms {
        self.end.saturating_sub(self.start)
    }

    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Intersection with `window`, if non-empty.
    pub fn clamp_to(&self, window: &TimeInterval) -> Option<TimeInterval> {
        let start = self.start.max(window.start);
        let end = self.end.min(window.end);
        (start < end).then_some(TimeInterval { start, end })
    }
}

// ── Resources ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Facility,
    Equipment,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Facility => "facility",
            ResourceKind::Equipment => "equipment",
        }
    }
}

/// A bookable thing. The kind is part of the identity: the same id under a
/// different kind is a different (usually nonexistent) resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: Ulid,
}

impl ResourceRef {
    pub fn facility(id: Ulid) -> Self {
        Self { kind: ResourceKind::Facility, id }
    }

    pub fn equipment(id: Ulid) -> Self {
        Self { kind: ResourceKind::Equipment, id }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadResourceRef(pub String);

impl fmt::Display for BadResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bad resource reference '{}' (expected facility:<ulid> or equipment:<ulid>)", self.0)
    }
}

impl std::error::Error for BadResourceRef {}

impl FromStr for ResourceRef {
    type Err = BadResourceRef;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s.split_once(':').ok_or_else(|| BadResourceRef(s.to_string()))?;
        let kind = match kind.to_ascii_lowercase().as_str() {
            "facility" => ResourceKind::Facility,
            "equipment" => ResourceKind::Equipment,
            _ => return Err(BadResourceRef(s.to_string())),
        };
        let id = Ulid::from_string(id).map_err(|_| BadResourceRef(s.to_string()))?;
        Ok(Self { kind, id })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub resource: ResourceRef,
    pub name: String,
    /// Units that may be booked concurrently. Always 1 for a facility.
    pub quantity: u32,
    pub active: bool,
}

impl Resource {
    pub fn facility(id: Ulid, name: impl Into<String>) -> Self {
        Self {
            resource: ResourceRef::facility(id),
            name: name.into(),
            quantity: 1,
            active: true,
        }
    }

    pub fn equipment(id: Ulid, name: impl Into<String>, quantity: u32) -> Self {
        Self {
            resource: ResourceRef::equipment(id),
            name: name.into(),
            quantity,
            active: true,
        }
    }
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Approved,
    Rejected,
    ChangeRequested,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Approved => "approved",
            ReservationStatus::Rejected => "rejected",
            ReservationStatus::ChangeRequested => "change_requested",
        }
    }

    /// Status reached by applying `action`, or `None` if the action would not
    /// move the reservation anywhere.
    pub fn after(self, action: ApprovalAction) -> Option<ReservationStatus> {
        use ReservationStatus::*;
        match (self, action) {
            (Pending, _) => Some(action.target_status()),
            (Approved, ApprovalAction::Approve)
            | (Rejected, ApprovalAction::Reject)
            | (ChangeRequested, ApprovalAction::RequestChange) => None,
            (Approved | Rejected | ChangeRequested, _) => Some(action.target_status()),
        }
    }

    /// Whether this reservation's items count against other reservations.
    pub fn holds_resources(self) -> bool {
        !matches!(self, ReservationStatus::Rejected)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApprovalAction {
    Approve,
    Reject,
    RequestChange,
}

impl ApprovalAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalAction::Approve => "approved",
            ApprovalAction::Reject => "rejected",
            ApprovalAction::RequestChange => "change_requested",
        }
    }

    pub fn target_status(self) -> ReservationStatus {
        match self {
            ApprovalAction::Approve => ReservationStatus::Approved,
            ApprovalAction::Reject => ReservationStatus::Rejected,
            ApprovalAction::RequestChange => ReservationStatus::ChangeRequested,
        }
    }
}

impl fmt::Display for ApprovalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "approve" | "approved" => Ok(ApprovalAction::Approve),
            "reject" | "rejected" => Ok(ApprovalAction::Reject),
            "request_change" | "change_requested" => Ok(ApprovalAction::RequestChange),
            other => Err(format!("unknown approval action: {other}")),
        }
    }
}

/// One line of a reservation: a resource, a window and a unit count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationItem {
    pub id: Ulid,
    pub resource: ResourceRef,
    pub interval: TimeInterval,
    pub quantity: u32,
}

/// An item as submitted, before it is assigned an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRequest {
    pub resource: ResourceRef,
    pub interval: TimeInterval,
    pub quantity: u32,
}

impl ItemRequest {
    pub fn facility(id: Ulid, interval: TimeInterval) -> Self {
        Self { resource: ResourceRef::facility(id), interval, quantity: 1 }
    }

    pub fn equipment(id: Ulid, interval: TimeInterval, quantity: u32) -> Self {
        Self { resource: ResourceRef::equipment(id), interval, quantity }
    }
}

impl From<&ReservationItem> for ItemRequest {
    fn from(item: &ReservationItem) -> Self {
        Self {
            resource: item.resource,
            interval: item.interval,
            quantity: item.quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub id: ReservationId,
    pub purpose: String,
    pub attendees: Option<u32>,
    pub items: Vec<ItemRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub requester: UserId,
    pub purpose: String,
    pub attendees: Option<u32>,
    pub status: ReservationStatus,
    pub is_canceled: bool,
    pub items: Vec<ReservationItem>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Reservation {
    pub fn holds_resources(&self) -> bool {
        !self.is_canceled && self.status.holds_resources()
    }

    /// Sort key for the admin listing: pending first, canceled last.
    pub fn listing_rank(&self) -> u8 {
        if self.is_canceled {
            return 4;
        }
        match self.status {
            ReservationStatus::Pending => 0,
            ReservationStatus::Approved => 1,
            ReservationStatus::ChangeRequested => 2,
            ReservationStatus::Rejected => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalLog {
    pub id: Ulid,
    pub reservation_id: ReservationId,
    pub acted_by: UserId,
    pub action: ApprovalAction,
    pub comment: Option<String>,
    pub acted_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditChange {
    ItemsEdited,
    Canceled,
}

impl AuditChange {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditChange::ItemsEdited => "items_edited",
            AuditChange::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationAudit {
    pub id: Ulid,
    pub reservation_id: ReservationId,
    pub changed_by: UserId,
    pub change: AuditChange,
    /// JSON document describing the change.
    pub change_data: String,
    pub changed_at: Ms,
}

/// A ledger row: one booked item overlapping a queried window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookedInterval {
    pub interval: TimeInterval,
    pub reservation_id: ReservationId,
    pub item_id: Ulid,
    pub quantity: u32,
}

// ── Per-resource booking index ───────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineEntry {
    pub item_id: Ulid,
    pub reservation_id: ReservationId,
    pub interval: TimeInterval,
    pub quantity: u32,
}

/// Items booked on one resource, sorted by `interval.start`.
#[derive(Debug, Clone, Default)]
pub struct ResourceTimeline {
    pub entries: Vec<TimelineEntry>,
}

impl ResourceTimeline {
    /// Insert maintaining sort order by interval.start.
    pub fn insert(&mut self, entry: TimelineEntry) {
        let pos = self
            .entries
            .binary_search_by_key(&entry.interval.start, |e| e.interval.start)
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, entry);
    }

    /// Drop every entry of a reservation. Returns how many were removed.
    pub fn remove_reservation(&mut self, reservation_id: ReservationId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.reservation_id != reservation_id);
        before - self.entries.len()
    }

    /// Entries whose interval overlaps the window.
    /// Uses binary search to skip entries starting at or after `window.end`.
    pub fn overlapping(&self, window: &TimeInterval) -> impl Iterator<Item = &TimelineEntry> {
        let right_bound = self
            .entries
            .partition_point(|e| e.interval.start < window.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |e| e.interval.end > window.start)
    }
}

/// The WAL record format: one record per committed store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceRegistered {
        resource: Resource,
    },
    ResourceActivationChanged {
        resource: ResourceRef,
        active: bool,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ItemsReplaced {
        reservation_id: ReservationId,
        items: Vec<ReservationItem>,
        audit: ReservationAudit,
    },
    StatusChanged {
        reservation_id: ReservationId,
        status: ReservationStatus,
        log: ApprovalLog,
    },
    ReservationCanceled {
        reservation_id: ReservationId,
        audit: ReservationAudit,
    },
    /// Compaction output: a reservation together with its full history.
    ReservationSnapshot {
        reservation: Reservation,
        approval_logs: Vec<ApprovalLog>,
        audits: Vec<ReservationAudit>,
    },
}
