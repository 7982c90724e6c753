use std::collections::BTreeMap;
use std::fmt;

use crate::model::*;

use super::availability::{clamped_demand, peak_demand, remaining_units};
use super::{Engine, EngineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    SlotTaken,
    InsufficientQuantity { requested: u32, available: i64 },
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::SlotTaken => f.write_str("time slot not available"),
            ConflictReason::InsufficientQuantity { .. } => f.write_str("not enough quantity available"),
        }
    }
}

/// One item of the candidate that cannot be booked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Position of the item in the checked list.
    pub item: usize,
    pub resource: ResourceRef,
    pub interval: TimeInterval,
    pub reason: ConflictReason,
}

/// One item that could not be evaluated at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupFailure {
    pub item: usize,
    pub resource: ResourceRef,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictReport {
    pub has_conflict: bool,
    pub conflicts: Vec<Conflict>,
    pub failures: Vec<LookupFailure>,
}

impl ConflictReport {
    /// No conflicts and every item evaluated.
    pub fn is_clear(&self) -> bool {
        !self.has_conflict && self.failures.is_empty()
    }

    pub fn by_resource(&self) -> BTreeMap<ResourceRef, Vec<&Conflict>> {
        let mut out: BTreeMap<ResourceRef, Vec<&Conflict>> = BTreeMap::new();
        for c in &self.conflicts {
            out.entry(c.resource).or_default().push(c);
        }
        out
    }

    fn push_conflict(&mut self, conflict: Conflict) {
        metrics::counter!(crate::observability::CONFLICTS_TOTAL, "kind" => conflict.resource.kind.as_str())
            .increment(1);
        self.has_conflict = true;
        self.conflicts.push(conflict);
    }
}

impl Engine {
    /// Evaluate every item against current bookings, ignoring the items of
    /// `exclude`. Items of the candidate that overlap on the same resource
    /// count against each other.
    ///
    /// Unknown or inactive resources are recorded as failures and evaluation
    /// continues; any other storage error aborts the check.
    pub async fn check_reservation(
        &self,
        exclude: Option<ReservationId>,
        items: &[ItemRequest],
    ) -> Result<ConflictReport, EngineError> {
        let mut report = ConflictReport::default();

        for (idx, item) in items.iter().enumerate() {
            let resource = match self.load_resource(item.resource).await {
                Ok(r) if r.active => r,
                Ok(_) => {
                    report.failures.push(LookupFailure {
                        item: idx,
                        resource: item.resource,
                        error: "resource is inactive".into(),
                    });
                    continue;
                }
                Err(EngineError::ResourceNotFound(_)) => {
                    report.failures.push(LookupFailure {
                        item: idx,
                        resource: item.resource,
                        error: "resource not found".into(),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            let booked = match self.booked_intervals(item.resource, item.interval, exclude).await {
                Ok(b) => b,
                Err(EngineError::ResourceNotFound(_)) => {
                    report.failures.push(LookupFailure {
                        item: idx,
                        resource: item.resource,
                        error: "resource not found".into(),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            let siblings: Vec<(TimeInterval, u32)> = items
                .iter()
                .enumerate()
                .filter(|(j, other)| *j != idx && other.resource == item.resource)
                .filter_map(|(_, other)| {
                    other.interval.clamp_to(&item.interval).map(|iv| (iv, other.quantity))
                })
                .collect();

            let reason = match item.resource.kind {
                ResourceKind::Facility => {
                    (!booked.is_empty() || !siblings.is_empty()).then_some(ConflictReason::SlotTaken)
                }
                ResourceKind::Equipment => {
                    let mut demand = clamped_demand(&booked, &item.interval);
                    // Reports the anomaly if stored bookings alone already overflow.
                    remaining_units(&resource, peak_demand(&demand));
                    demand.extend(siblings);
                    let available = (resource.quantity as i64 - peak_demand(&demand) as i64).max(0);
                    (available < item.quantity as i64).then_some(ConflictReason::InsufficientQuantity {
                        requested: item.quantity,
                        available,
                    })
                }
            };

            if let Some(reason) = reason {
                report.push_conflict(Conflict {
                    item: idx,
                    resource: item.resource,
                    interval: item.interval,
                    reason,
                });
            }
        }

        if !report.is_clear() {
            tracing::debug!(
                "check found {} conflicts and {} unevaluable items",
                report.conflicts.len(),
                report.failures.len()
            );
        }
        Ok(report)
    }

    /// Re-check a stored reservation's current items against everyone else.
    pub async fn check_existing(&self, id: ReservationId) -> Result<ConflictReport, EngineError> {
        let reservation = self.load_reservation(id).await?;
        let items: Vec<ItemRequest> = reservation.items.iter().map(ItemRequest::from).collect();
        self.check_reservation(Some(id), &items).await
    }
}
