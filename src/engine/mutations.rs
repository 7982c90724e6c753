use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, StoreError, now_ms, validate_interval};

impl Engine {
    // ── Resource catalog ─────────────────────────────────────

    pub async fn register_resource(&self, actor: UserId, mut resource: Resource) -> Result<Resource, EngineError> {
        self.require_admin(actor).await?;
        if resource.name.trim().is_empty() {
            return Err(EngineError::InvalidRequest("resource name must not be empty".into()));
        }
        if resource.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("resource name too long"));
        }
        match resource.resource.kind {
            ResourceKind::Facility => resource.quantity = 1,
            ResourceKind::Equipment => check_quantity(resource.quantity)?,
        }
        if self.store.list_resources().await?.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }

        let _lock = self.lock_resources([resource.resource]).await;
        self.store.register_resource(resource.clone()).await?;
        tracing::info!("registered {} ({}, quantity {})", resource.resource, resource.name, resource.quantity);
        Ok(resource)
    }

    pub async fn set_resource_active(
        &self,
        actor: UserId,
        resource: ResourceRef,
        active: bool,
    ) -> Result<(), EngineError> {
        self.require_admin(actor).await?;
        let _lock = self.lock_resources([resource]).await;
        self.store
            .set_resource_active(resource, active)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => EngineError::ResourceNotFound(resource),
                other => other.into(),
            })?;
        tracing::info!("{resource} is now {}", if active { "active" } else { "inactive" });
        Ok(())
    }

    // ── Reservation lifecycle ────────────────────────────────

    /// Book every item or nothing. The new reservation starts out pending
    /// and already holds its slots.
    pub async fn create_reservation(
        &self,
        requester: UserId,
        new: NewReservation,
    ) -> Result<Reservation, EngineError> {
        validate_purpose(&new.purpose)?;
        validate_items(&new.items)?;

        let _reservation_lock = self.lock_reservation(new.id).await;
        match self.store.load_reservation(new.id).await {
            Ok(existing) if existing.requester == requester && same_items(&existing.items, &new.items) => {
                tracing::debug!("replayed create of reservation {}", new.id);
                return Ok(existing);
            }
            Ok(_) => return Err(EngineError::AlreadyExists(format!("reservation {}", new.id))),
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let _resource_locks = self.lock_resources(new.items.iter().map(|i| i.resource)).await;
        let report = self.check_reservation(None, &new.items).await?;
        if !report.is_clear() {
            return Err(EngineError::ConflictExists(report));
        }

        let now = now_ms();
        let reservation = Reservation {
            id: new.id,
            requester,
            purpose: new.purpose,
            attendees: new.attendees,
            status: ReservationStatus::Pending,
            is_canceled: false,
            items: assign_item_ids(&new.items),
            created_at: now,
            updated_at: now,
        };
        self.store.create_reservation(reservation.clone()).await?;
        tracing::info!(
            "reservation {} created by {requester} with {} items",
            reservation.id,
            reservation.items.len()
        );
        Ok(reservation)
    }

    /// Replace the items of a pending (or change-requested) reservation.
    /// The new items are checked against everyone but this reservation;
    /// the status does not change.
    pub async fn edit_items(
        &self,
        actor: UserId,
        id: ReservationId,
        items: Vec<ItemRequest>,
        request_id: Ulid,
    ) -> Result<Reservation, EngineError> {
        validate_items(&items)?;

        let _reservation_lock = self.lock_reservation(id).await;
        if let Some(done) = self.store.find_audit(request_id).await? {
            if done.reservation_id == id && done.change == AuditChange::ItemsEdited {
                return self.load_reservation(id).await;
            }
            return Err(EngineError::AlreadyExists(format!("audit entry {request_id}")));
        }

        let reservation = self.load_reservation(id).await?;
        if reservation.requester != actor {
            return Err(EngineError::Unauthorized(actor));
        }
        let editable = matches!(
            reservation.status,
            ReservationStatus::Pending | ReservationStatus::ChangeRequested
        );
        if reservation.is_canceled || !editable {
            return Err(EngineError::InvalidTransition {
                reservation_id: id,
                status: reservation.status,
                canceled: reservation.is_canceled,
                attempted: "edit",
            });
        }

        let touched = reservation
            .items
            .iter()
            .map(|i| i.resource)
            .chain(items.iter().map(|i| i.resource));
        let _resource_locks = self.lock_resources(touched).await;
        let report = self.check_reservation(Some(id), &items).await?;
        if !report.is_clear() {
            return Err(EngineError::ConflictExists(report));
        }

        let new_items = assign_item_ids(&items);
        let change_data = serde_json::json!({
            "before": reservation.items.iter().map(item_json).collect::<Vec<_>>(),
            "after": new_items.iter().map(item_json).collect::<Vec<_>>(),
        });
        let audit = ReservationAudit {
            id: request_id,
            reservation_id: id,
            changed_by: actor,
            change: AuditChange::ItemsEdited,
            change_data: change_data.to_string(),
            changed_at: now_ms(),
        };
        self.store.replace_reservation_items(id, new_items, audit).await?;
        tracing::info!("reservation {id}: items replaced by {actor}");
        self.load_reservation(id).await
    }
}

fn check_quantity(quantity: u32) -> Result<(), EngineError> {
    if quantity == 0 {
        return Err(EngineError::InvalidRequest("quantity must be at least 1".into()));
    }
    if quantity > MAX_EQUIPMENT_QUANTITY {
        return Err(EngineError::LimitExceeded("quantity too large"));
    }
    Ok(())
}

fn validate_purpose(purpose: &str) -> Result<(), EngineError> {
    if purpose.trim().is_empty() {
        return Err(EngineError::InvalidRequest("purpose must not be empty".into()));
    }
    if purpose.len() > MAX_PURPOSE_LEN {
        return Err(EngineError::LimitExceeded("purpose too long"));
    }
    Ok(())
}

fn validate_items(items: &[ItemRequest]) -> Result<(), EngineError> {
    if items.is_empty() {
        return Err(EngineError::InvalidRequest(
            "a reservation needs at least one item".into(),
        ));
    }
    if items.len() > MAX_ITEMS_PER_RESERVATION {
        return Err(EngineError::LimitExceeded("too many items"));
    }
    for item in items {
        validate_interval(&item.interval)?;
        match item.resource.kind {
            ResourceKind::Facility if item.quantity != 1 => {
                return Err(EngineError::InvalidRequest(format!(
                    "{} books exactly one unit, not {}",
                    item.resource, item.quantity
                )));
            }
            ResourceKind::Facility => {}
            ResourceKind::Equipment => check_quantity(item.quantity)?,
        }
    }
    Ok(())
}

fn assign_item_ids(items: &[ItemRequest]) -> Vec<ReservationItem> {
    items
        .iter()
        .map(|i| ReservationItem {
            id: Ulid::new(),
            resource: i.resource,
            interval: i.interval,
            quantity: i.quantity,
        })
        .collect()
}

fn same_items(stored: &[ReservationItem], requested: &[ItemRequest]) -> bool {
    stored.len() == requested.len() && stored.iter().zip(requested).all(|(s, r)| ItemRequest::from(s) == *r)
}

fn item_json(item: &ReservationItem) -> serde_json::Value {
    serde_json::json!({
        "resource": item.resource.to_string(),
        "start": item.interval.start,
        "end": item.interval.end,
        "quantity": item.quantity,
    })
}
