use crate::model::*;

use super::{Engine, EngineError, StoreError};

impl Engine {
    pub async fn reservation(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        self.load_reservation(id).await
    }

    /// A requester's own reservations, newest first.
    pub async fn reservations_for(&self, requester: UserId) -> Result<Vec<Reservation>, EngineError> {
        let mut out = self.store.list_reservations(Some(requester)).await?;
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    /// Every reservation, in review order: pending first, canceled last,
    /// newest first within a group. Admins only.
    pub async fn all_reservations(&self, actor: UserId) -> Result<Vec<Reservation>, EngineError> {
        self.require_admin(actor).await?;
        let mut out = self.store.list_reservations(None).await?;
        out.sort_by(|a, b| {
            a.listing_rank()
                .cmp(&b.listing_rank())
                .then(b.created_at.cmp(&a.created_at))
                .then(b.id.cmp(&a.id))
        });
        Ok(out)
    }

    pub async fn approval_logs(&self, id: ReservationId) -> Result<Vec<ApprovalLog>, EngineError> {
        self.store.approval_logs(id).await.map_err(|e| reservation_error(id, e))
    }

    pub async fn audit_trail(&self, id: ReservationId) -> Result<Vec<ReservationAudit>, EngineError> {
        self.store.audit_trail(id).await.map_err(|e| reservation_error(id, e))
    }

    pub async fn resources(&self) -> Result<Vec<Resource>, EngineError> {
        Ok(self.store.list_resources().await?)
    }
}

fn reservation_error(id: ReservationId, e: StoreError) -> EngineError {
    match e {
        StoreError::NotFound(_) => EngineError::ReservationNotFound(id),
        other => other.into(),
    }
}
