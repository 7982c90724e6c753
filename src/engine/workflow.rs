use ulid::Ulid;

use crate::limits::MAX_COMMENT_LEN;
use crate::model::*;
use crate::notify::Notice;

use super::{Engine, EngineError, now_ms};

impl Engine {
    pub async fn approve(
        &self,
        actor: UserId,
        id: ReservationId,
        comment: Option<String>,
        request_id: Ulid,
    ) -> Result<ApprovalLog, EngineError> {
        self.transition(actor, id, ApprovalAction::Approve, comment, request_id).await
    }

    pub async fn reject(
        &self,
        actor: UserId,
        id: ReservationId,
        comment: Option<String>,
        request_id: Ulid,
    ) -> Result<ApprovalLog, EngineError> {
        self.transition(actor, id, ApprovalAction::Reject, comment, request_id).await
    }

    pub async fn request_change(
        &self,
        actor: UserId,
        id: ReservationId,
        comment: Option<String>,
        request_id: Ulid,
    ) -> Result<ApprovalLog, EngineError> {
        self.transition(actor, id, ApprovalAction::RequestChange, comment, request_id)
            .await
    }

    /// Apply one admin action: status change plus exactly one log entry,
    /// committed together. `request_id` becomes the log entry id, so a
    /// retried call returns the entry written by the first one.
    pub async fn transition(
        &self,
        actor: UserId,
        id: ReservationId,
        action: ApprovalAction,
        comment: Option<String>,
        request_id: Ulid,
    ) -> Result<ApprovalLog, EngineError> {
        self.require_admin(actor).await?;
        if comment.as_ref().is_some_and(|c| c.len() > MAX_COMMENT_LEN) {
            return Err(EngineError::LimitExceeded("comment too long"));
        }

        let _reservation_lock = self.lock_reservation(id).await;
        if let Some(done) = self.replayed_log(id, action, request_id).await? {
            return Ok(done);
        }

        let reservation = self.load_reservation(id).await?;
        let invalid = || EngineError::InvalidTransition {
            reservation_id: id,
            status: reservation.status,
            canceled: reservation.is_canceled,
            attempted: verb(action),
        };
        if reservation.is_canceled {
            return Err(invalid());
        }
        let next = reservation.status.after(action).ok_or_else(invalid)?;

        // Approval, and any move that takes the slots back after a rejection,
        // must find them still free. The locks are held until the log is
        // committed so nobody books into the slot in between.
        let reclaims = !reservation.status.holds_resources() && next.holds_resources();
        let _resource_locks = if action == ApprovalAction::Approve || reclaims {
            let guards = self
                .lock_resources(reservation.items.iter().map(|i| i.resource))
                .await;
            let items: Vec<ItemRequest> = reservation.items.iter().map(ItemRequest::from).collect();
            let report = self.check_reservation(Some(id), &items).await?;
            if !report.is_clear() {
                tracing::info!("{} {id} refused: {} conflicts", verb(action), report.conflicts.len());
                return Err(EngineError::ConflictExists(report));
            }
            guards
        } else {
            Vec::new()
        };

        let log = ApprovalLog {
            id: request_id,
            reservation_id: id,
            acted_by: actor,
            action,
            comment,
            acted_at: now_ms(),
        };
        self.store.update_reservation_status(id, next, log.clone()).await?;
        metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "action" => action.as_str()).increment(1);
        tracing::info!("reservation {id}: {} -> {next} by {actor}", reservation.status);

        self.notifier.publish(notice_for(action, &reservation, log.comment.clone()));
        Ok(log)
    }

    /// Cancel a reservation. Allowed to its requester or an admin.
    ///
    /// Returns `Ok(false)` when it was already canceled; only the first call
    /// writes an audit entry.
    pub async fn cancel(&self, actor: UserId, id: ReservationId, request_id: Ulid) -> Result<bool, EngineError> {
        let _reservation_lock = self.lock_reservation(id).await;
        let reservation = self.load_reservation(id).await?;
        if reservation.requester != actor && !self.is_admin(actor).await {
            return Err(EngineError::Unauthorized(actor));
        }
        if reservation.is_canceled {
            return Ok(false);
        }
        if self.store.find_audit(request_id).await?.is_some() {
            return Err(EngineError::AlreadyExists(format!("audit entry {request_id}")));
        }

        let change_data = serde_json::json!({
            "previous_status": reservation.status.as_str(),
            "items": reservation.items.len(),
        });
        let audit = ReservationAudit {
            id: request_id,
            reservation_id: id,
            changed_by: actor,
            change: AuditChange::Canceled,
            change_data: change_data.to_string(),
            changed_at: now_ms(),
        };
        self.store.cancel_reservation(id, audit).await?;
        tracing::info!("reservation {id} canceled by {actor}");
        Ok(true)
    }

    async fn replayed_log(
        &self,
        id: ReservationId,
        action: ApprovalAction,
        request_id: Ulid,
    ) -> Result<Option<ApprovalLog>, EngineError> {
        match self.store.find_approval_log(request_id).await? {
            Some(log) if log.reservation_id == id && log.action == action => {
                tracing::debug!("replayed approval request {request_id}");
                Ok(Some(log))
            }
            Some(_) => Err(EngineError::AlreadyExists(format!(
                "request {request_id} was used for a different action"
            ))),
            None => Ok(None),
        }
    }
}

fn verb(action: ApprovalAction) -> &'static str {
    match action {
        ApprovalAction::Approve => "approve",
        ApprovalAction::Reject => "reject",
        ApprovalAction::RequestChange => "request changes to",
    }
}

fn notice_for(action: ApprovalAction, reservation: &Reservation, comment: Option<String>) -> Notice {
    let reservation_id = reservation.id;
    let requester = reservation.requester;
    match action {
        ApprovalAction::Approve => Notice::ReservationApproved {
            reservation_id,
            requester,
            comment,
        },
        ApprovalAction::Reject => Notice::ReservationRejected {
            reservation_id,
            requester,
            comment,
        },
        ApprovalAction::RequestChange => Notice::ChangeRequested {
            reservation_id,
            requester,
            comment,
        },
    }
}
