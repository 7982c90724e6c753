use crate::limits::{MAX_QUERY_WINDOW_MS, MAX_VALID_TIMESTAMP_MS, MIN_VALID_TIMESTAMP_MS};
use crate::model::*;

use super::{Engine, EngineError, StoreError};

impl Engine {
    /// What is booked on `resource` during `window`, skipping canceled and
    /// rejected reservations and every item of `exclude`.
    pub async fn booked_intervals(
        &self,
        resource: ResourceRef,
        window: TimeInterval,
        exclude: Option<ReservationId>,
    ) -> Result<Vec<BookedInterval>, EngineError> {
        if window.start < MIN_VALID_TIMESTAMP_MS || window.end > MAX_VALID_TIMESTAMP_MS {
            return Err(EngineError::LimitExceeded("timestamp out of range"));
        }
        if window.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let mut booked = self
            .store
            .load_booked_intervals(resource, window)
            .await
            .map_err(|e| not_found_as(resource, e))?;
        if let Some(skip) = exclude {
            booked.retain(|b| b.reservation_id != skip);
        }
        Ok(booked)
    }

    pub(super) async fn load_resource(&self, resource: ResourceRef) -> Result<Resource, EngineError> {
        self.store
            .load_resource(resource)
            .await
            .map_err(|e| not_found_as(resource, e))
    }
}

fn not_found_as(resource: ResourceRef, e: StoreError) -> EngineError {
    match e {
        StoreError::NotFound(_) => EngineError::ResourceNotFound(resource),
        other => other.into(),
    }
}
