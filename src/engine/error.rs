use ulid::Ulid;

use crate::model::{InvalidInterval, ReservationStatus, ResourceRef, UserId};

use super::conflict::ConflictReport;
use super::store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    InvalidInterval(InvalidInterval),
    ResourceNotFound(ResourceRef),
    ReservationNotFound(Ulid),
    ConflictExists(ConflictReport),
    InvalidTransition {
        reservation_id: Ulid,
        status: ReservationStatus,
        canceled: bool,
        attempted: &'static str,
    },
    Unauthorized(UserId),
    InvalidRequest(String),
    LimitExceeded(&'static str),
    AlreadyExists(String),
    TransientFailure(String),
    InvariantViolation(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInterval(e) => write!(f, "{e}"),
            EngineError::ResourceNotFound(r) => write!(f, "resource not found: {r}"),
            EngineError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::ConflictExists(report) => {
                write!(f, "reservation conflicts with existing bookings: ")?;
                let mut first = true;
                for c in &report.conflicts {
                    if !first {
                        f.write_str("; ")?;
                    }
                    first = false;
                    write!(f, "{} {}", c.resource, c.reason)?;
                }
                for lf in &report.failures {
                    if !first {
                        f.write_str("; ")?;
                    }
                    first = false;
                    write!(f, "{} could not be evaluated ({})", lf.resource, lf.error)?;
                }
                Ok(())
            }
            EngineError::InvalidTransition {
                reservation_id,
                status,
                canceled,
                attempted,
            } => {
                if *canceled {
                    write!(f, "cannot {attempted} reservation {reservation_id}: it is canceled")
                } else {
                    write!(f, "cannot {attempted} reservation {reservation_id} in status {status}")
                }
            }
            EngineError::Unauthorized(user) => write!(f, "user {user} is not allowed to do that"),
            EngineError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::AlreadyExists(what) => write!(f, "already exists: {what}"),
            EngineError::TransientFailure(e) => write!(f, "storage unavailable: {e}"),
            EngineError::InvariantViolation(e) => write!(f, "invariant violated: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<InvalidInterval> for EngineError {
    fn from(e: InvalidInterval) -> Self {
        EngineError::InvalidInterval(e)
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => EngineError::InvariantViolation(format!(
                "store lost a record the engine just saw: {what}"
            )),
            StoreError::Conflict(what) => EngineError::AlreadyExists(what),
            StoreError::TransientFailure(e) => EngineError::TransientFailure(e),
        }
    }
}
