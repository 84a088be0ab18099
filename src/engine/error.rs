use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

use crate::model::Stay;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("invalid range: check-out {check_out} must be after check-in {check_in}")]
    InvalidRange {
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("room is taken by {guest} for {stay} (booking {booking})")]
    Conflict {
        booking: Ulid,
        guest: String,
        stay: Stay,
    },
    #[error("booking {id} was changed concurrently: expected version {expected}, found {actual}")]
    VersionMismatch { id: Ulid, expected: u64, actual: u64 },
    #[error("cannot delete room {0}: it still has bookings")]
    RoomHasBookings(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    Wal(String),
}

impl EngineError {
    /// Stable machine-readable code for the wire.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::InvalidRange { .. } => "invalid_range",
            EngineError::Validation(_) => "validation",
            EngineError::Conflict { .. } => "conflict",
            EngineError::VersionMismatch { .. } => "version_mismatch",
            EngineError::RoomHasBookings(_) => "room_has_bookings",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Wal(_) => "storage",
        }
    }

    /// Errors the caller can recover from by reverting its view and retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::Conflict { .. } | EngineError::VersionMismatch { .. } | EngineError::Wal(_)
        )
    }
}
