use chrono::{Datelike, NaiveDate};

use crate::limits::*;
use crate::model::*;

use super::availability::first_conflict;
use super::EngineError;

pub(crate) fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

pub(crate) fn validate_dates(stay: &Stay) -> Result<(), EngineError> {
    for date in [stay.check_in, stay.check_out] {
        if !(MIN_VALID_YEAR..=MAX_VALID_YEAR).contains(&date.year()) {
            return Err(EngineError::LimitExceeded("date out of range"));
        }
    }
    Ok(())
}

/// Dates in range and not longer than the longest bookable stay.
pub(crate) fn validate_stay(stay: &Stay) -> Result<(), EngineError> {
    validate_dates(stay)?;
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

pub(crate) fn validate_text(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

pub(crate) fn validate_guest_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation("guest name is required".into()));
    }
    validate_text(name, MAX_NAME_LEN, "guest name too long")
}

pub(crate) fn validate_guests(guests: u32) -> Result<(), EngineError> {
    if guests == 0 {
        return Err(EngineError::Validation("a booking needs at least one guest".into()));
    }
    if guests > MAX_GUESTS {
        return Err(EngineError::LimitExceeded("too many guests"));
    }
    Ok(())
}

/// Reject `stay` if an active booking in this room already holds one of its nights.
pub(crate) fn check_no_conflict(
    rs: &RoomState,
    stay: &Stay,
    exclude: Option<ulid::Ulid>,
) -> Result<(), EngineError> {
    match first_conflict(rs.id(), stay, exclude, rs.overlapping(*stay)) {
        Some(existing) => Err(EngineError::Conflict {
            booking: existing.id,
            guest: existing.guest_name.clone(),
            stay: existing.stay(),
        }),
        None => Ok(()),
    }
}

pub(crate) fn check_version(booking: &Booking, expected: Option<u64>) -> Result<(), EngineError> {
    match expected {
        Some(expected) if expected != booking.version => Err(EngineError::VersionMismatch {
            id: booking.id,
            expected,
            actual: booking.version,
        }),
        _ => Ok(()),
    }
}
