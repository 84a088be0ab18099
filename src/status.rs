use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::datemath;
use crate::model::*;

/// What a room is doing on a given day, from the front desk's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoomStatus {
    CheckIn,
    Occupied,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomStatusView {
    pub room_id: Ulid,
    pub status: RoomStatus,
    /// The booking that decided the status; `None` when empty.
    pub booking: Option<Booking>,
}

/// Status of `room_id` on `date`, from the first active booking that holds
/// the night of `date`. A departing guest does not hold the room that night.
pub fn resolve<'a, I>(room_id: Ulid, date: NaiveDate, bookings: I) -> RoomStatusView
where
    I: IntoIterator<Item = &'a Booking>,
{
    let current = bookings
        .into_iter()
        .find(|b| b.room_id == room_id && b.is_active() && b.stay().contains_night(date));

    let status = match current {
        Some(b) if b.check_in == date => RoomStatus::CheckIn,
        Some(_) => RoomStatus::Occupied,
        None => RoomStatus::Empty,
    };
    RoomStatusView {
        room_id,
        status,
        booking: current.cloned(),
    }
}

/// [`resolve`] at a point in time; the time of day is ignored.
pub fn resolve_at<'a, I>(room_id: Ulid, at: NaiveDateTime, bookings: I) -> RoomStatusView
where
    I: IntoIterator<Item = &'a Booking>,
{
    resolve(room_id, datemath::normalize(at), bookings)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub check_in: usize,
    pub occupied: usize,
    pub empty: usize,
}

impl StatusCounts {
    fn record(&mut self, status: RoomStatus) {
        match status {
            RoomStatus::CheckIn => self.check_in += 1,
            RoomStatus::Occupied => self.occupied += 1,
            RoomStatus::Empty => self.empty += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardRow {
    pub room_number: String,
    pub view: RoomStatusView,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub date: NaiveDate,
    pub rooms: Vec<DashboardRow>,
    pub counts: StatusCounts,
}

/// Status of every room on `date`, in the order given.
pub fn resolve_all(date: NaiveDate, rooms: &[Room], bookings: &[Booking]) -> DashboardSummary {
    let mut counts = StatusCounts::default();
    let rows = rooms
        .iter()
        .map(|room| {
            let view = resolve(room.id, date, bookings);
            counts.record(view.status);
            DashboardRow {
                room_number: room.room_number.clone(),
                view,
            }
        })
        .collect();
    DashboardSummary {
        date,
        rooms: rows,
        counts,
    }
}
