use chrono::NaiveDate;
use ulid::Ulid;

use crate::layout::{self, CalendarGrid, Direction, GridWindow};
use crate::limits::*;
use crate::model::*;
use crate::pricing::{self, Quote};
use crate::status::{self, DashboardSummary};
use crate::store::BookingQuery;

use super::availability::{find_overlaps, free_ranges, is_available};
use super::conflict::{validate_dates, validate_guests, validate_stay};
use super::{Engine, EngineError, SharedRoomState};

fn check_window(stay: &Stay) -> Result<(), EngineError> {
    validate_dates(stay)?;
    if crate::datemath::days_between(stay.check_in, stay.check_out) > MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

impl Engine {
    /// All room handles in id order.
    pub(super) fn room_handles(&self) -> Vec<(Ulid, SharedRoomState)> {
        let mut handles: Vec<_> = self
            .rooms
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        handles.sort_by_key(|(id, _)| *id);
        handles
    }

    pub async fn rooms(&self) -> Vec<Room> {
        let mut rooms = Vec::with_capacity(self.rooms.len());
        for (_, rs) in self.room_handles() {
            rooms.push(rs.read().await.room.clone());
        }
        rooms.sort_by(|a, b| a.room_number.cmp(&b.room_number));
        rooms
    }

    pub async fn room(&self, id: Ulid) -> Result<Room, EngineError> {
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        Ok(rs.read().await.room.clone())
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let room_id = self.room_for_booking(&id).ok_or(EngineError::NotFound(id))?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn list_bookings(&self, query: &BookingQuery) -> Result<Vec<Booking>, EngineError> {
        match query {
            BookingQuery::Range(stay) => check_window(stay)?,
            BookingQuery::Search(text) if text.len() > MAX_SEARCH_LEN => {
                return Err(EngineError::LimitExceeded("search text too long"));
            }
            _ => {}
        }

        let mut found = Vec::new();
        for (_, rs) in self.room_handles() {
            let guard = rs.read().await;
            match query {
                BookingQuery::Range(stay) => found.extend(guard.overlapping(*stay).cloned()),
                _ => found.extend(guard.bookings.iter().filter(|b| query.matches(b)).cloned()),
            }
        }
        found.sort_by_key(|b| (b.check_in, b.id));
        Ok(found)
    }

    pub async fn check_availability(
        &self,
        room_id: Ulid,
        stay: &Stay,
        exclude: Option<Ulid>,
    ) -> Result<Availability, EngineError> {
        check_window(stay)?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(Availability {
            available: is_available(room_id, stay, exclude, guard.overlapping(*stay)),
        })
    }

    pub async fn free_ranges(&self, room_id: Ulid, window: &Stay) -> Result<Vec<Stay>, EngineError> {
        check_window(window)?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(free_ranges(room_id, window, guard.overlapping(*window)))
    }

    /// Active bookings in the same room sharing a night with `booking_id`.
    pub async fn overlaps(&self, booking_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let room_id = self
            .room_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(booking_id))?;
        let guard = rs.read().await;
        let booking = guard.booking(booking_id).ok_or(EngineError::NotFound(booking_id))?;
        Ok(find_overlaps(booking, &guard.bookings)
            .into_iter()
            .cloned()
            .collect())
    }

    pub async fn quote(
        &self,
        room_id: Ulid,
        stay: &Stay,
        guests: u32,
        is_tourist: bool,
    ) -> Result<Quote, EngineError> {
        validate_stay(stay)?;
        validate_guests(guests)?;
        let room = self.room(room_id).await?;
        Ok(pricing::quote(&room, stay, guests, is_tourist))
    }

    pub async fn room_status(&self, date: NaiveDate) -> Result<DashboardSummary, EngineError> {
        let day = Stay {
            check_in: date,
            check_out: date.succ_opt().ok_or(EngineError::LimitExceeded("date out of range"))?,
        };
        validate_dates(&day)?;
        let rooms = self.rooms().await;
        let bookings = self.list_bookings(&BookingQuery::Range(day)).await?;
        Ok(status::resolve_all(date, &rooms, &bookings))
    }

    pub async fn calendar(&self, window: &GridWindow, direction: Direction) -> Result<CalendarGrid, EngineError> {
        // Stays checking out on the first day are drawn too.
        let mut range = window.as_stay();
        range.check_in = range.check_in.pred_opt().unwrap_or(range.check_in);
        let rooms = self.rooms().await;
        let bookings = self.list_bookings(&BookingQuery::Range(range)).await?;
        Ok(layout::build_calendar(window, direction, &rooms, &bookings))
    }
}
