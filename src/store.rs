use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::*;

/// Which bookings to list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingQuery {
    All,
    /// Bookings sharing at least one night with the range.
    Range(Stay),
    /// Case-insensitive substring of guest name, notes or source.
    Search(String),
}

impl BookingQuery {
    pub fn matches(&self, booking: &Booking) -> bool {
        match self {
            BookingQuery::All => true,
            BookingQuery::Range(stay) => booking.stay().overlaps(stay),
            BookingQuery::Search(text) => {
                let needle = text.to_lowercase();
                booking.guest_name.to_lowercase().contains(&needle)
                    || booking
                        .notes
                        .as_deref()
                        .is_some_and(|n| n.to_lowercase().contains(&needle))
                    || booking.source.label().contains(&needle)
            }
        }
    }
}

/// Persistence seen from the booking UI: a location's rooms and bookings.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Rooms ordered by room number.
    async fn rooms(&self) -> Vec<Room>;
    async fn create_room(&self, room: Room) -> Result<Room, EngineError>;
    async fn update_room(&self, room: Room) -> Result<Room, EngineError>;
    async fn delete_room(&self, id: Ulid) -> Result<(), EngineError>;

    /// Bookings ordered by check-in.
    async fn list_bookings(&self, query: &BookingQuery) -> Result<Vec<Booking>, EngineError>;
    async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError>;
    async fn check_availability(
        &self,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<Availability, EngineError>;
    async fn create_booking(&self, new: NewBooking) -> Result<Booking, EngineError>;
    async fn update_booking(&self, id: Ulid, patch: BookingPatch) -> Result<Booking, EngineError>;
    async fn delete_booking(&self, id: Ulid) -> Result<(), EngineError>;
}
