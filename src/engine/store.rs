use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::store::{BookingQuery, BookingStore};

use super::{Engine, EngineError};

#[async_trait]
impl BookingStore for Engine {
    async fn rooms(&self) -> Vec<Room> {
        Engine::rooms(self).await
    }

    async fn create_room(&self, room: Room) -> Result<Room, EngineError> {
        Engine::create_room(self, room).await
    }

    async fn update_room(&self, room: Room) -> Result<Room, EngineError> {
        Engine::update_room(self, room).await
    }

    async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        Engine::delete_room(self, id).await
    }

    async fn list_bookings(&self, query: &BookingQuery) -> Result<Vec<Booking>, EngineError> {
        Engine::list_bookings(self, query).await
    }

    async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        Engine::get_booking(self, id).await
    }

    async fn check_availability(
        &self,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<Availability, EngineError> {
        let stay = Stay::new(check_in, check_out)?;
        Engine::check_availability(self, room_id, &stay, None).await
    }

    async fn create_booking(&self, new: NewBooking) -> Result<Booking, EngineError> {
        Engine::create_booking(self, new).await
    }

    async fn update_booking(&self, id: Ulid, patch: BookingPatch) -> Result<Booking, EngineError> {
        Engine::update_booking(self, id, patch).await
    }

    async fn delete_booking(&self, id: Ulid) -> Result<(), EngineError> {
        Engine::delete_booking(self, id).await.map(|_| ())
    }
}
