use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::pricing;
use crate::reschedule::{RescheduleOutcome, plan_reschedule};

use super::conflict::*;
use super::{Engine, EngineError, RoomGuard, WalCommand, room_in};

fn validate_room(room: &Room) -> Result<(), EngineError> {
    if room.room_number.trim().is_empty() {
        return Err(EngineError::Validation("room number is required".into()));
    }
    validate_text(&room.room_number, MAX_NAME_LEN, "room number too long")?;
    validate_text(&room.category, MAX_NAME_LEN, "room category too long")?;
    if room.base_occupancy == 0 {
        return Err(EngineError::Validation("base occupancy must be at least 1".into()));
    }
    Ok(())
}

fn clean_notes(notes: Option<&String>) -> Result<Option<String>, EngineError> {
    match notes {
        Some(n) => {
            validate_text(n, MAX_NOTES_LEN, "notes too long")?;
            Ok((!n.is_empty()).then(|| n.clone()))
        }
        None => Ok(None),
    }
}

/// `current` with `patch` applied, moved into `target`. Repriced when the
/// pricing inputs change and the patch carries no explicit prices.
fn patched(current: &Booking, patch: &BookingPatch, target: &Room) -> Result<Booking, EngineError> {
    let stay = Stay::new(
        patch.check_in.unwrap_or(current.check_in),
        patch.check_out.unwrap_or(current.check_out),
    )?;
    validate_stay(&stay)?;

    let notes = match &patch.notes {
        Some(_) => clean_notes(patch.notes.as_ref())?,
        None => current.notes.clone(),
    };
    let mut next = Booking {
        room_id: target.id,
        guest_name: patch
            .guest_name
            .clone()
            .unwrap_or_else(|| current.guest_name.clone()),
        check_in: stay.check_in,
        check_out: stay.check_out,
        nights: stay.nights(),
        guests: patch.guests.unwrap_or(current.guests),
        is_tourist: patch.is_tourist.unwrap_or(current.is_tourist),
        status: patch.status.unwrap_or(current.status),
        payment_status: patch.payment_status.unwrap_or(current.payment_status),
        source: patch.source.unwrap_or(current.source),
        notes,
        version: current.version + 1,
        ..current.clone()
    };

    let inputs_changed = next.room_id != current.room_id
        || stay != current.stay()
        || next.guests != current.guests
        || next.is_tourist != current.is_tourist;
    match patch.prices {
        Some(prices) => next.set_prices(prices.sanitized()),
        None if inputs_changed => {
            next.set_prices(pricing::quote(target, &stay, next.guests, next.is_tourist).fields)
        }
        None => {}
    }
    Ok(next)
}

impl Engine {
    pub async fn create_room(&self, room: Room) -> Result<Room, EngineError> {
        validate_room(&room)?;
        if self.rooms.len() >= MAX_ROOMS_PER_LOCATION {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        let _room_set = self.room_set.read().await;
        if self.rooms.contains_key(&room.id) {
            return Err(EngineError::AlreadyExists(room.id));
        }
        self.ensure_room_number_free(&room).await?;

        let event = Event::RoomCreated { room: room.clone() };
        self.wal_append(&event).await?;
        self.rooms
            .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
        self.notify.send(room.id, &event);
        Ok(room)
    }

    /// Replace a room's details and rates. Existing bookings keep their prices.
    pub async fn update_room(&self, room: Room) -> Result<Room, EngineError> {
        validate_room(&room)?;
        self.ensure_room_number_free(&room).await?;
        let mut guards = self.lock_rooms(&[room.id]).await?;
        let event = Event::RoomUpdated { room: room.clone() };
        self.persist_and_apply(&mut guards, &event).await?;
        Ok(room)
    }

    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let _room_set = self.room_set.read().await;
        let guards = self.lock_rooms(&[id]).await?;
        if room_in(&guards, id).is_some_and(|rs| !rs.bookings.is_empty()) {
            return Err(EngineError::RoomHasBookings(id));
        }

        let event = Event::RoomDeleted { id };
        self.wal_append(&event).await?;
        self.rooms.remove(&id);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    async fn ensure_room_number_free(&self, room: &Room) -> Result<(), EngineError> {
        for (id, rs) in self.room_handles() {
            if id != room.id && rs.read().await.room.room_number == room.room_number {
                return Err(EngineError::Validation(format!(
                    "room number {} is already in use",
                    room.room_number
                )));
            }
        }
        Ok(())
    }

    /// Store a new booking, quoting its price from the room's rates unless
    /// explicit prices are given. Rejects overlap with an active booking
    /// unless `allow_overlap` is set.
    pub async fn create_booking(&self, new: NewBooking) -> Result<Booking, EngineError> {
        validate_guest_name(&new.guest_name)?;
        validate_guests(new.guests)?;
        let notes = clean_notes(new.notes.as_ref())?;
        let stay = Stay::new(new.check_in, new.check_out)?;
        validate_stay(&stay)?;

        let id = new.id.unwrap_or_else(Ulid::new);
        if self.booking_to_room.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let mut guards = self.lock_rooms(&[new.room_id]).await?;
        let rs = room_in(&guards, new.room_id).ok_or(EngineError::NotFound(new.room_id))?;
        if rs.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }

        let prices = match new.prices {
            Some(p) => p.sanitized(),
            None => pricing::quote(&rs.room, &stay, new.guests, new.is_tourist).fields,
        };
        let mut booking = Booking {
            id,
            room_id: new.room_id,
            guest_name: new.guest_name,
            check_in: stay.check_in,
            check_out: stay.check_out,
            nights: stay.nights(),
            guests: new.guests,
            is_tourist: new.is_tourist,
            price: 0.0,
            price_per_night: 0.0,
            price_per_night_no_vat: 0.0,
            status: new.status,
            payment_status: new.payment_status,
            source: new.source,
            notes,
            version: 1,
        };
        booking.set_prices(prices);

        if booking.is_active() && !new.allow_overlap {
            check_no_conflict(rs, &stay, None)?;
        }

        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guards, &event).await?;
        Ok(booking)
    }

    /// Apply a form edit. Availability is re-checked when the booking changes
    /// room or dates, or comes back from cancellation.
    pub async fn update_booking(&self, id: Ulid, patch: BookingPatch) -> Result<Booking, EngineError> {
        if let Some(name) = &patch.guest_name {
            validate_guest_name(name)?;
        }
        if let Some(guests) = patch.guests {
            validate_guests(guests)?;
        }

        let (from, current, mut guards) = self.lock_booking(id, patch.room_id).await?;
        check_version(&current, patch.expected_version)?;

        let to = patch.room_id.unwrap_or(from);
        let target = room_in(&guards, to).ok_or(EngineError::NotFound(to))?;
        let updated = patched(&current, &patch, &target.room)?;

        let relocated = updated.room_id != current.room_id || updated.stay() != current.stay();
        let reactivated = updated.is_active() && !current.is_active();
        if updated.is_active() && (relocated || reactivated) && !patch.allow_overlap {
            check_no_conflict(target, &updated.stay(), Some(id))?;
        }
        if to != from && target.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }

        self.commit_change(&mut guards, from, updated).await
    }

    /// Drag-and-drop move. Duration and prices are preserved; the availability
    /// check and the commit happen under the same room locks.
    pub async fn reschedule_booking(
        &self,
        id: Ulid,
        new_room_id: Ulid,
        new_check_in: NaiveDate,
        expected_version: Option<u64>,
    ) -> Result<RescheduleOutcome, EngineError> {
        let (from, current, mut guards) = self.lock_booking(id, Some(new_room_id)).await?;
        check_version(&current, expected_version)?;

        let target = room_in(&guards, new_room_id).ok_or(EngineError::NotFound(new_room_id))?;
        let outcome = plan_reschedule(&current, new_room_id, new_check_in, &target.bookings)
            .inspect_err(|e| {
                if matches!(e, EngineError::Conflict { .. }) {
                    metrics::counter!(observability::RESCHEDULE_CONFLICTS_TOTAL).increment(1);
                }
            })?;

        let mut moved = match outcome {
            RescheduleOutcome::Unchanged(_) => return Ok(outcome),
            RescheduleOutcome::Moved(booking) => booking,
        };
        validate_stay(&moved.stay())?;
        moved.version += 1;
        let moved = self.commit_change(&mut guards, from, moved).await?;
        Ok(RescheduleOutcome::Moved(moved))
    }

    async fn commit_change(
        &self,
        guards: &mut [(Ulid, RoomGuard)],
        from: Ulid,
        booking: Booking,
    ) -> Result<Booking, EngineError> {
        let event = if booking.room_id == from {
            Event::BookingUpdated {
                booking: booking.clone(),
            }
        } else {
            Event::BookingMoved {
                booking: booking.clone(),
                from_room: from,
            }
        };
        self.persist_and_apply(guards, &event).await?;
        Ok(booking)
    }

    pub async fn delete_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (room_id, _, mut guards) = self.lock_booking(id, None).await?;
        let event = Event::BookingDeleted { id, room_id };
        self.persist_and_apply(&mut guards, &event).await?;
        Ok(room_id)
    }

    /// Mark confirmed bookings whose check-out date has come as completed.
    pub async fn complete_departed(&self, today: NaiveDate) -> Vec<Ulid> {
        let mut due = Vec::new();
        for (_, rs) in self.room_handles() {
            let guard = rs.read().await;
            due.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| b.status == BookingStatus::Confirmed && b.check_out <= today)
                    .map(|b| (b.id, b.version)),
            );
        }

        let mut completed = Vec::new();
        for (id, version) in due {
            let patch = BookingPatch {
                status: Some(BookingStatus::Completed),
                expected_version: Some(version),
                ..BookingPatch::default()
            };
            match self.update_booking(id, patch).await {
                Ok(_) => completed.push(id),
                // Edited or deleted meanwhile; next pass picks it up again if still due
                Err(e) => tracing::debug!("housekeeping skip {id}: {e}"),
            }
        }
        completed
    }

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Hold the room set and read-lock every room (id order) for the whole
        // rewrite so no commit can land in the old file after the snapshot.
        let _room_set = self.room_set.write().await;
        let mut guards = Vec::new();
        for (_, rs) in self.room_handles() {
            guards.push(rs.read_owned().await);
        }

        let mut events = Vec::new();
        for guard in &guards {
            events.push(Event::RoomCreated {
                room: guard.room.clone(),
            });
            events.extend(
                guard
                    .bookings
                    .iter()
                    .cloned()
                    .map(|booking| Event::BookingCreated { booking }),
            );
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Today's date on the host clock.
    pub fn today(&self) -> NaiveDate {
        today()
    }
}
