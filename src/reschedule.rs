use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::engine::{EngineError, first_conflict};
use crate::model::*;
use crate::store::{BookingQuery, BookingStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "booking", rename_all = "snake_case")]
pub enum RescheduleOutcome {
    /// Dropped back where it was; nothing written.
    Unchanged(Booking),
    Moved(Booking),
}

impl RescheduleOutcome {
    pub fn booking(&self) -> &Booking {
        match self {
            RescheduleOutcome::Unchanged(b) | RescheduleOutcome::Moved(b) => b,
        }
    }

    pub fn into_booking(self) -> Booking {
        match self {
            RescheduleOutcome::Unchanged(b) | RescheduleOutcome::Moved(b) => b,
        }
    }
}

/// Work out a move of `current` to `new_room_id` starting `new_check_in`.
///
/// The stay keeps its length. Everything but room and dates is copied as is,
/// prices included. `candidates` are the bookings that could block the target.
pub fn plan_reschedule(
    current: &Booking,
    new_room_id: Ulid,
    new_check_in: NaiveDate,
    candidates: &[Booking],
) -> Result<RescheduleOutcome, EngineError> {
    if new_room_id == current.room_id && new_check_in == current.check_in {
        return Ok(RescheduleOutcome::Unchanged(current.clone()));
    }

    let stay = Stay::starting(new_check_in, current.stay().nights())?;
    if let Some(blocker) = first_conflict(new_room_id, &stay, Some(current.id), candidates) {
        return Err(EngineError::Conflict {
            booking: blocker.id,
            guest: blocker.guest_name.clone(),
            stay: blocker.stay(),
        });
    }

    Ok(RescheduleOutcome::Moved(Booking {
        room_id: new_room_id,
        check_in: stay.check_in,
        check_out: stay.check_out,
        ..current.clone()
    }))
}

/// Client-side reschedule through any [`BookingStore`]: read, check, commit.
///
/// The commit carries the version read at the start, so a booking edited in
/// between is rejected instead of overwritten.
pub struct RescheduleTransaction<'a, S: BookingStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: BookingStore + ?Sized> RescheduleTransaction<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn run(
        &self,
        booking_id: Ulid,
        new_room_id: Ulid,
        new_check_in: NaiveDate,
    ) -> Result<RescheduleOutcome, EngineError> {
        let current = self.store.get_booking(booking_id).await?;
        if new_room_id == current.room_id && new_check_in == current.check_in {
            return Ok(RescheduleOutcome::Unchanged(current));
        }

        let target = Stay::starting(new_check_in, current.stay().nights())?;
        let candidates = self
            .store
            .list_bookings(&BookingQuery::Range(target))
            .await?;

        match plan_reschedule(&current, new_room_id, new_check_in, &candidates)? {
            RescheduleOutcome::Moved(moved) => {
                let patch = BookingPatch::relocation(&moved, current.version);
                let committed = self.store.update_booking(booking_id, patch).await?;
                Ok(RescheduleOutcome::Moved(committed))
            }
            unchanged => Ok(unchanged),
        }
    }
}

// ── Drag session ──────────────────────────────────────────────────

/// Cell a booking bar was dropped on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropTarget {
    pub room_id: Ulid,
    pub check_in: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DragState {
    Idle,
    /// `original` is the pre-drag snapshot.
    Dragging { original: Booking },
    Dropped { original: Booking, target: DropTarget },
    Cancelled { original: Booking },
}

#[derive(Debug)]
pub enum DragEvent {
    Started { booking_id: Ulid },
    Dropped { booking_id: Ulid, target: DropTarget },
    Committed(RescheduleOutcome),
    /// Commit failed; the view should go back to `original`.
    Reverted { original: Booking, error: EngineError },
    Cancelled { original: Booking },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DragError {
    #[error("another booking is already being dragged")]
    Busy,
    #[error("no booking is being dragged")]
    NotDragging,
    #[error("booking has not been dropped yet")]
    NotDropped,
}

/// One drag-and-drop gesture at a time: `Idle → Dragging → Dropped | Cancelled → Idle`.
#[derive(Debug)]
pub struct DragSession {
    state: DragState,
}

impl Default for DragSession {
    fn default() -> Self {
        Self::new()
    }
}

impl DragSession {
    pub fn new() -> Self {
        Self {
            state: DragState::Idle,
        }
    }

    pub fn state(&self) -> &DragState {
        &self.state
    }

    pub fn start(&mut self, booking: Booking) -> Result<DragEvent, DragError> {
        match self.state {
            DragState::Idle | DragState::Cancelled { .. } => {
                let booking_id = booking.id;
                self.state = DragState::Dragging { original: booking };
                Ok(DragEvent::Started { booking_id })
            }
            _ => Err(DragError::Busy),
        }
    }

    pub fn drop_on(&mut self, target: DropTarget) -> Result<DragEvent, DragError> {
        match std::mem::replace(&mut self.state, DragState::Idle) {
            DragState::Dragging { original } => {
                let booking_id = original.id;
                self.state = DragState::Dropped { original, target };
                Ok(DragEvent::Dropped { booking_id, target })
            }
            other => {
                self.state = other;
                Err(DragError::NotDragging)
            }
        }
    }

    /// Abandon the drag (escape key, drop outside the grid).
    pub fn cancel(&mut self) -> Result<DragEvent, DragError> {
        match std::mem::replace(&mut self.state, DragState::Idle) {
            DragState::Dragging { original } | DragState::Dropped { original, .. } => {
                self.state = DragState::Cancelled {
                    original: original.clone(),
                };
                Ok(DragEvent::Cancelled { original })
            }
            other => {
                self.state = other;
                Err(DragError::NotDragging)
            }
        }
    }

    /// Back to idle after a cancel.
    pub fn reset(&mut self) {
        if matches!(self.state, DragState::Cancelled { .. }) {
            self.state = DragState::Idle;
        }
    }

    /// Run the reschedule for the dropped booking. The session is idle
    /// afterwards whether the commit succeeded or not.
    pub async fn commit<S: BookingStore + ?Sized>(&mut self, store: &S) -> Result<DragEvent, DragError> {
        let (original, target) = match std::mem::replace(&mut self.state, DragState::Idle) {
            DragState::Dropped { original, target } => (original, target),
            other => {
                self.state = other;
                return Err(DragError::NotDropped);
            }
        };

        let result = RescheduleTransaction::new(store)
            .run(original.id, target.room_id, target.check_in)
            .await;
        Ok(match result {
            Ok(outcome) => DragEvent::Committed(outcome),
            Err(error) => {
                tracing::warn!("reschedule of {} failed, reverting: {error}", original.id);
                DragEvent::Reverted { original, error }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::model::fixtures::*;

    fn stay(a: u32, b: u32) -> Stay {
        Stay::new(june(a), june(b)).unwrap()
    }

    #[test]
    fn same_room_and_date_is_a_no_op() {
        let b = booking(Ulid::new(), june(5), june(8));
        let outcome = plan_reschedule(&b, b.room_id, b.check_in, std::slice::from_ref(&b)).unwrap();
        assert_eq!(outcome, RescheduleOutcome::Unchanged(b));
    }

    #[test]
    fn move_keeps_length_and_prices() {
        let mut b = booking(Ulid::new(), june(5), june(8));
        b.price = 999.0;
        b.notes = Some("crib".into());
        let new_room = Ulid::new();
        let moved = plan_reschedule(&b, new_room, june(10), &[]).unwrap().into_booking();
        assert_eq!(moved.stay(), stay(10, 13));
        assert_eq!(moved.room_id, new_room);
        assert_eq!(moved.price, 999.0);
        assert_eq!(moved.notes.as_deref(), Some("crib"));
        assert_eq!(moved.id, b.id);
        assert_eq!(moved.version, b.version);
    }

    #[test]
    fn move_within_own_range_does_not_conflict_with_itself() {
        let b = booking(Ulid::new(), june(5), june(8));
        let moved = plan_reschedule(&b, b.room_id, june(6), std::slice::from_ref(&b)).unwrap();
        assert_eq!(moved.booking().stay(), stay(6, 9));
    }

    #[test]
    fn conflict_names_the_blocking_guest() {
        let target_room = Ulid::new();
        let b = booking(Ulid::new(), june(5), june(8));
        let mut other = booking(target_room, june(9), june(12));
        other.guest_name = "Avi".into();
        let err = plan_reschedule(&b, target_room, june(7), &[other.clone()]).unwrap_err();
        match err {
            EngineError::Conflict { booking, guest, stay: s } => {
                assert_eq!(booking, other.id);
                assert_eq!(guest, "Avi");
                assert_eq!(s, stay(9, 12));
            }
            e => panic!("expected conflict, got {e}"),
        }
        // Abutting is fine
        assert!(plan_reschedule(&b, target_room, june(6), &[other]).is_ok());
    }

    /// In-memory store that can be told to fail the next commit.
    #[derive(Default)]
    struct MemStore {
        rooms: Vec<Room>,
        bookings: Mutex<Vec<Booking>>,
        fail_update: AtomicBool,
    }

    impl MemStore {
        fn with(bookings: Vec<Booking>) -> Self {
            Self {
                bookings: Mutex::new(bookings),
                ..Self::default()
            }
        }

        fn snapshot(&self, id: Ulid) -> Booking {
            self.bookings
                .lock()
                .unwrap()
                .iter()
                .find(|b| b.id == id)
                .cloned()
                .unwrap()
        }
    }

    #[async_trait::async_trait]
    impl BookingStore for MemStore {
        async fn rooms(&self) -> Vec<Room> {
            self.rooms.clone()
        }
        async fn create_room(&self, room: Room) -> Result<Room, EngineError> {
            Ok(room)
        }
        async fn update_room(&self, room: Room) -> Result<Room, EngineError> {
            Ok(room)
        }
        async fn delete_room(&self, _id: Ulid) -> Result<(), EngineError> {
            Ok(())
        }
        async fn list_bookings(&self, query: &BookingQuery) -> Result<Vec<Booking>, EngineError> {
            let all = self.bookings.lock().unwrap();
            Ok(all.iter().filter(|b| query.matches(b)).cloned().collect())
        }
        async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
            let all = self.bookings.lock().unwrap();
            all.iter()
                .find(|b| b.id == id)
                .cloned()
                .ok_or(EngineError::NotFound(id))
        }
        async fn check_availability(
            &self,
            room_id: Ulid,
            check_in: NaiveDate,
            check_out: NaiveDate,
        ) -> Result<Availability, EngineError> {
            let stay = Stay::new(check_in, check_out)?;
            let all = self.bookings.lock().unwrap();
            Ok(Availability {
                available: crate::engine::is_available(room_id, &stay, None, all.iter()),
            })
        }
        async fn create_booking(&self, _new: NewBooking) -> Result<Booking, EngineError> {
            Err(EngineError::Validation("read-only".into()))
        }
        async fn update_booking(&self, id: Ulid, patch: BookingPatch) -> Result<Booking, EngineError> {
            if self.fail_update.swap(false, Ordering::SeqCst) {
                return Err(EngineError::Wal("disk full".into()));
            }
            let mut all = self.bookings.lock().unwrap();
            let b = all
                .iter_mut()
                .find(|b| b.id == id)
                .ok_or(EngineError::NotFound(id))?;
            if patch.expected_version.is_some_and(|v| v != b.version) {
                return Err(EngineError::VersionMismatch {
                    id,
                    expected: patch.expected_version.unwrap_or_default(),
                    actual: b.version,
                });
            }
            b.room_id = patch.room_id.unwrap_or(b.room_id);
            b.check_in = patch.check_in.unwrap_or(b.check_in);
            b.check_out = patch.check_out.unwrap_or(b.check_out);
            if let Some(prices) = patch.prices {
                b.set_prices(prices);
            }
            b.version += 1;
            Ok(b.clone())
        }
        async fn delete_booking(&self, _id: Ulid) -> Result<(), EngineError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn transaction_commits_a_relocation() {
        let rid = Ulid::new();
        let b = booking(rid, june(5), june(8));
        let store = MemStore::with(vec![b.clone()]);
        let new_room = Ulid::new();

        let outcome = RescheduleTransaction::new(&store)
            .run(b.id, new_room, june(20))
            .await
            .unwrap();
        let moved = outcome.into_booking();
        assert_eq!(moved.room_id, new_room);
        assert_eq!(moved.stay(), stay(20, 23));
        assert_eq!(moved.price, b.price);
        assert_eq!(moved.version, 2);
        assert_eq!(store.snapshot(b.id), moved);
    }

    #[tokio::test]
    async fn transaction_conflict_writes_nothing() {
        let rid = Ulid::new();
        let b = booking(rid, june(5), june(8));
        let blocker = booking(rid, june(10), june(12));
        let store = MemStore::with(vec![b.clone(), blocker]);

        let err = RescheduleTransaction::new(&store)
            .run(b.id, rid, june(9))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
        assert_eq!(store.snapshot(b.id), b);
    }

    #[tokio::test]
    async fn drag_drop_commit() {
        let b = booking(Ulid::new(), june(5), june(8));
        let store = MemStore::with(vec![b.clone()]);
        let mut drag = DragSession::new();

        assert!(matches!(drag.start(b.clone()), Ok(DragEvent::Started { .. })));
        assert_eq!(drag.start(b.clone()).unwrap_err(), DragError::Busy);

        let target = DropTarget {
            room_id: b.room_id,
            check_in: june(15),
        };
        drag.drop_on(target).unwrap();
        match drag.commit(&store).await.unwrap() {
            DragEvent::Committed(RescheduleOutcome::Moved(moved)) => {
                assert_eq!(moved.check_in, june(15))
            }
            e => panic!("unexpected {e:?}"),
        }
        assert_eq!(drag.state(), &DragState::Idle);
    }

    #[tokio::test]
    async fn failed_commit_reverts_to_snapshot() {
        let b = booking(Ulid::new(), june(5), june(8));
        let store = MemStore::with(vec![b.clone()]);
        store.fail_update.store(true, Ordering::SeqCst);

        let mut drag = DragSession::new();
        drag.start(b.clone()).unwrap();
        drag.drop_on(DropTarget {
            room_id: Ulid::new(),
            check_in: june(1),
        })
        .unwrap();

        match drag.commit(&store).await.unwrap() {
            DragEvent::Reverted { original, error } => {
                assert_eq!(original, b);
                assert!(error.is_recoverable());
            }
            e => panic!("unexpected {e:?}"),
        }
        assert_eq!(store.snapshot(b.id), b);
        assert_eq!(drag.state(), &DragState::Idle);
    }

    #[tokio::test]
    async fn dropping_in_place_is_unchanged() {
        let b = booking(Ulid::new(), june(5), june(8));
        let store = MemStore::with(vec![b.clone()]);
        let mut drag = DragSession::new();
        drag.start(b.clone()).unwrap();
        drag.drop_on(DropTarget {
            room_id: b.room_id,
            check_in: b.check_in,
        })
        .unwrap();
        match drag.commit(&store).await.unwrap() {
            DragEvent::Committed(RescheduleOutcome::Unchanged(same)) => assert_eq!(same, b),
            e => panic!("unexpected {e:?}"),
        }
        assert_eq!(store.snapshot(b.id).version, 1);
    }

    #[test]
    fn cancel_and_misordered_transitions() {
        let b = booking(Ulid::new(), june(5), june(8));
        let mut drag = DragSession::new();
        let target = DropTarget {
            room_id: b.room_id,
            check_in: june(9),
        };
        assert_eq!(drag.drop_on(target).unwrap_err(), DragError::NotDragging);
        assert_eq!(drag.cancel().unwrap_err(), DragError::NotDragging);

        drag.start(b.clone()).unwrap();
        match drag.cancel().unwrap() {
            DragEvent::Cancelled { original } => assert_eq!(original, b),
            e => panic!("unexpected {e:?}"),
        }
        assert!(matches!(drag.state(), DragState::Cancelled { .. }));
        drag.reset();
        assert_eq!(drag.state(), &DragState::Idle);
    }
}
