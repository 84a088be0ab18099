pub mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use availability::{find_overlaps, first_conflict, free_ranges, is_available, merge_stays, subtract_stays};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;
pub(crate) type RoomGuard = OwnedRwLockWriteGuard<RoomState>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that arrive while a flush is pending share one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so stale bytes never leak into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// In-memory booking store of one location, backed by a WAL.
pub struct Engine {
    pub rooms: DashMap<Ulid, SharedRoomState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: booking id → room id
    pub(super) booking_to_room: DashMap<Ulid, Ulid>,
    /// Held shared while rooms are added or removed, exclusively while compacting.
    pub(super) room_set: RwLock<()>,
}

/// Apply an event to one room it touches (no locking; caller holds the lock).
fn apply_to_room(rs: &mut RoomState, event: &Event, booking_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::RoomUpdated { room } => rs.room = room.clone(),
        Event::BookingCreated { booking } => {
            rs.insert_booking(booking.clone());
            booking_map.insert(booking.id, booking.room_id);
        }
        Event::BookingUpdated { booking } => {
            rs.remove_booking(booking.id);
            rs.insert_booking(booking.clone());
        }
        Event::BookingMoved { booking, from_room } => {
            if rs.id() == *from_room {
                rs.remove_booking(booking.id);
            }
            if rs.id() == booking.room_id {
                rs.insert_booking(booking.clone());
                booking_map.insert(booking.id, booking.room_id);
            }
        }
        Event::BookingDeleted { id, .. } => {
            rs.remove_booking(*id);
            booking_map.remove(id);
        }
        // Room creation/deletion happen at the map level
        Event::RoomCreated { .. } | Event::RoomDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            wal_tx,
            notify,
            booking_to_room: DashMap::new(),
            room_set: RwLock::new(()),
        };

        // Sole owner during replay, so try_write never contends. Blocking lock
        // calls are off limits here: this may run inside the async runtime.
        for event in &events {
            match event {
                Event::RoomCreated { room } => {
                    engine
                        .rooms
                        .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
                }
                Event::RoomDeleted { id } => {
                    engine.rooms.remove(id);
                }
                other => {
                    for room_id in other.room_ids() {
                        if let Some(entry) = engine.rooms.get(&room_id) {
                            let rs = entry.value().clone();
                            let mut guard = rs.try_write().expect("replay: uncontended write");
                            apply_to_room(&mut guard, other, &engine.booking_to_room);
                        }
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_room.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append, then apply to each locked room and notify its listeners.
    /// Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        guards: &mut [(Ulid, RoomGuard)],
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        for (room_id, guard) in guards.iter_mut() {
            apply_to_room(guard, event, &self.booking_to_room);
            self.notify.send(*room_id, event);
        }
        Ok(())
    }

    /// Write-lock the given rooms in id order (deadlock-free across callers).
    /// Fails with `NotFound` if a room was deleted while we waited for it.
    pub(super) async fn lock_rooms(&self, ids: &[Ulid]) -> Result<Vec<(Ulid, RoomGuard)>, EngineError> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
            let guard = rs.clone().write_owned().await;
            match self.get_room(&id) {
                Some(current) if Arc::ptr_eq(&current, &rs) => guards.push((id, guard)),
                _ => return Err(EngineError::NotFound(id)),
            }
        }
        Ok(guards)
    }

    /// Lock the room holding `booking_id` (and `also`, if given) and return a
    /// snapshot of the booking. Retries if the booking moves rooms mid-lookup.
    pub(super) async fn lock_booking(
        &self,
        booking_id: Ulid,
        also: Option<Ulid>,
    ) -> Result<(Ulid, Booking, Vec<(Ulid, RoomGuard)>), EngineError> {
        for _ in 0..crate::limits::LOCK_RETRIES {
            let from = self
                .room_for_booking(&booking_id)
                .ok_or(EngineError::NotFound(booking_id))?;
            let mut ids = vec![from];
            ids.extend(also);
            let guards = self.lock_rooms(&ids).await?;
            if let Some(current) = room_in(&guards, from).and_then(|rs| rs.booking(booking_id)).cloned() {
                return Ok((from, current, guards));
            }
        }
        Err(EngineError::NotFound(booking_id))
    }
}

pub(super) fn room_in(guards: &[(Ulid, RoomGuard)], id: Ulid) -> Option<&RoomState> {
    guards.iter().find(|(rid, _)| *rid == id).map(|(_, g)| &**g)
}
