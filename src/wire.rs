//! JSON-lines protocol.
//!
//! Each request is one JSON object on its own line naming the location and
//! the operation:
//!
//! ```text
//! {"location":"harbor","op":"check_availability","room_id":"01J...","check_in":"2024-06-06","check_out":"2024-06-08"}
//! ```
//!
//! Each reply is one line, `{"ok": <value>}` or
//! `{"error": {"code": "...", "message": "..."}}`, in request order. After a
//! `watch`, committed changes to that room arrive interleaved as
//! `{"event": {"room_id": "...", "event": {...}}}`.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::layout::{Direction, GridWindow};
use crate::limits::*;
use crate::location::LocationManager;
use crate::model::*;
use crate::observability;
use crate::store::BookingQuery;

fn one_guest() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub location: String,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    ListRooms,
    CreateRoom {
        room: Room,
    },
    UpdateRoom {
        room: Room,
    },
    DeleteRoom {
        id: Ulid,
    },
    ListBookings {
        #[serde(default)]
        from: Option<NaiveDate>,
        #[serde(default)]
        to: Option<NaiveDate>,
        #[serde(default)]
        search: Option<String>,
    },
    GetBooking {
        id: Ulid,
    },
    CreateBooking {
        booking: NewBooking,
    },
    UpdateBooking {
        id: Ulid,
        patch: BookingPatch,
    },
    DeleteBooking {
        id: Ulid,
    },
    CheckAvailability {
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        #[serde(default)]
        exclude: Option<Ulid>,
    },
    Reschedule {
        id: Ulid,
        room_id: Ulid,
        check_in: NaiveDate,
        #[serde(default)]
        expected_version: Option<u64>,
    },
    Quote {
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        #[serde(default = "one_guest")]
        guests: u32,
        #[serde(default)]
        is_tourist: bool,
    },
    RoomStatus {
        date: NaiveDate,
    },
    Calendar {
        first_day: NaiveDate,
        days: u32,
        #[serde(default)]
        direction: Direction,
    },
    Overlaps {
        id: Ulid,
    },
    FreeRanges {
        room_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
    Watch {
        room_id: Ulid,
    },
    Unwatch {
        room_id: Ulid,
    },
}

impl Request {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Request::ListRooms => "list_rooms",
            Request::CreateRoom { .. } => "create_room",
            Request::UpdateRoom { .. } => "update_room",
            Request::DeleteRoom { .. } => "delete_room",
            Request::ListBookings { .. } => "list_bookings",
            Request::GetBooking { .. } => "get_booking",
            Request::CreateBooking { .. } => "create_booking",
            Request::UpdateBooking { .. } => "update_booking",
            Request::DeleteBooking { .. } => "delete_booking",
            Request::CheckAvailability { .. } => "check_availability",
            Request::Reschedule { .. } => "reschedule",
            Request::Quote { .. } => "quote",
            Request::RoomStatus { .. } => "room_status",
            Request::Calendar { .. } => "calendar",
            Request::Overlaps { .. } => "overlaps",
            Request::FreeRanges { .. } => "free_ranges",
            Request::Watch { .. } => "watch",
            Request::Unwatch { .. } => "unwatch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Ok(Value),
    Error(ErrorBody),
    Event { room_id: Ulid, event: Event },
}

impl Reply {
    fn error(code: &str, message: impl Into<String>) -> Self {
        Reply::Error(ErrorBody {
            code: code.into(),
            message: message.into(),
        })
    }

    fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"error":{{"code":"internal","message":"reply encoding failed: {e}"}}}}"#)
        })
    }
}

impl From<EngineError> for Reply {
    fn from(e: EngineError) -> Self {
        Reply::error(e.code(), e.to_string())
    }
}

fn ok<T: Serialize>(value: T) -> Reply {
    match serde_json::to_value(value) {
        Ok(v) => Reply::Ok(v),
        Err(e) => Reply::error("internal", e.to_string()),
    }
}

fn reply<T: Serialize>(result: Result<T, EngineError>) -> Reply {
    match result {
        Ok(v) => ok(v),
        Err(e) => e.into(),
    }
}

/// Room subscriptions of one connection. Forwarder tasks push event lines
/// into the connection's outbound channel.
struct Watches {
    out: mpsc::Sender<String>,
    tasks: HashMap<(String, Ulid), JoinHandle<()>>,
}

impl Watches {
    fn new(out: mpsc::Sender<String>) -> Self {
        Self {
            out,
            tasks: HashMap::new(),
        }
    }

    fn watch(&mut self, location: &str, engine: &Engine, room_id: Ulid) -> Reply {
        if engine.get_room(&room_id).is_none() {
            return EngineError::NotFound(room_id).into();
        }
        let key = (location.to_string(), room_id);
        if self.tasks.contains_key(&key) {
            return ok(room_id);
        }
        if self.tasks.len() >= MAX_WATCHES_PER_CONNECTION {
            return EngineError::LimitExceeded("too many watches on connection").into();
        }

        let mut rx = engine.notify.subscribe(room_id);
        let out = self.out.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let line = Reply::Event { room_id, event }.to_line();
                        if out.send(line).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("watcher of room {room_id} lagged, {n} events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.tasks.insert(key, task);
        ok(room_id)
    }

    fn unwatch(&mut self, location: &str, room_id: Ulid) -> Reply {
        match self.tasks.remove(&(location.to_string(), room_id)) {
            Some(task) => {
                task.abort();
                ok(room_id)
            }
            None => EngineError::NotFound(room_id).into(),
        }
    }
}

impl Drop for Watches {
    fn drop(&mut self) {
        for task in self.tasks.values() {
            task.abort();
        }
    }
}

fn booking_query(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    search: Option<String>,
) -> Result<BookingQuery, EngineError> {
    match (from, to, search) {
        (None, None, Some(text)) => Ok(BookingQuery::Search(text)),
        (Some(from), Some(to), None) => Ok(BookingQuery::Range(Stay::new(from, to)?)),
        (None, None, None) => Ok(BookingQuery::All),
        _ => Err(EngineError::Validation(
            "list_bookings takes either from+to or search".into(),
        )),
    }
}

async fn execute(engine: &Engine, location: &str, request: Request, watches: &mut Watches) -> Reply {
    match request {
        Request::ListRooms => ok(engine.rooms().await),
        Request::CreateRoom { room } => reply(engine.create_room(room).await),
        Request::UpdateRoom { room } => reply(engine.update_room(room).await),
        Request::DeleteRoom { id } => reply(engine.delete_room(id).await.map(|()| id)),
        Request::ListBookings { from, to, search } => match booking_query(from, to, search) {
            Ok(query) => reply(engine.list_bookings(&query).await),
            Err(e) => e.into(),
        },
        Request::GetBooking { id } => reply(engine.get_booking(id).await),
        Request::CreateBooking { booking } => reply(engine.create_booking(booking).await),
        Request::UpdateBooking { id, patch } => reply(engine.update_booking(id, patch).await),
        Request::DeleteBooking { id } => reply(engine.delete_booking(id).await.map(|_| id)),
        Request::CheckAvailability {
            room_id,
            check_in,
            check_out,
            exclude,
        } => match Stay::new(check_in, check_out) {
            Ok(stay) => reply(engine.check_availability(room_id, &stay, exclude).await),
            Err(e) => e.into(),
        },
        Request::Reschedule {
            id,
            room_id,
            check_in,
            expected_version,
        } => reply(
            engine
                .reschedule_booking(id, room_id, check_in, expected_version)
                .await,
        ),
        Request::Quote {
            room_id,
            check_in,
            check_out,
            guests,
            is_tourist,
        } => match Stay::new(check_in, check_out) {
            Ok(stay) => reply(engine.quote(room_id, &stay, guests, is_tourist).await),
            Err(e) => e.into(),
        },
        Request::RoomStatus { date } => reply(engine.room_status(date).await),
        Request::Calendar {
            first_day,
            days,
            direction,
        } => match GridWindow::new(first_day, days) {
            Ok(window) => reply(engine.calendar(&window, direction).await),
            Err(e) => e.into(),
        },
        Request::Overlaps { id } => reply(engine.overlaps(id).await),
        Request::FreeRanges { room_id, from, to } => match Stay::new(from, to) {
            Ok(window) => reply(engine.free_ranges(room_id, &window).await),
            Err(e) => e.into(),
        },
        Request::Watch { room_id } => watches.watch(location, engine, room_id),
        Request::Unwatch { room_id } => watches.unwatch(location, room_id),
    }
}

async fn handle_line(locations: &LocationManager, line: &str, watches: &mut Watches) -> Reply {
    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(e) => e,
        Err(e) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => "unknown", "status" => "bad_request")
                .increment(1);
            return Reply::error("bad_request", e.to_string());
        }
    };
    let op = envelope.request.label();
    let started = Instant::now();

    let reply = match locations.get_or_create(&envelope.location) {
        Ok(engine) => execute(&engine, &envelope.location, envelope.request, watches).await,
        Err(e) => Reply::error("location", e.to_string()),
    };

    let status = match &reply {
        Reply::Error(body) => {
            if body.code == "storage" {
                tracing::error!("{op} failed: {}", body.message);
            }
            "error"
        }
        _ => "ok",
    };
    metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
    reply
}

fn codec_err(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        other => io::Error::other(other),
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection(socket: TcpStream, locations: Arc<LocationManager>) -> io::Result<()> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
    let mut watches = Watches::new(out_tx);

    loop {
        tokio::select! {
            incoming = framed.next() => {
                let line = match incoming {
                    None => break,
                    Some(Ok(line)) => line,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        let reply = Reply::error("bad_request", format!("request line exceeds {MAX_LINE_LEN} bytes"));
                        framed.send(reply.to_line()).await.map_err(codec_err)?;
                        continue;
                    }
                    Some(Err(LinesCodecError::Io(e))) => return Err(e),
                };
                if line.trim().is_empty() {
                    continue;
                }
                let reply = handle_line(&locations, &line, &mut watches).await;
                framed.send(reply.to_line()).await.map_err(codec_err)?;
            }
            Some(event_line) = out_rx.recv() => {
                framed.send(event_line).await.map_err(codec_err)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_envelope_with_flattened_op() {
        let env: Envelope = serde_json::from_str(
            r#"{"location":"harbor","op":"check_availability","room_id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","check_in":"2024-06-06","check_out":"2024-06-08"}"#,
        )
        .unwrap();
        assert_eq!(env.location, "harbor");
        assert_eq!(env.request.label(), "check_availability");
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let env: Envelope = serde_json::from_str(
            r#"{"location":"a","op":"quote","room_id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","check_in":"2024-06-06","check_out":"2024-06-08"}"#,
        )
        .unwrap();
        match env.request {
            Request::Quote {
                guests, is_tourist, ..
            } => {
                assert_eq!(guests, 1);
                assert!(!is_tourist);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_untyped_fields() {
        // Price as a string
        let bad_price = r#"{"location":"a","op":"create_room","room":{"room_number":"1","rates":{"base_price":"100","vat_price":118}}}"#;
        assert!(serde_json::from_str::<Envelope>(bad_price).is_err());
        // Malformed date
        let bad_date = r#"{"location":"a","op":"room_status","date":"06/06/2024"}"#;
        assert!(serde_json::from_str::<Envelope>(bad_date).is_err());
        // Malformed id
        let bad_id = r#"{"location":"a","op":"get_booking","id":"42"}"#;
        assert!(serde_json::from_str::<Envelope>(bad_id).is_err());
        // Unknown op
        let bad_op = r#"{"location":"a","op":"drop_table"}"#;
        assert!(serde_json::from_str::<Envelope>(bad_op).is_err());
    }

    #[test]
    fn reply_shapes() {
        assert_eq!(ok(true).to_line(), r#"{"ok":true}"#);
        let err: Reply = EngineError::RoomHasBookings(Ulid::nil()).into();
        let v: Value = serde_json::from_str(&err.to_line()).unwrap();
        assert_eq!(v["error"]["code"], "room_has_bookings");
    }

    #[test]
    fn booking_query_forms() {
        let d = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let e = NaiveDate::from_ymd_opt(2024, 6, 9).unwrap();
        assert_eq!(booking_query(None, None, None).unwrap(), BookingQuery::All);
        assert!(matches!(
            booking_query(Some(d), Some(e), None).unwrap(),
            BookingQuery::Range(_)
        ));
        assert!(booking_query(Some(d), None, None).is_err());
        assert!(matches!(
            booking_query(Some(e), Some(d), None),
            Err(EngineError::InvalidRange { .. })
        ));
    }
}
