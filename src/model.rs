use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::datemath::{self, DayClass};
use crate::engine::EngineError;
use crate::pricing::PriceFields;

/// Half-open stay `[check_in, check_out)`. The check-out day is not a lodging night.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stay {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl Stay {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Result<Self, EngineError> {
        if check_out <= check_in {
            return Err(EngineError::InvalidRange { check_in, check_out });
        }
        Ok(Self { check_in, check_out })
    }

    /// A stay of `nights` nights starting on `check_in`.
    pub fn starting(check_in: NaiveDate, nights: u32) -> Result<Self, EngineError> {
        let check_out = datemath::add_nights(check_in, nights.max(1))
            .ok_or_else(|| EngineError::Validation("check-out date out of range".into()))?;
        Self::new(check_in, check_out)
    }

    pub fn nights(&self) -> u32 {
        datemath::nights_between(self.check_in, self.check_out)
    }

    pub fn overlaps(&self, other: &Stay) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }

    pub fn each_night(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        datemath::each_night(self.check_in, self.check_out)
    }

    /// True if `date` is a lodging night of this stay.
    pub fn contains_night(&self, date: NaiveDate) -> bool {
        self.check_in <= date && date < self.check_out
    }
}

impl fmt::Display for Stay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.check_in, self.check_out)
    }
}

/// Nightly rates of a room. Weekend tiers that are absent or zero bill at the
/// standard tier of the same VAT column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSchedule {
    /// Standard night, VAT excluded.
    pub base_price: f64,
    /// Standard night, VAT included.
    pub vat_price: f64,
    #[serde(default)]
    pub friday_price: Option<f64>,
    #[serde(default)]
    pub friday_vat_price: Option<f64>,
    #[serde(default)]
    pub saturday_price: Option<f64>,
    #[serde(default)]
    pub saturday_vat_price: Option<f64>,
}

impl RateSchedule {
    /// Flat schedule: same rate every night.
    pub fn flat(base_price: f64, vat_price: f64) -> Self {
        Self {
            base_price,
            vat_price,
            friday_price: None,
            friday_vat_price: None,
            saturday_price: None,
            saturday_vat_price: None,
        }
    }

    /// Base nightly rate for a day class. Tourists bill the no-VAT column.
    pub fn nightly(&self, class: DayClass, is_tourist: bool) -> f64 {
        let (no_vat, vat_included) = match class {
            DayClass::Standard => (self.base_price, self.vat_price),
            DayClass::Friday => (
                weekend_or(self.friday_price, self.base_price),
                weekend_or(self.friday_vat_price, self.vat_price),
            ),
            DayClass::Saturday => (
                weekend_or(self.saturday_price, self.base_price),
                weekend_or(self.saturday_vat_price, self.vat_price),
            ),
        };
        if is_tourist { no_vat } else { vat_included }
    }
}

fn weekend_or(tier: Option<f64>, standard: f64) -> f64 {
    tier.filter(|p| *p > 0.0).unwrap_or(standard)
}

fn default_base_occupancy() -> u32 {
    2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    #[serde(default = "Ulid::new")]
    pub id: Ulid,
    pub room_number: String,
    #[serde(default)]
    pub category: String,
    /// Guests included in the nightly rate.
    #[serde(default = "default_base_occupancy")]
    pub base_occupancy: u32,
    pub rates: RateSchedule,
    /// Per night, per guest above `base_occupancy`.
    #[serde(default)]
    pub extra_guest_charge: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    #[default]
    Confirmed,
    Cancelled,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Partial,
    Paid,
    Refunded,
}

/// Channel the booking came in through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingSource {
    #[default]
    Direct,
    Phone,
    BookingCom,
    Airbnb,
    Other,
}

impl BookingSource {
    pub fn label(&self) -> &'static str {
        match self {
            BookingSource::Direct => "direct",
            BookingSource::Phone => "phone",
            BookingSource::BookingCom => "booking.com",
            BookingSource::Airbnb => "airbnb",
            BookingSource::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub guest_name: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub nights: u32,
    pub guests: u32,
    /// Tourists are VAT exempt.
    pub is_tourist: bool,
    /// Total price of the stay.
    pub price: f64,
    /// Average nightly price, VAT included for residents.
    pub price_per_night: f64,
    pub price_per_night_no_vat: f64,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub source: BookingSource,
    pub notes: Option<String>,
    /// Bumped on every committed change.
    pub version: u64,
}

impl Booking {
    pub fn stay(&self) -> Stay {
        Stay {
            check_in: self.check_in,
            check_out: self.check_out,
        }
    }

    /// Cancelled bookings do not occupy their room.
    pub fn is_active(&self) -> bool {
        self.status != BookingStatus::Cancelled
    }

    pub fn prices(&self) -> PriceFields {
        PriceFields {
            price_per_night_no_vat: self.price_per_night_no_vat,
            price_per_night: self.price_per_night,
            total_price: self.price,
        }
    }

    pub fn set_prices(&mut self, prices: PriceFields) {
        self.price = prices.total_price;
        self.price_per_night = prices.price_per_night;
        self.price_per_night_no_vat = prices.price_per_night_no_vat;
    }
}

fn default_guests() -> u32 {
    1
}

/// Data for a new booking. Prices are quoted from the room's rates unless given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBooking {
    #[serde(default)]
    pub id: Option<Ulid>,
    pub room_id: Ulid,
    pub guest_name: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    #[serde(default = "default_guests")]
    pub guests: u32,
    #[serde(default)]
    pub is_tourist: bool,
    #[serde(default)]
    pub status: BookingStatus,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub source: BookingSource,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub prices: Option<PriceFields>,
    /// Store even if it overlaps an active booking (imports). Overlaps are flagged, not blocked.
    #[serde(default)]
    pub allow_overlap: bool,
}

impl NewBooking {
    pub fn new(room_id: Ulid, guest_name: impl Into<String>, check_in: NaiveDate, check_out: NaiveDate) -> Self {
        Self {
            id: None,
            room_id,
            guest_name: guest_name.into(),
            check_in,
            check_out,
            guests: 1,
            is_tourist: false,
            status: BookingStatus::default(),
            payment_status: PaymentStatus::default(),
            source: BookingSource::default(),
            notes: None,
            prices: None,
            allow_overlap: false,
        }
    }
}

/// Partial update. Changing room, dates, guests or the tourist flag reprices
/// the booking unless `prices` is supplied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookingPatch {
    pub room_id: Option<Ulid>,
    pub guest_name: Option<String>,
    pub check_in: Option<NaiveDate>,
    pub check_out: Option<NaiveDate>,
    pub guests: Option<u32>,
    pub is_tourist: Option<bool>,
    pub status: Option<BookingStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub source: Option<BookingSource>,
    pub notes: Option<String>,
    pub prices: Option<PriceFields>,
    /// Reject the patch if the stored booking moved past this version.
    pub expected_version: Option<u64>,
    pub allow_overlap: bool,
}

impl BookingPatch {
    /// Move a booking to the room and dates of `moved`, keeping its prices.
    pub fn relocation(moved: &Booking, expected_version: u64) -> Self {
        Self {
            room_id: Some(moved.room_id),
            check_in: Some(moved.check_in),
            check_out: Some(moved.check_out),
            prices: Some(moved.prices()),
            expected_version: Some(expected_version),
            ..Self::default()
        }
    }
}

/// A room and its bookings, sorted by `check_in`.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            bookings: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.room.id
    }

    /// Insert keeping check-in order.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.check_in <= booking.check_in);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Bookings (any status) whose stay overlaps `query`.
    pub fn overlapping(&self, query: Stay) -> impl Iterator<Item = &Booking> {
        // Everything from `right_bound` on checks in at or after query.check_out.
        let right_bound = self
            .bookings
            .partition_point(|b| b.check_in < query.check_out);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.check_out > query.check_in)
    }
}

/// Committed state changes. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated { room: Room },
    RoomUpdated { room: Room },
    RoomDeleted { id: Ulid },
    BookingCreated { booking: Booking },
    /// Same room; full snapshot of the new state.
    BookingUpdated { booking: Booking },
    /// Booking now lives in `booking.room_id`.
    BookingMoved { booking: Booking, from_room: Ulid },
    BookingDeleted { id: Ulid, room_id: Ulid },
}

impl Event {
    /// Rooms whose state this event touches.
    pub fn room_ids(&self) -> Vec<Ulid> {
        match self {
            Event::RoomCreated { room } | Event::RoomUpdated { room } => vec![room.id],
            Event::RoomDeleted { id } => vec![*id],
            Event::BookingCreated { booking } | Event::BookingUpdated { booking } => {
                vec![booking.room_id]
            }
            Event::BookingMoved { booking, from_room } => vec![*from_room, booking.room_id],
            Event::BookingDeleted { room_id, .. } => vec![*room_id],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub available: bool,
}
