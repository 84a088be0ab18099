//! Guest pricing.
//!
//! A booking's price is shown as three linked figures: the total for the
//! stay, the average nightly price, and the average nightly price without
//! VAT. [`quote`] derives all three from a room's rates and the calendar
//! nights of a stay. [`apply_edit`] propagates a direct edit of one figure to
//! the other two, leaving a locked figure untouched. [`PriceForm`] carries
//! the repricing policy shared by every booking form.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::datemath::{self, DayClass};
use crate::model::{Booking, Room, Stay};

pub const VAT_RATE: f64 = 1.18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceField {
    PricePerNightNoVat,
    PricePerNight,
    TotalPrice,
}

impl PriceField {
    pub const ALL: [PriceField; 3] = [
        PriceField::PricePerNightNoVat,
        PriceField::PricePerNight,
        PriceField::TotalPrice,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceFields {
    pub price_per_night_no_vat: f64,
    pub price_per_night: f64,
    pub total_price: f64,
}

impl PriceFields {
    pub fn get(&self, field: PriceField) -> f64 {
        match field {
            PriceField::PricePerNightNoVat => self.price_per_night_no_vat,
            PriceField::PricePerNight => self.price_per_night,
            PriceField::TotalPrice => self.total_price,
        }
    }

    pub fn set(&mut self, field: PriceField, value: f64) {
        match field {
            PriceField::PricePerNightNoVat => self.price_per_night_no_vat = value,
            PriceField::PricePerNight => self.price_per_night = value,
            PriceField::TotalPrice => self.total_price = value,
        }
    }

    pub fn rounded(self) -> Self {
        Self {
            price_per_night_no_vat: round2(self.price_per_night_no_vat),
            price_per_night: round2(self.price_per_night),
            total_price: round2(self.total_price),
        }
    }

    /// Clamp each figure to a non-negative, 2-decimal amount.
    pub fn sanitized(self) -> Self {
        Self {
            price_per_night_no_vat: round2(clamp_price(self.price_per_night_no_vat)),
            price_per_night: round2(clamp_price(self.price_per_night)),
            total_price: round2(clamp_price(self.total_price)),
        }
    }
}

/// Negative, NaN and infinite amounts become 0.
pub fn clamp_price(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 { value } else { 0.0 }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn net_of_vat(per_night: f64, is_tourist: bool) -> f64 {
    if is_tourist { per_night } else { per_night / VAT_RATE }
}

fn gross_of_vat(per_night_no_vat: f64, is_tourist: bool) -> f64 {
    if is_tourist { per_night_no_vat } else { per_night_no_vat * VAT_RATE }
}

/// Surcharge per night for guests above the room's base occupancy.
pub fn extra_guest_surcharge(room: &Room, guests: u32) -> f64 {
    f64::from(guests.saturating_sub(room.base_occupancy)) * clamp_price(room.extra_guest_charge)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NightLine {
    pub date: NaiveDate,
    pub class: DayClass,
    pub base_rate: f64,
    pub surcharge: f64,
}

impl NightLine {
    pub fn amount(&self) -> f64 {
        self.base_rate + self.surcharge
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub nights: u32,
    pub fields: PriceFields,
    pub lines: Vec<NightLine>,
}

/// Price a stay night by night at the room's weekday rates.
///
/// `price_per_night` is the average over the stay, so a stay that crosses a
/// weekend shows a blended nightly figure.
pub fn quote(room: &Room, stay: &Stay, guests: u32, is_tourist: bool) -> Quote {
    let surcharge = extra_guest_surcharge(room, guests);
    let lines: Vec<NightLine> = datemath::each_night(stay.check_in, stay.check_out)
        .map(|date| {
            let class = datemath::day_class(date);
            NightLine {
                date,
                class,
                base_rate: clamp_price(room.rates.nightly(class, is_tourist)),
                surcharge,
            }
        })
        .collect();

    let nights = stay.nights();
    let total: f64 = lines.iter().map(NightLine::amount).sum();
    let per_night = total / f64::from(nights);

    Quote {
        nights,
        fields: PriceFields {
            price_per_night_no_vat: round2(net_of_vat(per_night, is_tourist)),
            price_per_night: round2(per_night),
            total_price: round2(total),
        },
        lines,
    }
}

/// The consistent triple implied by one figure, unrounded so derivations can
/// be chained without drift. Round with [`PriceFields::rounded`] for display.
pub fn derive(field: PriceField, value: f64, nights: u32, is_tourist: bool) -> PriceFields {
    let nights = f64::from(nights.max(1));
    let (per_night, no_vat, total) = match field {
        PriceField::TotalPrice => {
            let per_night = value / nights;
            (per_night, net_of_vat(per_night, is_tourist), value)
        }
        PriceField::PricePerNight => (value, net_of_vat(value, is_tourist), value * nights),
        PriceField::PricePerNightNoVat => {
            let per_night = gross_of_vat(value, is_tourist);
            (per_night, value, per_night * nights)
        }
    };
    PriceFields {
        price_per_night_no_vat: no_vat,
        price_per_night: per_night,
        total_price: total,
    }
}

fn propagate(
    current: PriceFields,
    edited: PriceField,
    value: f64,
    nights: u32,
    is_tourist: bool,
    locked: Option<PriceField>,
) -> PriceFields {
    let mut next = current;
    next.set(edited, value);
    if locked == Some(edited) {
        return next;
    }

    let derived = derive(edited, value, nights, is_tourist);
    for field in PriceField::ALL {
        if field != edited && Some(field) != locked {
            next.set(field, derived.get(field));
        }
    }
    next
}

/// Store a direct edit of `edited` and recompute the other figures from it.
///
/// The `locked` figure is never overwritten. Editing the locked figure itself
/// stores it without touching the others. Only the stored figures are
/// rounded; the others are derived from `value` as given.
pub fn apply_edit(
    current: PriceFields,
    edited: PriceField,
    value: f64,
    nights: u32,
    is_tourist: bool,
    locked: Option<PriceField>,
) -> PriceFields {
    propagate(current, edited, clamp_price(value), nights, is_tourist, locked).rounded()
}

/// Price state of one booking form.
///
/// Any change to room, dates, guests or the tourist flag requotes the stay,
/// unless a figure is locked: locking pauses automatic repricing.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceForm {
    room: Option<Room>,
    check_in: Option<NaiveDate>,
    check_out: Option<NaiveDate>,
    guests: u32,
    is_tourist: bool,
    /// Working figures, unrounded after edits; shown rounded.
    fields: PriceFields,
    locked: Option<PriceField>,
}

impl Default for PriceForm {
    fn default() -> Self {
        Self {
            room: None,
            check_in: None,
            check_out: None,
            guests: 1,
            is_tourist: false,
            fields: PriceFields::default(),
            locked: None,
        }
    }
}

impl PriceForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an existing booking for editing. Stored prices are kept as-is.
    pub fn for_booking(booking: &Booking, room: Option<Room>) -> Self {
        Self {
            room,
            check_in: Some(booking.check_in),
            check_out: Some(booking.check_out),
            guests: booking.guests,
            is_tourist: booking.is_tourist,
            fields: booking.prices(),
            locked: None,
        }
    }

    pub fn fields(&self) -> PriceFields {
        self.fields.rounded()
    }

    pub fn locked(&self) -> Option<PriceField> {
        self.locked
    }

    /// The form's stay, if both dates are set and in order.
    pub fn stay(&self) -> Option<Stay> {
        Stay::new(self.check_in?, self.check_out?).ok()
    }

    pub fn nights(&self) -> u32 {
        self.stay().map_or(1, |s| s.nights())
    }

    pub fn set_room(&mut self, room: Room) {
        self.room = Some(room);
        self.reprice();
    }

    pub fn set_dates(&mut self, check_in: NaiveDate, check_out: NaiveDate) {
        self.check_in = Some(check_in);
        self.check_out = Some(check_out);
        self.reprice();
    }

    pub fn set_guests(&mut self, guests: u32) {
        self.guests = guests.max(1);
        self.reprice();
    }

    pub fn set_tourist(&mut self, is_tourist: bool) {
        self.is_tourist = is_tourist;
        self.reprice();
    }

    pub fn lock(&mut self, field: Option<PriceField>) {
        self.locked = field;
    }

    /// Re-entering the figure on display continues from its unrounded value,
    /// so stepping through the fields does not drift the total.
    pub fn edit(&mut self, field: PriceField, value: f64) {
        let value = clamp_price(value);
        let value = if round2(value) == self.fields().get(field) {
            self.fields.get(field)
        } else {
            value
        };
        self.fields = propagate(
            self.fields,
            field,
            value,
            self.nights(),
            self.is_tourist,
            self.locked,
        );
    }

    fn reprice(&mut self) {
        if self.locked.is_some() {
            return;
        }
        let (Some(room), Some(stay)) = (self.room.as_ref(), self.stay()) else {
            return;
        };
        self.fields = quote(room, &stay, self.guests, self.is_tourist).fields;
    }
}
