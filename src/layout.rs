use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::datemath;
use crate::engine::{EngineError, find_overlaps};
use crate::limits::MAX_GRID_DAYS;
use crate::model::*;

/// Reading direction of the calendar. Day 0 sits at the right edge in RTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Rtl,
    Ltr,
}

/// `days` consecutive calendar columns starting at `first_day`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridWindow {
    first_day: NaiveDate,
    days: u32,
}

/// Where a booking bar lands in a window. Indices are inclusive column numbers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub start_index: u32,
    pub end_index: u32,
    pub display_days: u32,
    pub offset_percent: f64,
    pub width_percent: f64,
    /// The stay starts before the window.
    pub clipped_start: bool,
    /// The stay runs past the window.
    pub clipped_end: bool,
}

impl GridWindow {
    pub fn new(first_day: NaiveDate, days: u32) -> Result<Self, EngineError> {
        if days == 0 {
            return Err(EngineError::Validation("calendar window needs at least one day".into()));
        }
        if days > MAX_GRID_DAYS {
            return Err(EngineError::LimitExceeded("calendar window too wide"));
        }
        datemath::add_nights(first_day, days)
            .ok_or_else(|| EngineError::Validation("calendar window out of range".into()))?;
        Ok(Self { first_day, days })
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first_day
    }

    pub fn last_day(&self) -> NaiveDate {
        self.first_day + chrono::Days::new(u64::from(self.days - 1))
    }

    pub fn day_count(&self) -> u32 {
        self.days
    }

    /// Column of `date`, if it falls inside the window.
    pub fn index_of(&self, date: NaiveDate) -> Option<u32> {
        let idx = datemath::days_between(self.first_day, date);
        (0..i64::from(self.days))
            .contains(&idx)
            .then_some(idx as u32)
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        self.first_day.iter_days().take(self.days as usize)
    }

    /// The window as a stay: every column is one night.
    pub fn as_stay(&self) -> Stay {
        Stay {
            check_in: self.first_day,
            check_out: self.first_day + chrono::Days::new(u64::from(self.days)),
        }
    }

    /// Map `stay` onto the window, or `None` if none of it is visible.
    /// A stay checking out on the first day still shows in column 0.
    pub fn place(&self, stay: &Stay, direction: Direction) -> Option<Placement> {
        let last = self.last_day();
        if stay.check_out < self.first_day || stay.check_in > last {
            return None;
        }

        let max_index = self.days - 1;
        let start = self.index_of(stay.check_in).unwrap_or(0);
        let end = if stay.nights() == 1 {
            start
        } else {
            match self.index_of(stay.check_out) {
                Some(idx) => idx.saturating_sub(1),
                None => max_index,
            }
        }
        .clamp(start, max_index);

        let display_days = end - start + 1;
        let d = f64::from(self.days);
        let offset_percent = match direction {
            Direction::Rtl => f64::from(self.days - start - display_days) / d * 100.0,
            Direction::Ltr => f64::from(start) / d * 100.0,
        };

        Some(Placement {
            start_index: start,
            end_index: end,
            display_days,
            offset_percent,
            width_percent: f64::from(display_days) / d * 100.0,
            clipped_start: stay.check_in < self.first_day,
            clipped_end: stay.check_out > self.as_stay().check_out,
        })
    }
}

// ── Calendar grid ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub booking: Booking,
    pub placement: Placement,
    /// Other visible bookings in this row sharing a night with this one.
    pub overlaps_with: Vec<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomRow {
    pub room: Room,
    pub bars: Vec<Bar>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarGrid {
    pub first_day: NaiveDate,
    pub days: u32,
    pub direction: Direction,
    pub rows: Vec<RoomRow>,
}

/// One row per room (in the given order) with its bookings laid out as bars.
/// Cancelled bookings and bookings outside the window are left out.
pub fn build_calendar(
    window: &GridWindow,
    direction: Direction,
    rooms: &[Room],
    bookings: &[Booking],
) -> CalendarGrid {
    let row_of: HashMap<Ulid, usize> = rooms.iter().enumerate().map(|(i, r)| (r.id, i)).collect();
    let mut visible: Vec<Vec<(&Booking, Placement)>> = vec![Vec::new(); rooms.len()];

    for booking in bookings.iter().filter(|b| b.is_active()) {
        let Some(&row) = row_of.get(&booking.room_id) else {
            tracing::warn!(
                "calendar: booking {} references unknown room {}, skipped",
                booking.id,
                booking.room_id
            );
            continue;
        };
        if let Some(placement) = window.place(&booking.stay(), direction) {
            visible[row].push((booking, placement));
        }
    }

    let rows = rooms
        .iter()
        .zip(visible)
        .map(|(room, mut placed)| {
            placed.sort_by_key(|(b, _)| (b.check_in, b.id));
            let in_row: Vec<Booking> = placed.iter().map(|(b, _)| (*b).clone()).collect();
            let bars = placed
                .into_iter()
                .map(|(booking, placement)| Bar {
                    overlaps_with: find_overlaps(booking, &in_row).iter().map(|b| b.id).collect(),
                    booking: booking.clone(),
                    placement,
                })
                .collect();
            RoomRow {
                room: room.clone(),
                bars,
            }
        })
        .collect();

    CalendarGrid {
        first_day: window.first_day(),
        days: window.day_count(),
        direction,
        rows,
    }
}
