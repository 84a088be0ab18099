use ulid::Ulid;

use crate::model::*;

// ── Conflict test ─────────────────────────────────────────────────

/// First active booking on `room_id` that overlaps `stay`, skipping `exclude`.
///
/// Half-open test: a booking checking out on `stay.check_in` does not conflict.
/// Callers pass whatever candidate set they hold (a whole list or one room's
/// overlapping slice).
pub fn first_conflict<'a, I>(
    room_id: Ulid,
    stay: &Stay,
    exclude: Option<Ulid>,
    candidates: I,
) -> Option<&'a Booking>
where
    I: IntoIterator<Item = &'a Booking>,
{
    candidates.into_iter().find(|b| {
        b.room_id == room_id
            && b.is_active()
            && Some(b.id) != exclude
            && b.check_in < stay.check_out
            && b.check_out > stay.check_in
    })
}

pub fn is_available<'a, I>(room_id: Ulid, stay: &Stay, exclude: Option<Ulid>, candidates: I) -> bool
where
    I: IntoIterator<Item = &'a Booking>,
{
    first_conflict(room_id, stay, exclude, candidates).is_none()
}

/// Every active booking sharing a night with `booking` in the same room.
///
/// Informational: overlapping bookings are tolerated as data and flagged.
/// Symmetric, and empty for a cancelled booking.
pub fn find_overlaps<'a>(booking: &Booking, candidates: &'a [Booking]) -> Vec<&'a Booking> {
    if !booking.is_active() {
        return Vec::new();
    }
    let stay = booking.stay();
    candidates
        .iter()
        .filter(|b| {
            b.id != booking.id && b.room_id == booking.room_id && b.is_active() && b.stay().overlaps(&stay)
        })
        .collect()
}

// ── Free ranges ───────────────────────────────────────────────────

/// Maximal free date ranges of `room_id` inside `window`.
pub fn free_ranges<'a, I>(room_id: Ulid, window: &Stay, candidates: I) -> Vec<Stay>
where
    I: IntoIterator<Item = &'a Booking>,
{
    let mut taken: Vec<Stay> = candidates
        .into_iter()
        .filter(|b| b.room_id == room_id && b.is_active())
        .filter_map(|b| {
            let check_in = b.check_in.max(window.check_in);
            let check_out = b.check_out.min(window.check_out);
            (check_in < check_out).then_some(Stay { check_in, check_out })
        })
        .collect();
    taken.sort_by_key(|s| s.check_in);
    subtract_stays(&[*window], &merge_stays(&taken))
}

/// Merge sorted overlapping/adjacent stays into disjoint stays.
pub fn merge_stays(sorted: &[Stay]) -> Vec<Stay> {
    let mut merged: Vec<Stay> = Vec::new();
    for &stay in sorted {
        if let Some(last) = merged.last_mut()
            && stay.check_in <= last.check_out
        {
            last.check_out = last.check_out.max(stay.check_out);
            continue;
        }
        merged.push(stay);
    }
    merged
}

/// `base` minus `taken`; both sorted and disjoint.
pub fn subtract_stays(base: &[Stay], taken: &[Stay]) -> Vec<Stay> {
    let mut result = Vec::new();
    let mut ti = 0;

    for &b in base {
        let mut cursor = b.check_in;

        while ti < taken.len() && taken[ti].check_out <= cursor {
            ti += 1;
        }

        let mut j = ti;
        while j < taken.len() && taken[j].check_in < b.check_out {
            let t = &taken[j];
            if t.check_in > cursor {
                result.push(Stay {
                    check_in: cursor,
                    check_out: t.check_in,
                });
            }
            cursor = cursor.max(t.check_out);
            j += 1;
        }

        if cursor < b.check_out {
            result.push(Stay {
                check_in: cursor,
                check_out: b.check_out,
            });
        }
    }

    result
}
