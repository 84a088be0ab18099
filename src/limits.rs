// Hard caps applied at the engine and wire boundaries.

pub const MAX_LOCATIONS: usize = 64;
pub const MAX_LOCATION_NAME_LEN: usize = 64;

pub const MAX_ROOMS_PER_LOCATION: usize = 500;
pub const MAX_BOOKINGS_PER_ROOM: usize = 20_000;

/// Guest names, room numbers, categories.
pub const MAX_NAME_LEN: usize = 200;
pub const MAX_NOTES_LEN: usize = 4_000;
pub const MAX_SEARCH_LEN: usize = 200;

pub const MAX_STAY_NIGHTS: u32 = 365;
pub const MAX_GRID_DAYS: u32 = 366;
pub const MAX_QUERY_WINDOW_DAYS: i64 = 3 * 366;
pub const MAX_GUESTS: u32 = 50;

pub const MIN_VALID_YEAR: i32 = 2000;
pub const MAX_VALID_YEAR: i32 = 2100;

/// Max bytes in one wire request line.
pub const MAX_LINE_LEN: usize = 64 * 1024;
pub const MAX_WATCHES_PER_CONNECTION: usize = 64;

/// Attempts to pin a booking's room when a concurrent move relocates it mid-lookup.
pub const LOCK_RETRIES: usize = 3;
