use chrono::{DateTime, Datelike, FixedOffset, Timelike};

/// Monotonic millisecond tick. Wraps after ~49 days, so compare only via
/// [`elapsed`] and [`deadline_reached`].
pub type Millis = u32;

pub fn elapsed(now: Millis, since: Millis) -> Millis {
    now.wrapping_sub(since)
}

pub fn deadline_reached(now: Millis, deadline: Millis) -> bool {
    (now.wrapping_sub(deadline) as i32) >= 0
}

pub fn interval_due(now: Millis, last: Option<Millis>, interval_ms: Millis) -> bool {
    last.map(|last| elapsed(now, last) >= interval_ms)
        .unwrap_or(true)
}

pub fn minute_of_day(now: &DateTime<FixedOffset>) -> u16 {
    now.hour() as u16 * 60 + now.minute() as u16
}

/// A clock still sitting near the epoch has not been synced yet.
pub fn is_wall_clock_synced(now: &DateTime<FixedOffset>) -> bool {
    now.year() >= 2024
}
