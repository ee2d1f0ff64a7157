//! Minute-grain time helpers.

use chrono::{DateTime, Utc};

pub const MICROS_PER_MINUTE: i64 = 60_000_000;

/// Truncate an instant to the start of its minute.
pub fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    let micros = ts.timestamp_micros();
    let floored = micros - micros.rem_euclid(MICROS_PER_MINUTE);
    DateTime::from_timestamp_micros(floored).unwrap_or(ts)
}

pub fn is_minute_aligned(ts: DateTime<Utc>) -> bool {
    ts.timestamp_micros().rem_euclid(MICROS_PER_MINUTE) == 0
}

/// Count of minutes `m` with `start <= m < end`, stepping one minute from `start`.
pub fn minutes_between(start: DateTime<Utc>, end: DateTime<Utc>) -> usize {
    let span = end.timestamp_micros() - start.timestamp_micros();
    if span <= 0 {
        return 0;
    }
    ((span + MICROS_PER_MINUTE - 1) / MICROS_PER_MINUTE) as usize
}

pub fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}
