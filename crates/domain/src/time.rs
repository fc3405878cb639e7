//! Time and timestamp helpers.

use chrono::{DateTime, Local, Timelike, Utc};

/// UTC timestamp used for `createdAt`, `lastUsed`, action start/end, etc.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Fractional hour of day (`0.0..24.0`) of `ts` in the given timezone.
#[must_use]
pub fn hour_of_day<Tz: chrono::TimeZone>(ts: &DateTime<Tz>) -> f64 {
    f64::from(ts.hour()) + f64::from(ts.minute()) / 60.0 + f64::from(ts.second()) / 3600.0
}

/// Fractional hour of day of `ts` in the host's local timezone.
#[must_use]
pub fn local_hour_of_day(ts: Timestamp) -> f64 {
    hour_of_day(&ts.with_timezone(&Local))
}
