// File: ./src/clock.rs
//! Calendar and wall-clock helpers used by the refresh pipeline.
//!
//! Everything here is pure except [`SystemClock`] and [`today`], which read the
//! device clock. Dates are always taken from local components so that the
//! staleness comparison never drifts across UTC midnight.
use crate::error::PrayerError;
use crate::model::ClockTime;
use chrono::{
    DateTime, Duration, FixedOffset, Local, NaiveDate, NaiveDateTime, Offset, TimeZone, Timelike,
    Utc,
};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;

static STRICT_CLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{2}):(\d{2})$").expect("static regex"));

// The lookup sometimes decorates values, e.g. "04:31 (WIB)".
// Digits may be glued to letters ("05:03AM") but not to other digits.
static EMBEDDED_CLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\D)(\d{1,2}):(\d{2})(?:\D|$)").expect("static regex"));

/// Source of "now" for components that need the wall clock.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<FixedOffset>;

    /// First instant strictly after `after` at which the device wall clock
    /// reads `at`. The UTC offset is resolved for the target date, so a daily
    /// time keeps its wall-clock position across DST changes.
    fn next_wall_clock(&self, at: ClockTime, after: DateTime<Utc>) -> DateTime<Utc>;
}

/// Reads the device clock in the device time zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }

    fn next_wall_clock(&self, at: ClockTime, after: DateTime<Utc>) -> DateTime<Utc> {
        next_occurrence(at, &after.with_timezone(&Local)).with_timezone(&Utc)
    }
}

/// Calendar date of `now` as seen on its own wall clock.
pub fn local_date<T: TimeZone>(now: &DateTime<T>) -> NaiveDate {
    now.date_naive()
}

/// Device-local calendar date.
pub fn today() -> NaiveDate {
    local_date(&Local::now())
}

/// `YYYY-MM-DD`
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Extracts the first `H:MM` / `HH:MM` in `raw` and validates it.
pub fn normalize_clock(raw: &str) -> Result<ClockTime, PrayerError> {
    let caps = EMBEDDED_CLOCK
        .captures(raw)
        .ok_or_else(|| PrayerError::Format(format!("no clock value in '{}'", raw)))?;
    let padded = format!("{:0>2}:{}", &caps[1], &caps[2]);
    parse_clock(&padded)
}

/// Parses a strict `HH:MM` 24-hour value.
pub fn parse_clock(hhmm: &str) -> Result<ClockTime, PrayerError> {
    let caps = STRICT_CLOCK
        .captures(hhmm)
        .ok_or_else(|| PrayerError::Format(format!("'{}' is not HH:MM", hhmm)))?;
    let hour: u8 = caps[1]
        .parse()
        .map_err(|_| PrayerError::Format(format!("bad hour in '{}'", hhmm)))?;
    let minute: u8 = caps[2]
        .parse()
        .map_err(|_| PrayerError::Format(format!("bad minute in '{}'", hhmm)))?;
    ClockTime::new(hour, minute)
}

/// True when `now` falls inside the minute named by `clock`.
pub fn is_same_minute<T: TimeZone>(clock: ClockTime, now: &DateTime<T>) -> bool {
    now.hour() == u32::from(clock.hour()) && now.minute() == u32::from(clock.minute())
}

/// Next instant, strictly after `now`, at which `now`'s wall clock reads `clock`.
pub fn next_occurrence<T: TimeZone>(clock: ClockTime, now: &DateTime<T>) -> DateTime<T> {
    let tz = now.timezone();
    let today = local_date(now);
    let candidate = resolve_local(&tz, at_clock(today, clock));
    if candidate > *now {
        return candidate;
    }
    let tomorrow = today + Duration::days(1);
    resolve_local(&tz, at_clock(tomorrow, clock))
}

fn at_clock(date: NaiveDate, clock: ClockTime) -> NaiveDateTime {
    date.and_hms_opt(u32::from(clock.hour()), u32::from(clock.minute()), 0)
        .unwrap_or_else(|| date.and_time(chrono::NaiveTime::MIN))
}

// DST gaps have no mapping; the wall clock jumps, so fire one hour later.
fn resolve_local<T: TimeZone>(tz: &T, naive: NaiveDateTime) -> DateTime<T> {
    match tz.from_local_datetime(&naive).earliest() {
        Some(dt) => dt,
        None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .unwrap_or_else(|| tz.from_utc_datetime(&naive)),
    }
}

/// Compares the device offset against the lookup time zone at `now`.
///
/// Returns `Some((device, lookup))` when they differ.
pub fn timezone_offset_mismatch(
    timezone: &str,
    now: &DateTime<FixedOffset>,
) -> Result<Option<(FixedOffset, FixedOffset)>, PrayerError> {
    let tz: Tz = timezone
        .parse()
        .map_err(|_| PrayerError::Format(format!("unknown time zone '{}'", timezone)))?;
    let lookup = now.with_timezone(&tz).offset().fix();
    let device = *now.offset();
    if lookup == device {
        Ok(None)
    } else {
        Ok(Some((device, lookup)))
    }
}
