// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time handling.
//!
//! All day boundaries in the streak engine are computed in the user's own
//! timezone. When a user has no timezone (or an unrecognised one) the fixed
//! reference offset [`DEFAULT_UTC_OFFSET_SECONDS`] is used instead.

use chrono::{
    DateTime, Days, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, SecondsFormat,
    TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;

/// Reference offset (+03:00) used when a user's timezone is absent or unknown.
pub const DEFAULT_UTC_OFFSET_SECONDS: i32 = 3 * 3600;

/// Step used to search forward for the first valid local instant of a day.
const GAP_SEARCH_STEP_MINUTES: u32 = 15;
/// Upper bound for the forward search (covers whole skipped days).
const GAP_SEARCH_LIMIT_HOURS: u32 = 48;

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC3339 timestamp into UTC.
pub fn parse_utc_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// The calendar day an instant falls on in some timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalDay {
    /// Local calendar date.
    pub day: NaiveDate,
    /// UTC instant of that date's local midnight.
    pub local_midnight_utc: DateTime<Utc>,
}

impl LocalDay {
    /// Day as `YYYY-MM-DD`.
    pub fn day_string(&self) -> String {
        format_day(self.day)
    }
}

/// Timezone used to anchor day boundaries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DayZone {
    Named(Tz),
    Fixed(FixedOffset),
}

impl DayZone {
    /// Resolve a user's timezone setting. Never fails.
    pub fn from_setting(timezone: Option<&str>) -> Self {
        match timezone.map(str::trim).filter(|s| !s.is_empty()) {
            Some(name) => match name.parse::<Tz>() {
                Ok(tz) => DayZone::Named(tz),
                Err(_) => {
                    tracing::debug!(timezone = name, "Unrecognised timezone, using default offset");
                    Self::fallback()
                }
            },
            None => Self::fallback(),
        }
    }

    /// The fixed reference offset.
    pub fn fallback() -> Self {
        let offset =
            FixedOffset::east_opt(DEFAULT_UTC_OFFSET_SECONDS).unwrap_or_else(|| Utc.fix());
        DayZone::Fixed(offset)
    }

    /// Local calendar date of `instant`.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        match self {
            DayZone::Named(tz) => instant.with_timezone(tz).date_naive(),
            DayZone::Fixed(offset) => instant.with_timezone(offset).date_naive(),
        }
    }

    /// Local wall-clock hour of `instant` (0-23).
    pub fn local_hour(&self, instant: DateTime<Utc>) -> u32 {
        match self {
            DayZone::Named(tz) => instant.with_timezone(tz).hour(),
            DayZone::Fixed(offset) => instant.with_timezone(offset).hour(),
        }
    }

    /// UTC instant at which `day` starts locally.
    ///
    /// If midnight does not exist locally (DST gap, skipped day), this is the
    /// first valid local instant after it.
    pub fn midnight_utc(&self, day: NaiveDate) -> DateTime<Utc> {
        let midnight = day.and_time(NaiveTime::MIN);
        match self {
            DayZone::Named(tz) => first_valid_instant(tz, midnight),
            DayZone::Fixed(offset) => first_valid_instant(offset, midnight),
        }
    }
}

fn first_valid_instant<Z: TimeZone>(zone: &Z, local: NaiveDateTime) -> DateTime<Utc> {
    let steps = GAP_SEARCH_LIMIT_HOURS * 60 / GAP_SEARCH_STEP_MINUTES;
    let mut candidate = local;
    for _ in 0..=steps {
        if let Some(instant) = zone.from_local_datetime(&candidate).earliest() {
            return instant.with_timezone(&Utc);
        }
        candidate += chrono::Duration::minutes(i64::from(GAP_SEARCH_STEP_MINUTES));
    }
    Utc.from_utc_datetime(&local)
}

/// Resolve the local day of `instant` in `timezone` (or the default offset).
pub fn resolve_local_day(instant: DateTime<Utc>, timezone: Option<&str>) -> LocalDay {
    let zone = DayZone::from_setting(timezone);
    let day = zone.local_date(instant);
    LocalDay {
        day,
        local_midnight_utc: zone.midnight_utc(day),
    }
}

/// Format a day as `YYYY-MM-DD`.
pub fn format_day(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// Parse a `YYYY-MM-DD` day.
pub fn parse_day(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// The calendar day before `day`.
pub fn day_before(day: NaiveDate) -> NaiveDate {
    day - Days::new(1)
}

/// `day` shifted `n` days into the past.
pub fn days_before(day: NaiveDate, n: u64) -> NaiveDate {
    day - Days::new(n)
}
