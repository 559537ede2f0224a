//! Canonical datetime handling for everything that touches the stores.
//!
//! Stored timestamps are `"YYYY-MM-DD HH:MM"` in UTC (space separator, no
//! timezone suffix); dates without a time component are `"YYYY-MM-DD"`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{Result, VigilError};

pub const STORE_DATETIME: &str = "%Y-%m-%d %H:%M";
pub const STORE_DATE: &str = "%Y-%m-%d";

/// Format an instant in the canonical store form.
pub fn format_utc(dt: DateTime<Utc>) -> String {
    dt.format(STORE_DATETIME).to_string()
}

/// Format a date-only value in the canonical store form.
pub fn format_date(dt: DateTime<Utc>) -> String {
    dt.format(STORE_DATE).to_string()
}

/// Parse a canonical store string back into an instant.
///
/// Date-only values resolve to midnight UTC. Anything else is rejected —
/// the stores never hold RFC 3339 or zoned strings.
pub fn parse_when(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, STORE_DATETIME) {
        return Ok(Utc.from_utc_datetime(&ndt));
    }
    if let Ok(nd) = NaiveDate::parse_from_str(s, STORE_DATE) {
        let ndt = nd
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| VigilError::InvalidDatetime(s.to_string()))?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }
    Err(VigilError::InvalidDatetime(s.to_string()))
}

/// True when `s` parses as a canonical store datetime or date.
pub fn is_valid_when(s: &str) -> bool {
    parse_when(s).is_ok()
}

/// Convert a UTC instant into the wall-clock of `tz`.
pub fn to_local(t: DateTime<Utc>, tz: Tz) -> DateTime<Tz> {
    t.with_timezone(&tz)
}

/// Convert a zoned instant back to UTC.
pub fn to_utc(t: DateTime<Tz>) -> DateTime<Utc> {
    t.with_timezone(&Utc)
}

/// Resolve an IANA timezone name.
pub fn parse_tz(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| VigilError::InvalidTimezone(name.to_string()))
}
